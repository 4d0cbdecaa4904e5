//! Definition -> note field HTML.
//!
//! Images are never referenced directly while rendering.  Each one gets a
//! placeholder token and an [`ImageReference`]; the substitution pass swaps
//! tokens for stored filenames once the media sync has settled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::definition::{Definition, Element, ImageNode, MalformedNode, Node};
use crate::hash::{dictionary_hash, dictionary_name_or_unknown};
use crate::schema::{ImageReference, PLACEHOLDER_PREFIX, placeholder_token};

const CONTAINER_TAGS: &[&str] = &[
    "span", "div", "ol", "ul", "li", "table", "thead", "tbody", "tfoot", "tr", "td", "th",
    "ruby", "rt", "rp", "details", "summary", "sub", "sup",
];

/// Which definitions feed a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSelector {
    /// First definition only.
    Primary,
    /// Every definition, concatenated without separators.
    Glossary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedField {
    pub text: String,
    pub references: Vec<ImageReference>,
}

/// Render one field.  Pure: the image counters live in this call only, so
/// rendering the same input twice yields the same text and references.
pub fn render(definitions: &[Definition], selector: FieldSelector) -> RenderedField {
    let selected = match selector {
        FieldSelector::Primary => &definitions[..definitions.len().min(1)],
        FieldSelector::Glossary => definitions,
    };

    let mut renderer = Renderer::default();
    for definition in selected {
        renderer.definition(definition);
    }
    RenderedField {
        text: renderer.out,
        references: renderer.references,
    }
}

#[derive(Default)]
struct Renderer {
    out: String,
    references: Vec<ImageReference>,
    /// dictHash -> next image index within this field.
    next_index: HashMap<String, usize>,
}

impl Renderer {
    fn definition(&mut self, definition: &Definition) {
        let dictionary = dictionary_name_or_unknown(definition.dictionary_name());
        match definition {
            Definition::Simple { content, .. } => {
                self.open_attribution(dictionary);
                push_text(&mut self.out, content);
                self.out.push_str("</div>");
            }
            Definition::Structured { content, .. } => match Node::parse_content(content) {
                Ok(node) => {
                    let dict_hash = dictionary_hash(dictionary);
                    self.open_attribution(dictionary);
                    self.node(&node, dictionary, &dict_hash);
                    self.out.push_str("</div>");
                }
                Err(MalformedNode(reason)) => {
                    warn!(dictionary, %reason, "malformed structured definition; rendering as text");
                    let literal = match content {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    push_text(&mut self.out, &literal);
                }
            },
        }
    }

    fn open_attribution(&mut self, dictionary: &str) {
        self.out.push_str("<div class=\"dictionary-entry\" data-dictionary=\"");
        push_attr(&mut self.out, dictionary);
        self.out.push_str("\">");
    }

    fn node(&mut self, node: &Node, dictionary: &str, dict_hash: &str) {
        match node {
            Node::Text(text) => push_text(&mut self.out, text),
            Node::Fragment(children) => {
                for child in children {
                    self.node(child, dictionary, dict_hash);
                }
            }
            Node::Image(image) => self.image(image, dictionary, dict_hash),
            Node::Element(element) => self.element(element, dictionary, dict_hash),
        }
    }

    fn image(&mut self, image: &ImageNode, dictionary: &str, dict_hash: &str) {
        let counter = self.next_index.entry(dict_hash.to_string()).or_insert(0);
        let index = *counter;
        *counter += 1;

        self.out.push_str("<img src=\"");
        self.out.push_str(&placeholder_token(dict_hash, index));
        self.out.push('"');
        if let Some(alt) = &image.alt {
            push_attribute(&mut self.out, "alt", alt);
        }
        if let Some(title) = &image.title {
            push_attribute(&mut self.out, "title", title);
        }

        let unit = match image.size_units.as_deref() {
            Some("em") => "em",
            _ => "px",
        };
        let mut style = Vec::new();
        if let Some(height) = image.height {
            style.push(format!("height: {height}{unit};"));
        }
        if let Some(width) = image.width {
            style.push(format!("width: {width}{unit};"));
        }
        if !style.is_empty() {
            push_attribute(&mut self.out, "style", &style.join(" "));
        }
        self.out.push('>');

        self.references.push(ImageReference {
            dictionary_name: dictionary.to_string(),
            relative_path: image.path.clone(),
            index,
        });
    }

    fn element(&mut self, element: &Element, dictionary: &str, dict_hash: &str) {
        if element.tag == "br" {
            self.out.push_str("<br>");
            return;
        }

        let tag = if element.tag == "a" {
            "a"
        } else if CONTAINER_TAGS.contains(&element.tag.as_str()) {
            element.tag.as_str()
        } else {
            "span"
        };

        self.out.push('<');
        self.out.push_str(tag);
        if tag == "a" {
            if let Some(href) = &element.href {
                push_attribute(&mut self.out, "href", href);
            }
        }
        if let Some(style) = element.style.as_ref().map(css_declarations) {
            if !style.is_empty() {
                push_attribute(&mut self.out, "style", &style);
            }
        }
        if let Some(lang) = &element.lang {
            push_attribute(&mut self.out, "lang", lang);
        }
        if let Some(title) = &element.title {
            push_attribute(&mut self.out, "title", title);
        }
        if matches!(tag, "td" | "th") {
            if let Some(span) = element.col_span {
                push_attribute(&mut self.out, "colspan", &span.to_string());
            }
            if let Some(span) = element.row_span {
                push_attribute(&mut self.out, "rowspan", &span.to_string());
            }
        }
        if let Some(data) = &element.data {
            for (key, value) in data {
                if let Some(value) = scalar(value) {
                    push_attribute(&mut self.out, &format!("data-sc-{}", kebab_case(key)), &value);
                }
            }
        }
        self.out.push('>');

        if let Some(content) = &element.content {
            self.node(content, dictionary, dict_hash);
        }

        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push('>');
    }
}

/// `{"fontWeight": "bold", "marginTop": 0.5}` -> `font-weight: bold; margin-top: 0.5em;`
fn css_declarations(style: &Map<String, Value>) -> String {
    style
        .iter()
        .filter_map(|(key, value)| {
            let property = kebab_case(key);
            let value = match value {
                Value::Number(n) if property.starts_with("margin") || property.starts_with("padding") => {
                    format!("{n}em")
                }
                other => scalar(other)?,
            };
            Some(format!("{property}: {value};"))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn push_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    push_attr(out, value);
    out.push('"');
}

// Text and attribute values never carry a live token: the prefix's first
// letter is written as a character reference, which renders the same but is
// invisible to substitution.
const ESCAPED_PREFIX_HEAD: &str = "&#65;";

fn push_text(out: &mut String, text: &str) {
    for (i, c) in text.char_indices() {
        match c {
            'A' if text[i..].starts_with(PLACEHOLDER_PREFIX) => out.push_str(ESCAPED_PREFIX_HEAD),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("<br>"),
            other => out.push(other),
        }
    }
}

fn push_attr(out: &mut String, value: &str) {
    for (i, c) in value.char_indices() {
        match c {
            'A' if value[i..].starts_with(PLACEHOLDER_PREFIX) => out.push_str(ESCAPED_PREFIX_HEAD),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
}
