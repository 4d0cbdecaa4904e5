//! Definition payloads as supplied per sync request.
//!
//! Structured content follows the Yomitan shape: a node is a string, an array
//! of nodes, or an object carrying a `tag`.  Payloads are validated into
//! [`Node`] trees once; anything that does not fit is reported as malformed and
//! handled by the renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Definition {
    Simple {
        content: String,
        #[serde(default, rename = "dictionaryName", skip_serializing_if = "Option::is_none")]
        dictionary_name: Option<String>,
    },
    Structured {
        /// Either a JSON value or a string holding serialized JSON.
        content: Value,
        #[serde(default, rename = "dictionaryName", skip_serializing_if = "Option::is_none")]
        dictionary_name: Option<String>,
    },
}

impl Definition {
    pub fn simple(content: impl Into<String>, dictionary_name: Option<&str>) -> Self {
        Self::Simple {
            content: content.into(),
            dictionary_name: dictionary_name.map(ToString::to_string),
        }
    }

    pub fn structured(content: Value, dictionary_name: Option<&str>) -> Self {
        Self::Structured {
            content,
            dictionary_name: dictionary_name.map(ToString::to_string),
        }
    }

    pub fn dictionary_name(&self) -> Option<&str> {
        match self {
            Self::Simple { dictionary_name, .. } | Self::Structured { dictionary_name, .. } => {
                dictionary_name.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Fragment(Vec<Node>),
    Image(ImageNode),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageNode {
    pub path: String,
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub size_units: Option<String>,
    pub title: Option<String>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub content: Option<Box<Node>>,
    pub style: Option<Map<String, Value>>,
    pub data: Option<Map<String, Value>>,
    pub href: Option<String>,
    pub title: Option<String>,
    pub lang: Option<String>,
    pub col_span: Option<u64>,
    pub row_span: Option<u64>,
}

/// Why a structured payload could not be turned into a [`Node`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedNode(pub String);

impl Node {
    /// Parse a structured definition's `content`.  A string is treated as
    /// serialized JSON; a string that is not JSON is malformed.
    pub fn parse_content(content: &Value) -> Result<Node, MalformedNode> {
        match content {
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw)
                    .map_err(|err| MalformedNode(format!("not JSON: {err}")))?;
                Node::from_value(&parsed)
            }
            other => Node::from_value(other),
        }
    }

    pub fn from_value(value: &Value) -> Result<Node, MalformedNode> {
        match value {
            Value::Null => Ok(Node::Fragment(Vec::new())),
            Value::String(text) => Ok(Node::Text(text.clone())),
            Value::Array(items) => items
                .iter()
                .map(Node::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Node::Fragment),
            Value::Object(object) => Node::from_object(object),
            other => Err(MalformedNode(format!("unexpected node {other}"))),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Result<Node, MalformedNode> {
        if let Some(tag) = object.get("tag").and_then(Value::as_str) {
            if tag == "img" {
                return image_node(object).map(Node::Image);
            }
            return element(tag, object).map(Node::Element);
        }

        match object.get("type").and_then(Value::as_str) {
            Some("structured-content") => {
                Node::from_value(object.get("content").unwrap_or(&Value::Null))
            }
            Some("image") => image_node(object).map(Node::Image),
            Some("text") => Ok(Node::Text(
                optional_string(object, "text").unwrap_or_default(),
            )),
            _ => Err(MalformedNode("object node without tag".to_string())),
        }
    }
}

fn image_node(object: &Map<String, Value>) -> Result<ImageNode, MalformedNode> {
    let path = object
        .get("path")
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| MalformedNode("image node without path".to_string()))?;
    Ok(ImageNode {
        path: path.to_string(),
        height: optional_number(object, "height"),
        width: optional_number(object, "width"),
        size_units: optional_string(object, "sizeUnits"),
        title: optional_string(object, "title"),
        alt: optional_string(object, "alt"),
    })
}

fn element(tag: &str, object: &Map<String, Value>) -> Result<Element, MalformedNode> {
    let content = match object.get("content") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Box::new(Node::from_value(value)?)),
    };
    Ok(Element {
        tag: tag.to_string(),
        content,
        style: optional_object(object, "style"),
        data: optional_object(object, "data"),
        href: optional_string(object, "href"),
        title: optional_string(object, "title"),
        lang: optional_string(object, "lang"),
        col_span: object.get("colSpan").and_then(Value::as_u64),
        row_span: object.get("rowSpan").and_then(Value::as_u64),
    })
}

// Optional attributes: a value of the wrong type is dropped, the node is kept.

fn optional_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            debug!(key, %other, "ignoring non-string attribute");
            None
        }
    }
}

fn optional_number(object: &Map<String, Value>, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::Null => None,
        other => {
            debug!(key, %other, "ignoring non-numeric attribute");
            None
        }
    }
}

fn optional_object(object: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match object.get(key)? {
        Value::Object(map) => Some(map.clone()),
        Value::Null => None,
        other => {
            debug!(key, %other, "ignoring non-object attribute");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count_images(node: &Node) -> usize {
        match node {
            Node::Text(_) => 0,
            Node::Image(_) => 1,
            Node::Fragment(children) => children.iter().map(count_images).sum(),
            Node::Element(element) => element.content.as_deref().map_or(0, count_images),
        }
    }

    #[test]
    fn definition_wire_format() {
        let raw = json!([
            { "type": "simple", "content": "to hit", "dictionaryName": "JMdict" },
            { "type": "structured", "content": { "tag": "span", "content": "x" } },
        ]);
        let defs: Vec<Definition> = serde_json::from_value(raw).unwrap();
        assert_eq!(defs[0], Definition::simple("to hit", Some("JMdict")));
        assert_eq!(defs[0].dictionary_name(), Some("JMdict"));
        assert_eq!(defs[1].dictionary_name(), None);
    }

    #[test]
    fn parses_nested_tree_with_images() {
        let content = json!({
            "type": "structured-content",
            "content": [
                "lead ",
                { "tag": "div", "content": [
                    { "tag": "img", "path": "img/a.png", "height": 2, "sizeUnits": "em" },
                    { "tag": "span", "style": { "fontWeight": "bold" }, "content": "bold" },
                ]},
                { "type": "image", "path": "img/b.png" },
            ]
        });
        let node = Node::parse_content(&content).unwrap();
        assert_eq!(count_images(&node), 2);
    }

    #[test]
    fn string_content_is_parsed_as_json() {
        let content = Value::String(r#"{"tag":"img","path":"a.png"}"#.to_string());
        let node = Node::parse_content(&content).unwrap();
        assert!(matches!(node, Node::Image(ref img) if img.path == "a.png"));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(Node::parse_content(&Value::String("{not json".to_string())).is_err());
        assert!(Node::parse_content(&json!({ "tag": "img" })).is_err());
        assert!(Node::parse_content(&json!({ "content": "no tag" })).is_err());
        assert!(Node::parse_content(&json!(42)).is_err());
        assert!(Node::parse_content(&json!({ "tag": "img", "path": 7 })).is_err());
    }

    #[test]
    fn mistyped_optional_attributes_are_dropped() {
        let node = Node::parse_content(&json!([
            { "tag": "img", "path": "a.png", "height": "tall", "width": 3, "alt": 5 },
            { "tag": "span", "style": "bold", "lang": ["ja"], "content": "x" },
        ]))
        .unwrap();
        let Node::Fragment(children) = node else {
            panic!("expected fragment");
        };
        assert!(matches!(
            &children[0],
            Node::Image(img) if img.path == "a.png" && img.height.is_none() && img.width == Some(3.0) && img.alt.is_none()
        ));
        assert!(matches!(
            &children[1],
            Node::Element(el) if el.style.is_none() && el.lang.is_none() && el.content.is_some()
        ));
    }
}
