//! Canonical, filesystem-safe media filenames.
//!
//! A filename is derived from the dictionary name *and* the relative path, so
//! two dictionaries shipping `img/1.png` never share a media file.

use std::sync::LazyLock;

use regex::Regex;

use cardsync_config::{ExtensionPolicySetting, MediaConfig};

use crate::hash::{dictionary_hash, dictionary_name_or_unknown};

pub const DEFAULT_PREFIX: &str = "jreader_";
pub const DEFAULT_EXTENSION: &str = "png";

/// Extensions kept as-is under [`ExtensionPolicy::PreserveOriginal`].
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "avif", "bmp"];

// Forward slashes, backslashes and escaped (doubled) backslashes.
static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\\/]+").expect("separator regex"));

static UNSAFE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[/.<>:"|?*\[\](){}]|\s+"#).expect("unsafe filename character regex")
});

static UNDERSCORE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("underscore regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtensionPolicy {
    /// Canonicalize the whole path, original extension included, then append
    /// the fixed extension.
    #[default]
    Fixed,
    /// Keep a recognised image extension and canonicalize only the stem.
    PreserveOriginal,
}

impl From<&ExtensionPolicySetting> for ExtensionPolicy {
    fn from(setting: &ExtensionPolicySetting) -> Self {
        match setting {
            ExtensionPolicySetting::Fixed => Self::Fixed,
            ExtensionPolicySetting::PreserveOriginal => Self::PreserveOriginal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    prefix: String,
    extension: String,
    policy: ExtensionPolicy,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            policy: ExtensionPolicy::Fixed,
        }
    }
}

impl Canonicalizer {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>, policy: ExtensionPolicy) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            policy,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.filename_prefix.clone(),
            config.extension.clone(),
            ExtensionPolicy::from(&config.extension_policy),
        )
    }

    /// `{prefix}{dictHash}_{dictionary}_{path}.{ext}` with every part
    /// sanitized.  The hash keeps names apart whose sanitized forms coincide
    /// (`Test Dictionary` vs `Test_Dictionary`).
    ///
    /// Paths get no such protection: within one dictionary, `a b.png`,
    /// `a_b.png` and `a/b.png` all map to the same filename.  Whichever is
    /// stored first wins and the others become cache hits.
    pub fn filename(&self, dictionary_name: &str, relative_path: &str) -> String {
        let dictionary = dictionary_name_or_unknown(Some(dictionary_name));
        let path = SEPARATOR_RUN.replace_all(relative_path, "/");

        let (stem, extension) = match self.policy {
            ExtensionPolicy::Fixed => (&*path, self.extension.clone()),
            ExtensionPolicy::PreserveOriginal => match image_extension(&path) {
                Some((stem, ext)) => (stem, ext),
                None => (&*path, self.extension.clone()),
            },
        };

        let body = sanitize(&format!(
            "{}_{}/{}",
            dictionary_hash(dictionary),
            dictionary,
            stem
        ));
        format!("{}{}.{}", self.prefix, body, extension)
    }
}

/// Split a recognised image extension off the last path segment.
fn image_extension(path: &str) -> Option<(&str, String)> {
    let last_segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let dot = path[last_segment_start..].rfind('.')? + last_segment_start;
    let ext = path[dot + 1..].to_ascii_lowercase();
    if dot == last_segment_start || !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some((&path[..dot], ext))
}

fn sanitize(raw: &str) -> String {
    let replaced = UNSAFE_RUN.replace_all(raw, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// Relative path as sent to the URL signer: forward slashes only, no empty
/// segments, no leading `/` or `./`.
pub fn normalize_relative_path(path: &str) -> String {
    SEPARATOR_RUN
        .replace_all(path.trim(), "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
