use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::normalize_relative_path;
use crate::hash::{dictionary_hash, dictionary_name_or_unknown};

/// Literal prefix of every placeholder token.
pub const PLACEHOLDER_PREFIX: &str = "ANKI_IMAGE_PLACEHOLDER_";

/// Field name -> rendered text for one note.
pub type NoteFieldSet = BTreeMap<String, String>;

/// `ANKI_IMAGE_PLACEHOLDER_{dictHash}_{index}`
pub fn placeholder_token(dict_hash: &str, index: usize) -> String {
    format!("{PLACEHOLDER_PREFIX}{dict_hash}_{index}")
}

/// Identity of an image for fetch, existence and cache purposes.
///
/// The relative path is stored normalized, so `a\b.png` and `a/b.png` under
/// the same dictionary are one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalImageKey {
    pub dictionary_name: String,
    pub relative_path: String,
}

impl CanonicalImageKey {
    pub fn new(dictionary_name: &str, relative_path: &str) -> Self {
        Self {
            dictionary_name: dictionary_name_or_unknown(Some(dictionary_name)).to_string(),
            relative_path: normalize_relative_path(relative_path),
        }
    }
}

impl fmt::Display for CanonicalImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dictionary_name, self.relative_path)
    }
}

/// One embedded image encountered while rendering one field.
///
/// `index` is local to the (dictionary hash, field) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub dictionary_name: String,
    pub relative_path: String,
    pub index: usize,
}

impl ImageReference {
    pub fn dict_hash(&self) -> String {
        dictionary_hash(&self.dictionary_name)
    }

    pub fn token(&self) -> String {
        placeholder_token(&self.dict_hash(), self.index)
    }

    pub fn key(&self) -> CanonicalImageKey {
        CanonicalImageKey::new(&self.dictionary_name, &self.relative_path)
    }
}
