//! Final token replacement, field by field.
//!
//! A token is replaced only by the filename of the exact canonical key that
//! produced it in that field.  Matching is on the whole
//! `{dictHash}_{index}` token, never on the index alone, so one dictionary's
//! image can never land in another dictionary's slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::pipeline::Materialized;
use crate::schema::{CanonicalImageKey, ImageReference, NoteFieldSet};

// Whole tokens only: the greedy index keeps `_1` from matching inside `_10`.
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ANKI_IMAGE_PLACEHOLDER_[0-9a-z]+_[0-9]+").expect("placeholder token regex")
});

/// Replace every resolved token in every field.  Tokens whose key failed or
/// was never attempted are left byte-for-byte.
pub fn finalize(
    mut fields: NoteFieldSet,
    references_by_field: &BTreeMap<String, Vec<ImageReference>>,
    resolved: &HashMap<CanonicalImageKey, Materialized>,
) -> NoteFieldSet {
    for (field, references) in references_by_field {
        let Some(text) = fields.get_mut(field) else {
            continue;
        };

        let replacements: HashMap<String, &str> = references
            .iter()
            .filter_map(|reference| {
                let filename = resolved.get(&reference.key())?.resolved_filename()?;
                Some((reference.token(), filename))
            })
            .collect();
        if replacements.is_empty() {
            continue;
        }

        let replaced = TOKEN_REGEX.replace_all(text, |caps: &Captures<'_>| {
            let token = &caps[0];
            replacements
                .get(token)
                .map(|filename| (*filename).to_string())
                .unwrap_or_else(|| token.to_string())
        });
        *text = replaced.into_owned();
    }
    fields
}
