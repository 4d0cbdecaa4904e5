pub mod canonical;
pub mod definition;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod resolver;
pub mod schema;
pub mod substitute;
pub mod sync;

pub use canonical::{Canonicalizer, ExtensionPolicy, normalize_relative_path};
pub use definition::{Definition, Node};
pub use error::MediaError;
pub use hash::{UNKNOWN_DICTIONARY, dictionary_hash};
pub use pipeline::{Materialized, MediaPipeline, Resolution, encode_base64_chunked};
pub use record::SyncRecord;
pub use render::{FieldSelector, RenderedField, render};
pub use resolver::{Existence, ExistenceResolver, Source};
pub use schema::{CanonicalImageKey, ImageReference, NoteFieldSet, PLACEHOLDER_PREFIX, placeholder_token};
pub use substitute::finalize;
pub use sync::{FieldSpec, KeyFailure, MediaSync, NoteLocks, NoteSyncOutcome, NoteSyncRequest};
