//! One note, one batch: render every field, materialize the distinct images
//! once, wait for all of them, then substitute.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::definition::Definition;
use crate::pipeline::{Materialized, MediaPipeline, Resolution};
use crate::render::{FieldSelector, render};
use crate::schema::{CanonicalImageKey, ImageReference, NoteFieldSet};
use crate::substitute::finalize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: FieldSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSyncRequest {
    pub note_id: String,
    #[serde(default)]
    pub definitions: Vec<Definition>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Copied to the outcome as-is.  A rendered field of the same name wins.
    #[serde(default)]
    pub static_fields: NoteFieldSet,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFailure {
    pub key: CanonicalImageKey,
    pub filename: String,
    pub error: String,
    /// The origin refused or lacks the image, as opposed to a network fault.
    pub origin_refused: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSyncOutcome {
    pub note_id: String,
    pub fields: NoteFieldSet,
    pub stored: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub failures: Vec<KeyFailure>,
}

impl NoteSyncOutcome {
    pub fn resolved(&self) -> usize {
        self.stored + self.cache_hits
    }
}

/// Async mutex per note id.
#[derive(Debug, Default)]
pub struct NoteLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl NoteLocks {
    pub fn lock_for(&self, note_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop entries nobody holds or waits on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(note_id.to_string()).or_default())
    }
}

pub struct MediaSync {
    pipeline: MediaPipeline,
    locks: NoteLocks,
}

impl MediaSync {
    pub fn new(pipeline: MediaPipeline) -> Self {
        Self {
            pipeline,
            locks: NoteLocks::default(),
        }
    }

    pub fn pipeline(&self) -> &MediaPipeline {
        &self.pipeline
    }

    /// Batches for the same note run one after another; different notes run
    /// freely.
    pub async fn sync_note(&self, request: NoteSyncRequest) -> NoteSyncOutcome {
        let lock = self.locks.lock_for(&request.note_id);
        let _guard = lock.lock().await;

        let NoteSyncRequest {
            note_id,
            definitions,
            fields: specs,
            static_fields,
        } = request;

        let mut fields = static_fields;
        let mut references_by_field = BTreeMap::new();
        let mut keys = BTreeSet::new();
        for spec in &specs {
            let rendered = render(&definitions, spec.selector);
            keys.extend(rendered.references.iter().map(ImageReference::key));
            if fields.insert(spec.name.clone(), rendered.text).is_some() {
                debug!(%note_id, field = %spec.name, "rendered field replaces static value");
            }
            references_by_field.insert(spec.name.clone(), rendered.references);
        }

        let results = if keys.is_empty() {
            HashMap::new()
        } else {
            self.pipeline.materialize_all(keys).await
        };
        let fields = finalize(fields, &references_by_field, &results);

        let mut stored = 0;
        let mut cache_hits = 0;
        let mut failures = Vec::new();
        for (key, materialized) in &results {
            match materialized {
                Materialized::Resolved {
                    via: Resolution::Stored,
                    ..
                } => stored += 1,
                Materialized::Resolved {
                    via: Resolution::CacheHit,
                    ..
                } => cache_hits += 1,
                Materialized::Failed { error, .. } => failures.push(KeyFailure {
                    key: key.clone(),
                    filename: materialized.filename().to_string(),
                    error: error.to_string(),
                    origin_refused: error.is_origin_refusal(),
                }),
            }
        }
        failures.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            %note_id,
            fields = specs.len(),
            images = results.len(),
            stored,
            cache_hits,
            failed = failures.len(),
            "note synced"
        );

        NoteSyncOutcome {
            note_id,
            fields,
            stored,
            cache_hits,
            failed: failures.len(),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use cardsync_anki::{MediaStore, SignerError, UrlSigner};
    use serde_json::json;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::record::SyncRecord;
    use crate::resolver::tests::FakeStore;

    struct OriginSigner {
        base: String,
    }

    #[async_trait]
    impl UrlSigner for OriginSigner {
        async fn sign(&self, relative_path: &str) -> Result<Url, SignerError> {
            Url::parse(&format!("{}/{}", self.base, relative_path))
                .map_err(|err| SignerError::InvalidUrl(err.to_string()))
        }
    }

    fn media_sync(server: &MockServer, store: Arc<FakeStore>, dir: &TempDir) -> MediaSync {
        let record = Arc::new(SyncRecord::new(dir.path().join("record.json"), "ns"));
        let pipeline = MediaPipeline::new(
            reqwest::Client::new(),
            Arc::new(OriginSigner { base: server.uri() }),
            store as Arc<dyn MediaStore>,
            record,
        );
        MediaSync::new(pipeline)
    }

    fn request(note_id: &str, definitions: Vec<Definition>) -> NoteSyncRequest {
        NoteSyncRequest {
            note_id: note_id.to_string(),
            definitions,
            fields: vec![
                FieldSpec {
                    name: "Primary".to_string(),
                    selector: FieldSelector::Primary,
                },
                FieldSpec {
                    name: "Glossary".to_string(),
                    selector: FieldSelector::Glossary,
                },
            ],
            static_fields: NoteFieldSet::from([("Expression".to_string(), "猫".to_string())]),
        }
    }

    fn image(dictionary: &str, path: &str) -> Definition {
        Definition::structured(json!({ "tag": "img", "path": path }), Some(dictionary))
    }

    #[tokio::test]
    async fn partial_failure_keeps_other_images() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cat".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::default());
        let sync = media_sync(&server, Arc::clone(&store), &dir);

        let outcome = sync
            .sync_note(request(
                "42",
                vec![
                    image("PixivLight_2024-11-25", "img/cat.png"),
                    image("ja.Wikipedia.2022-12-01.v1.6.1", "img/gone.png"),
                ],
            ))
            .await;

        let cat = sync
            .pipeline()
            .canonicalizer()
            .filename("PixivLight_2024-11-25", "img/cat.png");
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.resolved(), 1);
        assert_eq!(outcome.failures[0].key.relative_path, "img/gone.png");
        assert!(outcome.failures[0].origin_refused);
        assert!(outcome.fields["Primary"].contains(&format!("src=\"{cat}\"")));
        assert!(outcome.fields["Glossary"].contains(&format!("src=\"{cat}\"")));
        assert!(outcome.fields["Glossary"].contains("ANKI_IMAGE_PLACEHOLDER_"));
        assert!(!outcome.fields["Primary"].contains("ANKI_IMAGE_PLACEHOLDER_"));
        assert_eq!(outcome.fields["Expression"], "猫");
    }

    #[tokio::test]
    async fn failed_key_leaves_its_token_in_every_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/gone.png"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::default());
        let sync = media_sync(&server, Arc::clone(&store), &dir);

        let outcome = sync
            .sync_note(request("9", vec![image("d", "img/gone.png")]))
            .await;

        let token = ImageReference {
            dictionary_name: "d".to_string(),
            relative_path: "img/gone.png".to_string(),
            index: 0,
        }
        .token();
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.failures[0].origin_refused);
        assert!(outcome.fields["Primary"].contains(&format!("<img src=\"{token}\">")));
        assert!(outcome.fields["Glossary"].contains(&format!("<img src=\"{token}\">")));
        assert!(store.store_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_key_is_fetched_once_per_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::default());
        let sync = media_sync(&server, Arc::clone(&store), &dir);

        // Same image in Primary and Glossary, plus a separator variant.
        let outcome = sync
            .sync_note(request("1", vec![image("d", "a.png"), image("d", "\\a.png")]))
            .await;

        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(store.store_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_batches_for_one_note_serialize() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_millis(150)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::default());
        let sync = media_sync(&server, Arc::clone(&store), &dir);

        let (first, second) = tokio::join!(
            sync.sync_note(request("7", vec![image("d", "slow.png")])),
            sync.sync_note(request("7", vec![image("d", "slow.png")])),
        );

        assert_eq!(first.stored + second.stored, 1);
        assert_eq!(first.cache_hits + second.cache_hits, 1);
        assert_eq!(store.store_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn note_without_images_skips_media() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::default());
        let sync = media_sync(&server, Arc::clone(&store), &dir);

        let outcome = sync
            .sync_note(request("3", vec![Definition::simple("cat", Some("d"))]))
            .await;

        assert_eq!(outcome.resolved() + outcome.failed, 0);
        assert!(outcome.fields["Glossary"].contains("cat"));
        assert_eq!(*store.list_calls.lock().unwrap(), 0);
    }

    #[test]
    fn note_locks_are_shared_per_id() {
        let locks = NoteLocks::default();
        let a = locks.lock_for("a");
        let a_again = locks.lock_for("a");
        let b = locks.lock_for("b");
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn request_parses_from_json() {
        let raw = json!({
            "noteId": "1700000000000",
            "definitions": [
                { "type": "simple", "content": "cat", "dictionaryName": "JMdict" }
            ],
            "fields": [{ "name": "Glossary", "selector": "glossary" }]
        });
        let request: NoteSyncRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.note_id, "1700000000000");
        assert_eq!(request.fields[0].selector, FieldSelector::Glossary);
        assert!(request.static_fields.is_empty());
    }
}
