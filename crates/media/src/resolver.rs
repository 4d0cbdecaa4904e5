use std::sync::Arc;

use tracing::{debug, warn};

use cardsync_anki::MediaStore;

use crate::record::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The flashcard application listed the exact filename.
    Remote,
    /// The application was unreachable; the local record knew the filename.
    SyncRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Present(Source),
    /// The application answered and does not have the file.
    Absent,
    /// The application could not be asked and the record has no entry.
    /// Not proof of absence: callers store anyway, which is idempotent.
    Unknown,
}

impl Existence {
    pub fn is_present(self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Two-tier existence check: the flashcard application first, the local sync
/// record only when the application call fails.
#[derive(Clone)]
pub struct ExistenceResolver {
    store: Arc<dyn MediaStore>,
    record: Arc<SyncRecord>,
}

impl ExistenceResolver {
    pub fn new(store: Arc<dyn MediaStore>, record: Arc<SyncRecord>) -> Self {
        Self { store, record }
    }

    pub async fn check(&self, filename: &str) -> Existence {
        match self.store.list_media(filename).await {
            Ok(names) => {
                if names.iter().any(|name| name == filename) {
                    debug!(filename, "media already present in collection");
                    Existence::Present(Source::Remote)
                } else {
                    Existence::Absent
                }
            }
            Err(err) => {
                warn!(filename, %err, "media listing failed; consulting sync record");
                match self.record.contains(filename).await {
                    Ok(true) => Existence::Present(Source::SyncRecord),
                    Ok(false) => Existence::Unknown,
                    Err(err) => {
                        warn!(filename, %err, "sync record unreadable");
                        Existence::Unknown
                    }
                }
            }
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        self.check(filename).await.is_present()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cardsync_anki::AnkiError;
    use tempfile::TempDir;

    /// In-memory flashcard media folder with switchable failure modes.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub files: Mutex<BTreeMap<String, String>>,
        pub list_fails: bool,
        pub reject_store: Vec<String>,
        pub list_calls: Mutex<usize>,
        pub store_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaStore for FakeStore {
        async fn list_media(&self, pattern: &str) -> Result<Vec<String>, AnkiError> {
            *self.list_calls.lock().unwrap() += 1;
            if self.list_fails {
                return Err(AnkiError::Rpc("collection unavailable".to_string()));
            }
            let files = self.files.lock().unwrap();
            // Glob-ish: exact names plus a loose prefix hit to prove callers
            // only trust exact matches.
            Ok(files
                .keys()
                .filter(|name| name.starts_with(pattern.trim_end_matches('*')))
                .cloned()
                .collect())
        }

        async fn store_media(&self, filename: &str, base64_data: &str) -> Result<(), AnkiError> {
            self.store_calls.lock().unwrap().push(filename.to_string());
            if self.reject_store.iter().any(|name| name == filename) {
                return Err(AnkiError::Rpc("store refused".to_string()));
            }
            self.files
                .lock()
                .unwrap()
                .insert(filename.to_string(), base64_data.to_string());
            Ok(())
        }
    }

    fn record_in(dir: &TempDir) -> Arc<SyncRecord> {
        Arc::new(SyncRecord::new(dir.path().join("record.json"), "ns"))
    }

    #[tokio::test]
    async fn remote_exact_match_is_present() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::default();
        store.files.lock().unwrap().insert("x.png".to_string(), String::new());
        let resolver = ExistenceResolver::new(Arc::new(store), record_in(&dir));

        assert_eq!(resolver.check("x.png").await, Existence::Present(Source::Remote));
        assert!(resolver.exists("x.png").await);
    }

    #[tokio::test]
    async fn remote_prefix_match_is_not_enough() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::default();
        store.files.lock().unwrap().insert("x.png.bak".to_string(), String::new());
        let resolver = ExistenceResolver::new(Arc::new(store), record_in(&dir));

        assert_eq!(resolver.check("x.png").await, Existence::Absent);
    }

    #[tokio::test]
    async fn remote_answer_is_not_overridden_by_record() {
        let dir = TempDir::new().unwrap();
        let record = record_in(&dir);
        record.append("x.png").await.unwrap();
        let resolver = ExistenceResolver::new(Arc::new(FakeStore::default()), record);

        // The collection was asked and said no; the record is only a fallback.
        assert_eq!(resolver.check("x.png").await, Existence::Absent);
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_record() {
        let dir = TempDir::new().unwrap();
        let record = record_in(&dir);
        record.append("x.png").await.unwrap();
        let store = FakeStore {
            list_fails: true,
            ..FakeStore::default()
        };
        let resolver = ExistenceResolver::new(Arc::new(store), record);

        assert_eq!(
            resolver.check("x.png").await,
            Existence::Present(Source::SyncRecord)
        );
        assert_eq!(resolver.check("y.png").await, Existence::Unknown);
        assert!(!resolver.exists("y.png").await);
    }
}
