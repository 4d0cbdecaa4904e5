//! Local record of filenames already stored in the flashcard application.
//!
//! The file is a JSON object of namespace -> filename list.  Only the
//! configured namespace is touched; others are carried through unchanged.
//! Entries are only ever added.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::MediaError;

#[derive(Debug)]
pub struct SyncRecord {
    path: PathBuf,
    namespace: String,
    /// Serializes read-append-write within this process.
    write_lock: Mutex<()>,
}

impl SyncRecord {
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Filenames recorded under this namespace.  A missing file is empty.
    pub async fn load(&self) -> Result<BTreeSet<String>, MediaError> {
        let mut all = self.load_all().await?;
        Ok(all
            .remove(&self.namespace)
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    /// Filenames in the order they were recorded.
    pub async fn list(&self) -> Result<Vec<String>, MediaError> {
        let mut all = self.load_all().await?;
        Ok(all.remove(&self.namespace).unwrap_or_default())
    }

    pub async fn contains(&self, filename: &str) -> Result<bool, MediaError> {
        Ok(self.load().await?.contains(filename))
    }

    /// Add a filename.  Returns `false` when it was already recorded.
    pub async fn append(&self, filename: &str) -> Result<bool, MediaError> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.load_all().await?;
        let entries = all.entry(self.namespace.clone()).or_default();
        if entries.iter().any(|existing| existing == filename) {
            return Ok(false);
        }
        entries.push(filename.to_string());

        self.write_all(&all).await?;
        debug!(filename, namespace = %self.namespace, "sync record appended");
        Ok(true)
    }

    async fn load_all(&self) -> Result<BTreeMap<String, Vec<String>>, MediaError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write through a `.tmp` sibling and rename, so a crash never leaves a
    /// half-written record behind.
    async fn write_all(&self, all: &BTreeMap<String, Vec<String>>) -> Result<(), MediaError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "sync_record.json".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let rendered = serde_json::to_vec_pretty(all)?;
        let write_result: Result<(), MediaError> = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&rendered).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}
