//! Fetch, transcode and store one image per canonical key.
//!
//! Per key: `Unresolved -> CacheHit -> Resolved`, or
//! `Unresolved -> Fetching -> Fetched -> Stored -> Resolved`, or
//! `Unresolved -> Fetching -> Failed`.  Failed is terminal for the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use cardsync_anki::{MediaStore, UrlSigner};
use cardsync_config::AppConfig;

use crate::canonical::Canonicalizer;
use crate::error::MediaError;
use crate::record::SyncRecord;
use crate::resolver::ExistenceResolver;
use crate::schema::CanonicalImageKey;

/// Default base64 input slice; a multiple of 3 so slices concatenate cleanly.
pub const DEFAULT_CHUNK_BYTES: usize = 48 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Already in the collection; no bytes moved.
    CacheHit,
    /// Fetched and stored during this batch.
    Stored,
}

#[derive(Debug)]
pub enum Materialized {
    Resolved { filename: String, via: Resolution },
    Failed { filename: String, error: MediaError },
}

impl Materialized {
    pub fn filename(&self) -> &str {
        match self {
            Self::Resolved { filename, .. } | Self::Failed { filename, .. } => filename,
        }
    }

    /// The filename to substitute, if this key resolved.
    pub fn resolved_filename(&self) -> Option<&str> {
        match self {
            Self::Resolved { filename, .. } => Some(filename),
            Self::Failed { .. } => None,
        }
    }
}

/// Base64-encode `bytes` in slices of at most `chunk_bytes` (rounded down to
/// a multiple of 3).  Output is identical to a single-shot encode.
pub fn encode_base64_chunked(bytes: &[u8], chunk_bytes: usize) -> String {
    let chunk = chunk_bytes.max(3) / 3 * 3;
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for slice in bytes.chunks(chunk) {
        STANDARD.encode_string(slice, &mut out);
    }
    out
}

pub struct MediaPipeline {
    client: reqwest::Client,
    signer: Arc<dyn UrlSigner>,
    store: Arc<dyn MediaStore>,
    record: Arc<SyncRecord>,
    resolver: ExistenceResolver,
    canonicalizer: Canonicalizer,
    chunk_bytes: usize,
    max_concurrent: usize,
}

impl MediaPipeline {
    pub fn new(
        client: reqwest::Client,
        signer: Arc<dyn UrlSigner>,
        store: Arc<dyn MediaStore>,
        record: Arc<SyncRecord>,
    ) -> Self {
        Self {
            client,
            resolver: ExistenceResolver::new(Arc::clone(&store), Arc::clone(&record)),
            signer,
            store,
            record,
            canonicalizer: Canonicalizer::default(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_concurrent: 4,
        }
    }

    /// Wire a pipeline from config with the given collaborators.
    pub fn from_config(
        config: &AppConfig,
        signer: Arc<dyn UrlSigner>,
        store: Arc<dyn MediaStore>,
        record: Arc<SyncRecord>,
    ) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.media.fetch_timeout_secs.max(1)))
            .build()
            .map_err(|err| MediaError::TransientNetwork(err.to_string()))?;
        Ok(Self::new(client, signer, store, record)
            .with_canonicalizer(Canonicalizer::from_config(&config.media))
            .with_chunk_bytes(config.transcode_chunk_bytes())
            .with_max_concurrent(config.media.max_concurrent_fetches))
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub async fn materialize(&self, key: &CanonicalImageKey) -> Materialized {
        let filename = self
            .canonicalizer
            .filename(&key.dictionary_name, &key.relative_path);

        if self.resolver.exists(&filename).await {
            debug!(%key, %filename, "cache hit");
            return Materialized::Resolved {
                filename,
                via: Resolution::CacheHit,
            };
        }

        match self.fetch_and_store(key, &filename).await {
            Ok(()) => {
                if let Err(err) = self.record.append(&filename).await {
                    // The store is confirmed; a lost record entry only costs a
                    // redundant upload later.
                    warn!(%filename, %err, "could not update sync record");
                }
                debug!(%key, %filename, "stored");
                Materialized::Resolved {
                    filename,
                    via: Resolution::Stored,
                }
            }
            Err(error) => {
                warn!(%key, %filename, %error, "image not synced");
                Materialized::Failed { filename, error }
            }
        }
    }

    async fn fetch_and_store(
        &self,
        key: &CanonicalImageKey,
        filename: &str,
    ) -> Result<(), MediaError> {
        let url = self.signer.sign(&key.relative_path).await?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| MediaError::TransientNetwork(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::from_status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| MediaError::TransientNetwork(err.to_string()))?;
        debug!(%key, size = bytes.len(), "fetched");

        let encoded = encode_base64_chunked(&bytes, self.chunk_bytes);
        self.store.store_media(filename, &encoded).await?;
        Ok(())
    }

    /// Materialize every key, at most `max_concurrent` at a time, and return
    /// only once all of them have settled.  One key failing never stops the
    /// others.
    pub async fn materialize_all(
        &self,
        keys: impl IntoIterator<Item = CanonicalImageKey>,
    ) -> HashMap<CanonicalImageKey, Materialized> {
        let results: HashMap<CanonicalImageKey, Materialized> = stream::iter(keys)
            .map(|key| async move {
                let outcome = self.materialize(&key).await;
                (key, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let failed = results
            .values()
            .filter(|m| matches!(m, Materialized::Failed { .. }))
            .count();
        info!(total = results.len(), failed, "media batch settled");
        results
    }
}
