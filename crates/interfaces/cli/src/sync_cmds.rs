use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use cardsync_anki::{AnkiConnectClient, MediaStore, build_signer};
use cardsync_config::AppConfig;
use cardsync_media::hash::dictionary_name_or_unknown;
use cardsync_media::{
    CanonicalImageKey, Canonicalizer, MediaPipeline, MediaSync, NoteSyncOutcome, NoteSyncRequest,
    SyncRecord, dictionary_hash, placeholder_token,
};

#[derive(Deserialize)]
#[serde(untagged)]
enum SyncInput {
    Many(Vec<NoteSyncRequest>),
    One(NoteSyncRequest),
}

pub(crate) fn record(config: &AppConfig) -> SyncRecord {
    SyncRecord::new(&config.record.path, &config.record.namespace)
}

pub(crate) fn filename_for(config: &AppConfig, dictionary: &str, path: &str) -> String {
    let key = CanonicalImageKey::new(dictionary, path);
    Canonicalizer::from_config(&config.media).filename(&key.dictionary_name, &key.relative_path)
}

pub(crate) fn token_for(dictionary: &str, index: usize) -> String {
    let dictionary = dictionary_name_or_unknown(Some(dictionary));
    placeholder_token(&dictionary_hash(dictionary), index)
}

fn parse_requests(raw: &str) -> Result<Vec<NoteSyncRequest>> {
    Ok(match serde_json::from_str::<SyncInput>(raw)? {
        SyncInput::Many(requests) => requests,
        SyncInput::One(request) => vec![request],
    })
}

fn build_media_sync(config: &AppConfig) -> Result<MediaSync> {
    let store: Arc<dyn MediaStore> = Arc::new(AnkiConnectClient::new(&config.anki)?);
    let signer_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.media.fetch_timeout_secs.max(1)))
        .build()?;
    let signer = build_signer(&config.signer, signer_client)?;
    let record = Arc::new(record(config));
    let pipeline = MediaPipeline::from_config(config, signer, store, record)?;
    Ok(MediaSync::new(pipeline))
}

pub(crate) async fn run_sync(config: &AppConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let requests =
        parse_requests(&raw).with_context(|| format!("parsing {}", input.display()))?;
    let media_sync = build_media_sync(config)?;

    let mut outcomes: Vec<NoteSyncOutcome> = Vec::with_capacity(requests.len());
    for request in requests {
        outcomes.push(media_sync.sync_note(request).await);
    }

    let failed: usize = outcomes.iter().map(|outcome| outcome.failed).sum();
    info!(notes = outcomes.len(), failed, "sync finished");

    let rendered = serde_json::to_string_pretty(&outcomes)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, rendered)?;
            println!("wrote {} outcome(s) to {}", outcomes.len(), path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
