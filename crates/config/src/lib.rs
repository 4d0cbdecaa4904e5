use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Flashcard application ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnkiConfig {
    /// AnkiConnect endpoint.  Overridden at runtime by the `ANKI_CONNECT_URL`
    /// environment variable when set.
    pub url: String,
    pub version: u32,
    pub timeout_secs: u64,
}

impl Default for AnkiConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8765".to_string(),
            version: 6,
            timeout_secs: 10,
        }
    }
}

// ── URL signer ────────────────────────────────────────────────────────────────

/// Which collaborator produces short-lived image URLs.
///
/// | Mode   | Behaviour                                                        |
/// |--------|------------------------------------------------------------------|
/// | `http` | Ask a remote signing endpoint for a URL per relative path.       |
/// | `hmac` | Sign locally with the shared media key, same scheme as the server.|
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    #[default]
    Http,
    Hmac,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub mode: SignerMode,
    /// Signing endpoint used in `http` mode.  Receives `?path=<relative path>`.
    pub endpoint: String,
    /// Base that relative signed URLs (and `hmac` mode URLs) are joined onto.
    pub media_base_url: String,
    /// Shared key for `hmac` mode.  `MEDIA_URL_KEY` takes precedence.
    pub hmac_key: String,
    /// Lifetime of locally signed URLs.
    pub ttl_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            mode: SignerMode::Http,
            endpoint: "http://localhost:3000/api/media/sign".to_string(),
            media_base_url: "http://localhost:3000".to_string(),
            hmac_key: String::new(),
            ttl_secs: 300,
        }
    }
}

// ── Media naming and transfer ─────────────────────────────────────────────────

/// How the canonical filename treats the image's original extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionPolicySetting {
    /// Canonicalize the whole path (extension included) and append `extension`.
    #[default]
    Fixed,
    /// Keep a recognised image extension; canonicalize only the stem.
    PreserveOriginal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub filename_prefix: String,
    pub extension: String,
    pub extension_policy: ExtensionPolicySetting,
    /// Size of each slice handed to the base64 encoder.  Rounded down to a
    /// multiple of 3 so slices concatenate without padding in between.
    pub transcode_chunk_bytes: usize,
    /// Upper bound on images materialized at the same time within one batch.
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            filename_prefix: "jreader_".to_string(),
            extension: "png".to_string(),
            extension_policy: ExtensionPolicySetting::Fixed,
            transcode_chunk_bytes: 48 * 1024,
            max_concurrent_fetches: 4,
            fetch_timeout_secs: 20,
        }
    }
}

// ── Sync record ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub path: String,
    pub namespace: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            path: ".cardsync/sync_record.json".to_string(),
            namespace: "anki_synced_images".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub anki: AnkiConfig,
    pub signer: SignerConfig,
    pub media: MediaConfig,
    pub record: RecordConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("ANKI_CONNECT_URL") {
            if !value.trim().is_empty() {
                config.anki.url = value;
            }
        }

        if let Ok(value) = env::var("MEDIA_SIGNER_ENDPOINT") {
            if !value.trim().is_empty() {
                config.signer.endpoint = value;
            }
        }

        // Media key env override (takes precedence over config file).
        if let Ok(key) = env::var("MEDIA_URL_KEY") {
            if !key.is_empty() {
                config.signer.hmac_key = key;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Chunk size actually used by the transcoder: at least 3 bytes and a
    /// multiple of 3.
    pub fn transcode_chunk_bytes(&self) -> usize {
        let requested = self.media.transcode_chunk_bytes.max(3);
        requested - requested % 3
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
