//! Short-lived image URL signing.
//!
//! Two implementations of [`UrlSigner`]: one asks a remote signing endpoint,
//! the other computes the media server's HMAC locally from the shared key.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use url::Url;

use cardsync_config::{SignerConfig, SignerMode};

/// Path prefix under which the media server serves dictionary images.
pub const IMAGE_ROUTE_PREFIX: &str = "/media/img/";

// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer refused path (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("signer does not know path (HTTP {status})")]
    NotFound { status: u16 },
    #[error("signer unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("signer rejected request: {0}")]
    Rejected(String),
    #[error("invalid signed url: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// Produce a fetchable URL for a normalized relative image path.
    async fn sign(&self, relative_path: &str) -> Result<Url, SignerError>;
}

/// Build the signer selected by config.
pub fn build_signer(
    config: &SignerConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn UrlSigner>, SignerError> {
    match config.mode {
        SignerMode::Http => Ok(Arc::new(HttpUrlSigner::new(
            client,
            &config.endpoint,
            &config.media_base_url,
        )?)),
        SignerMode::Hmac => {
            if config.hmac_key.is_empty() {
                return Err(SignerError::Rejected(
                    "hmac signer requires MEDIA_URL_KEY".to_string(),
                ));
            }
            Ok(Arc::new(HmacUrlSigner::new(
                &config.media_base_url,
                config.hmac_key.clone(),
                Duration::from_secs(config.ttl_secs),
            )?))
        }
    }
}

// ── Remote signer ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignerReply {
    Url { url: String },
    Error { error: String },
}

pub struct HttpUrlSigner {
    client: reqwest::Client,
    endpoint: Url,
    media_base: Url,
}

impl HttpUrlSigner {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        media_base: &str,
    ) -> Result<Self, SignerError> {
        Ok(Self {
            client,
            endpoint: parse_url(endpoint)?,
            media_base: parse_url(media_base)?,
        })
    }
}

#[async_trait]
impl UrlSigner for HttpUrlSigner {
    async fn sign(&self, relative_path: &str) -> Result<Url, SignerError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("path", relative_path)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => {
                return Err(SignerError::Unauthorized {
                    status: status.as_u16(),
                });
            }
            404 => {
                return Err(SignerError::NotFound {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let reply = serde_json::from_str::<SignerReply>(&body);
        if !status.is_success() {
            let message = match reply {
                Ok(SignerReply::Error { error }) => error,
                _ => body.trim().to_string(),
            };
            return Err(SignerError::Rejected(format!("HTTP {status}: {message}")));
        }

        match reply {
            Ok(SignerReply::Url { url }) => {
                debug!(relative_path, "signed url received");
                // Relative answers are resolved against the media host.
                self.media_base
                    .join(&url)
                    .map_err(|err| SignerError::InvalidUrl(format!("{url}: {err}")))
            }
            Ok(SignerReply::Error { error }) => Err(SignerError::Rejected(error)),
            Err(_) => Err(SignerError::Rejected(body.trim().to_string())),
        }
    }
}

// ── Local HMAC signer ─────────────────────────────────────────────────────────

/// HMAC-SHA256 over `GET\n{path}\nexp={exp}`, URL-safe base64 without padding.
pub fn media_signature(path: &str, exp: u64, key: &str) -> Result<String, SignerError> {
    let canonical = format!("GET\n{path}\nexp={exp}");
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|err| SignerError::Rejected(format!("media key: {err}")))?;
    mac.update(canonical.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

pub struct HmacUrlSigner {
    media_base: Url,
    key: String,
    ttl: Duration,
}

impl HmacUrlSigner {
    pub fn new(media_base: &str, key: String, ttl: Duration) -> Result<Self, SignerError> {
        Ok(Self {
            media_base: parse_url(media_base)?,
            key,
            ttl,
        })
    }

    /// Sign with an explicit clock reading (seconds since the epoch).
    pub fn sign_at(&self, relative_path: &str, now_secs: u64) -> Result<Url, SignerError> {
        let exp = now_secs + self.ttl.as_secs();
        let signed_path = format!("{IMAGE_ROUTE_PREFIX}{relative_path}");
        let sig = media_signature(&signed_path, exp, &self.key)?;

        let encoded = relative_path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let mut url = self
            .media_base
            .join(&format!("{IMAGE_ROUTE_PREFIX}{encoded}"))
            .map_err(|err| SignerError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("exp", &exp.to_string())
            .append_pair("sig", &sig);
        Ok(url)
    }
}

#[async_trait]
impl UrlSigner for HmacUrlSigner {
    async fn sign(&self, relative_path: &str) -> Result<Url, SignerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| SignerError::Rejected(format!("system clock: {err}")))?
            .as_secs();
        self.sign_at(relative_path, now)
    }
}

fn parse_url(raw: &str) -> Result<Url, SignerError> {
    Url::parse(raw).map_err(|err| SignerError::InvalidUrl(format!("{raw}: {err}")))
}
