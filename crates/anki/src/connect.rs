//! AnkiConnect JSON-RPC client.
//!
//! Every call posts `{"action", "version", "params"}` and receives
//! `{"result", "error"}`.  The envelope is validated once here and turned into
//! [`RpcResponse`]; nothing past this module sees untyped payloads.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use cardsync_config::AnkiConfig;

#[derive(Debug, Error)]
pub enum AnkiError {
    #[error("AnkiConnect unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AnkiConnect HTTP {status}")]
    Status { status: u16 },
    #[error("AnkiConnect error: {0}")]
    Rpc(String),
    #[error("malformed AnkiConnect response: {0}")]
    MalformedResponse(String),
}

/// Result-or-error shape of an AnkiConnect reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse<T> {
    Result(Option<T>),
    Error(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

impl<T: DeserializeOwned> RpcResponse<T> {
    /// Validate a raw reply body.  A non-null `error` wins over `result`.
    pub fn from_value(raw: Value) -> Result<Self, AnkiError> {
        let envelope: Envelope = serde_json::from_value(raw)
            .map_err(|err| AnkiError::MalformedResponse(err.to_string()))?;

        match envelope.error {
            Value::Null => {}
            Value::String(message) => return Ok(Self::Error(message)),
            other => return Ok(Self::Error(other.to_string())),
        }

        if envelope.result.is_null() {
            return Ok(Self::Result(None));
        }

        serde_json::from_value(envelope.result)
            .map(|value| Self::Result(Some(value)))
            .map_err(|err| AnkiError::MalformedResponse(err.to_string()))
    }

    pub fn into_result(self) -> Result<Option<T>, AnkiError> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(message) => Err(AnkiError::Rpc(message)),
        }
    }
}

/// The two media operations the sync engine needs from the flashcard
/// application.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Filenames in the collection's media folder matching a glob pattern.
    async fn list_media(&self, pattern: &str) -> Result<Vec<String>, AnkiError>;

    /// Store (or overwrite) a media file by name.
    async fn store_media(&self, filename: &str, base64_data: &str) -> Result<(), AnkiError>;
}

#[derive(Debug, Clone)]
pub struct AnkiConnectClient {
    client: reqwest::Client,
    url: String,
    version: u32,
}

impl AnkiConnectClient {
    pub fn new(config: &AnkiConfig) -> Result<Self, AnkiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &AnkiConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            version: config.version,
        }
    }

    pub async fn invoke<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Value,
    ) -> Result<RpcResponse<T>, AnkiError> {
        let payload = json!({
            "action": action,
            "version": self.version,
            "params": params,
        });

        debug!(action, url = %self.url, "ankiconnect request");
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnkiError::Status {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AnkiError::MalformedResponse(err.to_string()))?;
        RpcResponse::from_value(body)
    }
}

#[async_trait]
impl MediaStore for AnkiConnectClient {
    async fn list_media(&self, pattern: &str) -> Result<Vec<String>, AnkiError> {
        let names: Option<Vec<String>> = self
            .invoke("getMediaFilesNames", json!({ "pattern": pattern }))
            .await?
            .into_result()?;
        names.ok_or_else(|| AnkiError::MalformedResponse("null result".to_string()))
    }

    async fn store_media(&self, filename: &str, base64_data: &str) -> Result<(), AnkiError> {
        // Older AnkiConnect versions answer `null`, newer ones echo the name.
        let _: Option<Value> = self
            .invoke(
                "storeMediaFile",
                json!({ "filename": filename, "data": base64_data }),
            )
            .await?
            .into_result()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnkiConnectClient {
        let config = AnkiConfig {
            url: server.uri(),
            ..AnkiConfig::default()
        };
        AnkiConnectClient::new(&config).unwrap()
    }

    #[test]
    fn envelope_error_wins_over_result() {
        let raw = json!({ "result": ["a.png"], "error": "collection is not available" });
        let parsed = RpcResponse::<Vec<String>>::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            RpcResponse::Error("collection is not available".to_string())
        );
    }

    #[test]
    fn envelope_null_result_is_empty_success() {
        let raw = json!({ "result": null, "error": null });
        let parsed = RpcResponse::<Value>::from_value(raw).unwrap();
        assert_eq!(parsed, RpcResponse::Result(None));
    }

    #[test]
    fn envelope_with_wrong_result_type_is_malformed() {
        let raw = json!({ "result": 42, "error": null });
        let err = RpcResponse::<Vec<String>>::from_value(raw).unwrap_err();
        assert!(matches!(err, AnkiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn list_media_sends_pattern_and_parses_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "action": "getMediaFilesNames",
                "version": 6,
                "params": { "pattern": "jreader_abc.png" }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "result": ["jreader_abc.png"], "error": null })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let names = client_for(&server)
            .list_media("jreader_abc.png")
            .await
            .unwrap();
        assert_eq!(names, vec!["jreader_abc.png".to_string()]);
    }

    #[tokio::test]
    async fn store_media_error_shape_is_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "storeMediaFile" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "result": null, "error": "disk full" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .store_media("x.png", "AAAA")
            .await
            .unwrap_err();
        assert!(matches!(err, AnkiError::Rpc(ref msg) if msg == "disk full"));
    }

    #[tokio::test]
    async fn store_media_accepts_echoed_filename() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "action": "storeMediaFile",
                "params": { "filename": "x.png", "data": "AAAA" }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "result": "x.png", "error": null })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).store_media("x.png", "AAAA").await.unwrap();
    }

    #[tokio::test]
    async fn http_failure_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).list_media("*").await.unwrap_err();
        assert!(matches!(err, AnkiError::Status { status: 500 }));
    }
}
