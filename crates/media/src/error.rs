use thiserror::Error;

use cardsync_anki::{AnkiError, SignerError};

/// Per-image failure.  None of these abort a batch: the image keeps its
/// placeholder and the next sync attempt tries again.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("origin refused image (HTTP {status})")]
    OriginUnauthorized { status: u16 },
    #[error("origin has no such image (HTTP {status})")]
    OriginNotFound { status: u16 },
    #[error("network error: {0}")]
    TransientNetwork(String),
    #[error("url signing failed: {0}")]
    Signing(String),
    #[error("flashcard application rejected store: {0}")]
    StoreRejected(String),
    #[error("sync record io: {0}")]
    RecordIo(#[from] std::io::Error),
    #[error("sync record is corrupt: {0}")]
    RecordFormat(#[from] serde_json::Error),
}

impl MediaError {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::OriginUnauthorized { status },
            404 => Self::OriginNotFound { status },
            _ => Self::TransientNetwork(format!("HTTP {status}")),
        }
    }

    /// Permanent for this attempt; a retry within the same batch cannot help.
    pub fn is_origin_refusal(&self) -> bool {
        matches!(
            self,
            Self::OriginUnauthorized { .. } | Self::OriginNotFound { .. }
        )
    }
}

impl From<SignerError> for MediaError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unauthorized { status } => Self::OriginUnauthorized { status },
            SignerError::NotFound { status } => Self::OriginNotFound { status },
            SignerError::Transport(err) => Self::TransientNetwork(err.to_string()),
            other => Self::Signing(other.to_string()),
        }
    }
}

impl From<AnkiError> for MediaError {
    fn from(err: AnkiError) -> Self {
        Self::StoreRejected(err.to_string())
    }
}
