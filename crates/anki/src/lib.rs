//! Clients for the two external collaborators of the media sync engine: the
//! flashcard application (AnkiConnect) and the image URL signer.

pub mod connect;
pub mod signer;

pub use connect::{AnkiConnectClient, AnkiError, MediaStore, RpcResponse};
pub use signer::{HmacUrlSigner, HttpUrlSigner, SignerError, UrlSigner, build_signer};
