//! Error types for Relato

use thiserror::Error;

/// Failures in the peer socket layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    AcceptFailed(std::io::Error),

    #[error("connect failed to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Failures in the passphrase-derived encryption layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failure (wrong passphrase or corrupted data)")]
    AuthenticationFailure,

    #[error("malformed blob: {0}")]
    MalformedBlob(String),
}

/// Failures while encoding or decoding a wire message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("message could not be decoded after passphrase retry")]
    UndecodableMessage,

    #[error("passphrase entry cancelled by user")]
    UserCancelled,
}

/// Failures while reconciling local records with the remote service.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote service unreachable: {0}")]
    Unreachable(String),

    #[error("remote service rejected the record: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
