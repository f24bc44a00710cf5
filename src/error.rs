use thiserror::Error;

/// Errors produced by the transfer engine and its helpers.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("metadata registration rejected: {0}")]
    Registration(String),

    #[error("server issued an empty upload token")]
    MissingToken,

    #[error("upload token rejected by server")]
    Unauthorized,

    #[error("{} chunk(s) failed permanently: {failed:?}", failed.len())]
    IncompleteUpload { failed: Vec<usize> },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download response carries no validate-hash header")]
    MissingHash,

    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("integrity check failed: expected hash {expected}, computed {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("binary string length {0} is not a multiple of 8")]
    MalformedBitLength(usize),

    #[error("invalid binary digit at position {0}")]
    InvalidBinaryDigit(usize),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("compression error: {0}")]
    Codec(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of a single failed chunk upload attempt.
///
/// `Unauthorized` aborts the whole upload; everything else is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkUploadError {
    #[error("upload token rejected")]
    Unauthorized,

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
