//! Clip Uploader
//!
//! Ships recorded detection clips to the backend:
//! - Bounded FIFO queue (oldest dropped when full), persisted as JSON
//! - Exponential backoff per clip, capped at one hour
//! - One upload at a time, at least 30 s apart
//!
//! The network side sits behind [`UploadTransport`]; [`HttpTransport`]
//! posts `multipart/form-data` with `reqwest`.

mod backoff;
mod queue;
mod transport;
mod uploader;

pub use backoff::{retry_delay, MAX_RETRY_DELAY_SECS, RETRY_BASE_SECS};
pub use queue::{ClipQueue, ClipQueueEntry, QUEUE_FILE_VERSION};
pub use transport::{HttpTransport, MockTransport, UploadRequest, UploadTransport};
pub use uploader::{AttemptOutcome, ClipUploader, UploadStats, UploaderConfig};

use thiserror::Error;

/// Upload error types
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(#[from] unit_config::ConfigError),

    #[error("{0}")]
    Lock(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Http(e.to_string())
    }
}
