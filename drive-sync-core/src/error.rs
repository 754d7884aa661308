//! Error types for the sync pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur anywhere in the Drive ↔ GitHub pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure talking to a remote API.
    #[error("network error: {0}")]
    Network(String),

    /// The remote API asked us to slow down (HTTP 429 or a rate-limit 403).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The requested remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Any other non-success API response.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local `git` invocation exited unsuccessfully or could not be launched.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// The sync-state document is missing, unloaded or malformed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// The stored sync-state document changed since it was loaded.
    #[error("sync state was modified by another run (loaded revision {expected}, stored revision {found})")]
    ConcurrentModification { expected: u64, found: u64 },

    /// One or more staged files failed validation.
    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationFailed(Vec<String>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }
}
