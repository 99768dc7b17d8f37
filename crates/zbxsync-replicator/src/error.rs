//! Error types for the replication engine
//!
//! Every failure a stream cycle can hit maps onto one variant here. The
//! worker only needs [`SyncError::is_fatal_for_stream`] to decide whether to
//! keep its loop going.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for replication operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Replication error taxonomy
#[derive(Error, Debug)]
pub enum SyncError {
    /// Stream or process configuration cannot be acted on
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source connection or query failed
    #[error("Extraction failed: {0}")]
    Extraction(#[from] sqlx::Error),

    /// Source query exceeded its deadline
    #[error("Extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    /// Source returned a row the extractor could not interpret
    #[error("Extraction returned an unusable row: {0}")]
    MalformedRow(String),

    /// Sink answered with anything but 204 No Content
    #[error("Sink rejected write with status {status}: {body}")]
    SinkRejected { status: u16, body: String },

    /// Sink unreachable, timed out, or the response could not be read
    #[error("Sink transport error: {0}")]
    SinkTransport(#[from] reqwest::Error),

    /// Checkpoint document unreadable, corrupt, or unwritable
    #[error("Checkpoint persistence error for '{path}': {message}")]
    Persistence { path: String, message: String },

    /// Chunk size must be at least one record
    #[error("Invalid chunk size {0}: must be greater than 0")]
    InvalidChunkSize(usize),
}

impl SyncError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a persistence error for the document at `path`
    pub fn persistence(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the owning stream must stop instead of retrying next cycle
    pub fn is_fatal_for_stream(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidChunkSize(_))
    }

    /// Whether this error came from the sink write
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::SinkRejected { .. } | Self::SinkTransport(_))
    }
}
