//! Error types shared across zbxsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid timestamp '{value}': expected RFC 3339 or YYYY-MM-DDTHH:MM:SS")]
    InvalidTimestamp { value: String },
}
