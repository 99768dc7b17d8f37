//! zbxsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the zbxsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Time**: Watermark timestamp parsing and formatting
//!
//! # Example
//!
//! ```no_run
//! use zbxsync_common::time::{format_timestamp, parse_timestamp};
//!
//! fn main() -> zbxsync_common::Result<()> {
//!     let ts = parse_timestamp("2024-01-01T00:00:00")?;
//!     assert_eq!(format_timestamp(ts), "2024-01-01T00:00:00Z");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{CommonError, Result};
