//! zbxsync Replication Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incrementally copies Zabbix history and trends rows into InfluxDB.
//!
//! Every configured table is a *stream* with its own watermark: the instant up
//! to which rows are known to be in the sink. A stream worker repeatedly
//! extracts the rows in `(watermark, watermark + window]`, writes them to the
//! sink in bounded chunks, then moves the watermark forward. Watermarks are
//! persisted in a JSON document shared by all streams, so a restart resumes
//! where the last completed cycle left off.
//!
//! # Components
//!
//! - [`checkpoint::CheckpointStore`]: persisted watermarks
//! - [`extract::Extractor`]: windowed source queries
//! - [`batch::split`]: bounded chunking
//! - [`load::Loader`]: sink writes
//! - [`window::advance`]: next-watermark policy
//! - [`worker::StreamWorker`]: one stream's cycle loop
//! - [`scheduler::Scheduler`]: one task per stream plus signal handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zbxsync_replicator::{
//!     CheckpointStore, Config, InfluxLoader, Scheduler, SqlExtractor, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("zbxsync.toml")?;
//!     let streams = config.active_streams();
//!     let (dialect, source) = config.source()?;
//!
//!     let store = CheckpointStore::load(&config.registry.file_name, &streams, chrono::Utc::now()).await?;
//!     let extractor = SqlExtractor::connect_lazy(&source.address, dialect, source.max_connections, source.timeout())?;
//!     let loader = InfluxLoader::new(&config.influxdb)?;
//!
//!     let shutdown = Scheduler::from_streams(
//!         streams,
//!         Arc::new(store),
//!         Arc::new(extractor),
//!         Arc::new(loader),
//!         Arc::new(SystemClock),
//!     )
//!     .run()
//!     .await;
//!
//!     std::process::exit(shutdown.exit_code());
//! }
//! ```

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod scheduler;
pub mod window;
pub mod worker;

pub use checkpoint::CheckpointStore;
pub use config::{Config, StreamConfig};
pub use error::{Result, SyncError};
pub use extract::{Dialect, ExtractionResult, Extractor, SqlExtractor};
pub use load::{InfluxLoader, Loader};
pub use scheduler::{Scheduler, Shutdown};
pub use window::{Clock, ManualClock, SystemClock, Window};
pub use worker::{CycleReport, StreamWorker};
