//! Per-stream replication loop
//!
//! Each cycle reads the watermark, extracts the next window, writes it to the
//! sink in order, then commits the new watermark. Nothing is committed before
//! the last chunk is accepted, so a failed cycle is simply repeated after the
//! next sleep.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use zbxsync_common::time::format_timestamp;

use crate::batch::{chunk_count, split};
use crate::checkpoint::CheckpointStore;
use crate::config::StreamConfig;
use crate::error::{Result, SyncError};
use crate::extract::{ExtractionResult, Extractor};
use crate::load::Loader;
use crate::window::{advance, resume_after_truncation, Clock, Window};

/// Worker state, reported on every progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadWatermark,
    Extract,
    NoData,
    Loading,
    Advance,
    Sleeping,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::LoadWatermark => "load_watermark",
            Phase::Extract => "extract",
            Phase::NoData => "no_data",
            Phase::Loading => "loading",
            Phase::Advance => "advance",
            Phase::Sleeping => "sleeping",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub window: Window,
    pub extracted: usize,
    pub chunks_loaded: usize,
    pub truncated: bool,
    pub watermark: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Drives one stream
pub struct StreamWorker {
    stream: StreamConfig,
    store: Arc<CheckpointStore>,
    extractor: Arc<dyn Extractor>,
    loader: Arc<dyn Loader>,
    clock: Arc<dyn Clock>,
}

impl StreamWorker {
    pub fn new(
        stream: StreamConfig,
        store: Arc<CheckpointStore>,
        extractor: Arc<dyn Extractor>,
        loader: Arc<dyn Loader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stream,
            store,
            extractor,
            loader,
            clock,
        }
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    /// Run cycles until one fails with an error fatal for this stream
    pub async fn run(self) -> Result<()> {
        let name = self.stream.name.clone();
        let interval = self.stream.poll_interval();

        loop {
            match self.run_cycle().await {
                Ok(_) => {}
                Err(e) if e.is_fatal_for_stream() => {
                    error!(stream = %name, phase = %Phase::Failed, error = %e, "Stream stopped");
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        stream = %name,
                        error = %e,
                        retry_in_secs = interval.as_secs(),
                        "Cycle failed, watermark unchanged"
                    );
                }
            }

            info!(
                stream = %name,
                phase = %Phase::Sleeping,
                next_wait_secs = interval.as_secs(),
                "--- Waiting {} sec",
                interval.as_secs()
            );
            tokio::time::sleep(interval).await;
        }
    }

    /// One full cycle; the watermark only moves if every step succeeds
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let name = self.stream.name.as_str();

        let watermark = self.store.get(name).await.ok_or_else(|| {
            SyncError::configuration(format!("No watermark found for table '{name}'"))
        })?;
        debug!(
            stream = %name,
            phase = %Phase::LoadWatermark,
            watermark = %format_timestamp(watermark),
            "Watermark loaded"
        );
        let window = Window::new(watermark, self.stream.window_size()).ok_or_else(|| {
            SyncError::configuration(format!(
                "Window of {} hours from {} for table '{name}' is out of range",
                self.stream.hours_per_batch,
                format_timestamp(watermark)
            ))
        })?;

        info!(
            stream = %name,
            phase = %Phase::Extract,
            window_start = %format_timestamp(window.start),
            window_end = %format_timestamp(window.end),
            "<-- Extract"
        );
        let result = self.extractor.extract(&self.stream, &window).await?;
        info!(
            stream = %name,
            phase = %Phase::Extract,
            rows = result.len(),
            truncated = result.truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "<-- Extracted {} rows",
            result.len()
        );

        let chunks_loaded = if result.is_empty() {
            info!(stream = %name, phase = %Phase::NoData, "No rows in window");
            0
        } else {
            self.load_all(&result.records).await?
        };

        let next = self.next_watermark(&window, &result);
        self.store.set(name, next).await?;

        let elapsed = started.elapsed();
        info!(
            stream = %name,
            phase = %Phase::Advance,
            watermark = %format_timestamp(next),
            elapsed_ms = elapsed.as_millis() as u64,
            "Watermark advanced"
        );

        Ok(CycleReport {
            window,
            extracted: result.len(),
            chunks_loaded,
            truncated: result.truncated,
            watermark: next,
            elapsed,
        })
    }

    /// Write records chunk by chunk, stopping at the first failure
    async fn load_all(&self, records: &[String]) -> Result<usize> {
        let name = self.stream.name.as_str();
        let size = self.stream.output_rows_per_batch;
        let total = chunk_count(records.len(), size);

        for (i, chunk) in split(records, size)?.enumerate() {
            let started = Instant::now();
            if let Err(e) = self.loader.load(chunk).await {
                warn!(
                    stream = %name,
                    phase = %Phase::Loading,
                    chunk = i + 1,
                    chunks = total,
                    "--> Load ({}/{}) failed, abandoning window",
                    i + 1,
                    total
                );
                return Err(e);
            }
            info!(
                stream = %name,
                phase = %Phase::Loading,
                chunk = i + 1,
                chunks = total,
                rows = chunk.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "--> Load ({}/{})",
                i + 1,
                total
            );
        }

        Ok(total)
    }

    fn next_watermark(&self, window: &Window, result: &ExtractionResult) -> DateTime<Utc> {
        match (result.truncated, result.observed_max) {
            (true, Some(observed_max)) => {
                let resume = resume_after_truncation(window.start, observed_max);
                if resume.limit_too_small {
                    warn!(
                        stream = %self.stream.name,
                        limit = ?self.stream.input_rows_per_batch,
                        "Row limit reached within a single second, increase input_rows_per_batch"
                    );
                }
                resume.watermark
            }
            _ => advance(
                window.start,
                window.size(),
                result.observed_max,
                self.clock.now(),
            ),
        }
    }
}
