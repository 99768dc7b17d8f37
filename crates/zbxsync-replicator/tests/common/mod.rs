//! Shared fakes for replication tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use zbxsync_replicator::{
    CheckpointStore, ExtractionResult, Extractor, Loader, ManualClock, StreamConfig,
    StreamWorker, SyncError, Window,
};

/// `2024-01-01` at the given time, UTC
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

pub fn records(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("cpu,host_name=zbx01 value={i} {}", 1_704_067_200_000u64 + i as u64))
        .collect()
}

/// Stream starting 2024-01-01T00:00:00 with 1h windows and chunks of 2
pub fn stream(name: &str) -> StreamConfig {
    let mut stream = StreamConfig::new(name);
    stream.start_date = Some("2024-01-01T00:00:00".to_string());
    stream.hours_per_batch = 1;
    stream.output_rows_per_batch = 2;
    stream
}

pub fn rows(n: usize, observed_max: Option<DateTime<Utc>>) -> ExtractionResult {
    ExtractionResult {
        records: records(n),
        observed_max,
        truncated: false,
    }
}

/// Extractor replaying a fixed script, then failing fatally
#[derive(Default)]
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<ExtractionResult, SyncError>>>,
    windows: Mutex<Vec<Window>>,
}

impl ScriptedExtractor {
    pub fn new(script: Vec<Result<ExtractionResult, SyncError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, next: Result<ExtractionResult, SyncError>) {
        self.script.lock().unwrap().push_back(next);
    }

    /// Windows requested so far, in order
    pub fn windows(&self) -> Vec<Window> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        _stream: &StreamConfig,
        window: &Window,
    ) -> Result<ExtractionResult, SyncError> {
        self.windows.lock().unwrap().push(*window);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::configuration("extraction script exhausted")))
    }
}

/// Loader recording every write attempt, optionally failing one of them
#[derive(Default)]
pub struct RecordingLoader {
    attempts: Mutex<Vec<Vec<String>>>,
    fail_on_attempt: Mutex<Option<usize>>,
}

impl RecordingLoader {
    /// Reject the `n`th attempt (1-based, counted over the loader's lifetime)
    pub fn failing_on(n: usize) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            fail_on_attempt: Mutex::new(Some(n)),
        }
    }

    pub fn heal(&self) {
        *self.fail_on_attempt.lock().unwrap() = None;
    }

    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.attempts().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    async fn load(&self, chunk: &[String]) -> Result<(), SyncError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(chunk.to_vec());
            attempts.len()
        };

        if *self.fail_on_attempt.lock().unwrap() == Some(attempt) {
            return Err(SyncError::SinkRejected {
                status: 500,
                body: "{\"error\":\"timeout\"}".to_string(),
            });
        }
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<CheckpointStore>,
    pub extractor: Arc<ScriptedExtractor>,
    pub loader: Arc<RecordingLoader>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Store at `path` seeded for `streams`
    pub async fn new(
        path: &Path,
        streams: &[StreamConfig],
        loader: RecordingLoader,
        now: DateTime<Utc>,
    ) -> Self {
        let store = CheckpointStore::load(path, streams, now).await.unwrap();
        Self {
            store: Arc::new(store),
            extractor: Arc::new(ScriptedExtractor::default()),
            loader: Arc::new(loader),
            clock: Arc::new(ManualClock::new(now)),
        }
    }

    pub fn worker(&self, stream: StreamConfig) -> StreamWorker {
        StreamWorker::new(
            stream,
            self.store.clone(),
            self.extractor.clone(),
            self.loader.clone(),
            self.clock.clone(),
        )
    }
}
