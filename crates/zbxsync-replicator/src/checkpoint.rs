//! Persistent watermark store
//!
//! Watermarks live in a single JSON document shared by every stream:
//!
//! ```json
//! [
//!     {
//!         "Table": "history",
//!         "Startdate": "2024-01-01T01:00:00Z"
//!     }
//! ]
//! ```
//!
//! The document is rewritten in full on each update. One async mutex guards
//! the whole read, mutate, write sequence so concurrent streams cannot
//! overwrite each other's entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zbxsync_common::time::{format_timestamp, parse_timestamp};

use crate::config::StreamConfig;
use crate::error::{Result, SyncError};

/// One persisted `(stream, watermark)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "Table")]
    pub table: String,
    #[serde(rename = "Startdate")]
    pub start_date: String,
}

/// Watermarks for every stream, backed by the registry document
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CheckpointStore {
    /// Open the document at `path`, creating it if absent.
    ///
    /// Streams without an entry are seeded from their configured start date,
    /// or `now` when they have none, and the seeds are persisted before
    /// returning.
    pub async fn load(path: impl AsRef<Path>, streams: &[StreamConfig], now: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let existing = read_document(&path).await?;
        let created = existing.is_none();
        let mut entries = existing.unwrap_or_default();

        let mut state = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let watermark = parse_timestamp(&entry.start_date).map_err(|e| SyncError::persistence(&path, e))?;
            state.entry(entry.table.clone()).or_insert(watermark);
        }

        let mut seeded = 0;
        for stream in streams {
            if state.contains_key(&stream.name) {
                continue;
            }
            let watermark = stream.initial_watermark().unwrap_or(now);
            info!(
                stream = %stream.name,
                watermark = %format_timestamp(watermark),
                "Seeding checkpoint"
            );
            entries.push(RegistryEntry {
                table: stream.name.clone(),
                start_date: format_timestamp(watermark),
            });
            state.insert(stream.name.clone(), watermark);
            seeded += 1;
        }

        if created || seeded > 0 {
            write_document(&path, &entries).await?;
        }

        debug!(
            path = %path.display(),
            entries = state.len(),
            created,
            seeded,
            "Checkpoint store loaded"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current watermark of `stream`; `None` if the stream has no entry
    pub async fn get(&self, stream: &str) -> Option<DateTime<Utc>> {
        self.state.lock().await.get(stream).copied()
    }

    /// Snapshot of every watermark
    pub async fn watermarks(&self) -> HashMap<String, DateTime<Utc>> {
        self.state.lock().await.clone()
    }

    /// Durably record `watermark` for `stream`.
    ///
    /// The in-memory value changes only once the document is on disk.
    pub async fn set(&self, stream: &str, watermark: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut entries = match read_document(&self.path).await? {
            Some(entries) => entries,
            None => snapshot(&state),
        };

        let value = format_timestamp(watermark);
        let mut found = false;
        entries.retain_mut(|entry| {
            if entry.table != stream {
                return true;
            }
            if found {
                return false;
            }
            found = true;
            entry.start_date = value.clone();
            true
        });
        if !found {
            entries.push(RegistryEntry {
                table: stream.to_string(),
                start_date: value,
            });
        }

        write_document(&self.path, &entries).await?;
        state.insert(stream.to_string(), watermark);

        Ok(())
    }
}

fn snapshot(state: &HashMap<String, DateTime<Utc>>) -> Vec<RegistryEntry> {
    let mut entries: Vec<RegistryEntry> = state
        .iter()
        .map(|(table, ts)| RegistryEntry {
            table: table.clone(),
            start_date: format_timestamp(*ts),
        })
        .collect();
    entries.sort_by(|a, b| a.table.cmp(&b.table));
    entries
}

/// Read the document, `None` if it does not exist
async fn read_document(path: &Path) -> Result<Option<Vec<RegistryEntry>>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::persistence(path, e)),
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| SyncError::persistence(path, e))
}

/// Replace the document atomically: temp file, fsync, rename
async fn write_document(path: &Path, entries: &[RegistryEntry]) -> Result<()> {
    let content = to_pretty_json(entries).map_err(|e| SyncError::persistence(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::persistence(path, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, path).await
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(SyncError::persistence(path, e));
    }

    Ok(())
}

fn to_pretty_json(entries: &[RegistryEntry]) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    entries.serialize(&mut ser)?;
    Ok(buf)
}
