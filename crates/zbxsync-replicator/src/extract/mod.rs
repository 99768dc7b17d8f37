//! Windowed extraction from the Zabbix database
//!
//! An [`Extractor`] runs one stream's query for one `(start, end]` window and
//! hands back every row as an opaque line-protocol record, in result order,
//! together with the largest embedded clock it saw.

mod queries;

pub use queries::{render_query, template_for, Dialect, STREAMS};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::debug;
use zbxsync_common::time::from_epoch_millis;

use crate::config::StreamConfig;
use crate::error::{Result, SyncError};
use crate::window::Window;

/// Rows extracted for one window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Pre-formatted records in source order
    pub records: Vec<String>,
    /// Largest embedded clock among the rows
    pub observed_max: Option<DateTime<Utc>>,
    /// The row limit was reached, so the window may hold more rows
    pub truncated: bool,
}

impl ExtractionResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source of records for a stream window
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch every row of `stream` with `window.start < clock <= window.end`
    ///
    /// Either the whole window is returned or an error; never a partial result.
    async fn extract(&self, stream: &StreamConfig, window: &Window) -> Result<ExtractionResult>;
}

/// Extractor backed by a SQL connection pool
pub struct SqlExtractor {
    pool: AnyPool,
    dialect: Dialect,
    timeout: Option<Duration>,
}

impl SqlExtractor {
    pub fn new(pool: AnyPool, dialect: Dialect, timeout: Option<Duration>) -> Self {
        Self {
            pool,
            dialect,
            timeout,
        }
    }

    /// Build a lazily connecting pool so an unreachable database fails the
    /// cycle instead of the process.
    pub fn connect_lazy(
        address: &str,
        dialect: Dialect,
        max_connections: u32,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new().max_connections(max_connections);
        if let Some(timeout) = timeout {
            options = options.acquire_timeout(timeout);
        }
        let pool = options.connect_lazy(address)?;

        Ok(Self::new(pool, dialect, timeout))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, query: &str) -> Result<Vec<AnyRow>> {
        let fetch = sqlx::query(query).fetch_all(&self.pool);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| SyncError::ExtractionTimeout(limit))?
                .map_err(SyncError::from),
            None => fetch.await.map_err(SyncError::from),
        }
    }
}

#[async_trait]
impl Extractor for SqlExtractor {
    async fn extract(&self, stream: &StreamConfig, window: &Window) -> Result<ExtractionResult> {
        let template = template_for(self.dialect, &stream.name).ok_or_else(|| {
            SyncError::configuration(format!(
                "No {} query defined for table '{}' (known tables: {})",
                self.dialect,
                stream.name,
                STREAMS.join(", ")
            ))
        })?;

        let limit = stream.input_rows_per_batch;
        let query = render_query(&template, window, limit);
        debug!(stream = %stream.name, %query, "Rendered extraction query");

        let rows = self.fetch(&query).await?;
        collect(decode_rows(&rows)?, limit)
    }
}

/// Read the record and, when present, the clock column of each row
fn decode_rows(rows: &[AnyRow]) -> Result<Vec<(String, Option<i64>)>> {
    rows.iter()
        .map(|row| -> Result<(String, Option<i64>)> {
            let record: String = row.try_get(0)?;
            let clock = if row.columns().len() > 1 {
                Some(row.try_get::<i64, _>(1)?)
            } else {
                None
            };
            Ok((record, clock))
        })
        .collect()
}

/// Turn decoded `(record, clock)` rows into an extraction result
fn collect(
    rows: impl IntoIterator<Item = (String, Option<i64>)>,
    limit: Option<u64>,
) -> Result<ExtractionResult> {
    let mut records = Vec::new();
    let mut max_clock: Option<i64> = None;

    for (record, clock) in rows {
        if record.contains('\n') {
            return Err(SyncError::MalformedRow(format!(
                "record contains an embedded newline: {record:?}"
            )));
        }
        records.push(record);

        if let Some(clock) = clock {
            max_clock = Some(max_clock.map_or(clock, |m| m.max(clock)));
        }
    }

    let observed_max = max_clock
        .map(|ms| {
            from_epoch_millis(ms)
                .ok_or_else(|| SyncError::MalformedRow(format!("clock {ms} is out of range")))
        })
        .transpose()?;

    let truncated = limit.is_some_and(|l| records.len() as u64 >= l);

    Ok(ExtractionResult {
        records,
        observed_max,
        truncated,
    })
}
