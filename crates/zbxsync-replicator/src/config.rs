//! Configuration management
//!
//! The replicator reads one TOML file. Any key can be overridden from the
//! environment with the `ZBXSYNC_` prefix and `__` as the section separator,
//! e.g. `ZBXSYNC_INFLUXDB__PASSWORD`. Keys are case-insensitive, so stream
//! names are always lowercase.
//!
//! ```toml
//! [influxdb]
//! url = "http://localhost:8086"
//! database = "zabbix"
//!
//! [zabbix.postgresql]
//! address = "postgres://zabbix@localhost/zabbix"
//!
//! [tables.history]
//! active = true
//! interval = 15
//! start_date = "2024-01-01T00:00:00"
//! hours_per_batch = 12
//! output_rows_per_batch = 50000
//!
//! [registry]
//! file_name = "/var/lib/zbxsync/zbxsync.json"
//! ```

use anyhow::{bail, Context};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zbxsync_common::logging::LogConfig;
use zbxsync_common::time::parse_timestamp;

use crate::extract::Dialect;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Default checkpoint document location.
pub const DEFAULT_REGISTRY_FILE_NAME: &str = "/var/lib/zbxsync/zbxsync.json";

/// Default InfluxDB endpoint.
pub const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086";

/// Default InfluxDB database.
pub const DEFAULT_INFLUXDB_DATABASE: &str = "zabbix";

/// Default timestamp precision of written points.
pub const DEFAULT_INFLUXDB_PRECISION: &str = "ms";

/// Default sink write timeout in seconds.
pub const DEFAULT_INFLUXDB_TIMEOUT_SECS: u64 = 60;

/// Default source query timeout in seconds.
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 600;

/// Default source connection pool size.
pub const DEFAULT_SOURCE_MAX_CONNECTIONS: u32 = 5;

/// Minimum (and default) poll interval in seconds.
pub const MIN_TABLE_INTERVAL_SECS: u64 = 15;

/// Default window size in hours (15 days).
pub const DEFAULT_HOURS_PER_BATCH: u32 = 320;

/// Largest accepted window size in hours (10 years).
pub const MAX_HOURS_PER_BATCH: u32 = 87_600;

/// Default maximum points per sink write.
pub const DEFAULT_OUTPUT_ROWS_PER_BATCH: usize = 100_000;

/// Precisions accepted by the InfluxDB 1.x write endpoint.
const VALID_PRECISIONS: &[&str] = &["n", "ns", "u", "ms", "s", "m", "h"];

/// Process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub influxdb: InfluxDbConfig,

    /// Source keyed by provider (`postgresql` or `mysql`); exactly one
    #[serde(default)]
    pub zabbix: BTreeMap<String, SourceConfig>,

    /// Replication streams keyed by table name
    #[serde(default)]
    pub tables: BTreeMap<String, StreamConfig>,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Adjustments made during validation, logged once logging is up
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default = "default_influxdb_url")]
    pub url: String,
    #[serde(default = "default_influxdb_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_influxdb_precision")]
    pub precision: String,
    #[serde(default = "default_influxdb_timeout")]
    pub timeout_secs: u64,
}

/// Source database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection URL, e.g. `postgres://zabbix@localhost/zabbix`
    pub address: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_source_max_connections")]
    pub max_connections: u32,
}

/// One replication stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier; defaults to the table key
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// Poll interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Initial watermark, `YYYY-MM-DDTHH:MM:SS` in UTC
    #[serde(default)]
    pub start_date: Option<String>,
    /// Extraction window size in hours
    #[serde(default = "default_hours_per_batch")]
    pub hours_per_batch: u32,
    /// Maximum records per sink write
    #[serde(default = "default_output_rows_per_batch")]
    pub output_rows_per_batch: usize,
    /// Maximum rows fetched per extraction; unset means no limit
    #[serde(default)]
    pub input_rows_per_batch: Option<u64>,
}

/// Checkpoint document settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_file_name")]
    pub file_name: PathBuf,
}

fn default_influxdb_url() -> String {
    DEFAULT_INFLUXDB_URL.to_string()
}

fn default_influxdb_database() -> String {
    DEFAULT_INFLUXDB_DATABASE.to_string()
}

fn default_influxdb_precision() -> String {
    DEFAULT_INFLUXDB_PRECISION.to_string()
}

fn default_influxdb_timeout() -> u64 {
    DEFAULT_INFLUXDB_TIMEOUT_SECS
}

fn default_source_timeout() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_SECS
}

fn default_source_max_connections() -> u32 {
    DEFAULT_SOURCE_MAX_CONNECTIONS
}

fn default_interval() -> u64 {
    MIN_TABLE_INTERVAL_SECS
}

fn default_hours_per_batch() -> u32 {
    DEFAULT_HOURS_PER_BATCH
}

fn default_output_rows_per_batch() -> usize {
    DEFAULT_OUTPUT_ROWS_PER_BATCH
}

fn default_registry_file_name() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_FILE_NAME)
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: default_influxdb_url(),
            database: default_influxdb_database(),
            username: None,
            password: None,
            precision: default_influxdb_precision(),
            timeout_secs: default_influxdb_timeout(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            file_name: default_registry_file_name(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("ZBXSYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        Self::from_settings(settings)
    }

    /// Parse configuration from TOML text (no environment overrides)
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> anyhow::Result<Self> {
        let mut config: Config = settings
            .try_deserialize()
            .context("Configuration does not match the expected layout")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults and validate
    pub fn validate(&mut self) -> anyhow::Result<()> {
        self.influxdb.validate()?;

        // Source
        if self.zabbix.is_empty() {
            bail!("You must define one Zabbix database provider ([zabbix.postgresql] or [zabbix.mysql])");
        }
        if self.zabbix.len() > 1 {
            bail!("You can only define one Zabbix database provider");
        }
        let (provider, source) = self.source()?;
        if source.address.trim().is_empty() {
            bail!("You must define a Zabbix database address for provider {}", provider);
        }
        if source.max_connections == 0 {
            bail!("Zabbix max_connections must be greater than 0");
        }

        // Streams
        if self.tables.is_empty() {
            bail!("You must define at least one table");
        }
        for (key, table) in self.tables.iter_mut() {
            if table.name.is_empty() {
                table.name = key.clone();
            }
            self.warnings.extend(table.validate()?);
        }
        if !self.tables.values().any(|t| t.active) {
            bail!("You must define at least one active table");
        }

        if self.registry.file_name.as_os_str().is_empty() {
            self.registry.file_name = default_registry_file_name();
        }

        Ok(())
    }

    /// The single configured source and its dialect
    pub fn source(&self) -> anyhow::Result<(Dialect, &SourceConfig)> {
        let (provider, source) = self
            .zabbix
            .iter()
            .next()
            .context("No Zabbix database provider configured")?;
        let dialect = provider.parse::<Dialect>()?;
        Ok((dialect, source))
    }

    /// Streams with `active = true`, in name order
    pub fn active_streams(&self) -> Vec<StreamConfig> {
        self.tables.values().filter(|t| t.active).cloned().collect()
    }

    /// Every configured stream, active or not, in name order
    pub fn all_streams(&self) -> Vec<StreamConfig> {
        self.tables.values().cloned().collect()
    }
}

impl InfluxDbConfig {
    /// Validate the sink endpoint and write parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.url)
            .with_context(|| format!("InfluxDB url must be formatted as http://host:port but was '{}'", self.url))?;

        if !matches!(url.scheme(), "http" | "https") {
            bail!("InfluxDB url ('{}') must use http or https", self.url);
        }
        if url.host_str().map_or(true, str::is_empty) {
            bail!("InfluxDB url value ('{}') is missing a host", self.url);
        }
        if url.port() == Some(0) {
            bail!("InfluxDB url port must be within [1-65535] but was 0");
        }
        if self.database.is_empty() {
            bail!("InfluxDB database cannot be empty");
        }
        if !VALID_PRECISIONS.contains(&self.precision.as_str()) {
            bail!(
                "InfluxDB precision '{}' is not one of {}",
                self.precision,
                VALID_PRECISIONS.join(", ")
            );
        }
        Ok(())
    }

    /// Sink write timeout; `None` when set to 0
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl SourceConfig {
    /// Source query timeout; `None` when set to 0
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl StreamConfig {
    /// Create a stream with default batch settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            interval: default_interval(),
            start_date: None,
            hours_per_batch: default_hours_per_batch(),
            output_rows_per_batch: default_output_rows_per_batch(),
            input_rows_per_batch: None,
        }
    }

    /// Apply defaults and validate, returning a note for every adjusted value
    pub fn validate(&mut self) -> anyhow::Result<Vec<String>> {
        let mut warnings = Vec::new();
        if self.interval < MIN_TABLE_INTERVAL_SECS {
            warnings.push(format!(
                "Poll interval {} sec for table {} is below minimum, using {} sec",
                self.interval, self.name, MIN_TABLE_INTERVAL_SECS
            ));
            self.interval = MIN_TABLE_INTERVAL_SECS;
        }
        if let Some(ref start) = self.start_date {
            if parse_timestamp(start).is_err() {
                bail!("Startdate for table {} is not well formatted: '{}'", self.name, start);
            }
        }
        if self.hours_per_batch == 0 {
            self.hours_per_batch = DEFAULT_HOURS_PER_BATCH;
        }
        if self.hours_per_batch > MAX_HOURS_PER_BATCH {
            bail!(
                "hours_per_batch for table {} must be at most {} but was {}",
                self.name,
                MAX_HOURS_PER_BATCH,
                self.hours_per_batch
            );
        }
        if self.output_rows_per_batch == 0 {
            self.output_rows_per_batch = DEFAULT_OUTPUT_ROWS_PER_BATCH;
        }
        if self.input_rows_per_batch == Some(0) {
            bail!("input_rows_per_batch for table {} must be greater than 0", self.name);
        }
        Ok(warnings)
    }

    /// Sleep between cycles
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Width of one extraction window
    pub fn window_size(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.hours_per_batch))
    }

    /// Configured initial watermark, if any
    pub fn initial_watermark(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .as_deref()
            .and_then(|s| parse_timestamp(s).ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"
        [influxdb]
        url = "http://influx.local:8086"
        username = "writer"
        password = "secret"

        [zabbix.postgresql]
        address = "postgres://zabbix@db.local/zabbix"

        [tables.history]
        active = true
        interval = 5
        start_date = "2024-01-01T00:00:00"
        hours_per_batch = 1
        output_rows_per_batch = 2

        [tables.trends]
        active = false

        [logging]
        level = "debug"
    "#;

    #[test]
    fn test_sample_config_applies_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.influxdb.database, DEFAULT_INFLUXDB_DATABASE);
        assert_eq!(config.influxdb.precision, "ms");
        assert_eq!(config.influxdb.username.as_deref(), Some("writer"));
        assert_eq!(
            config.registry.file_name,
            PathBuf::from(DEFAULT_REGISTRY_FILE_NAME)
        );

        let history = &config.tables["history"];
        assert_eq!(history.name, "history");
        assert_eq!(history.interval, MIN_TABLE_INTERVAL_SECS);
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("Poll interval 5 sec for table history"));
        assert_eq!(history.window_size(), TimeDelta::hours(1));
        assert_eq!(
            history.initial_watermark(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );

        let trends = &config.tables["trends"];
        assert_eq!(trends.hours_per_batch, DEFAULT_HOURS_PER_BATCH);
        assert_eq!(trends.output_rows_per_batch, DEFAULT_OUTPUT_ROWS_PER_BATCH);
    }

    #[test]
    fn test_active_streams_and_source() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        let active = config.active_streams();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "history");

        let names: Vec<String> = config.all_streams().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["history", "trends"]);

        let (dialect, source) = config.source().unwrap();
        assert_eq!(dialect, Dialect::Postgres);
        assert_eq!(source.timeout(), Some(Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS)));
    }

    #[test]
    fn test_requires_an_active_table() {
        let err = Config::from_toml_str(
            r#"
            [zabbix.mysql]
            address = "mysql://zabbix@localhost/zabbix"
            [tables.history]
            active = false
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("active table"));
    }

    #[test]
    fn test_rejects_two_providers() {
        let result = Config::from_toml_str(
            r#"
            [zabbix.mysql]
            address = "mysql://localhost/zabbix"
            [zabbix.postgresql]
            address = "postgres://localhost/zabbix"
            [tables.history]
            active = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_malformed_start_date() {
        let mut stream = StreamConfig::new("history");
        stream.start_date = Some("01/01/2024".to_string());
        assert!(stream.validate().is_err());
    }

    #[test]
    fn test_window_size_is_bounded() {
        let mut stream = StreamConfig::new("history");
        stream.hours_per_batch = MAX_HOURS_PER_BATCH;
        assert!(stream.validate().unwrap().is_empty());

        stream.hours_per_batch = u32::MAX;
        let err = stream.validate().unwrap_err();
        assert!(err.to_string().contains("hours_per_batch"));
    }

    #[test]
    fn test_rejects_zero_input_limit() {
        let mut stream = StreamConfig::new("history");
        stream.input_rows_per_batch = Some(0);
        assert!(stream.validate().is_err());
    }

    #[test]
    fn test_influxdb_url_validation() {
        let mut influx = InfluxDbConfig::default();
        assert!(influx.validate().is_ok());

        influx.url = "localhost:8086".to_string();
        assert!(influx.validate().is_err());

        influx.url = "http://localhost:0".to_string();
        assert!(influx.validate().is_err());

        influx.url = DEFAULT_INFLUXDB_URL.to_string();
        influx.precision = "days".to_string();
        assert!(influx.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let influx = InfluxDbConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(influx.timeout(), None);
    }
}
