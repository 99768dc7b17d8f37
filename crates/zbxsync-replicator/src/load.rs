//! Sink writes over the InfluxDB 1.x HTTP API
//!
//! One chunk is one `POST /write` request. The loader never retries: a failed
//! write may still have been partially ingested, so the worker re-sends the
//! whole window on its next cycle instead.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use crate::config::InfluxDbConfig;
use crate::error::{Result, SyncError};

/// Destination for record chunks
#[async_trait]
pub trait Loader: Send + Sync {
    /// Write one chunk; `Ok` only once the sink has accepted every record
    async fn load(&self, chunk: &[String]) -> Result<()>;
}

/// Loader writing line protocol to an InfluxDB `/write` endpoint
pub struct InfluxLoader {
    client: Client,
    write_url: String,
    database: String,
    precision: String,
    credentials: Option<(String, Option<String>)>,
}

impl InfluxLoader {
    /// Build a loader from the sink configuration
    pub fn new(config: &InfluxDbConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            write_url: format!("{}/write", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            precision: config.precision.clone(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

#[async_trait]
impl Loader for InfluxLoader {
    async fn load(&self, chunk: &[String]) -> Result<()> {
        let body = chunk.join("\n");

        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", &self.database), ("precision", &self.precision)])
            .header(header::CONTENT_TYPE, "application/text")
            .body(body);

        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!(records = chunk.len(), "Sink accepted write");
            return Ok(());
        }

        Err(rejection(status, response.text().await))
    }
}

/// Error for a non-204 reply, keeping the body or why it could not be read
fn rejection<E: std::fmt::Display>(
    status: StatusCode,
    body: std::result::Result<String, E>,
) -> SyncError {
    let body = body.unwrap_or_else(|e| format!("failed to read response body: {e}"));
    SyncError::SinkRejected {
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reports_unreadable_body() {
        let err = rejection(StatusCode::BAD_GATEWAY, Err::<String, _>("connection reset"));
        match err {
            SyncError::SinkRejected { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "failed to read response body: connection reset");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = rejection(StatusCode::BAD_REQUEST, Ok::<_, String>("bad line".to_string()));
        assert!(matches!(err, SyncError::SinkRejected { status: 400, ref body } if body == "bad line"));
    }

    #[test]
    fn test_write_url_ignores_trailing_slash() {
        let config = InfluxDbConfig {
            url: "http://influx.local:8086/".to_string(),
            ..Default::default()
        };
        let loader = InfluxLoader::new(&config).unwrap();
        assert_eq!(loader.write_url(), "http://influx.local:8086/write");
    }

    #[test]
    fn test_password_without_username_is_ignored() {
        let config = InfluxDbConfig {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let loader = InfluxLoader::new(&config).unwrap();
        assert!(loader.credentials.is_none());
    }
}
