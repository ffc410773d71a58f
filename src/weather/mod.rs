//! Weather telemetry ingest
//!
//! Advisory feed from the site's weather data logger, reached through the
//! serial terminal server in front of it. The logger emits one CSV record
//! per minute:
//!
//! ```text
//! record_time,temperature_c,wind_speed_ms,wind_direction_deg
//! 2025-06-01T12:00:00Z,21.4,3.2,180.0
//! ```
//!
//! Empty fields mean a sensor dropout and are stored as `None`. The poller
//! never touches the activation/deactivation path; losing weather costs
//! operators context, not safety.

use crate::config::WeatherConfig;
use crate::storage::{WeatherRecord, WeatherStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Startup/reconnect backoff sequence in seconds; the last value repeats.
const BACKOFF_SECS: [u64; 6] = [1, 3, 5, 10, 30, 60];

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("logger connection failed: {0}")]
    ConnectionFailed(String),

    #[error("logger read timeout")]
    Timeout,

    #[error("logger connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of weather readings. The poller is written against this trait so
/// tests can script a source without a socket.
#[async_trait]
pub trait WeatherSource: Send {
    async fn connect(&mut self) -> Result<(), WeatherError>;

    /// Next record from the logger, or `None` for lines that carry no data
    /// (headers, blanks, unparseable noise).
    async fn latest(&mut self) -> Result<Option<WeatherRecord>, WeatherError>;

    fn is_connected(&self) -> bool;
}

/// Parse one logger line. Returns `None` for headers, blank lines and
/// anything else that is not a record.
pub fn parse_record_line(line: &str) -> Option<WeatherRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("record_time") {
        return None;
    }

    let mut fields = line.split(',');
    let time_str = fields.next()?.trim();
    let record_time = parse_timestamp(time_str)?;

    let mut value = || -> Option<f64> {
        fields
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    };

    Some(WeatherRecord {
        record_time,
        temperature_c: value(),
        wind_speed_ms: value(),
        wind_direction_deg: value(),
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Loggers configured without a zone report naive local time; treat as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Line-oriented TCP client to the logger's terminal server.
pub struct LoggerClient {
    host: String,
    port: u16,
    read_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
    line_buffer: String,
}

impl LoggerClient {
    pub fn new(host: &str, port: u16, read_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            read_timeout,
            stream: None,
            line_buffer: String::with_capacity(128),
        }
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(
            &config.host,
            config.port,
            Duration::from_secs(config.read_timeout_secs),
        )
    }

    async fn disconnect(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            let _ = reader.get_mut().shutdown().await;
        }
    }
}

#[async_trait]
impl WeatherSource for LoggerClient {
    async fn connect(&mut self) -> Result<(), WeatherError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(&addr))
            .await
            .map_err(|_| WeatherError::ConnectionFailed("connect timeout".to_string()))?
            .map_err(|e| WeatherError::ConnectionFailed(e.to_string()))?;

        info!(address = %addr, "Connected to weather logger");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn latest(&mut self) -> Result<Option<WeatherRecord>, WeatherError> {
        let reader = self
            .stream
            .as_mut()
            .ok_or_else(|| WeatherError::ConnectionFailed("not connected".to_string()))?;

        self.line_buffer.clear();
        let read = tokio::time::timeout(self.read_timeout, reader.read_line(&mut self.line_buffer))
            .await;

        let bytes = match read {
            Err(_) => {
                self.disconnect().await;
                return Err(WeatherError::Timeout);
            }
            Ok(Err(e)) => {
                self.disconnect().await;
                return Err(WeatherError::Io(e));
            }
            Ok(Ok(b)) => b,
        };

        if bytes == 0 {
            self.disconnect().await;
            return Err(WeatherError::ConnectionClosed);
        }

        Ok(parse_record_line(&self.line_buffer))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Last good reading, shared with the health endpoint.
pub type WeatherCache = Arc<Mutex<Option<WeatherRecord>>>;

/// Poll loop: one reading per interval, stored when it carries any value.
/// Connection loss is retried with the backoff sequence; errors are logged
/// and never fatal.
pub async fn run_poller(
    mut source: impl WeatherSource,
    store: WeatherStore,
    cache: WeatherCache,
    config: WeatherConfig,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = config.poll_interval_secs,
        "Weather poller running"
    );
    let mut backoff_index = 0usize;

    loop {
        if !source.is_connected() {
            match source.connect().await {
                Ok(()) => backoff_index = 0,
                Err(e) => {
                    let delay = BACKOFF_SECS[backoff_index.min(BACKOFF_SECS.len() - 1)];
                    warn!(error = %e, retry_secs = delay, "Weather logger unavailable");
                    backoff_index += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => continue,
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        match source.latest().await {
            Ok(Some(record)) if record.has_any_value() => {
                if let Err(e) = store.insert(&record) {
                    warn!(error = %e, "Failed to store weather record");
                }
                if let Ok(mut cached) = cache.lock() {
                    *cached = Some(record.clone());
                }
                info!(
                    temperature_c = ?record.temperature_c,
                    wind_speed_ms = ?record.wind_speed_ms,
                    wind_direction_deg = ?record.wind_direction_deg,
                    "Weather poll ok"
                );
            }
            Ok(Some(_)) => warn!("Weather record carried no values, dropped"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Weather poll failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.poll_interval_secs)) => {}
            _ = cancel.cancelled() => break,
        }
    }

    info!("Weather poller stopping");
}
