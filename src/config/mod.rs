//! Pipeline Configuration
//!
//! Every tunable of the pipeline, read once at startup into a single
//! `PipelineConfig` that is passed by value to whoever builds the components.
//! Unset or blank variables fall back to the defaults below.

use crate::queue::QueueOptions;
use crate::worker::WorkerOptions;

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const SOURCE_LOCATION: &str = "SOURCE_LOCATION";
pub const DESTINATION_LOCATION: &str = "DESTINATION_LOCATION";
pub const METADATA_TABLE_NAME: &str = "METADATA_TABLE_NAME";
pub const VISIBILITY_TIMEOUT: &str = "VISIBILITY_TIMEOUT";
pub const BATCH_SIZE: &str = "BATCH_SIZE";
pub const MAX_BATCH_WAIT: &str = "MAX_BATCH_WAIT";
pub const MAX_RECEIVE_COUNT: &str = "MAX_RECEIVE_COUNT";
pub const RETENTION_PERIOD: &str = "RETENTION_PERIOD";
pub const WORKER_COUNT: &str = "WORKER_COUNT";
pub const MAX_LEASE_EXTENSIONS: &str = "MAX_LEASE_EXTENSIONS";
pub const LEASE_SAFETY_MARGIN: &str = "LEASE_SAFETY_MARGIN";
pub const DEDUP_WINDOW: &str = "DEDUP_WINDOW";
pub const BIND_ADDR: &str = "BIND_ADDR";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Constraint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source_location: String,
    pub destination_location: String,
    pub metadata_table_name: String,
    pub visibility_timeout: Duration,
    pub batch_size: usize,
    pub max_batch_wait: Duration,
    pub max_receive_count: u32,
    pub retention_period: Duration,
    pub worker_count: usize,
    pub max_lease_extensions: u32,
    pub lease_safety_margin: Duration,
    pub dedup_window: Duration,
    pub bind_addr: SocketAddr,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let queue = QueueOptions::default();
        let worker = WorkerOptions::default();
        Self {
            source_location: "source-documents".to_string(),
            destination_location: "embeddings".to_string(),
            metadata_table_name: "processing-records".to_string(),
            visibility_timeout: queue.visibility_timeout,
            batch_size: worker.batch_size,
            max_batch_wait: worker.max_batch_wait,
            max_receive_count: queue.max_receive_count,
            retention_period: queue.retention_period,
            worker_count: worker.worker_count,
            max_lease_extensions: worker.max_lease_extensions,
            lease_safety_margin: worker.lease_safety_margin,
            dedup_window: Duration::from_secs(60),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl PipelineConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a validated config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &'static str| {
            lookup(key).and_then(|v| {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let mut config = Self::default();

        if let Some(v) = value(SOURCE_LOCATION) {
            config.source_location = v;
        }
        if let Some(v) = value(DESTINATION_LOCATION) {
            config.destination_location = v;
        }
        if let Some(v) = value(METADATA_TABLE_NAME) {
            config.metadata_table_name = v;
        }
        if let Some(v) = value(VISIBILITY_TIMEOUT) {
            config.visibility_timeout = duration(VISIBILITY_TIMEOUT, &v)?;
        }
        if let Some(v) = value(BATCH_SIZE) {
            config.batch_size = number(BATCH_SIZE, &v)?;
        }
        if let Some(v) = value(MAX_BATCH_WAIT) {
            config.max_batch_wait = duration(MAX_BATCH_WAIT, &v)?;
        }
        if let Some(v) = value(MAX_RECEIVE_COUNT) {
            config.max_receive_count = number(MAX_RECEIVE_COUNT, &v)?;
        }
        if let Some(v) = value(RETENTION_PERIOD) {
            config.retention_period = duration(RETENTION_PERIOD, &v)?;
        }
        if let Some(v) = value(WORKER_COUNT) {
            config.worker_count = number(WORKER_COUNT, &v)?;
        }
        if let Some(v) = value(MAX_LEASE_EXTENSIONS) {
            config.max_lease_extensions = number(MAX_LEASE_EXTENSIONS, &v)?;
        }
        if let Some(v) = value(LEASE_SAFETY_MARGIN) {
            config.lease_safety_margin = duration(LEASE_SAFETY_MARGIN, &v)?;
        }
        if let Some(v) = value(DEDUP_WINDOW) {
            config.dedup_window = duration(DEDUP_WINDOW, &v)?;
        }
        if let Some(v) = value(BIND_ADDR) {
            config.bind_addr = v.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    key: BIND_ADDR,
                    value: v.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: &str| Err(ConfigError::Constraint(reason.to_string()));

        if self.source_location == self.destination_location {
            // Writing derived artifacts into the watched location would retrigger the pipeline.
            return fail("source and destination locations must differ");
        }
        if self.metadata_table_name.is_empty() {
            return fail("metadata table name must not be empty");
        }
        if self.visibility_timeout.is_zero() {
            return fail("visibility timeout must be positive");
        }
        if self.batch_size == 0 {
            return fail("batch size must be at least 1");
        }
        if self.max_receive_count == 0 {
            return fail("max receive count must be at least 1");
        }
        if self.worker_count == 0 {
            return fail("worker count must be at least 1");
        }
        if self.retention_period < self.visibility_timeout {
            return fail("retention period must not be shorter than the visibility timeout");
        }
        Ok(())
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            visibility_timeout: self.visibility_timeout,
            max_receive_count: self.max_receive_count,
            retention_period: self.retention_period,
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            worker_count: self.worker_count,
            batch_size: self.batch_size,
            max_batch_wait: self.max_batch_wait,
            visibility_timeout: self.visibility_timeout,
            lease_safety_margin: self.lease_safety_margin,
            max_lease_extensions: self.max_lease_extensions,
            ..WorkerOptions::default()
        }
    }
}

fn number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|reason| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    })
}

/// Parses a human-readable duration (`250ms`, `10s`, `5m`, `1h 30m`, `14d`) or a
/// bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}
