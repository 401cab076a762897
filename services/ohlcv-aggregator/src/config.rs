//! Aggregator configuration from environment variables
//!
//! Loaded and validated once at startup; nothing here is consulted per
//! event. Every setting can also be set programmatically through the
//! `with_*` builders.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sink::RetryPolicy;
use crate::window::WindowDuration;

pub const DEFAULT_ALLOWED_LATENESS_MS: i64 = 0;
pub const DEFAULT_PARTITION_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_SINK_MAX_RETRIES: u32 = 5;
pub const DEFAULT_SINK_INITIAL_BACKOFF_MS: u64 = 100;
pub const DEFAULT_SINK_MAX_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_METRICS_LOG_INTERVAL_MS: u64 = 10_000;

/// Runtime configuration for the aggregation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Tumbling window length
    pub window: WindowDuration,

    /// How far the watermark trails the newest event time, in ms
    pub allowed_lateness_ms: i64,

    /// Bounded ingress queue per partition
    pub partition_queue_capacity: usize,

    pub sink_max_retries: u32,
    pub sink_initial_backoff_ms: u64,
    pub sink_max_backoff_ms: u64,

    /// Period of the metrics summary log line
    pub metrics_log_interval_ms: u64,

    /// JSON-lines trade file; stdin when `None`
    pub trade_input: Option<PathBuf>,
}

impl AggregatorConfig {
    /// Configuration with defaults for everything but the window.
    pub fn new(window: WindowDuration) -> Self {
        Self {
            window,
            allowed_lateness_ms: DEFAULT_ALLOWED_LATENESS_MS,
            partition_queue_capacity: DEFAULT_PARTITION_QUEUE_CAPACITY,
            sink_max_retries: DEFAULT_SINK_MAX_RETRIES,
            sink_initial_backoff_ms: DEFAULT_SINK_INITIAL_BACKOFF_MS,
            sink_max_backoff_ms: DEFAULT_SINK_MAX_BACKOFF_MS,
            metrics_log_interval_ms: DEFAULT_METRICS_LOG_INTERVAL_MS,
            trade_input: None,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `OHLCV_WINDOW_MS` (required; or legacy `OHLCV_WINDOW_SECONDS`)
    /// - `ALLOWED_LATENESS_MS` (default: 0)
    /// - `PARTITION_QUEUE_CAPACITY` (default: 1024)
    /// - `SINK_MAX_RETRIES` (default: 5)
    /// - `SINK_INITIAL_BACKOFF_MS` (default: 100)
    /// - `SINK_MAX_BACKOFF_MS` (default: 5000)
    /// - `METRICS_LOG_INTERVAL_MS` (default: 10000)
    /// - `TRADE_INPUT` (default: stdin)
    ///
    /// The binary loads `.env` into the environment before calling this.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup and validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_ms = match parse::<i64, _>(&lookup, "OHLCV_WINDOW_MS")? {
            Some(ms) => ms,
            None => parse::<i64, _>(&lookup, "OHLCV_WINDOW_SECONDS")?
                .map(|secs| secs.saturating_mul(1000))
                .ok_or(ConfigError::Missing("OHLCV_WINDOW_MS"))?,
        };

        let config = Self {
            window: WindowDuration::from_millis(window_ms)?,
            allowed_lateness_ms: parse(&lookup, "ALLOWED_LATENESS_MS")?
                .unwrap_or(DEFAULT_ALLOWED_LATENESS_MS),
            partition_queue_capacity: parse(&lookup, "PARTITION_QUEUE_CAPACITY")?
                .unwrap_or(DEFAULT_PARTITION_QUEUE_CAPACITY),
            sink_max_retries: parse(&lookup, "SINK_MAX_RETRIES")?
                .unwrap_or(DEFAULT_SINK_MAX_RETRIES),
            sink_initial_backoff_ms: parse(&lookup, "SINK_INITIAL_BACKOFF_MS")?
                .unwrap_or(DEFAULT_SINK_INITIAL_BACKOFF_MS),
            sink_max_backoff_ms: parse(&lookup, "SINK_MAX_BACKOFF_MS")?
                .unwrap_or(DEFAULT_SINK_MAX_BACKOFF_MS),
            metrics_log_interval_ms: parse(&lookup, "METRICS_LOG_INTERVAL_MS")?
                .unwrap_or(DEFAULT_METRICS_LOG_INTERVAL_MS),
            trade_input: lookup("TRADE_INPUT")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.as_millis() <= 0 {
            return Err(ConfigError::InvalidWindowDuration(self.window.as_millis()));
        }
        if self.allowed_lateness_ms < 0 {
            return Err(ConfigError::NegativeLateness(self.allowed_lateness_ms));
        }
        if self.partition_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.sink_max_backoff_ms < self.sink_initial_backoff_ms {
            return Err(ConfigError::InvalidBackoff {
                initial_ms: self.sink_initial_backoff_ms,
                max_ms: self.sink_max_backoff_ms,
            });
        }
        if self.metrics_log_interval_ms == 0 {
            return Err(ConfigError::ZeroMetricsInterval);
        }
        Ok(())
    }

    pub fn with_allowed_lateness_ms(mut self, allowed_lateness_ms: i64) -> Self {
        self.allowed_lateness_ms = allowed_lateness_ms;
        self
    }

    pub fn with_partition_queue_capacity(mut self, capacity: usize) -> Self {
        self.partition_queue_capacity = capacity;
        self
    }

    pub fn with_sink_retries(
        mut self,
        max_retries: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
    ) -> Self {
        self.sink_max_retries = max_retries;
        self.sink_initial_backoff_ms = initial_backoff_ms;
        self.sink_max_backoff_ms = max_backoff_ms;
        self
    }

    pub fn with_metrics_log_interval_ms(mut self, interval_ms: u64) -> Self {
        self.metrics_log_interval_ms = interval_ms;
        self
    }

    pub fn with_trade_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.trade_input = Some(path.into());
        self
    }

    /// Sink retry policy derived from the `sink_*` settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.sink_max_retries,
            initial_backoff: Duration::from_millis(self.sink_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.sink_max_backoff_ms),
        }
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_log_interval_ms)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparseable { key, value: raw }),
    }
}
