//! Error taxonomy for the aggregation service
//!
//! Per-event problems (malformed trades, late data) never surface here;
//! they are counted and skipped. Everything in this module is either fatal
//! at startup (`ConfigError`) or fatal to the partition that hit it.

use thiserror::Error;
use types::ids::InstrumentId;

/// Invalid configuration. Fatal at startup, never raised at runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window duration must be positive, got {0}ms")]
    InvalidWindowDuration(i64),

    #[error("allowed lateness must be non-negative, got {0}ms")]
    NegativeLateness(i64),

    #[error("partition queue capacity must be positive")]
    ZeroQueueCapacity,

    #[error("metrics log interval must be positive")]
    ZeroMetricsInterval,

    #[error("max backoff {max_ms}ms is below initial backoff {initial_ms}ms")]
    InvalidBackoff { initial_ms: u64, max_ms: u64 },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("cannot parse {key}={value}")]
    Unparseable { key: &'static str, value: String },
}

/// Failure to hand a finalized candle to the sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("sink closed")]
    Closed,

    #[error("candle serialization failed: {0}")]
    Serialization(String),

    #[error("sink unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<SinkError> },
}

impl SinkError {
    /// Whether another publish attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable { .. })
    }
}

/// Failure reading from a trade source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source disconnected: {0}")]
    Disconnected(String),
}

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("partition {instrument} failed: {source}")]
    PartitionFailed {
        instrument: InstrumentId,
        source: SinkError,
    },

    #[error("partition task panicked: {0}")]
    TaskPanicked(String),

    #[error("sink close failed: {0}")]
    SinkClose(SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidWindowDuration(0);
        assert_eq!(err.to_string(), "window duration must be positive, got 0ms");
    }

    #[test]
    fn test_sink_error_retryable() {
        let unavailable = SinkError::Unavailable {
            reason: "broker down".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(!SinkError::Closed.is_retryable());

        let exhausted = SinkError::Exhausted {
            attempts: 3,
            last: Box::new(unavailable),
        };
        assert!(!exhausted.is_retryable());
        assert!(exhausted.to_string().contains("broker down"));
    }

    #[test]
    fn test_engine_error_from_config_error() {
        let engine_err: EngineError = ConfigError::NegativeLateness(-5).into();
        assert!(matches!(engine_err, EngineError::Config(_)));
    }

    #[test]
    fn test_partition_failed_display() {
        let err = EngineError::PartitionFailed {
            instrument: InstrumentId::new("BTC/USD"),
            source: SinkError::Closed,
        };
        assert_eq!(err.to_string(), "partition BTC/USD failed: sink closed");
    }
}
