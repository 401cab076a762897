//! Observability and metrics for the OHLCV aggregator
//!
//! Counters and gauges are plain atomics shared through an `Arc` by the
//! router, every partition task and the retrying sink publisher. The
//! binary periodically logs `export()` and any alerts produced by
//! `check_thresholds`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the aggregation service.
pub struct ServiceMetrics {
    // Ingestion
    pub trades_received: AtomicU64,
    pub malformed_events: AtomicU64,

    // Partition processing
    pub trades_processed: AtomicU64,
    pub late_accepted: AtomicU64,
    pub late_dropped: AtomicU64,
    pub trade_processing_ns: Mutex<LatencyTracker>,

    // Emission
    pub candles_emitted: AtomicU64,
    pub candles_flushed_on_shutdown: AtomicU64,
    pub sink_retries: AtomicU64,
    pub sink_failures: AtomicU64,

    // Gauges
    pub open_windows: AtomicU64,
    pub active_partitions: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            trades_received: AtomicU64::new(0),
            malformed_events: AtomicU64::new(0),
            trades_processed: AtomicU64::new(0),
            late_accepted: AtomicU64::new(0),
            late_dropped: AtomicU64::new(0),
            trade_processing_ns: Mutex::new(LatencyTracker::new(1000)),
            candles_emitted: AtomicU64::new(0),
            candles_flushed_on_shutdown: AtomicU64::new(0),
            sink_retries: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            open_windows: AtomicU64::new(0),
            active_partitions: AtomicU64::new(0),
        }
    }

    /// Record a trade read from the source, valid or not.
    pub fn record_trade_received(&self) {
        self.trades_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trade processed by a partition.
    pub fn record_trade_processed(&self, latency_ns: u64) {
        self.trades_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.trade_processing_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_late_accepted(&self) {
        self.late_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_dropped(&self) {
        self.late_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a candle accepted by the sink.
    pub fn record_candle_emitted(&self, closed_by_shutdown: bool) {
        self.candles_emitted.fetch_add(1, Ordering::Relaxed);
        if closed_by_shutdown {
            self.candles_flushed_on_shutdown.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_sink_retry(&self) {
        self.sink_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn windows_opened(&self, count: u64) {
        self.open_windows.fetch_add(count, Ordering::Relaxed);
    }

    pub fn windows_closed(&self, count: u64) {
        // Saturating; the gauge never wraps below zero
        let _ = self
            .open_windows
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(count)));
    }

    pub fn partition_started(&self) {
        self.active_partitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn partition_stopped(&self) {
        let _ = self
            .active_partitions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let malformed = self.malformed_events.load(Ordering::Relaxed);
        if malformed > thresholds.max_malformed_events {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "malformed_events".to_string(),
                message: format!(
                    "Malformed events: {} > threshold {}",
                    malformed, thresholds.max_malformed_events
                ),
            });
        }

        let processed = self.trades_processed.load(Ordering::Relaxed);
        let dropped = self.late_dropped.load(Ordering::Relaxed);
        if processed > 0 {
            let drop_rate = dropped as f64 / processed as f64;
            if drop_rate > thresholds.max_late_drop_rate {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    metric: "late_drop_rate".to_string(),
                    message: format!(
                        "Late drop rate: {:.4} > threshold {:.4}",
                        drop_rate, thresholds.max_late_drop_rate
                    ),
                });
            }
        }

        let failures = self.sink_failures.load(Ordering::Relaxed);
        if failures > 0 {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "sink_failures".to_string(),
                message: format!("Sink failures: {}", failures),
            });
        }

        if let Ok(tracker) = self.trade_processing_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_trade_processing_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "trade_processing_p99".to_string(),
                        message: format!(
                            "Trade processing p99: {}ns > threshold {}ns",
                            p99, thresholds.max_trade_processing_p99_ns
                        ),
                    });
                }
            }
        }

        alerts
    }

    /// Export metrics as a BTreeMap for exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("trades_received".to_string(), self.trades_received.load(Ordering::Relaxed));
        m.insert("trades_processed".to_string(), self.trades_processed.load(Ordering::Relaxed));
        m.insert("malformed_events".to_string(), self.malformed_events.load(Ordering::Relaxed));
        m.insert("late_accepted".to_string(), self.late_accepted.load(Ordering::Relaxed));
        m.insert("late_dropped".to_string(), self.late_dropped.load(Ordering::Relaxed));
        m.insert("candles_emitted".to_string(), self.candles_emitted.load(Ordering::Relaxed));
        m.insert(
            "candles_flushed_on_shutdown".to_string(),
            self.candles_flushed_on_shutdown.load(Ordering::Relaxed),
        );
        m.insert("sink_retries".to_string(), self.sink_retries.load(Ordering::Relaxed));
        m.insert("sink_failures".to_string(), self.sink_failures.load(Ordering::Relaxed));
        m.insert("open_windows".to_string(), self.open_windows.load(Ordering::Relaxed));
        m.insert("active_partitions".to_string(), self.active_partitions.load(Ordering::Relaxed));
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_malformed_events: u64,
    /// Fraction of processed trades dropped as late.
    pub max_late_drop_rate: f64,
    pub max_trade_processing_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_malformed_events: 100,
            max_late_drop_rate: 0.01,
            max_trade_processing_p99_ns: 1_000_000, // 1ms
        }
    }
}
