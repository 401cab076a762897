//! Async aggregation engine
//!
//! One router task pulls batches from the [`TradeSource`] and hands each
//! trade to the partition owning its instrument. Every instrument gets its
//! own task fed by a bounded channel, so partitions never share state and
//! a hot instrument cannot stall the others' watermarks.
//!
//! ```text
//! TradeSource ─► router ─┬─► [queue] ─► partition(BTC/USD) ─┐
//!                        ├─► [queue] ─► partition(ETH/USD) ─┼─► RetryingPublisher ─► CandleSink
//!                        └─► [queue] ─► partition(...)     ─┘
//! ```
//!
//! Backpressure: the router awaits space in a full partition queue, which
//! stops it from pulling more trades from the source.
//!
//! Shutdown: cancellation or end of stream closes every queue. Each
//! partition drains what is already queued, flushes its open windows with
//! `closed_by_shutdown = true`, and exits. The sink is closed once, after
//! the last partition finishes.
//!
//! A partition whose sink publish fails for good stops immediately; its
//! later trades are discarded and `run` reports the failure after the
//! remaining partitions have shut down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::ids::InstrumentId;
use types::trade::TradeEvent;

use crate::config::AggregatorConfig;
use crate::error::{EngineError, SinkError, SourceError};
use crate::late_data::TradeClassification;
use crate::metrics::ServiceMetrics;
use crate::partition::{PartitionAggregator, PartitionStats};
use crate::sink::{CandleSink, RetryingPublisher};
use crate::source::TradeSource;

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub trades_processed: u64,
    /// Candles accepted by the sink, including shutdown flushes
    pub candles_emitted: u64,
    /// Candles emitted with `closed_by_shutdown = true`
    pub candles_flushed: u64,
    pub late_dropped: u64,
    pub malformed: u64,
    /// Number of instrument partitions spawned
    pub partitions: usize,
}

/// Final state reported by a partition task.
struct PartitionReport {
    instrument_id: InstrumentId,
    stats: PartitionStats,
    emitted: u64,
    flushed: u64,
    failure: Option<SinkError>,
}

/// Streaming OHLCV aggregation engine.
pub struct AggregatorEngine {
    config: AggregatorConfig,
    sink: Arc<dyn CandleSink>,
    metrics: Arc<ServiceMetrics>,
}

impl AggregatorEngine {
    /// Build an engine. The sink is wrapped in a [`RetryingPublisher`]
    /// using the configured retry policy.
    pub fn new(
        config: AggregatorConfig,
        sink: Arc<dyn CandleSink>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let publisher = RetryingPublisher::new(sink, config.retry_policy(), metrics.clone());
        Ok(Self {
            config,
            sink: Arc::new(publisher),
            metrics,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Consume `source` until it is exhausted or `cancel` fires, then flush
    /// every partition and close the sink.
    pub async fn run<S>(
        &self,
        mut source: S,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError>
    where
        S: TradeSource,
    {
        let source_name = source.name().to_string();
        info!(
            source = %source_name,
            sink = %self.sink.name(),
            window = %self.config.window,
            allowed_lateness_ms = self.config.allowed_lateness_ms,
            queue_capacity = self.config.partition_queue_capacity,
            "Aggregation engine started"
        );

        let mut senders: HashMap<InstrumentId, mpsc::Sender<TradeEvent>> = HashMap::new();
        let mut failed: HashSet<InstrumentId> = HashSet::new();
        let mut tasks: JoinSet<PartitionReport> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut source_error: Option<SourceError> = None;

        'intake: while !source.is_done() {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(source = %source_name, "Cancellation requested, stopping intake");
                    break;
                }
                batch = source.get_trades() => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    error!(source = %source_name, error = %err, "Trade source failed");
                    source_error = Some(err);
                    break;
                }
            };

            for item in batch {
                self.metrics.record_trade_received();
                let trade = match item {
                    Ok(trade) => trade,
                    Err(_) => {
                        // Already logged by the decoder
                        summary.malformed += 1;
                        self.metrics.record_malformed();
                        continue;
                    }
                };

                if failed.contains(&trade.instrument_id) {
                    warn!(
                        instrument = %trade.instrument_id,
                        event_time_ms = trade.event_time_ms,
                        "Discarding trade for failed partition"
                    );
                    continue;
                }

                let instrument_id = trade.instrument_id.clone();
                let tx = senders.entry(instrument_id.clone()).or_insert_with(|| {
                    summary.partitions += 1;
                    self.spawn_partition(&mut tasks, instrument_id.clone())
                });

                // A full queue must not hold off cancellation
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(
                            source = %source_name,
                            instrument = %instrument_id,
                            "Cancellation requested, stopping intake"
                        );
                        break 'intake;
                    }
                    sent = tx.send(trade) => sent,
                };

                if sent.is_err() {
                    // Receiver dropped: the partition stopped on a fatal sink error
                    warn!(instrument = %instrument_id, "Partition stopped, discarding its trades");
                    senders.remove(&instrument_id);
                    failed.insert(instrument_id);
                }
            }
        }

        // Closing the queues lets every partition drain and flush
        drop(senders);
        info!(partitions = tasks.len(), "Waiting for partitions to flush");

        let mut partition_error: Option<EngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    summary.trades_processed += report.stats.trades_processed;
                    summary.late_dropped += report.stats.late_dropped;
                    summary.candles_emitted += report.emitted;
                    summary.candles_flushed += report.flushed;
                    if let Some(source) = report.failure {
                        partition_error.get_or_insert(EngineError::PartitionFailed {
                            instrument: report.instrument_id,
                            source,
                        });
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "Partition task panicked");
                    partition_error
                        .get_or_insert(EngineError::TaskPanicked(join_err.to_string()));
                }
            }
        }

        let close_result = self.sink.close().await;
        if let Err(err) = &close_result {
            error!(sink = %self.sink.name(), error = %err, "Sink close failed");
        }

        info!(
            trades_processed = summary.trades_processed,
            candles_emitted = summary.candles_emitted,
            candles_flushed = summary.candles_flushed,
            late_dropped = summary.late_dropped,
            malformed = summary.malformed,
            partitions = summary.partitions,
            "Aggregation engine stopped"
        );

        if let Some(err) = source_error {
            return Err(err.into());
        }
        if let Some(err) = partition_error {
            return Err(err);
        }
        close_result.map_err(EngineError::SinkClose)?;
        Ok(summary)
    }

    fn spawn_partition(
        &self,
        tasks: &mut JoinSet<PartitionReport>,
        instrument_id: InstrumentId,
    ) -> mpsc::Sender<TradeEvent> {
        let (tx, rx) = mpsc::channel(self.config.partition_queue_capacity);
        let partition = PartitionAggregator::new(
            instrument_id.clone(),
            self.config.window,
            self.config.allowed_lateness_ms,
        );
        let sink = self.sink.clone();
        let metrics = self.metrics.clone();

        info!(instrument = %instrument_id, "Partition spawned");
        metrics.partition_started();
        tasks.spawn(run_partition(partition, rx, sink, metrics));
        tx
    }
}

/// Drive one partition until its queue closes or its sink fails.
async fn run_partition(
    mut partition: PartitionAggregator,
    mut rx: mpsc::Receiver<TradeEvent>,
    sink: Arc<dyn CandleSink>,
    metrics: Arc<ServiceMetrics>,
) -> PartitionReport {
    let mut emitted = 0u64;
    let mut flushed = 0u64;
    let mut failure = None;

    'intake: while let Some(trade) = rx.recv().await {
        let started = Instant::now();
        let open_before = partition.open_windows();
        let outcome = partition.process(&trade);
        let open_after = partition.open_windows();
        metrics.record_trade_processed(started.elapsed().as_nanos() as u64);

        match outcome.classification {
            TradeClassification::LateAccepted => metrics.record_late_accepted(),
            TradeClassification::LateDropped => metrics.record_late_dropped(),
            TradeClassification::OnTime => {}
        }
        if open_after > open_before {
            metrics.windows_opened((open_after - open_before) as u64);
        } else {
            metrics.windows_closed((open_before - open_after) as u64);
        }

        for candle in &outcome.finalized {
            if let Err(err) = sink.publish(candle).await {
                failure = Some(err);
                break 'intake;
            }
            emitted += 1;
            debug!(
                instrument = %candle.instrument_id,
                window_start_ms = candle.window_start_ms,
                "Candle emitted"
            );
        }
    }

    if failure.is_none() {
        let remaining = partition.flush();
        metrics.windows_closed(remaining.len() as u64);
        for candle in &remaining {
            if let Err(err) = sink.publish(candle).await {
                failure = Some(err);
                break;
            }
            emitted += 1;
            flushed += 1;
        }
    } else {
        metrics.windows_closed(partition.open_windows() as u64);
    }

    metrics.partition_stopped();
    match &failure {
        None => info!(
            instrument = %partition.instrument_id(),
            emitted,
            flushed,
            "Partition finished"
        ),
        Some(err) => error!(
            instrument = %partition.instrument_id(),
            error = %err,
            "Partition failed, sink unavailable"
        ),
    }

    PartitionReport {
        instrument_id: partition.instrument_id().clone(),
        stats: partition.stats().clone(),
        emitted,
        flushed,
        failure,
    }
}
