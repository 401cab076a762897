//! Candle sinks
//!
//! A [`CandleSink`] is shared by every partition task, so `publish` takes
//! `&self` and implementations serialize internally. Ordering is only
//! guaranteed per partition: each partition awaits one publish before
//! starting the next.
//!
//! The engine never talks to a raw sink. It wraps the configured sink in
//! a [`RetryingPublisher`], which retries transient failures with bounded
//! exponential backoff and reports exhaustion as a fatal error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use types::candle::Candle;

use crate::error::SinkError;
use crate::metrics::ServiceMetrics;

/// Consumer of finalized candles.
#[async_trait]
pub trait CandleSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> &str;

    /// Publish one candle. Returning `Ok` means the sink accepted it.
    async fn publish(&self, candle: &Candle) -> Result<(), SinkError>;

    /// Flush and release resources. Called exactly once by the engine
    /// after every partition has finished.
    async fn close(&self) -> Result<(), SinkError>;
}

/// Writes one JSON candle record per line.
pub struct JsonLinesSink<W> {
    name: String,
    writer: tokio::sync::Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    /// Consume the sink and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> CandleSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, candle: &Candle) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&candle.to_record())
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Unavailable { reason: e.to_string() })
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().await;
        writer
            .flush()
            .await
            .map_err(|e| SinkError::Unavailable { reason: e.to_string() })
    }
}

/// Forwards candles into a bounded channel. A full channel blocks
/// `publish`; a dropped receiver yields [`SinkError::Closed`].
pub struct ChannelSink {
    name: String,
    tx: Mutex<Option<mpsc::Sender<Candle>>>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<Candle>) -> Self {
        Self {
            name: name.into(),
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Candle>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(name, tx), rx)
    }

    fn sender(&self) -> Option<mpsc::Sender<Candle>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl CandleSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, candle: &Candle) -> Result<(), SinkError> {
        let tx = self.sender().ok_or(SinkError::Closed)?;
        tx.send(candle.clone()).await.map_err(|_| SinkError::Closed)
    }

    /// Drops the sender so the receiver observes end of stream.
    async fn close(&self) -> Result<(), SinkError> {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        Ok(())
    }
}

/// Buffers candles and forwards them to an inner sink `batch_size` at a
/// time. `close` forwards the partial batch, then closes the inner sink.
pub struct BatchingSink<S> {
    inner: S,
    batch_size: usize,
    pending: tokio::sync::Mutex<Vec<Candle>>,
}

impl<S: CandleSink> BatchingSink<S> {
    pub fn new(inner: S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            inner,
            batch_size,
            pending: tokio::sync::Mutex::new(Vec::with_capacity(batch_size)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Forward `batch` in order. On failure the unsent tail is returned
    /// to the caller.
    async fn forward(&self, batch: Vec<Candle>) -> Result<(), (SinkError, Vec<Candle>)> {
        for (idx, candle) in batch.iter().enumerate() {
            if let Err(err) = self.inner.publish(candle).await {
                return Err((err, batch[idx..].to_vec()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: CandleSink> CandleSink for BatchingSink<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn publish(&self, candle: &Candle) -> Result<(), SinkError> {
        let mut pending = self.pending.lock().await;
        pending.push(candle.clone());
        if pending.len() < self.batch_size {
            return Ok(());
        }

        let batch = std::mem::take(&mut *pending);
        match self.forward(batch).await {
            Ok(()) => Ok(()),
            Err((err, mut unsent)) => {
                // The triggering candle is always last; a failed publish
                // hands it back to the caller, who may retry it.
                if unsent.last() == Some(candle) {
                    unsent.pop();
                }
                *pending = unsent;
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if !batch.is_empty() {
            info!(
                sink = %self.inner.name(),
                candles = batch.len(),
                "Forwarding partial batch on close"
            );
            self.forward(batch).await.map_err(|(err, _)| err)?;
        }
        self.inner.close().await
    }
}

/// Collects candles in memory.
#[derive(Default)]
pub struct MemorySink {
    candles: Mutex<Vec<Candle>>,
    close_calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every candle published so far, in publish order.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandleSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, candle: &Candle) -> Result<(), SinkError> {
        if self.close_calls() > 0 {
            return Err(SinkError::Closed);
        }
        let mut candles = self.candles.lock().map_err(|_| SinkError::Unavailable {
            reason: "memory sink poisoned".to_string(),
        })?;
        candles.push(candle.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Bounded exponential backoff for sink publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based):
    /// `initial * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

/// Wraps a sink with retries and metrics.
pub struct RetryingPublisher {
    inner: Arc<dyn CandleSink>,
    policy: RetryPolicy,
    metrics: Arc<ServiceMetrics>,
}

impl RetryingPublisher {
    pub fn new(
        inner: Arc<dyn CandleSink>,
        policy: RetryPolicy,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self { inner, policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl CandleSink for RetryingPublisher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn publish(&self, candle: &Candle) -> Result<(), SinkError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.inner.publish(candle).await {
                Ok(()) => {
                    self.metrics.record_candle_emitted(candle.closed_by_shutdown);
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.metrics.record_sink_failure();
                error!(
                    sink = %self.inner.name(),
                    instrument = %candle.instrument_id,
                    window_start_ms = candle.window_start_ms,
                    error = %err,
                    "Sink rejected candle"
                );
                return Err(err);
            }

            if attempt >= self.policy.max_retries {
                self.metrics.record_sink_failure();
                error!(
                    sink = %self.inner.name(),
                    instrument = %candle.instrument_id,
                    window_start_ms = candle.window_start_ms,
                    attempts = attempt + 1,
                    error = %err,
                    "Sink retries exhausted"
                );
                return Err(SinkError::Exhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.backoff(attempt);
            self.metrics.record_sink_retry();
            warn!(
                sink = %self.inner.name(),
                instrument = %candle.instrument_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Sink publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.inner.close().await
    }
}
