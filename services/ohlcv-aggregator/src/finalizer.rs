//! Window finalization
//!
//! Turns accumulators into immutable candles and frees their state. Two
//! paths exist: the normal close, driven by the watermark, and the
//! shutdown flush, which closes every remaining window and flags the
//! resulting candles as possibly incomplete.

use tracing::{debug, error};
use types::candle::Candle;
use types::ids::InstrumentId;

use crate::accumulator::{Accumulator, AccumulatorStore};
use crate::window::WindowDuration;

/// Closes windows for one instrument.
#[derive(Debug, Clone)]
pub struct Finalizer {
    instrument_id: InstrumentId,
}

impl Finalizer {
    pub fn new(instrument_id: InstrumentId) -> Self {
        Self { instrument_id }
    }

    /// Finalize every open window whose end is at or below `watermark_ms`.
    ///
    /// Candles come out in ascending `window_start_ms` order and their
    /// accumulators are removed from the store.
    pub fn finalize_up_to(&self, store: &mut AccumulatorStore, watermark_ms: i64) -> Vec<Candle> {
        let closed = store.drain_closed(watermark_ms);
        self.build(store.duration(), closed, false)
    }

    /// Close every open window on shutdown.
    pub fn flush(&self, store: &mut AccumulatorStore) -> Vec<Candle> {
        let open = store.drain_all();
        self.build(store.duration(), open, true)
    }

    fn build(
        &self,
        duration: WindowDuration,
        windows: Vec<(i64, Accumulator)>,
        closed_by_shutdown: bool,
    ) -> Vec<Candle> {
        windows
            .into_iter()
            .map(|(window_start_ms, acc)| {
                let candle = acc.into_candle(
                    self.instrument_id.clone(),
                    window_start_ms,
                    duration,
                    closed_by_shutdown,
                );
                if !candle.is_valid() {
                    error!(
                        instrument = %self.instrument_id,
                        window_start_ms,
                        ?candle,
                        "Finalized candle violates OHLCV invariants"
                    );
                }
                debug!(
                    instrument = %self.instrument_id,
                    window_start_ms,
                    trade_count = candle.trade_count,
                    closed_by_shutdown,
                    "Window finalized"
                );
                candle
            })
            .collect()
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }
}
