use crate::models::{Candle, StrategyId};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Per-symbol rolling state for one strategy
///
/// Keeps a bounded window of closed candles and the close time of the newest
/// one. Built for a single strategy; switching strategy means a fresh context.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    strategy: StrategyId,
    candles: VecDeque<Candle>,
    max_candles: usize,
    last_close_time: Option<DateTime<Utc>>,
}

impl StrategyContext {
    /// Create an empty context
    ///
    /// # Arguments
    /// * `strategy` - Strategy this window is built for
    /// * `max_candles` - Maximum number of candles to keep
    pub fn new(strategy: StrategyId, max_candles: usize) -> Self {
        Self {
            strategy,
            candles: VecDeque::with_capacity(max_candles),
            max_candles,
            last_close_time: None,
        }
    }

    pub fn strategy(&self) -> StrategyId {
        self.strategy
    }

    pub fn last_close_time(&self) -> Option<DateTime<Utc>> {
        self.last_close_time
    }

    /// Whether `candle` closes after everything already processed
    pub fn is_newer(&self, candle: &Candle) -> bool {
        self.last_close_time
            .map_or(true, |last| candle.close_time > last)
    }

    /// Add a candle, dropping the oldest once the window is full
    pub fn push(&mut self, candle: Candle) {
        self.last_close_time = Some(candle.close_time);
        self.candles.push_back(candle);

        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }

    /// Candles oldest first
    pub fn window(&mut self) -> &[Candle] {
        self.candles.make_contiguous()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
