// Trading strategy module
pub mod bollinger;
pub mod context;
pub mod dispatcher;
pub mod ma_crossover;
pub mod macd;
pub mod rsi_bounce;

pub use bollinger::BollingerStrategy;
pub use context::StrategyContext;
pub use dispatcher::{evaluate, Dispatcher, OrderIntent};
pub use ma_crossover::MaCrossoverStrategy;
pub use macd::MacdStrategy;
pub use rsi_bounce::RsiBounceStrategy;

use crate::models::{Candle, Signal, StrategyId};
use crate::{BotError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Base trait for all trading strategies
///
/// Implementations are stateless; everything they need is in the candle window.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Generate a trading signal for the newest candle in `candles`
    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal>;

    /// Get strategy name
    fn name(&self) -> &str {
        self.id().as_str()
    }

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// All strategies, keyed by identifier
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyId, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(MaCrossoverStrategy::default()));
        registry.register(Arc::new(RsiBounceStrategy::default()));
        registry.register(Arc::new(BollingerStrategy::default()));
        registry.register(Arc::new(MacdStrategy::default()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.id(), strategy);
    }

    pub fn get(&self, id: StrategyId) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(&id)
            .cloned()
            .ok_or_else(|| BotError::strategy(format!("Strategy not registered: {}", id)))
    }

    /// Largest window any registered strategy needs
    pub fn max_candles_required(&self) -> usize {
        self.strategies
            .values()
            .map(|s| s.min_candles_required())
            .max()
            .unwrap_or(0)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Closing prices, oldest first
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

pub(crate) fn ensure_enough(strategy: &dyn Strategy, candles: &[Candle]) -> Result<()> {
    if candles.len() < strategy.min_candles_required() {
        return Err(BotError::strategy(format!(
            "Insufficient data for {}: {} candles, need {}",
            strategy.name(),
            candles.len(),
            strategy.min_candles_required()
        )));
    }
    Ok(())
}

/// Signal for line `a` crossing line `b` between two consecutive candles
pub(crate) fn crossover(prev_a: f64, prev_b: f64, a: f64, b: f64) -> Signal {
    if prev_a <= prev_b && a > b {
        Signal::Buy
    } else if prev_a >= prev_b && a < b {
        Signal::Sell
    } else {
        Signal::Hold
    }
}
