use super::{closes, crossover, ensure_enough, Strategy};
use crate::indicators::calculate_sma;
use crate::models::{Candle, Signal, StrategyId};
use crate::{BotError, Result};

/// Moving average crossover
///
/// Buys when the fast SMA crosses above the slow SMA, sells on the cross
/// below.
#[derive(Debug, Clone)]
pub struct MaCrossoverStrategy {
    fast_period: usize,
    slow_period: usize,
}

impl MaCrossoverStrategy {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
        }
    }
}

impl Default for MaCrossoverStrategy {
    fn default() -> Self {
        Self::new(9, 21)
    }
}

impl Strategy for MaCrossoverStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::MaCrossover
    }

    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        ensure_enough(self, candles)?;

        let prices = closes(candles);
        let previous = &prices[..prices.len() - 1];

        let sma = |p: &[f64], period| {
            calculate_sma(p, period)
                .ok_or_else(|| BotError::strategy("SMA needs more data".to_string()))
        };

        Ok(crossover(
            sma(previous, self.fast_period)?,
            sma(previous, self.slow_period)?,
            sma(&prices, self.fast_period)?,
            sma(&prices, self.slow_period)?,
        ))
    }

    fn min_candles_required(&self) -> usize {
        // One extra candle to compare against the previous crossing state
        self.slow_period + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles;

    #[test]
    fn test_breakout_is_buy() {
        let mut prices = vec![40000.0; 21];
        prices.push(50000.0);

        let signal = MaCrossoverStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_breakdown_is_sell() {
        let mut prices = vec![40000.0; 21];
        prices.push(30000.0);

        let signal = MaCrossoverStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_trend_continuation_is_hold() {
        // Fast already above slow on the previous candle
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();

        let signal = MaCrossoverStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_insufficient_data() {
        let strategy = MaCrossoverStrategy::default();
        let err = strategy
            .generate_signal(&candles("BTCUSDT", &[1.0; 10]))
            .unwrap_err();
        assert!(matches!(err, BotError::Strategy(_)));
        assert!(!err.is_validation());
    }
}
