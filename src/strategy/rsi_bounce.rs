use super::{closes, ensure_enough, Strategy};
use crate::indicators::calculate_rsi;
use crate::models::{Candle, Signal, StrategyId};
use crate::{BotError, Result};

/// RSI bounce off the oversold/overbought levels
///
/// Buys when RSI climbs back above the oversold level, sells when it drops
/// back below the overbought level.
#[derive(Debug, Clone)]
pub struct RsiBounceStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiBounceStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }
}

impl Default for RsiBounceStrategy {
    fn default() -> Self {
        Self::new(14, 30.0, 70.0)
    }
}

impl Strategy for RsiBounceStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::RsiBounce
    }

    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        ensure_enough(self, candles)?;

        let prices = closes(candles);
        let rsi = |p: &[f64]| {
            calculate_rsi(p, self.period)
                .ok_or_else(|| BotError::strategy("RSI needs more data".to_string()))
        };

        let previous = rsi(&prices[..prices.len() - 1])?;
        let current = rsi(&prices)?;

        let signal = if previous < self.oversold && current >= self.oversold {
            Signal::Buy
        } else if previous > self.overbought && current <= self.overbought {
            Signal::Sell
        } else {
            Signal::Hold
        };

        tracing::debug!(previous, current, ?signal, "RSI bounce evaluated");
        Ok(signal)
    }

    fn min_candles_required(&self) -> usize {
        self.period + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles;

    #[test]
    fn test_bounce_from_oversold_is_buy() {
        // Steady decline drives RSI to 0, then a sharp rebound
        let mut prices: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        prices.push(230.0);

        let signal = RsiBounceStrategy::default()
            .generate_signal(&candles("ETHUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_drop_from_overbought_is_sell() {
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        prices.push(70.0);

        let signal = RsiBounceStrategy::default()
            .generate_signal(&candles("ETHUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_still_oversold_is_hold() {
        let prices: Vec<f64> = (0..25).map(|i| 200.0 - i as f64).collect();

        let signal = RsiBounceStrategy::default()
            .generate_signal(&candles("ETHUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Hold);
    }
}
