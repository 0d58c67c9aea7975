use super::{closes, crossover, ensure_enough, Strategy};
use crate::indicators::calculate_macd;
use crate::models::{Candle, Signal, StrategyId};
use crate::{BotError, Result};

/// MACD signal-line crossover
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdStrategy {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}

impl Strategy for MacdStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Macd
    }

    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        ensure_enough(self, candles)?;

        let prices = closes(candles);
        let macd = |p: &[f64]| {
            calculate_macd(p, self.fast, self.slow, self.signal)
                .ok_or_else(|| BotError::strategy("MACD needs more data".to_string()))
        };

        let previous = macd(&prices[..prices.len() - 1])?;
        let current = macd(&prices)?;

        Ok(crossover(
            previous.macd,
            previous.signal,
            current.macd,
            current.signal,
        ))
    }

    fn min_candles_required(&self) -> usize {
        self.slow + self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles;

    #[test]
    fn test_flat_then_jump_is_buy() {
        let mut prices = vec![100.0; 40];
        prices.push(110.0);

        let signal = MacdStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_flat_then_drop_is_sell() {
        let mut prices = vec![100.0; 40];
        prices.push(90.0);

        let signal = MacdStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_flat_is_hold() {
        let prices = vec![100.0; 40];

        let signal = MacdStrategy::default()
            .generate_signal(&candles("BTCUSDT", &prices))
            .unwrap();
        assert_eq!(signal, Signal::Hold);
    }
}
