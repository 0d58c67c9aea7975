use super::{closes, ensure_enough, Strategy};
use crate::indicators::calculate_bollinger;
use crate::models::{Candle, Signal, StrategyId};
use crate::{BotError, Result};

/// Bollinger Band re-entry
///
/// Buys when price closes back inside the band after closing below it, sells
/// when it closes back inside after closing above it.
#[derive(Debug, Clone)]
pub struct BollingerStrategy {
    period: usize,
    num_std: f64,
}

impl BollingerStrategy {
    pub fn new(period: usize, num_std: f64) -> Self {
        Self { period, num_std }
    }
}

impl Default for BollingerStrategy {
    fn default() -> Self {
        Self::new(20, 2.0)
    }
}

impl Strategy for BollingerStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Bollinger
    }

    fn generate_signal(&self, candles: &[Candle]) -> Result<Signal> {
        ensure_enough(self, candles)?;

        let prices = closes(candles);
        let previous_prices = &prices[..prices.len() - 1];
        let bands = |p: &[f64]| {
            calculate_bollinger(p, self.period, self.num_std)
                .ok_or_else(|| BotError::strategy("Bollinger needs more data".to_string()))
        };

        let previous = bands(previous_prices)?;
        let current = bands(&prices)?;
        let previous_close = previous_prices[previous_prices.len() - 1];
        let close = prices[prices.len() - 1];

        if previous_close < previous.lower && close >= current.lower {
            Ok(Signal::Buy)
        } else if previous_close > previous.upper && close <= current.upper {
            Ok(Signal::Sell)
        } else {
            Ok(Signal::Hold)
        }
    }

    fn min_candles_required(&self) -> usize {
        self.period + 1
    }
}
