use super::moving_average::calculate_ema_series;

/// MACD line and its signal line for the latest price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Calculate MACD: EMA(fast) - EMA(slow), with an EMA(signal) of that line.
///
/// Needs at least `slow + signal - 1` prices.
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow {
        return None;
    }

    let fast_series = calculate_ema_series(prices, fast)?;
    let slow_series = calculate_ema_series(prices, slow)?;

    // Align both series on the slow EMA's first value
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .zip(&fast_series[offset..])
        .map(|(slow, fast)| fast - slow)
        .collect();

    let signal_series = calculate_ema_series(&macd_line, signal)?;

    let macd = *macd_line.last()?;
    let signal = *signal_series.last()?;
    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}
