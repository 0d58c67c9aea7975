use super::moving_average::calculate_sma;

/// Bollinger Bands for the latest price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands: SMA(period) ± num_std × population std dev
pub fn calculate_bollinger(prices: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    let middle = calculate_sma(prices, period)?;

    let variance = prices
        .iter()
        .rev()
        .take(period)
        .map(|p| (p - middle).powi(2))
        .sum::<f64>()
        / period as f64;
    let std = variance.sqrt();

    Some(BollingerBands {
        upper: middle + num_std * std,
        middle,
        lower: middle - num_std * std,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_prices_collapse_bands() {
        let prices = vec![100.0; 20];
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();

        assert_eq!(bands.upper, 100.0);
        assert_eq!(bands.middle, 100.0);
        assert_eq!(bands.lower, 100.0);
    }

    #[test]
    fn test_band_width() {
        // mean 5, population std dev 2
        let prices = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = calculate_bollinger(&prices, 8, 2.0).unwrap();

        assert_eq!(bands.middle, 5.0);
        assert_eq!(bands.upper, 9.0);
        assert_eq!(bands.lower, 1.0);
    }

    #[test]
    fn test_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0], 20, 2.0).is_none());
    }
}
