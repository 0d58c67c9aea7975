use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Inputs for risk-based position sizing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingParams {
    /// Account equity in the quote asset
    pub account_equity: f64,
    /// Share of equity committed as margin, in percent
    pub risk_percent: f64,
    pub leverage: u32,
    /// Decimal places the exchange accepts for quantity
    pub quantity_precision: u32,
}

/// Calculate order quantity for a given entry price
///
/// quantity = equity × risk% / 100 × leverage / price, rounded down to
/// `quantity_precision` decimals. Returns `None` when the result rounds to
/// zero or the inputs are not usable.
///
/// # Arguments
/// * `params` - Equity, risk, leverage and precision
/// * `price` - Entry price (usually the closing price of the signal candle)
pub fn position_size(params: &SizingParams, price: f64) -> Option<Decimal> {
    if !(price.is_finite() && price > 0.0) {
        return None;
    }
    if !(params.risk_percent.is_finite() && params.risk_percent > 0.0) {
        return None;
    }
    if !(params.account_equity.is_finite() && params.account_equity > 0.0) {
        return None;
    }

    // Margin committed to this trade
    let margin = Decimal::from_f64(params.account_equity)? * Decimal::from_f64(params.risk_percent)?
        / Decimal::ONE_HUNDRED;
    let notional = margin * Decimal::from(params.leverage);
    let quantity = (notional / Decimal::from_f64(price)?)
        .round_dp_with_strategy(params.quantity_precision, RoundingStrategy::ToZero);

    if quantity <= Decimal::ZERO {
        return None;
    }
    Some(quantity)
}
