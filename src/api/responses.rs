// Raw exchange response bodies and their conversion into domain types

use crate::models::{AssetBalance, LeverageAck, OrderResult, PositionInfo, TickerStats};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Response from /api/v3/ticker/price
#[derive(Debug, Deserialize)]
pub(crate) struct PriceResponse {
    #[allow(dead_code)]
    pub symbol: String,
    pub price: Decimal,
}

/// Response from /api/v3/ticker/24hr
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Ticker24hResponse {
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
}

impl From<Ticker24hResponse> for TickerStats {
    fn from(raw: Ticker24hResponse) -> Self {
        Self {
            price_change: raw.price_change,
            price_change_percent: raw.price_change_percent,
            high_price: raw.high_price,
            low_price: raw.low_price,
            volume: raw.volume,
        }
    }
}

/// Response from /fapi/v2/account (only the fields we read)
#[derive(Debug, Deserialize)]
pub(crate) struct AccountResponse {
    #[serde(default)]
    pub assets: Vec<AccountAsset>,
    #[serde(default)]
    pub positions: Vec<AccountPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountAsset {
    pub asset: String,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountPosition {
    pub symbol: String,
    pub position_amt: Decimal,
    #[serde(default)]
    pub entry_price: Decimal,
    #[serde(default)]
    pub unrealized_profit: Decimal,
    // Sent as a string ("20")
    #[serde(default)]
    pub leverage: String,
}

impl From<AccountAsset> for AssetBalance {
    fn from(raw: AccountAsset) -> Self {
        Self {
            asset: raw.asset,
            wallet_balance: raw.wallet_balance,
        }
    }
}

impl From<AccountPosition> for PositionInfo {
    fn from(raw: AccountPosition) -> Self {
        Self {
            symbol: raw.symbol,
            position_amt: raw.position_amt,
            entry_price: raw.entry_price,
            unrealized_profit: raw.unrealized_profit,
            leverage: raw.leverage.trim().parse().unwrap_or(0),
        }
    }
}

/// Response from POST /fapi/v1/leverage
#[derive(Debug, Deserialize)]
pub(crate) struct LeverageResponse {
    pub symbol: String,
    pub leverage: u32,
}

impl From<LeverageResponse> for LeverageAck {
    fn from(raw: LeverageResponse) -> Self {
        Self {
            symbol: raw.symbol,
            leverage: raw.leverage,
        }
    }
}

/// Response from POST /fapi/v1/order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewOrderResponse {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
}

impl From<NewOrderResponse> for OrderResult {
    fn from(raw: NewOrderResponse) -> Self {
        Self {
            order_id: raw.order_id,
            client_order_id: raw.client_order_id,
            symbol: raw.symbol,
            status: raw.status,
            order_type: raw.order_type,
            side: raw.side,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_leverage_parsed_from_string() {
        let raw: AccountPosition = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","positionAmt":"0.010","entryPrice":"50000.0","unrealizedProfit":"12.5","leverage":"20"}"#,
        )
        .unwrap();

        let position = PositionInfo::from(raw);
        assert_eq!(position.leverage, 20);
        assert_eq!(position.position_amt, Decimal::new(10, 3));
    }

    #[test]
    fn test_order_response_type_field() {
        let raw: NewOrderResponse = serde_json::from_str(
            r#"{"orderId":42,"clientOrderId":"abc","symbol":"BTCUSDT","status":"NEW","type":"LIMIT","side":"BUY","price":"50000"}"#,
        )
        .unwrap();

        let result = OrderResult::from(raw);
        assert_eq!(result.order_type, "LIMIT");
        assert_eq!(result.order_id, 42);
    }
}
