use crate::{BotError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How the bot acts on strategy decisions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Dropbox,
    Hybrid,
    Manual,
}

impl BotMode {
    pub const ALL: [BotMode; 3] = [BotMode::Dropbox, BotMode::Hybrid, BotMode::Manual];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Dropbox => "dropbox",
            BotMode::Hybrid => "hybrid",
            BotMode::Manual => "manual",
        }
    }

    /// Whether strategy decisions are sent to the exchange without an operator
    pub fn places_orders_automatically(&self) -> bool {
        !matches!(self, BotMode::Manual)
    }
}

impl FromStr for BotMode {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        BotMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| BotError::validation(format!("Invalid mode: {}", s)))
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered strategy identifiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    MaCrossover,
    RsiBounce,
    Bollinger,
    Macd,
}

impl StrategyId {
    pub const ALL: [StrategyId; 4] = [
        StrategyId::MaCrossover,
        StrategyId::RsiBounce,
        StrategyId::Bollinger,
        StrategyId::Macd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::MaCrossover => "ma_crossover",
            StrategyId::RsiBounce => "rsi_bounce",
            StrategyId::Bollinger => "bollinger",
            StrategyId::Macd => "macd",
        }
    }
}

impl FromStr for StrategyId {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| BotError::validation(format!("Invalid strategy: {}", s)))
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The applied bot configuration.
///
/// Replaced wholesale on (re)start; only `mode` and `strategy` change in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub active: bool,
    pub mode: BotMode,
    pub strategy: StrategyId,
    pub symbols: Vec<String>,
    pub leverage: u32,
    pub risk_percent: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            active: false,
            mode: BotMode::Hybrid,
            strategy: StrategyId::MaCrossover,
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            leverage: 10,
            risk_percent: 1.0,
        }
    }
}

/// OHLCV candle for one symbol and one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// False while the interval is still in progress
    pub is_closed: bool,
}

/// Trading signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire value expected by the exchange
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl FromStr for OrderSide {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(BotError::validation(format!("Invalid side: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

/// An order to send to the exchange. Built once, consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Sent as `newClientOrderId` so the exchange can reject duplicates
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
            stop_price: None,
            client_order_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_price(mut self, price: Option<Decimal>) -> Self {
        self.price = price;
        self
    }

    pub fn with_stop_price(mut self, stop_price: Option<Decimal>) -> Self {
        self.stop_price = stop_price;
        self
    }

    /// Order type follows from which prices are present; a stop price wins.
    pub fn order_type(&self) -> OrderType {
        match (self.price, self.stop_price) {
            (_, Some(_)) => OrderType::StopMarket,
            (Some(_), None) => OrderType::Limit,
            (None, None) => OrderType::Market,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(BotError::validation("Order symbol is required"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(BotError::validation(format!(
                "Order quantity must be positive, got {}",
                self.quantity
            )));
        }
        for (name, value) in [("price", self.price), ("stopPrice", self.stop_price)] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(BotError::validation(format!(
                        "Order {} must be positive, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Exchange acknowledgement of a placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    pub order_type: String,
    pub side: String,
}

/// 24-hour rolling window statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerStats {
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub unrealized_profit: Decimal,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageAck {
    pub symbol: String,
    pub leverage: u32,
}
