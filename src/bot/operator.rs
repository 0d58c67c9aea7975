use super::controller::{normalize_symbols, BotController, BotStatus, StartRequest};
use crate::api::ExchangeApi;
use crate::models::{
    AssetBalance, BotConfig, BotMode, OrderRequest, OrderResult, OrderSide, PositionInfo,
    TickerStats,
};
use crate::{BotError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response body for state-changing operator commands
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_config: Option<BotConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CommandResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            current_config: None,
            warnings: Vec::new(),
        }
    }

    fn with_config(mut self, config: BotConfig) -> Self {
        self.current_config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: Decimal,
}

/// Operator-submitted order, as received from the HTTP surface or CLI
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOrder {
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}

impl ManualOrder {
    pub fn into_order_request(self) -> Result<OrderRequest> {
        let symbol = single_symbol(&self.symbol)?;
        let side: OrderSide = self.side.parse()?;
        let order = OrderRequest::new(symbol, side, self.quantity)
            .with_price(self.price)
            .with_stop_price(self.stop_price);
        order.validate()?;
        Ok(order)
    }
}

/// Request validation and response shaping for whatever serves operators.
#[derive(Clone)]
pub struct OperatorApi {
    controller: Arc<BotController>,
    exchange: Arc<dyn ExchangeApi>,
}

impl OperatorApi {
    pub fn new(controller: Arc<BotController>, exchange: Arc<dyn ExchangeApi>) -> Self {
        Self {
            controller,
            exchange,
        }
    }

    pub async fn start(&self, request: StartRequest) -> Result<CommandResponse> {
        let outcome = self.controller.start(request).await?;

        let mut response = CommandResponse::ok(format!(
            "Bot started with {} strategy on {} in {} mode",
            outcome.config.strategy,
            outcome.config.symbols.join(", "),
            outcome.config.mode
        ))
        .with_config(outcome.config);
        response.warnings = outcome.warnings;
        Ok(response)
    }

    pub async fn stop(&self) -> CommandResponse {
        self.controller.stop().await;
        CommandResponse::ok("Bot stopped")
    }

    pub async fn set_mode(&self, mode: &str) -> Result<CommandResponse> {
        let config = self.controller.set_mode(mode).await?;
        Ok(CommandResponse::ok(format!("Mode set to {}", config.mode)).with_config(config))
    }

    pub async fn set_strategy(&self, strategy: &str) -> Result<CommandResponse> {
        let config = self.controller.set_strategy(strategy).await?;
        Ok(CommandResponse::ok(format!("Strategy set to {}", config.strategy)).with_config(config))
    }

    pub fn status(&self) -> BotStatus {
        self.controller.status()
    }

    pub async fn price(&self, symbol: &str) -> Result<PriceQuote> {
        let symbol = single_symbol(symbol)?;
        let price = self.exchange.get_price(&symbol).await?;
        Ok(PriceQuote { symbol, price })
    }

    pub async fn stats(&self, symbol: &str) -> Result<TickerStats> {
        let symbol = single_symbol(symbol)?;
        self.exchange.get_24h_stats(&symbol).await
    }

    pub async fn balance(&self) -> Result<Vec<AssetBalance>> {
        self.exchange.get_account_balance().await
    }

    pub async fn positions(&self) -> Result<Vec<PositionInfo>> {
        self.exchange.get_account_positions().await
    }

    /// Place an operator order. Only accepted in manual mode; in the
    /// automatic modes orders come from the strategies.
    pub async fn place_order(&self, order: ManualOrder) -> Result<OrderResult> {
        let mode = self.controller.config().mode;
        if mode != BotMode::Manual {
            return Err(BotError::validation(format!(
                "Manual orders are only accepted in manual mode (current mode: {})",
                mode
            )));
        }

        let request = order.into_order_request()?;
        tracing::info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            order_type = request.order_type().as_str(),
            quantity = %request.quantity,
            "Placing manual order"
        );
        self.exchange.place_order(&request).await
    }
}

fn single_symbol(symbol: &str) -> Result<String> {
    let mut symbols = normalize_symbols(&[symbol.to_string()])?;
    Ok(symbols.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_order_conversion() {
        let order: ManualOrder = serde_json::from_str(
            r#"{"symbol":"btcusdt","side":"buy","quantity":"0.01","price":"50000"}"#,
        )
        .unwrap();

        let request = order.into_order_request().unwrap();
        assert_eq!(request.symbol, "BTCUSDT");
        assert_eq!(request.side, OrderSide::Buy);
        assert_eq!(request.order_type(), crate::models::OrderType::Limit);
    }

    #[test]
    fn test_manual_order_bad_side() {
        let order = ManualOrder {
            symbol: "BTCUSDT".to_string(),
            side: "long".to_string(),
            quantity: Decimal::ONE,
            price: None,
            stop_price: None,
        };
        assert!(order.into_order_request().unwrap_err().is_validation());
    }

    #[test]
    fn test_response_shape() {
        let response = CommandResponse::ok("Bot stopped");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Bot stopped");
        assert!(json.get("currentConfig").is_none());
        assert!(json.get("warnings").is_none());
    }
}
