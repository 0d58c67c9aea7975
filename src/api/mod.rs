pub mod binance;
mod responses;
pub mod signer;

pub use binance::ExchangeClient;
pub use signer::{sign, ApiSurface, Credentials, RequestSigner, SignedRequest, API_KEY_HEADER};

use crate::models::{AssetBalance, LeverageAck, OrderRequest, OrderResult, PositionInfo, TickerStats};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Exchange operations the controller, dispatcher and operator layer depend on
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_24h_stats(&self, symbol: &str) -> Result<TickerStats>;

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>>;

    async fn get_account_positions(&self) -> Result<Vec<PositionInfo>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageAck>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult>;
}

#[async_trait]
impl ExchangeApi for ExchangeClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        ExchangeClient::get_price(self, symbol).await
    }

    async fn get_24h_stats(&self, symbol: &str) -> Result<TickerStats> {
        ExchangeClient::get_24h_stats(self, symbol).await
    }

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>> {
        ExchangeClient::get_account_balance(self).await
    }

    async fn get_account_positions(&self) -> Result<Vec<PositionInfo>> {
        ExchangeClient::get_account_positions(self).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageAck> {
        ExchangeClient::set_leverage(self, symbol, leverage).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        ExchangeClient::place_order(self, order).await
    }
}
