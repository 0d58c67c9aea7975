use super::responses::{
    AccountResponse, LeverageResponse, NewOrderResponse, PriceResponse, Ticker24hResponse,
};
use super::signer::{ApiSurface, Credentials, RequestSigner, SignedRequest, API_KEY_HEADER};
use crate::config::Settings;
use crate::models::{
    AssetBalance, LeverageAck, OrderRequest, OrderResult, OrderType, PositionInfo, TickerStats,
};
use crate::{BotError, Result};
use governor::{Quota, RateLimiter};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const MAX_READ_ATTEMPTS: u32 = 3;

const PRICE_ENDPOINT: &str = "/api/v3/ticker/price";
const TICKER_24H_ENDPOINT: &str = "/api/v3/ticker/24hr";
const ACCOUNT_ENDPOINT: &str = "/fapi/v2/account";
const LEVERAGE_ENDPOINT: &str = "/fapi/v1/leverage";
const ORDER_ENDPOINT: &str = "/fapi/v1/order";

type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One failed HTTP exchange, tagged with whether a read may try again
struct CallError {
    error: BotError,
    retryable: bool,
}

/// Binance REST client for public market data and signed futures calls.
///
/// Cloneable; all clones share the connection pool and the rate limiter.
#[derive(Clone)]
pub struct ExchangeClient {
    http: Client,
    signer: RequestSigner,
    rate_limiter: Arc<ExchangeRateLimiter>,
    read_retry_backoff: Duration,
}

impl ExchangeClient {
    /// Build a client from settings.
    ///
    /// # Arguments
    /// * `settings` - Base URLs, timeout, rate limit and retry backoff
    /// * `credentials` - Needed only for signed calls; public reads work without
    pub fn new(settings: &Settings, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| BotError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(settings.rate_limit_per_second)
            .ok_or_else(|| BotError::Config("rate_limit_per_second must be positive".into()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        let signer = RequestSigner::new(
            credentials,
            &settings.spot_base_url,
            &settings.futures_base_url,
        )
        .with_recv_window(settings.recv_window_ms);

        Ok(Self {
            http,
            signer,
            rate_limiter,
            read_retry_backoff: Duration::from_millis(settings.read_retry_backoff_ms),
        })
    }

    /// Last traded price for a symbol
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .read_with_retry(ApiSurface::MarketData, PRICE_ENDPOINT, || {
                Ok(self.public_get(PRICE_ENDPOINT, symbol))
            })
            .await?;

        let price: PriceResponse = parse(ApiSurface::MarketData, PRICE_ENDPOINT, &body)?;
        Ok(price.price)
    }

    /// Rolling 24-hour statistics for a symbol
    pub async fn get_24h_stats(&self, symbol: &str) -> Result<TickerStats> {
        let body = self
            .read_with_retry(ApiSurface::MarketData, TICKER_24H_ENDPOINT, || {
                Ok(self.public_get(TICKER_24H_ENDPOINT, symbol))
            })
            .await?;

        let stats: Ticker24hResponse = parse(ApiSurface::MarketData, TICKER_24H_ENDPOINT, &body)?;
        Ok(stats.into())
    }

    /// Futures wallet balances, zero balances omitted
    pub async fn get_account_balance(&self) -> Result<Vec<AssetBalance>> {
        let account = self.get_account().await?;

        Ok(account
            .assets
            .into_iter()
            .filter(|a| !a.wallet_balance.is_zero())
            .map(AssetBalance::from)
            .collect())
    }

    /// Open futures positions, flat symbols omitted
    pub async fn get_account_positions(&self) -> Result<Vec<PositionInfo>> {
        let account = self.get_account().await?;

        Ok(account
            .positions
            .into_iter()
            .filter(|p| !p.position_amt.is_zero())
            .map(PositionInfo::from)
            .collect())
    }

    async fn get_account(&self) -> Result<AccountResponse> {
        let no_params: [(&str, &str); 0] = [];
        let body = self
            .read_with_retry(ApiSurface::Trading, ACCOUNT_ENDPOINT, || {
                let signed = self.signer.build(
                    Method::GET,
                    ApiSurface::Trading,
                    ACCOUNT_ENDPOINT,
                    &no_params,
                )?;
                Ok(self.signed(signed))
            })
            .await?;

        parse(ApiSurface::Trading, ACCOUNT_ENDPOINT, &body)
    }

    /// Set initial leverage for a symbol. Sent once, never retried.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageAck> {
        let params = [("symbol", symbol.to_string()), ("leverage", leverage.to_string())];
        let signed = self
            .signer
            .build(Method::POST, ApiSurface::Trading, LEVERAGE_ENDPOINT, &params)?;

        let body = self
            .send_once(ApiSurface::Trading, self.signed(signed))
            .await
            .map_err(|e| e.error)?;

        let ack: LeverageResponse = parse(ApiSurface::Trading, LEVERAGE_ENDPOINT, &body)?;
        tracing::info!(symbol = %ack.symbol, leverage = ack.leverage, "Leverage set");
        Ok(ack.into())
    }

    /// Place an order. Sent once, never retried; the client order id lets an
    /// operator-side retry be de-duplicated by the exchange.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        order.validate()?;

        let signed = self.signer.build(
            Method::POST,
            ApiSurface::Trading,
            ORDER_ENDPOINT,
            &order_params(order),
        )?;

        let body = self
            .send_once(ApiSurface::Trading, self.signed(signed))
            .await
            .map_err(|e| e.error)?;

        let result: OrderResult =
            parse::<NewOrderResponse>(ApiSurface::Trading, ORDER_ENDPOINT, &body)?.into();

        tracing::info!(
            symbol = %result.symbol,
            order_id = result.order_id,
            side = %result.side,
            order_type = %result.order_type,
            status = %result.status,
            "Order placed"
        );
        Ok(result)
    }

    fn public_get(&self, endpoint: &str, symbol: &str) -> RequestBuilder {
        let url = format!("{}{}", self.signer.base_url(ApiSurface::MarketData), endpoint);
        self.http.get(url).query(&[("symbol", symbol)])
    }

    fn signed(&self, request: SignedRequest) -> RequestBuilder {
        self.http
            .request(request.method.clone(), &request.url)
            .header(API_KEY_HEADER, request.api_key())
    }

    /// Retry a read on transport errors, 429 and 5xx.
    ///
    /// `make_request` runs once per attempt so signed reads get a fresh
    /// timestamp every time.
    async fn read_with_retry<F>(
        &self,
        surface: ApiSurface,
        endpoint: &str,
        make_request: F,
    ) -> Result<String>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        let mut attempt = 1;
        loop {
            match self.send_once(surface, make_request()?).await {
                Ok(body) => {
                    if attempt > 1 {
                        tracing::info!(endpoint, attempt, "Request succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(e) if e.retryable && attempt < MAX_READ_ATTEMPTS => {
                    let backoff = self.read_retry_backoff * 2_u32.pow(attempt - 1);
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt,
                        MAX_READ_ATTEMPTS,
                        endpoint,
                        e.error,
                        backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.error),
            }
        }
    }

    async fn send_once(
        &self,
        surface: ApiSurface,
        request: RequestBuilder,
    ) -> std::result::Result<String, CallError> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await.map_err(|e| CallError {
            error: transport_error(surface, e),
            retryable: true,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CallError {
            error: transport_error(surface, e),
            retryable: true,
        })?;

        if status.is_success() {
            return Ok(body);
        }

        let retryable = status.as_u16() == 429 || status.is_server_error();
        let error = match surface {
            ApiSurface::MarketData => {
                BotError::MarketData(format!("HTTP {}: {}", status.as_u16(), body))
            }
            ApiSurface::Trading => BotError::from_exchange_body(status.as_u16(), &body),
        };
        Err(CallError { error, retryable })
    }
}

/// Order parameters in wire order. `timeInForce` goes with LIMIT only and
/// STOP_MARKET carries only `stopPrice`.
fn order_params(order: &OrderRequest) -> Vec<(&'static str, String)> {
    let order_type = order.order_type();
    let mut params = vec![
        ("symbol", order.symbol.clone()),
        ("side", order.side.as_str().to_string()),
        ("type", order_type.as_str().to_string()),
        ("quantity", order.quantity.normalize().to_string()),
    ];

    match order_type {
        OrderType::Limit => {
            if let Some(price) = order.price {
                params.push(("price", price.normalize().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }
        OrderType::StopMarket => {
            if let Some(stop) = order.stop_price {
                params.push(("stopPrice", stop.normalize().to_string()));
            }
        }
        OrderType::Market => {}
    }

    params.push(("newClientOrderId", order.client_order_id.clone()));
    params
}

fn transport_error(surface: ApiSurface, err: reqwest::Error) -> BotError {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        format!("request failed: {}", err)
    };
    match surface {
        ApiSurface::MarketData => BotError::MarketData(message),
        ApiSurface::Trading => BotError::exchange(None, message),
    }
}

fn parse<T: DeserializeOwned>(surface: ApiSurface, endpoint: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        let message = format!("malformed response from {}: {}", endpoint, e);
        match surface {
            ApiSurface::MarketData => BotError::MarketData(message),
            ApiSurface::Trading => BotError::exchange(None, message),
        }
    })
}
