//! HMAC-SHA256 request signing for the Binance REST surfaces.

use crate::{BotError, Result};
use hmac::{Hmac, Mac};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on authenticated calls.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// API key plus secret.
///
/// The secret is wrapped in `SecretString`, so it never shows up in `Debug`
/// output and is zeroed on drop.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: SecretString,
}

impl Credentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: SecretString::from(secret_key),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Only for computing signatures. Never log the return value.
    fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Which REST deployment a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSurface {
    /// Spot market data (prices, 24h tickers)
    MarketData,
    /// USDⓈ-M futures (account, leverage, orders)
    Trading,
}

/// A fully built authenticated request, ready to send.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    /// Base URL + endpoint + `?` + query
    pub url: String,
    /// Encoded parameters with `signature` as the final pair
    pub query: String,
    api_key: String,
}

impl SignedRequest {
    /// Value for the [`API_KEY_HEADER`] header
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The part of the query the signature covers.
    pub fn signed_payload(&self) -> &str {
        self.query
            .rsplit_once("&signature=")
            .map(|(payload, _)| payload)
            .unwrap_or(&self.query)
    }

    pub fn signature(&self) -> &str {
        self.query
            .rsplit_once("&signature=")
            .map(|(_, sig)| sig)
            .unwrap_or_default()
    }
}

/// Builds signed requests for both REST surfaces.
///
/// Holds nothing mutable; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Option<Credentials>,
    market_data_base: String,
    trading_base: String,
    recv_window_ms: Option<u64>,
}

impl RequestSigner {
    pub fn new(
        credentials: Option<Credentials>,
        market_data_base: &str,
        trading_base: &str,
    ) -> Self {
        Self {
            credentials,
            market_data_base: market_data_base.trim_end_matches('/').to_string(),
            trading_base: trading_base.trim_end_matches('/').to_string(),
            recv_window_ms: None,
        }
    }

    /// Ask the exchange to reject the request if it arrives later than
    /// `recv_window_ms` after its timestamp.
    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = Some(recv_window_ms);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn base_url(&self, surface: ApiSurface) -> &str {
        match surface {
            ApiSurface::MarketData => &self.market_data_base,
            ApiSurface::Trading => &self.trading_base,
        }
    }

    /// Build a signed request stamped with the current time.
    pub fn build<K, V>(
        &self,
        method: Method,
        surface: ApiSurface,
        endpoint: &str,
        params: &[(K, V)],
    ) -> Result<SignedRequest>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.build_at(method, surface, endpoint, params, now_ms())
    }

    /// Build a signed request with an explicit timestamp.
    ///
    /// Parameters are encoded in the order given, followed by `recvWindow`
    /// (when configured) and `timestamp`. The signature covers that whole
    /// string and is appended last.
    pub fn build_at<K, V>(
        &self,
        method: Method,
        surface: ApiSurface,
        endpoint: &str,
        params: &[(K, V)],
        timestamp_ms: i64,
    ) -> Result<SignedRequest>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            BotError::Config("API credentials are required for signed requests".to_string())
        })?;

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
        if let Some(window) = self.recv_window_ms {
            serializer.append_pair("recvWindow", &window.to_string());
        }
        serializer.append_pair("timestamp", &timestamp_ms.to_string());
        let payload = serializer.finish();

        let signature = sign(credentials.expose_secret(), &payload);
        let query = format!("{}&signature={}", payload, signature);
        let url = format!("{}{}?{}", self.base_url(surface), endpoint, query);

        tracing::debug!(endpoint = %endpoint, surface = ?surface, "Built signed request");

        Ok(SignedRequest {
            method,
            url,
            query,
            api_key: credentials.api_key().to_string(),
        })
    }
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
