use thiserror::Error;

/// Errors surfaced by the trading core.
///
/// Background paths (one symbol's stream, one strategy evaluation, one order)
/// log these and keep going. Operator-facing paths return them to the caller.
#[derive(Debug, Error)]
pub enum BotError {
    /// Missing or invalid credentials / startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad operator input. Nothing was changed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A public market-data call failed or returned a malformed body.
    #[error("market data error: {0}")]
    MarketData(String),

    /// The exchange rejected (or never answered) an authenticated call.
    ///
    /// `code` is the exchange's own error code when the body carried one,
    /// e.g. `-2019` for insufficient margin.
    #[error("exchange error: {message}")]
    Exchange { code: Option<i64>, message: String },

    /// A market-data stream dropped or could not be (re)established.
    #[error("stream error for {symbol}: {message}")]
    Stream { symbol: String, message: String },

    /// A strategy could not produce a signal, e.g. its window is too short.
    #[error("strategy error: {0}")]
    Strategy(String),
}

impl BotError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn exchange(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Exchange {
            code,
            message: message.into(),
        }
    }

    pub fn strategy(message: impl Into<String>) -> Self {
        Self::Strategy(message.into())
    }

    pub fn stream(symbol: &str, message: impl Into<String>) -> Self {
        Self::Stream {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    /// Decode a Binance error body (`{"code": -2019, "msg": "..."}`).
    ///
    /// Bodies that don't follow that shape are kept verbatim as the message.
    pub fn from_exchange_body(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ApiError {
            code: i64,
            msg: String,
        }

        match serde_json::from_str::<ApiError>(body) {
            Ok(err) => Self::exchange(Some(err.code), err.msg),
            Err(_) => Self::exchange(None, format!("HTTP {}: {}", status, body)),
        }
    }

    /// Exchange error code, if any.
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            Self::Exchange { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<::config::ConfigError> for BotError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
