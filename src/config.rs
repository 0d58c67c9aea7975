use crate::api::Credentials;
use crate::{BotError, Result};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;

/// Runtime settings, layered: built-in defaults, then `BOT_*` environment
/// variables, then the Binance credential and `PORT` variables.
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Port for the operator-facing HTTP surface
    pub port: u16,
    pub spot_base_url: String,
    pub futures_base_url: String,
    pub ws_base_url: String,
    pub request_timeout_secs: u64,
    pub recv_window_ms: u64,
    pub rate_limit_per_second: u32,
    pub read_retry_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Notional account equity (quote asset) used for risk-based sizing
    pub account_equity: f64,
    /// Decimal places order quantities are rounded down to
    pub quantity_precision: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            secret_key: None,
            port: DEFAULT_PORT,
            spot_base_url: "https://api.binance.com".to_string(),
            futures_base_url: "https://fapi.binance.com".to_string(),
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            request_timeout_secs: 10,
            recv_window_ms: 5000,
            rate_limit_per_second: 10,
            read_retry_backoff_ms: 500,
            connect_timeout_secs: 10,
            idle_timeout_secs: 90,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30_000,
            account_equity: 1000.0,
            quantity_precision: 3,
        }
    }
}

impl Settings {
    /// Load settings from `.env` and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let d = Settings::default();
        let settings: Settings = ::config::Config::builder()
            .set_default("port", d.port as i64)?
            .set_default("spot_base_url", d.spot_base_url)?
            .set_default("futures_base_url", d.futures_base_url)?
            .set_default("ws_base_url", d.ws_base_url)?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("recv_window_ms", d.recv_window_ms as i64)?
            .set_default("rate_limit_per_second", d.rate_limit_per_second as i64)?
            .set_default("read_retry_backoff_ms", d.read_retry_backoff_ms as i64)?
            .set_default("connect_timeout_secs", d.connect_timeout_secs as i64)?
            .set_default("idle_timeout_secs", d.idle_timeout_secs as i64)?
            .set_default("max_reconnect_attempts", d.max_reconnect_attempts as i64)?
            .set_default("reconnect_base_ms", d.reconnect_base_ms as i64)?
            .set_default("reconnect_max_ms", d.reconnect_max_ms as i64)?
            .set_default("account_equity", d.account_equity)?
            .set_default("quantity_precision", d.quantity_precision as i64)?
            .add_source(::config::Environment::with_prefix("BOT").try_parsing(true))
            .set_override_option("api_key", std::env::var("BINANCE_API_KEY").ok())?
            .set_override_option("secret_key", std::env::var("BINANCE_SECRET_KEY").ok())?
            .set_override_option("port", std::env::var("PORT").ok())?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make the core misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_per_second == 0 {
            return Err(BotError::Config(
                "rate_limit_per_second must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(BotError::Config("timeouts must be positive".to_string()));
        }
        if !(self.account_equity.is_finite() && self.account_equity > 0.0) {
            return Err(BotError::Config(format!(
                "account_equity must be positive, got {}",
                self.account_equity
            )));
        }
        Ok(())
    }

    /// API credentials for signed calls.
    ///
    /// Missing or blank values are a `ConfigError`.
    pub fn credentials(&self) -> Result<Credentials> {
        let api_key = non_blank(self.api_key.as_deref())
            .ok_or_else(|| BotError::Config("BINANCE_API_KEY is not set".to_string()))?;
        let secret_key = non_blank(self.secret_key.as_deref())
            .ok_or_else(|| BotError::Config("BINANCE_SECRET_KEY is not set".to_string()))?;

        Ok(Credentials::new(api_key.to_string(), secret_key.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .field("spot_base_url", &self.spot_base_url)
            .field("futures_base_url", &self.futures_base_url)
            .field("ws_base_url", &self.ws_base_url)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("account_equity", &self.account_equity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.ws_base_url, "wss://fstream.binance.com/ws");
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let settings = Settings::default();
        let err = settings.credentials().unwrap_err();
        assert!(matches!(err, BotError::Config(_)));

        let settings = Settings {
            api_key: Some("key".to_string()),
            secret_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(settings.credentials(), Err(BotError::Config(_))));
    }

    #[test]
    fn test_credentials_present() {
        let settings = Settings {
            api_key: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        let creds = settings.credentials().unwrap();
        assert_eq!(creds.api_key(), "key");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let settings = Settings {
            secret_key: Some("super_secret".to_string()),
            ..Default::default()
        };
        let debug_str = format!("{:?}", settings);
        assert!(!debug_str.contains("super_secret"));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let settings = Settings {
            rate_limit_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(BotError::Config(_))));
    }
}
