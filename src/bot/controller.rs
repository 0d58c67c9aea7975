use crate::api::ExchangeApi;
use crate::config::Settings;
use crate::execution::{KlineConnector, StreamManager, StreamPolicy, SubscriptionStatus};
use crate::models::{BotConfig, BotMode, StrategyId};
use crate::strategy::{Dispatcher, StrategyRegistry};
use crate::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Highest leverage the futures venue accepts on any symbol
pub const MAX_LEVERAGE: i64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Reconfiguring,
}

/// Operator request to (re)start the bot. Every field is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub mode: Option<String>,
    pub strategy: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub leverage: Option<i64>,
    pub risk_percent: Option<f64>,
}

impl StartRequest {
    /// Validate every field and build the (still inactive) config.
    pub fn validate(&self) -> Result<BotConfig> {
        let mode: BotMode = required(&self.mode, "mode")?.parse()?;
        let strategy: StrategyId = required(&self.strategy, "strategy")?.parse()?;

        let raw_symbols = self
            .symbols
            .as_ref()
            .ok_or_else(|| BotError::validation("Missing required field: symbols"))?;
        let symbols = normalize_symbols(raw_symbols)?;

        let leverage = self
            .leverage
            .ok_or_else(|| BotError::validation("Missing required field: leverage"))?;
        if !(1..=MAX_LEVERAGE).contains(&leverage) {
            return Err(BotError::validation(format!(
                "Invalid leverage: {} (must be 1-{})",
                leverage, MAX_LEVERAGE
            )));
        }

        let risk_percent = self
            .risk_percent
            .ok_or_else(|| BotError::validation("Missing required field: riskPercent"))?;
        if !(risk_percent.is_finite() && risk_percent > 0.0 && risk_percent <= 100.0) {
            return Err(BotError::validation(format!(
                "Invalid risk percent: {} (must be in (0, 100])",
                risk_percent
            )));
        }

        Ok(BotConfig {
            active: false,
            mode,
            strategy,
            symbols,
            leverage: leverage as u32,
            risk_percent,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BotError::validation(format!("Missing required field: {}", field)))
}

/// Uppercase, de-duplicate (keeping first occurrence) and sanity-check symbols
pub fn normalize_symbols(raw: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(raw.len());

    for symbol in raw {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BotError::validation(format!("Invalid symbol: {:?}", symbol)));
        }
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Err(BotError::validation("At least one symbol is required"));
    }
    Ok(symbols)
}

/// Result of a successful start
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub config: BotConfig,
    /// Per-symbol problems that did not abort the start
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub state: BotState,
    pub config: BotConfig,
    pub subscriptions: BTreeMap<String, SubscriptionStatus>,
    pub warnings: Vec<String>,
}

/// Top-level lifecycle state machine.
///
/// Transitions (start, stop, mode/strategy changes) run one at a time under an
/// async mutex. The applied config is published to strategy workers through a
/// watch channel and always replaced as a whole.
pub struct BotController {
    transition: tokio::sync::Mutex<()>,
    state: watch::Sender<BotState>,
    config: watch::Sender<BotConfig>,
    warnings: Mutex<Vec<String>>,
    exchange: Arc<dyn ExchangeApi>,
    streams: Arc<StreamManager>,
}

impl BotController {
    /// Build the controller and spawn the strategy dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        connector: Arc<dyn KlineConnector>,
        settings: &Settings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let streams = Arc::new(StreamManager::new(
            connector,
            StreamPolicy::from_settings(settings),
            events_tx,
        ));

        let (config_tx, config_rx) = watch::channel(BotConfig::default());
        let dispatcher = Dispatcher::new(
            Arc::new(StrategyRegistry::new()),
            exchange.clone(),
            &streams,
            config_rx,
            settings,
        );
        tokio::spawn(dispatcher.run(events_rx));

        let (state_tx, _) = watch::channel(BotState::Stopped);

        Self {
            transition: tokio::sync::Mutex::new(()),
            state: state_tx,
            config: config_tx,
            warnings: Mutex::new(Vec::new()),
            exchange,
            streams,
        }
    }

    /// Start the bot, or fully reconfigure it when already running.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome> {
        let new_config = request.validate()?;

        let _guard = self.transition.lock().await;
        let reconfigure = self.state() == BotState::Running;
        self.set_state(if reconfigure {
            BotState::Reconfiguring
        } else {
            BotState::Starting
        });
        info!(
            mode = %new_config.mode,
            strategy = %new_config.strategy,
            symbols = ?new_config.symbols,
            leverage = new_config.leverage,
            risk_percent = new_config.risk_percent,
            reconfigure,
            "Starting bot"
        );

        // Workers stop evaluating while the transition is in flight
        self.config.send_modify(|c| c.active = false);
        self.streams.unsubscribe_all().await;

        match self.apply(&new_config).await {
            Ok(warnings) => {
                let committed = BotConfig {
                    active: true,
                    ..new_config
                };
                self.config.send_replace(committed.clone());
                *self.lock_warnings() = warnings.clone();
                self.set_state(BotState::Running);
                info!(symbols = committed.symbols.len(), warnings = warnings.len(), "Bot running");

                Ok(StartOutcome {
                    config: committed,
                    warnings,
                })
            }
            Err(e) => {
                error!(error = %e, "Start failed, rolling back");
                self.streams.unsubscribe_all().await;
                self.config.send_modify(|c| c.active = false);
                self.set_state(BotState::Stopped);
                Err(e)
            }
        }
    }

    /// Set leverage and subscribe every configured symbol.
    ///
    /// Exchange rejections become warnings; a configuration error aborts.
    async fn apply(&self, config: &BotConfig) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        for symbol in &config.symbols {
            match self.exchange.set_leverage(symbol, config.leverage).await {
                Ok(_) => {}
                Err(e @ BotError::Config(_)) => return Err(e),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to set leverage");
                    warnings.push(format!("Failed to set leverage for {}: {}", symbol, e));
                }
            }
        }

        for symbol in &config.symbols {
            self.streams.subscribe(symbol);
        }

        Ok(warnings)
    }

    /// Stop the bot. Idempotent.
    pub async fn stop(&self) {
        let _guard = self.transition.lock().await;
        let was = self.state();
        self.set_state(BotState::Stopping);

        self.config.send_modify(|c| c.active = false);
        self.streams.unsubscribe_all().await;

        self.set_state(BotState::Stopped);
        if was != BotState::Stopped {
            info!("Bot stopped");
        }
    }

    /// Switch execution mode without touching subscriptions.
    pub async fn set_mode(&self, mode: &str) -> Result<BotConfig> {
        let mode: BotMode = mode.trim().parse()?;

        let _guard = self.transition.lock().await;
        let config = BotConfig {
            mode,
            ..self.config()
        };
        self.config.send_replace(config.clone());
        info!(mode = %mode, "Mode changed");
        Ok(config)
    }

    /// Switch strategy without touching subscriptions. Per-symbol contexts
    /// are rebuilt on the next candle.
    pub async fn set_strategy(&self, strategy: &str) -> Result<BotConfig> {
        let strategy: StrategyId = strategy.trim().parse()?;

        let _guard = self.transition.lock().await;
        let config = BotConfig {
            strategy,
            ..self.config()
        };
        self.config.send_replace(config.clone());
        info!(strategy = %strategy, "Strategy changed");
        Ok(config)
    }

    pub fn state(&self) -> BotState {
        *self.state.borrow()
    }

    pub fn config(&self) -> BotConfig {
        self.config.borrow().clone()
    }

    pub fn status(&self) -> BotStatus {
        BotStatus {
            state: self.state(),
            config: self.config(),
            subscriptions: self.streams.statuses(),
            warnings: self.lock_warnings().clone(),
        }
    }

    /// Watch lifecycle state changes
    pub fn watch_state(&self) -> watch::Receiver<BotState> {
        self.state.subscribe()
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    fn set_state(&self, state: BotState) {
        self.state.send_replace(state);
    }

    fn lock_warnings(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> StartRequest {
        StartRequest {
            mode: Some("hybrid".to_string()),
            strategy: Some("ma_crossover".to_string()),
            symbols: Some(vec!["btcusdt".to_string(), "ETHUSDT".to_string(), "BTCUSDT".to_string()]),
            leverage: Some(10),
            risk_percent: Some(1.0),
        }
    }

    #[test]
    fn test_valid_request() {
        let config = request().validate().unwrap();

        assert!(!config.active);
        assert_eq!(config.mode, BotMode::Hybrid);
        assert_eq!(config.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.leverage, 10);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let cases = [
            StartRequest { mode: None, ..request() },
            StartRequest { strategy: None, ..request() },
            StartRequest { symbols: None, ..request() },
            StartRequest { leverage: None, ..request() },
            StartRequest { risk_percent: None, ..request() },
            StartRequest { symbols: Some(vec![]), ..request() },
            StartRequest { mode: Some("  ".to_string()), ..request() },
        ];

        for case in cases {
            assert!(case.validate().unwrap_err().is_validation(), "{:?}", case);
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            StartRequest { mode: Some("turbo".to_string()), ..request() },
            StartRequest { strategy: Some("unknown".to_string()), ..request() },
            StartRequest { leverage: Some(0), ..request() },
            StartRequest { leverage: Some(126), ..request() },
            StartRequest { risk_percent: Some(0.0), ..request() },
            StartRequest { risk_percent: Some(f64::NAN), ..request() },
            StartRequest { symbols: Some(vec!["BTC/USDT".to_string()]), ..request() },
        ];

        for case in cases {
            assert!(case.validate().unwrap_err().is_validation(), "{:?}", case);
        }
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: StartRequest = serde_json::from_str(
            r#"{"mode":"manual","strategy":"macd","symbols":["SOLUSDT"],"leverage":5,"riskPercent":2.5}"#,
        )
        .unwrap();

        let config = request.validate().unwrap();
        assert_eq!(config.strategy, StrategyId::Macd);
        assert_eq!(config.risk_percent, 2.5);
    }
}
