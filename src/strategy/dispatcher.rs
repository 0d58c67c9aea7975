use super::{StrategyContext, StrategyRegistry};
use crate::api::ExchangeApi;
use crate::config::Settings;
use crate::execution::{StreamEvent, StreamManager};
use crate::models::{BotConfig, Candle, OrderRequest, OrderSide, Signal, StrategyId};
use crate::risk::{position_size, SizingParams};
use crate::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Extra candles kept beyond the largest strategy lookback
const WINDOW_HEADROOM: usize = 16;

/// What a strategy wants to do after a candle, already sized
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub strategy: StrategyId,
}

impl OrderIntent {
    pub fn into_order_request(self) -> OrderRequest {
        OrderRequest::new(self.symbol, self.side, self.quantity)
            .with_price(self.price)
            .with_stop_price(self.stop_price)
    }
}

/// Run one closed candle through a strategy.
///
/// Only `context` is touched. It is rebuilt when it belongs to another
/// strategy; partial candles and candles not newer than the last one
/// processed leave it unchanged and produce no intent.
pub fn evaluate(
    registry: &StrategyRegistry,
    strategy_id: StrategyId,
    symbol: &str,
    candle: &Candle,
    context: &mut StrategyContext,
    params: &SizingParams,
) -> Result<Option<OrderIntent>> {
    let strategy = registry.get(strategy_id)?;

    if context.strategy() != strategy_id {
        debug!(symbol = %symbol, from = %context.strategy(), to = %strategy_id, "Strategy changed, resetting context");
        *context = StrategyContext::new(strategy_id, window_capacity(registry));
    }

    if !candle.is_closed {
        return Ok(None);
    }
    if !context.is_newer(candle) {
        trace!(symbol = %symbol, close_time = %candle.close_time, "Ignoring stale candle");
        return Ok(None);
    }

    context.push(candle.clone());
    if context.len() < strategy.min_candles_required() {
        trace!(
            symbol = %symbol,
            have = context.len(),
            need = strategy.min_candles_required(),
            "Warming up"
        );
        return Ok(None);
    }

    let side = match strategy.generate_signal(context.window())? {
        Signal::Buy => OrderSide::Buy,
        Signal::Sell => OrderSide::Sell,
        Signal::Hold => return Ok(None),
    };

    let Some(quantity) = position_size(params, candle.close) else {
        warn!(
            symbol = %symbol,
            strategy = %strategy_id,
            price = candle.close,
            "Signal ignored: position size rounds to zero"
        );
        return Ok(None);
    };

    Ok(Some(OrderIntent {
        symbol: symbol.to_string(),
        side,
        quantity,
        price: None,
        stop_price: None,
        strategy: strategy_id,
    }))
}

pub fn window_capacity(registry: &StrategyRegistry) -> usize {
    registry.max_candles_required() + WINDOW_HEADROOM
}

struct Worker {
    generation: u64,
    candles: mpsc::UnboundedSender<Candle>,
    task: JoinHandle<()>,
}

/// Routes stream events to one worker task per symbol.
///
/// Each worker owns its symbol's context, so same-symbol candles are handled
/// in order while different symbols run concurrently. A worker only acts
/// while its generation is the symbol's live subscription.
pub struct Dispatcher {
    registry: Arc<StrategyRegistry>,
    exchange: Arc<dyn ExchangeApi>,
    // The manager owns the sender of the event channel this drains
    streams: Weak<StreamManager>,
    config: watch::Receiver<BotConfig>,
    account_equity: f64,
    quantity_precision: u32,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        exchange: Arc<dyn ExchangeApi>,
        streams: &Arc<StreamManager>,
        config: watch::Receiver<BotConfig>,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            exchange,
            streams: Arc::downgrade(streams),
            config,
            account_equity: settings.account_equity,
            quantity_precision: settings.quantity_precision,
        }
    }

    /// Consume stream events until the channel closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
        let mut workers: HashMap<String, Worker> = HashMap::new();
        // Workers of unsubscribed symbols that may still be finishing an order
        let mut retired: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Subscribed { symbol, generation } => {
                    let previous = workers
                        .remove(&symbol)
                        .map(|w| w.task)
                        .or_else(|| retired.remove(&symbol));
                    let worker = self.spawn_worker(&symbol, generation, previous);
                    workers.insert(symbol, worker);
                }
                StreamEvent::Candle {
                    symbol,
                    generation,
                    candle,
                } => match workers.get(&symbol) {
                    Some(worker) if worker.generation == generation => {
                        let _ = worker.candles.send(candle);
                    }
                    _ => debug!(symbol = %symbol, generation, "Dropping candle from stale subscription"),
                },
                StreamEvent::Degraded {
                    symbol,
                    generation,
                    reason,
                } => {
                    warn!(symbol = %symbol, generation, reason = %reason, "Market data degraded");
                }
                StreamEvent::Unsubscribed { symbol, generation } => {
                    if workers.get(&symbol).map(|w| w.generation) == Some(generation) {
                        if let Some(worker) = workers.remove(&symbol) {
                            retired.insert(symbol.clone(), worker.task);
                        }
                        retired.retain(|_, task| !task.is_finished());
                        debug!(symbol = %symbol, generation, "Strategy context discarded");
                    }
                }
            }
        }

        info!("Stream event channel closed, dispatcher stopping");
    }

    fn spawn_worker(
        &self,
        symbol: &str,
        generation: u64,
        previous: Option<JoinHandle<()>>,
    ) -> Worker {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SymbolWorker {
            symbol: symbol.to_string(),
            generation,
            registry: self.registry.clone(),
            exchange: self.exchange.clone(),
            streams: self.streams.clone(),
            config: self.config.clone(),
            account_equity: self.account_equity,
            quantity_precision: self.quantity_precision,
        };
        let task = tokio::spawn(worker.run(rx, previous));

        Worker {
            generation,
            candles: tx,
            task,
        }
    }
}

struct SymbolWorker {
    symbol: String,
    generation: u64,
    registry: Arc<StrategyRegistry>,
    exchange: Arc<dyn ExchangeApi>,
    streams: Weak<StreamManager>,
    config: watch::Receiver<BotConfig>,
    account_equity: f64,
    quantity_precision: u32,
}

impl SymbolWorker {
    fn is_current(&self) -> bool {
        self.streams
            .upgrade()
            .is_some_and(|streams| streams.is_current(&self.symbol, self.generation))
    }

    async fn run(
        self,
        mut candles: mpsc::UnboundedReceiver<Candle>,
        previous: Option<JoinHandle<()>>,
    ) {
        // The superseded worker for this symbol finishes first
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let strategy = self.config.borrow().strategy;
        let mut context = StrategyContext::new(strategy, window_capacity(&self.registry));

        while let Some(candle) = candles.recv().await {
            if !self.is_current() {
                debug!(symbol = %self.symbol, generation = self.generation, "Subscription superseded, worker exiting");
                break;
            }

            let config = self.config.borrow().clone();
            if !config.active {
                trace!(symbol = %self.symbol, "Bot inactive, candle dropped");
                continue;
            }

            let params = SizingParams {
                account_equity: self.account_equity,
                risk_percent: config.risk_percent,
                leverage: config.leverage,
                quantity_precision: self.quantity_precision,
            };

            let intent = match evaluate(
                &self.registry,
                config.strategy,
                &self.symbol,
                &candle,
                &mut context,
                &params,
            ) {
                Ok(Some(intent)) => intent,
                Ok(None) => continue,
                Err(e) => {
                    warn!(symbol = %self.symbol, strategy = %config.strategy, error = %e, "Strategy evaluation failed");
                    continue;
                }
            };

            info!(
                symbol = %intent.symbol,
                strategy = %intent.strategy,
                side = intent.side.as_str(),
                quantity = %intent.quantity,
                price = candle.close,
                "Order intent"
            );

            if !config.mode.places_orders_automatically() {
                info!(symbol = %self.symbol, mode = %config.mode, "Intent not placed in this mode");
                continue;
            }

            // Config may have changed while evaluating
            if !self.is_current() || !self.config.borrow().active {
                info!(symbol = %self.symbol, "Intent discarded, symbol no longer trading");
                continue;
            }

            let strategy = intent.strategy;
            let order = intent.into_order_request();
            match self.exchange.place_order(&order).await {
                Ok(result) => info!(
                    symbol = %result.symbol,
                    strategy = %strategy,
                    order_id = result.order_id,
                    status = %result.status,
                    "Strategy order placed"
                ),
                Err(e) => error!(
                    symbol = %self.symbol,
                    strategy = %strategy,
                    code = ?e.exchange_code(),
                    error = %e,
                    "Strategy order failed"
                ),
            }
        }

        debug!(symbol = %self.symbol, "Symbol worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles;

    fn params() -> SizingParams {
        SizingParams {
            account_equity: 1000.0,
            risk_percent: 1.0,
            leverage: 10,
            quantity_precision: 3,
        }
    }

    fn run(
        registry: &StrategyRegistry,
        strategy: StrategyId,
        series: &[Candle],
        context: &mut StrategyContext,
    ) -> Vec<OrderIntent> {
        series
            .iter()
            .filter_map(|c| evaluate(registry, strategy, "BTCUSDT", c, context, &params()).unwrap())
            .collect()
    }

    #[test]
    fn test_breakout_gives_single_buy() {
        let registry = StrategyRegistry::new();
        let mut context = StrategyContext::new(StrategyId::MaCrossover, 64);

        let mut prices = vec![40000.0; 21];
        prices.push(50000.0);
        let intents = run(&registry, StrategyId::MaCrossover, &candles("BTCUSDT", &prices), &mut context);

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Buy);
        assert_eq!(intents[0].symbol, "BTCUSDT");
        // 1000 × 1% × 10 / 50000
        assert_eq!(intents[0].quantity, Decimal::new(2, 3));
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let registry = StrategyRegistry::new();
        let prices: Vec<f64> = (0..80)
            .map(|i| 100.0 + 10.0 * ((i as f64) / 5.0).sin())
            .collect();
        let series = candles("BTCUSDT", &prices);

        for id in StrategyId::ALL {
            let mut a = StrategyContext::new(id, 64);
            let mut b = StrategyContext::new(id, 64);
            assert_eq!(run(&registry, id, &series, &mut a), run(&registry, id, &series, &mut b));
        }
    }

    #[test]
    fn test_partial_and_stale_candles_ignored() {
        let registry = StrategyRegistry::new();
        let mut context = StrategyContext::new(StrategyId::MaCrossover, 64);
        let series = candles("BTCUSDT", &[1.0, 2.0]);

        let mut partial = series[0].clone();
        partial.is_closed = false;
        evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", &partial, &mut context, &params()).unwrap();
        assert!(context.is_empty());

        evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", &series[1], &mut context, &params()).unwrap();
        evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", &series[0], &mut context, &params()).unwrap();
        evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", &series[1], &mut context, &params()).unwrap();
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_strategy_change_resets_context() {
        let registry = StrategyRegistry::new();
        let mut context = StrategyContext::new(StrategyId::MaCrossover, 64);
        let series = candles("BTCUSDT", &[1.0, 2.0, 3.0]);

        for candle in &series[..2] {
            evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", candle, &mut context, &params()).unwrap();
        }
        assert_eq!(context.len(), 2);

        evaluate(&registry, StrategyId::Macd, "BTCUSDT", &series[2], &mut context, &params()).unwrap();
        assert_eq!(context.strategy(), StrategyId::Macd);
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_zero_quantity_gives_no_intent() {
        let registry = StrategyRegistry::new();
        let mut context = StrategyContext::new(StrategyId::MaCrossover, 64);
        let tiny = SizingParams {
            account_equity: 1.0,
            ..params()
        };

        let mut prices = vec![40000.0; 21];
        prices.push(50000.0);
        let intents: Vec<_> = candles("BTCUSDT", &prices)
            .iter()
            .filter_map(|c| {
                evaluate(&registry, StrategyId::MaCrossover, "BTCUSDT", c, &mut context, &tiny).unwrap()
            })
            .collect();

        assert!(intents.is_empty());
    }
}
