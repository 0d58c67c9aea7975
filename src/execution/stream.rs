use super::backoff::ReconnectBackoff;
use super::kline::parse_kline;
use crate::config::Settings;
use crate::models::Candle;
use crate::{BotError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// How long `unsubscribe` waits for a task to wind down before aborting it
const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(5);

/// Jitter applied to reconnect delays, as a fraction of the delay
const RECONNECT_JITTER: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Connecting,
    Live,
    Closed,
    Errored,
}

/// Events emitted by the stream manager, in per-symbol order
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new subscription was created; anything from older generations is stale
    Subscribed { symbol: String, generation: u64 },
    /// A closed candle
    Candle {
        symbol: String,
        generation: u64,
        candle: Candle,
    },
    /// Reconnects exhausted; the subscription stays errored until resubscribed
    Degraded {
        symbol: String,
        generation: u64,
        reason: String,
    },
    Unsubscribed { symbol: String, generation: u64 },
}

/// One open kline stream
#[async_trait]
pub trait KlineConnection: Send {
    /// Next text frame. `None` once the peer has closed the stream.
    ///
    /// Must be cancel-safe: it is raced against shutdown and the idle timeout.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

/// Opens kline streams for a symbol
#[async_trait]
pub trait KlineConnector: Send + Sync {
    async fn connect(&self, symbol: &str) -> Result<Box<dyn KlineConnection>>;
}

/// Binance futures 1-minute kline streams over websocket
pub struct BinanceKlineConnector {
    ws_base_url: String,
    connect_timeout: Duration,
}

impl BinanceKlineConnector {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ws_base_url: settings.ws_base_url.trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }

    pub fn stream_url(&self, symbol: &str) -> String {
        format!("{}/{}@kline_1m", self.ws_base_url, symbol.to_lowercase())
    }
}

#[async_trait]
impl KlineConnector for BinanceKlineConnector {
    async fn connect(&self, symbol: &str) -> Result<Box<dyn KlineConnection>> {
        let url = self.stream_url(symbol);
        debug!(symbol = %symbol, url = %url, "Connecting kline stream");

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BotError::stream(symbol, "connection timeout"))?
            .map_err(|e| BotError::stream(symbol, e.to_string()))?;

        Ok(Box::new(WsKlineConnection {
            symbol: symbol.to_string(),
            stream,
        }))
    }
}

struct WsKlineConnection {
    symbol: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl KlineConnection for WsKlineConnection {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Ping(data)) => {
                    trace!(symbol = %self.symbol, "Received Ping, sending Pong");
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(BotError::stream(&self.symbol, e.to_string())));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(BotError::stream(&self.symbol, e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(symbol = %self.symbol, error = %e, "Close handshake failed");
        }
    }
}

/// Reconnect and liveness policy for subscriptions
#[derive(Debug, Clone)]
pub struct StreamPolicy {
    pub idle_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl StreamPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_base: Duration::from_millis(settings.reconnect_base_ms),
            reconnect_max: Duration::from_millis(settings.reconnect_max_ms),
        }
    }
}

struct Subscription {
    generation: u64,
    status: watch::Receiver<SubscriptionStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns one background task per subscribed symbol.
///
/// Closed candles from every task go to a single unbounded channel, so a slow
/// consumer never stalls a socket.
pub struct StreamManager {
    connector: Arc<dyn KlineConnector>,
    policy: StreamPolicy,
    events: mpsc::UnboundedSender<StreamEvent>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    next_generation: AtomicU64,
}

impl StreamManager {
    pub fn new(
        connector: Arc<dyn KlineConnector>,
        policy: StreamPolicy,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            connector,
            policy,
            events,
            subscriptions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start streaming `symbol`. No-op while a task for it is still running.
    ///
    /// Returns the subscription's generation.
    pub fn subscribe(&self, symbol: &str) -> u64 {
        let mut subscriptions = self.lock();

        if let Some(existing) = subscriptions.get(symbol) {
            if !existing.task.is_finished() {
                debug!(symbol = %symbol, generation = existing.generation, "Already subscribed");
                return existing.generation;
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Sent before the task exists so it always precedes that generation's candles
        let _ = self.events.send(StreamEvent::Subscribed {
            symbol: symbol.to_string(),
            generation,
        });

        let task = tokio::spawn(run_subscription(
            symbol.to_string(),
            generation,
            self.connector.clone(),
            self.policy.clone(),
            self.events.clone(),
            status_tx,
            shutdown_rx,
        ));

        info!(symbol = %symbol, generation, "Subscribed to kline stream");
        subscriptions.insert(
            symbol.to_string(),
            Subscription {
                generation,
                status: status_rx,
                shutdown: shutdown_tx,
                task,
            },
        );
        generation
    }

    /// Close the stream for `symbol` and forget it. Safe when not subscribed.
    pub async fn unsubscribe(&self, symbol: &str) {
        let removed = self.lock().remove(symbol);
        let Some(subscription) = removed else {
            debug!(symbol = %symbol, "Unsubscribe for unknown symbol ignored");
            return;
        };

        let _ = subscription.shutdown.send(true);
        let mut task = subscription.task;
        if tokio::time::timeout(UNSUBSCRIBE_GRACE, &mut task).await.is_err() {
            warn!(symbol = %symbol, "Subscription task did not stop in time, aborting");
            task.abort();
        }

        let _ = self.events.send(StreamEvent::Unsubscribed {
            symbol: symbol.to_string(),
            generation: subscription.generation,
        });
        info!(symbol = %symbol, generation = subscription.generation, "Unsubscribed");
    }

    pub async fn unsubscribe_all(&self) {
        let symbols = self.symbols();
        futures_util::future::join_all(symbols.iter().map(|s| self.unsubscribe(s))).await;
    }

    pub fn status(&self, symbol: &str) -> Option<SubscriptionStatus> {
        self.lock().get(symbol).map(|s| *s.status.borrow())
    }

    pub fn statuses(&self) -> BTreeMap<String, SubscriptionStatus> {
        self.lock()
            .iter()
            .map(|(symbol, s)| (symbol.clone(), *s.status.borrow()))
            .collect()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Whether `generation` is still the live subscription for `symbol`.
    ///
    /// Turns false as soon as `unsubscribe` starts or a newer subscription
    /// replaces it, before the matching event is delivered.
    pub fn is_current(&self, symbol: &str, generation: u64) -> bool {
        self.lock()
            .get(symbol)
            .is_some_and(|s| s.generation == generation)
    }

    /// Subscriptions whose task is still running
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|s| !s.task.is_finished()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        for subscription in self.lock().values() {
            subscription.task.abort();
        }
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run_subscription(
    symbol: String,
    generation: u64,
    connector: Arc<dyn KlineConnector>,
    policy: StreamPolicy,
    events: mpsc::UnboundedSender<StreamEvent>,
    status: watch::Sender<SubscriptionStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ReconnectBackoff::new(
        policy.reconnect_base,
        policy.reconnect_max,
        RECONNECT_JITTER,
    );

    loop {
        status.send_replace(SubscriptionStatus::Connecting);

        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            result = connector.connect(&symbol) => result,
        };

        match connected {
            Ok(mut connection) => {
                status.send_replace(SubscriptionStatus::Live);
                backoff.reset();
                info!(symbol = %symbol, generation, "Kline stream live");

                let end = pump_candles(
                    &symbol,
                    generation,
                    connection.as_mut(),
                    &events,
                    &mut shutdown_rx,
                    policy.idle_timeout,
                )
                .await;
                connection.close().await;

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped(reason) => {
                        warn!(symbol = %symbol, generation, reason = %reason, "Kline stream dropped");
                    }
                }
            }
            Err(e) => {
                warn!(
                    symbol = %symbol,
                    generation,
                    attempt = backoff.attempt() + 1,
                    error = %e,
                    "Kline stream connect failed"
                );
            }
        }

        status.send_replace(SubscriptionStatus::Closed);

        if backoff.attempt() >= policy.max_reconnect_attempts {
            status.send_replace(SubscriptionStatus::Errored);
            let reason = format!(
                "gave up after {} reconnect attempts",
                policy.max_reconnect_attempts
            );
            error!(symbol = %symbol, generation, "Kline stream degraded: {}", reason);
            let _ = events.send(StreamEvent::Degraded {
                symbol: symbol.clone(),
                generation,
                reason,
            });
            return;
        }

        let delay = backoff.next_delay();
        debug!(symbol = %symbol, ?delay, "Reconnecting after backoff");
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.send_replace(SubscriptionStatus::Closed);
    debug!(symbol = %symbol, generation, "Subscription task finished");
}

/// Forward closed candles until the stream ends or shutdown is requested.
async fn pump_candles(
    symbol: &str,
    generation: u64,
    connection: &mut dyn KlineConnection,
    events: &mpsc::UnboundedSender<StreamEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    idle_timeout: Duration,
) -> SessionEnd {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return SessionEnd::Shutdown,
            frame = tokio::time::timeout(idle_timeout, connection.next_text()) => frame,
        };

        let text = match frame {
            Err(_) => return SessionEnd::Dropped(format!("no message for {:?}", idle_timeout)),
            Ok(None) => return SessionEnd::Dropped("closed by peer".to_string()),
            Ok(Some(Err(e))) => return SessionEnd::Dropped(e.to_string()),
            Ok(Some(Ok(text))) => text,
        };

        match parse_kline(&text) {
            Ok(candle) if candle.is_closed => {
                let event = StreamEvent::Candle {
                    symbol: symbol.to_string(),
                    generation,
                    candle,
                };
                if events.send(event).is_err() {
                    // Nobody is listening any more
                    return SessionEnd::Shutdown;
                }
            }
            Ok(_) => trace!(symbol = %symbol, "Partial candle skipped"),
            Err(e) => warn!(symbol = %symbol, error = %e, "Skipping unparseable message"),
        }
    }
}

/// Resolves once shutdown is signalled or the signalling side is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::kline::kline_json;
    use std::sync::atomic::AtomicUsize;

    /// Connector whose streams are fed by the test
    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail_connects: std::sync::atomic::AtomicBool,
        feeds: Mutex<Vec<mpsc::UnboundedSender<Option<String>>>>,
    }

    impl FakeConnector {
        fn failing() -> Self {
            let connector = Self::default();
            connector.fail_connects.store(true, Ordering::SeqCst);
            connector
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// Push a frame into the newest connection; `None` closes it
        fn feed(&self, frame: Option<String>) {
            let feeds = self.feeds.lock().unwrap();
            feeds.last().unwrap().send(frame).unwrap();
        }
    }

    struct FakeConnection {
        frames: mpsc::UnboundedReceiver<Option<String>>,
    }

    #[async_trait]
    impl KlineConnection for FakeConnection {
        async fn next_text(&mut self) -> Option<Result<String>> {
            self.frames.recv().await.flatten().map(Ok)
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl KlineConnector for FakeConnector {
        async fn connect(&self, symbol: &str) -> Result<Box<dyn KlineConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connects.load(Ordering::SeqCst) {
                return Err(BotError::stream(symbol, "refused"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push(tx);
            Ok(Box::new(FakeConnection { frames: rx }))
        }
    }

    fn policy() -> StreamPolicy {
        StreamPolicy {
            idle_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 3,
            reconnect_base: Duration::from_millis(1),
            reconnect_max: Duration::from_millis(5),
        }
    }

    fn manager(
        connector: Arc<FakeConnector>,
        policy: StreamPolicy,
    ) -> (StreamManager, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StreamManager::new(connector, policy, tx), rx)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event in time")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_double_subscribe_single_connection() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _rx) = manager(connector.clone(), policy());

        let first = manager.subscribe("BTCUSDT");
        wait_until(|| manager.status("BTCUSDT") == Some(SubscriptionStatus::Live)).await;
        let second = manager.subscribe("BTCUSDT");

        assert_eq!(first, second);
        assert_eq!(connector.connects(), 1);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn test_only_closed_candles_forwarded() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, mut rx) = manager(connector.clone(), policy());

        let generation = manager.subscribe("BTCUSDT");
        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::Subscribed { generation: g, .. } if g == generation
        ));
        wait_until(|| manager.status("BTCUSDT") == Some(SubscriptionStatus::Live)).await;

        connector.feed(Some(kline_json("BTCUSDT", "100.0", 0, false)));
        connector.feed(Some("garbage".to_string()));
        connector.feed(Some(kline_json("BTCUSDT", "101.0", 0, true)));

        match next_event(&mut rx).await {
            StreamEvent::Candle { candle, generation: g, .. } => {
                assert_eq!(g, generation);
                assert_eq!(candle.close, 101.0);
                assert!(candle.is_closed);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_after_peer_close_keeps_generation() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, mut rx) = manager(connector.clone(), policy());

        let generation = manager.subscribe("ETHUSDT");
        wait_until(|| connector.connects() == 1).await;
        wait_until(|| manager.status("ETHUSDT") == Some(SubscriptionStatus::Live)).await;

        connector.feed(None);
        wait_until(|| connector.connects() == 2).await;
        wait_until(|| manager.status("ETHUSDT") == Some(SubscriptionStatus::Live)).await;

        connector.feed(Some(kline_json("ETHUSDT", "2000.0", 0, true)));
        let _subscribed = next_event(&mut rx).await;
        match next_event(&mut rx).await {
            StreamEvent::Candle { generation: g, .. } => assert_eq!(g, generation),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_forces_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let policy = StreamPolicy {
            idle_timeout: Duration::from_millis(20),
            ..policy()
        };
        let (manager, _rx) = manager(connector.clone(), policy);

        manager.subscribe("BTCUSDT");
        wait_until(|| connector.connects() >= 2).await;
    }

    #[tokio::test]
    async fn test_errored_after_max_attempts() {
        let connector = Arc::new(FakeConnector::failing());
        let (manager, mut rx) = manager(connector.clone(), policy());

        let generation = manager.subscribe("BTCUSDT");
        wait_until(|| manager.status("BTCUSDT") == Some(SubscriptionStatus::Errored)).await;
        wait_until(|| manager.active_count() == 0).await;

        // Initial attempt plus three reconnects
        assert_eq!(connector.connects(), 4);

        let _subscribed = next_event(&mut rx).await;
        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::Degraded { generation: g, .. } if g == generation
        ));

        // An errored subscription can be recreated
        connector.fail_connects.store(false, Ordering::SeqCst);
        let next = manager.subscribe("BTCUSDT");
        assert!(next > generation);
        wait_until(|| manager.status("BTCUSDT") == Some(SubscriptionStatus::Live)).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_cancels_backoff() {
        let connector = Arc::new(FakeConnector::failing());
        let policy = StreamPolicy {
            reconnect_base: Duration::from_secs(3600),
            reconnect_max: Duration::from_secs(3600),
            ..policy()
        };
        let (manager, mut rx) = manager(connector.clone(), policy);

        manager.subscribe("BTCUSDT");
        wait_until(|| manager.status("BTCUSDT") == Some(SubscriptionStatus::Closed)).await;

        tokio::time::timeout(Duration::from_secs(1), manager.unsubscribe("BTCUSDT"))
            .await
            .expect("unsubscribe waited on backoff");

        assert_eq!(manager.status("BTCUSDT"), None);
        assert_eq!(manager.active_count(), 0);

        let _subscribed = next_event(&mut rx).await;
        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::Unsubscribed { symbol, .. } if symbol == "BTCUSDT"
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, mut rx) = manager(connector, policy());

        manager.unsubscribe("DOGEUSDT").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _rx) = manager(connector.clone(), policy());

        manager.subscribe("BTCUSDT");
        manager.subscribe("ETHUSDT");
        wait_until(|| connector.connects() == 2).await;

        manager.unsubscribe_all().await;

        assert!(manager.symbols().is_empty());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_superseded_on_unsubscribe() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _rx) = manager(connector, policy());

        let first = manager.subscribe("BTCUSDT");
        assert!(manager.is_current("BTCUSDT", first));

        manager.unsubscribe("BTCUSDT").await;
        assert!(!manager.is_current("BTCUSDT", first));

        let second = manager.subscribe("BTCUSDT");
        assert!(second > first);
        assert!(manager.is_current("BTCUSDT", second));
        assert!(!manager.is_current("BTCUSDT", first));
        assert!(!manager.is_current("ETHUSDT", second));
    }

    #[test]
    fn test_stream_url() {
        let connector = BinanceKlineConnector::new(&Settings::default());
        assert_eq!(
            connector.stream_url("BTCUSDT"),
            "wss://fstream.binance.com/ws/btcusdt@kline_1m"
        );
    }
}
