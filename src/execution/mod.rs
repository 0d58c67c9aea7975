// Market data ingestion module
pub mod backoff;
pub mod kline;
pub mod stream;

pub use backoff::ReconnectBackoff;
pub use kline::parse_kline;
pub use stream::{
    BinanceKlineConnector, KlineConnection, KlineConnector, StreamEvent, StreamManager,
    StreamPolicy, SubscriptionStatus,
};
