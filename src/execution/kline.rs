use crate::models::Candle;
use crate::{BotError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Raw kline event from `<symbol>@kline_<interval>`
#[derive(Debug, Deserialize)]
struct KlineEventRaw {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlineRaw,
}

#[derive(Debug, Deserialize)]
struct KlineRaw {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    #[allow(dead_code)]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse one text frame from a kline stream into a candle.
pub fn parse_kline(text: &str) -> Result<Candle> {
    let raw: KlineEventRaw = serde_json::from_str(text)
        .map_err(|e| BotError::MarketData(format!("unparseable kline message: {}", e)))?;

    if raw.event_type != "kline" {
        return Err(BotError::MarketData(format!(
            "unexpected event type: {}",
            raw.event_type
        )));
    }

    let k = raw.kline;
    Ok(Candle {
        symbol: raw.symbol,
        open_time: millis(k.open_time)?,
        close_time: millis(k.close_time)?,
        open: number("o", &k.open)?,
        high: number("h", &k.high)?,
        low: number("l", &k.low)?,
        close: number("c", &k.close)?,
        volume: number("v", &k.volume)?,
        is_closed: k.is_closed,
    })
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BotError::MarketData(format!("invalid timestamp: {}", ms)))
}

fn number(field: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BotError::MarketData(format!("invalid number in {}: {}", field, value)))
}

/// Kline stream frame for tests
#[cfg(test)]
pub(crate) fn kline_json(symbol: &str, close: &str, open_time: i64, closed: bool) -> String {
    format!(
        r#"{{"e":"kline","E":{},"s":"{}","k":{{"t":{},"T":{},"s":"{}","i":"1m","o":"100.0","c":"{}","h":"101.5","l":"99.5","v":"12.34","x":{}}}}}"#,
        open_time + 60_000,
        symbol,
        open_time,
        open_time + 59_999,
        symbol,
        close,
        closed
    )
}
