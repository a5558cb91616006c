// ===============================
// src/codec.rs
// ===============================
//
// Payload -> Vec<Tick>. The feed connector only knows the `TickDecoder` seam;
// the bundled decoder reads the JSON (dict) form of the market feed:
//
// {"feeds": {"<instrument key>": {"fullFeed": {"marketFF": {...}}}}, "currentTs": "..."}
//
// Accepted per-instrument shapes: fullFeed.marketFF, fullFeed.indexFF,
// firstLevelWithGreeks, bare ltpc. Anything else for an instrument is skipped.
//
// The v3 market feed sends protobuf FeedResponse frames by default. This
// decoder rejects them as `DecodeError::Json`; a protobuf decoder plugs in
// behind the same trait.
//

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{finite, Candle, Greeks, Quote, Tick};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no feeds map")]
    NoFeeds,
}

pub trait TickDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Tick>, DecodeError>;
}

/// Number or numeric string -> f64; missing / empty / garbage / non-finite -> 0.0.
pub fn to_num(v: Option<&Value>) -> f64 {
    let n = match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    finite(n)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTickDecoder;

impl TickDecoder for JsonTickDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Tick>, DecodeError> {
        let root: Value = serde_json::from_slice(payload)?;
        let feeds = root
            .get("feeds")
            .and_then(Value::as_object)
            .ok_or(DecodeError::NoFeeds)?;
        let current_ts = to_num(root.get("currentTs")) as i64;

        let mut out = Vec::with_capacity(feeds.len());
        for (key, feed) in feeds {
            if key == "currentTs" {
                continue;
            }
            match body_of(feed) {
                Some(body) => out.push(tick_from(key, body, current_ts)),
                None => debug!(instrument = %key, "codec: unsupported feed shape, skipped"),
            }
        }
        Ok(out)
    }
}

fn body_of(feed: &Value) -> Option<&Value> {
    if let Some(full) = feed.get("fullFeed") {
        return full.get("marketFF").or_else(|| full.get("indexFF"));
    }
    if let Some(first) = feed.get("firstLevelWithGreeks") {
        return Some(first);
    }
    feed.get("ltpc").map(|_| feed)
}

fn quote_of(body: &Value) -> Option<Quote> {
    let level = body
        .get("marketLevel")
        .and_then(|m| m.get("bidAskQuote"))
        .and_then(Value::as_array)
        .and_then(|q| q.first())
        .or_else(|| body.get("firstDepth"))?;
    Some(Quote {
        bid_px: to_num(level.get("bidP")),
        bid_qty: to_num(level.get("bidQ")),
        ask_px: to_num(level.get("askP")),
        ask_qty: to_num(level.get("askQ")),
    })
}

fn greeks_of(body: &Value) -> Option<Greeks> {
    let g = body.get("optionGreeks")?;
    Some(Greeks {
        delta: to_num(g.get("delta")),
        gamma: to_num(g.get("gamma")),
        theta: to_num(g.get("theta")),
        vega: to_num(g.get("vega")),
        rho: to_num(g.get("rho")),
    })
}

fn candles_of(body: &Value) -> Vec<Candle> {
    body.get("marketOHLC")
        .and_then(|m| m.get("ohlc"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|c| Candle {
                    interval: c.get("interval").and_then(Value::as_str).unwrap_or_default().to_string(),
                    open: to_num(c.get("open")),
                    high: to_num(c.get("high")),
                    low: to_num(c.get("low")),
                    close: to_num(c.get("close")),
                    volume: to_num(c.get("vol").or_else(|| c.get("volume"))),
                    ts_ms: to_num(c.get("ts")) as i64,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn tick_from(key: &str, body: &Value, current_ts: i64) -> Tick {
    let ltpc = body.get("ltpc");
    let field = |name: &str| to_num(body.get(name));
    let ltt = to_num(ltpc.and_then(|l| l.get("ltt"))) as i64;
    Tick {
        ts_ms: if ltt > 0 { ltt } else { current_ts },
        symbol: key.to_string(),
        ltp: to_num(ltpc.and_then(|l| l.get("ltp"))),
        ltq: to_num(ltpc.and_then(|l| l.get("ltq"))),
        tbq: field("tbq"),
        tsq: field("tsq"),
        volume: field("vtt"),
        oi: field("oi"),
        iv: field("iv"),
        quote: quote_of(body),
        candles: candles_of(body),
        greeks: greeks_of(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: Value) -> Result<Vec<Tick>, DecodeError> {
        JsonTickDecoder.decode(v.to_string().as_bytes())
    }

    #[test]
    fn to_num_coerces_everything_to_finite() {
        assert_eq!(to_num(Some(&json!(1.5))), 1.5);
        assert_eq!(to_num(Some(&json!("2.25"))), 2.25);
        assert_eq!(to_num(Some(&json!(""))), 0.0);
        assert_eq!(to_num(Some(&json!("abc"))), 0.0);
        assert_eq!(to_num(Some(&json!("NaN"))), 0.0);
        assert_eq!(to_num(Some(&json!("inf"))), 0.0);
        assert_eq!(to_num(Some(&Value::Null)), 0.0);
        assert_eq!(to_num(None), 0.0);
    }

    #[test]
    fn decodes_full_market_feed() {
        let ticks = decode(json!({
            "feeds": {
                "NSE_FO|45450": {
                    "fullFeed": {"marketFF": {
                        "ltpc": {"ltp": 101.5, "ltt": "1700000000000", "ltq": "75", "cp": 99.0},
                        "marketLevel": {"bidAskQuote": [
                            {"bidQ": 500, "bidP": 101.4, "askQ": 300, "askP": 101.6}
                        ]},
                        "optionGreeks": {"delta": 0.62, "gamma": "0.0012", "theta": -0.05, "vega": 0.04, "rho": 0.001},
                        "marketOHLC": {"ohlc": [
                            {"interval": "1d", "open": 95, "high": 103, "low": 94, "close": 101.5, "vol": 90000, "ts": 1},
                            {"interval": "I1", "open": 101, "high": 102, "low": 100.5, "close": 101.5, "vol": 1200, "ts": 2}
                        ]},
                        "vtt": "120000", "oi": 55000, "iv": 0.21, "tbq": 90000, "tsq": 10000
                    }}
                }
            },
            "currentTs": "1700000000500"
        }))
        .unwrap();

        assert_eq!(ticks.len(), 1);
        let t = &ticks[0];
        assert_eq!(t.symbol, "NSE_FO|45450");
        assert_eq!(t.ts_ms, 1_700_000_000_000);
        assert_eq!((t.ltp, t.ltq), (101.5, 75.0));
        assert_eq!((t.tbq, t.tsq, t.volume, t.oi), (90000.0, 10000.0, 120000.0, 55000.0));
        assert_eq!(t.top_ask(), Some(101.6));
        assert_eq!(t.greeks().gamma, 0.0012);
        assert_eq!(t.candles.len(), 2);
        assert_eq!(t.primary_candle().map(|c| c.high), Some(102.0));
    }

    #[test]
    fn ltpc_only_feed_uses_frame_timestamp() {
        let ticks = decode(json!({
            "feeds": {"NSE_INDEX|Nifty 50": {"ltpc": {"ltp": "22000.5"}}},
            "currentTs": "1700000000500"
        }))
        .unwrap();
        assert_eq!(ticks[0].ltp, 22000.5);
        assert_eq!(ticks[0].ts_ms, 1_700_000_000_500);
        assert!(ticks[0].quote.is_none());
        assert!(ticks[0].greeks.is_none());
    }

    #[test]
    fn index_feed_and_unknown_shapes() {
        let ticks = decode(json!({
            "feeds": {
                "IDX": {"fullFeed": {"indexFF": {"ltpc": {"ltp": 10}}}},
                "ODD": {"somethingElse": {}}
            }
        }))
        .unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "IDX");
    }

    #[test]
    fn protobuf_frames_are_rejected_not_misread() {
        // FeedResponse { type: 1, feeds: {"NSE_FO|1": ...} } on the wire
        let mut frame = vec![0x08, 0x01, 0x12, 0x14, 0x0a, 0x08];
        frame.extend_from_slice(b"NSE_FO|1");
        frame.extend_from_slice(&[0x12, 0x08, 0x0a, 0x06, 0x0a, 0x04, 0x09, 0x00, 0x00, 0x00]);
        assert!(matches!(JsonTickDecoder.decode(&frame), Err(DecodeError::Json(_))));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(JsonTickDecoder.decode(b"\x08\x01garbage"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(json!({"type": "market_info"})), Err(DecodeError::NoFeeds)));
    }
}
