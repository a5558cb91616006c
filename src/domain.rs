// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::SignalAnalysis;
use crate::scorer::AnalysisResult;

/// Replace NaN / ±Inf with 0.0 so a bad feed field never travels downstream.
pub fn finite(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Clamp into [0,1] after sanitizing.
pub fn unit(x: f64) -> f64 {
    finite(x).clamp(0.0, 1.0)
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// Top of book
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote { pub bid_px: f64, pub bid_qty: f64, pub ask_px: f64, pub ask_qty: f64 }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub interval: String, // "I1", "I30", "1d", ...
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks { pub delta: f64, pub gamma: f64, pub theta: f64, pub vega: f64, pub rho: f64 }

/// One normalized market update for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub ts_ms: i64,
    pub symbol: String,
    pub ltp: f64,
    pub ltq: f64,
    pub tbq: f64,
    pub tsq: f64,
    pub volume: f64, // cumulative traded volume (vtt)
    pub oi: f64,
    pub iv: f64,
    pub quote: Option<Quote>,
    pub candles: Vec<Candle>,
    pub greeks: Option<Greeks>,
}

impl Tick {
    pub fn sanitized(mut self) -> Self {
        for v in [
            &mut self.ltp, &mut self.ltq, &mut self.tbq, &mut self.tsq,
            &mut self.volume, &mut self.oi, &mut self.iv,
        ] {
            *v = finite(*v);
        }
        if let Some(q) = self.quote.as_mut() {
            for v in [&mut q.bid_px, &mut q.bid_qty, &mut q.ask_px, &mut q.ask_qty] {
                *v = finite(*v);
            }
        }
        if let Some(g) = self.greeks.as_mut() {
            for v in [&mut g.delta, &mut g.gamma, &mut g.theta, &mut g.vega, &mut g.rho] {
                *v = finite(*v);
            }
        }
        for c in self.candles.iter_mut() {
            for v in [&mut c.open, &mut c.high, &mut c.low, &mut c.close, &mut c.volume] {
                *v = finite(*v);
            }
        }
        // no negative prices; 0 means "no trade price"
        self.ltp = self.ltp.max(0.0);
        self
    }

    pub fn greeks(&self) -> Greeks {
        self.greeks.unwrap_or_default()
    }

    // Without a book both sides collapse onto ltp (spread 0).
    pub fn best_bid(&self) -> f64 {
        self.quote.map(|q| q.bid_px).unwrap_or(self.ltp)
    }
    pub fn best_ask(&self) -> f64 {
        self.quote.map(|q| q.ask_px).unwrap_or(self.ltp)
    }

    /// Ask side of the book, only when the feed carried one.
    pub fn top_ask(&self) -> Option<f64> {
        self.quote.map(|q| q.ask_px).filter(|a| *a > 0.0)
    }

    /// 1-minute candle, or the first candle when no I1 is present.
    pub fn primary_candle(&self) -> Option<&Candle> {
        self.candles
            .iter()
            .find(|c| c.interval == "I1")
            .or_else(|| self.candles.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action { Buy, Sell, StrongBuy }

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::StrongBuy => "STRONG_BUY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    pub symbol: String,
    pub price: f64,
    pub confidence: f64,
    pub confirmed: usize,
    pub evaluated: usize,
    pub reasons: Vec<String>,
    pub ts_ms: i64,
}

/// What a hub subscriber receives, in publish order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Connected { message: String },
    AnalysisUpdate { analysis: Arc<AnalysisResult> },
    SignalUpdate { analysis: Arc<SignalAnalysis> },
    Heartbeat { ts_ms: i64 },
}

impl Event {
    pub fn connected() -> Self {
        Event::Connected { message: "connected".to_string() }
    }
    pub fn heartbeat() -> Self {
        Event::Heartbeat { ts_ms: now_ms() }
    }
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::AnalysisUpdate { .. } => "analysis_update",
            Event::SignalUpdate { .. } => "signal_update",
            Event::Heartbeat { .. } => "heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_replaces_non_finite_fields() {
        let t = Tick {
            symbol: "X".into(),
            ltp: f64::NAN,
            tbq: f64::INFINITY,
            greeks: Some(Greeks { delta: f64::NEG_INFINITY, gamma: 0.001, ..Default::default() }),
            candles: vec![Candle { interval: "I1".into(), high: f64::NAN, low: 10.0, ..Default::default() }],
            ..Default::default()
        }
        .sanitized();
        assert_eq!(t.ltp, 0.0);
        assert_eq!(t.tbq, 0.0);
        assert_eq!(t.greeks().delta, 0.0);
        assert_eq!(t.greeks().gamma, 0.001);
        assert_eq!(t.candles[0].high, 0.0);
    }

    #[test]
    fn primary_candle_prefers_one_minute() {
        let t = Tick {
            candles: vec![
                Candle { interval: "1d".into(), ..Default::default() },
                Candle { interval: "I1".into(), high: 2.0, ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(t.primary_candle().map(|c| c.interval.as_str()), Some("I1"));

        let t = Tick { candles: vec![Candle { interval: "I30".into(), ..Default::default() }], ..Default::default() };
        assert_eq!(t.primary_candle().map(|c| c.interval.as_str()), Some("I30"));
    }

    #[test]
    fn book_falls_back_to_ltp() {
        let t = Tick { ltp: 101.5, ..Default::default() };
        assert_eq!(t.best_bid(), 101.5);
        assert_eq!(t.best_ask(), 101.5);
        assert_eq!(t.top_ask(), None);
    }
}
