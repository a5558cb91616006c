// ===============================
// src/scorer.rs
// ===============================
//
// Composite "big move" score, 0..100:
//   volume factor      0-35  (vtt vs smoothed average)
//   price range factor 0-30  (1-minute candle high/low)
//   order book factor  0-20  (tbq / tsq)
//   greeks sub-score   0-15
//

use serde::Serialize;

use crate::domain::{finite, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertTier { Normal, Watch, Warning, Critical }

impl AlertTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTier::Normal => "NORMAL",
            AlertTier::Watch => "WATCH",
            AlertTier::Warning => "WARNING",
            AlertTier::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity { Critical, Warning, Info }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub title: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveMetrics {
    pub ltp: f64,
    pub volume: f64,
    pub volume_ratio: f64,
    pub tbq: f64,
    pub tsq: f64,
    pub ob_ratio: f64,
    pub price_range: f64,
    pub gamma: f64,
    pub delta: f64,
    pub iv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub score: f64,
    pub tier: AlertTier,
    pub metrics: MoveMetrics,
    pub greeks_score: f64,
    pub alerts: Vec<Alert>,
    pub ts_ms: i64,
}

pub fn greeks_score(gamma: f64, delta: f64, iv: f64) -> f64 {
    let mut score = 0.0;
    score += if gamma > 0.001 {
        5.0
    } else if gamma > 0.0005 {
        3.0
    } else if gamma > 0.0001 {
        1.0
    } else {
        0.0
    };
    let d = delta.abs();
    score += if d > 0.7 {
        5.0
    } else if d > 0.5 {
        3.0
    } else if d > 0.3 {
        1.0
    } else {
        0.0
    };
    score += if iv > 0.3 {
        5.0
    } else if iv > 0.2 {
        3.0
    } else if iv > 0.1 {
        1.0
    } else {
        0.0
    };
    f64::min(score, 15.0)
}

/// (high - low) / low * 100 of the 1-minute candle (or the first one).
pub fn price_range(tick: &Tick) -> f64 {
    match tick.primary_candle() {
        Some(c) if c.low > 0.0 => finite((c.high - c.low) / c.low * 100.0),
        _ => 0.0,
    }
}

pub fn score(metrics: &MoveMetrics, greeks: f64) -> f64 {
    let vr = metrics.volume_ratio;
    let volume = if vr > 5.0 {
        35.0
    } else if vr > 3.0 {
        25.0
    } else if vr > 2.0 {
        15.0
    } else if vr > 1.5 {
        8.0
    } else {
        0.0
    };

    let pr = metrics.price_range;
    let range = if pr > 3.0 {
        30.0
    } else if pr > 2.0 {
        20.0
    } else if pr > 1.0 {
        12.0
    } else if pr > 0.5 {
        5.0
    } else {
        0.0
    };

    let ob = metrics.ob_ratio;
    let book = if ob > 5.0 {
        20.0
    } else if ob > 3.0 {
        15.0
    } else if ob > 2.0 {
        10.0
    } else if ob > 1.5 {
        5.0
    } else {
        0.0
    };

    finite(volume + range + book + greeks).clamp(0.0, 100.0)
}

pub fn tier(score: f64) -> AlertTier {
    if score >= 75.0 {
        AlertTier::Critical
    } else if score >= 55.0 {
        AlertTier::Warning
    } else if score >= 35.0 {
        AlertTier::Watch
    } else {
        AlertTier::Normal
    }
}

pub fn alerts(m: &MoveMetrics) -> Vec<Alert> {
    let mut out = Vec::new();
    if m.volume_ratio > 3.0 {
        out.push(Alert {
            severity: Severity::Critical,
            title: "Volume Spike",
            message: format!("{:.2}x avg volume", m.volume_ratio),
        });
    }
    if m.price_range > 2.0 {
        out.push(Alert {
            severity: Severity::Critical,
            title: "Explosive Candle",
            message: format!("{:.2}% move", m.price_range),
        });
    }
    if m.ob_ratio > 3.0 {
        out.push(Alert {
            severity: Severity::Warning,
            title: "Buy Pressure",
            message: format!("{:.2}:1 bid/ask", m.ob_ratio),
        });
    } else if m.ob_ratio > 0.0 && m.ob_ratio < 0.33 {
        out.push(Alert {
            severity: Severity::Warning,
            title: "Sell Pressure",
            message: format!("{:.1}:1 ask/bid", 1.0 / m.ob_ratio),
        });
    }
    if m.gamma > 0.0005 {
        out.push(Alert {
            severity: Severity::Info,
            title: "High Gamma Detected",
            message: format!("Gamma = {:.4}", m.gamma),
        });
    }
    if m.delta.abs() > 0.7 {
        out.push(Alert {
            severity: Severity::Warning,
            title: "High Delta Exposure",
            message: format!("Delta = {:.3} (high directional risk)", m.delta),
        });
    }
    if m.iv > 0.25 {
        out.push(Alert {
            severity: Severity::Info,
            title: "High Implied Volatility",
            message: format!("IV = {:.1}%", m.iv * 100.0),
        });
    }
    if m.gamma > 0.001 && m.delta.abs() > 0.6 {
        out.push(Alert {
            severity: Severity::Critical,
            title: "Gamma-Delta Squeeze",
            message: format!("High gamma ({:.4}) + high delta ({:.3})", m.gamma, m.delta),
        });
    }
    out
}

/// Score one tick. `prev_avg` is the smoothed cumulative volume before this
/// tick; `None` (first tick of the symbol) gives a neutral ratio of 1.
/// A missing price (0) only zeroes the price-driven parts.
pub fn analyze(tick: &Tick, prev_avg: Option<f64>) -> AnalysisResult {
    let g = tick.greeks();
    let volume_ratio = match prev_avg {
        Some(avg) if avg > 0.0 => finite(tick.volume / avg),
        Some(_) => 0.0,
        None => 1.0,
    };
    let metrics = MoveMetrics {
        ltp: tick.ltp,
        volume: tick.volume,
        volume_ratio,
        tbq: tick.tbq,
        tsq: tick.tsq,
        ob_ratio: if tick.tsq > 0.0 { finite(tick.tbq / tick.tsq) } else { 0.0 },
        price_range: price_range(tick),
        gamma: g.gamma,
        delta: g.delta,
        iv: tick.iv,
    };
    let greeks = greeks_score(g.gamma, g.delta, tick.iv);
    let score = score(&metrics, greeks);
    AnalysisResult {
        symbol: tick.symbol.clone(),
        score,
        tier: tier(score),
        greeks_score: greeks,
        alerts: alerts(&metrics),
        metrics,
        ts_ms: tick.ts_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, Greeks};

    fn tick() -> Tick {
        Tick {
            symbol: "NSE_FO|1".into(),
            ltp: 100.0,
            volume: 50_000.0,
            tbq: 6000.0,
            tsq: 1000.0,
            iv: 0.35,
            greeks: Some(Greeks { delta: 0.8, gamma: 0.002, ..Default::default() }),
            candles: vec![Candle { interval: "I1".into(), high: 104.0, low: 100.0, ..Default::default() }],
            ..Default::default()
        }
    }

    #[test]
    fn greeks_sub_score_is_capped() {
        assert_eq!(greeks_score(0.002, -0.8, 0.4), 15.0);
        assert_eq!(greeks_score(0.0006, 0.55, 0.15), 7.0);
        assert_eq!(greeks_score(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn extreme_tick_is_clamped_to_hundred() {
        let r = analyze(&tick(), Some(1000.0));
        // 35 + 30 + 20 + 15
        assert_eq!(r.score, 100.0);
        assert_eq!(r.tier, AlertTier::Critical);
        let titles: Vec<_> = r.alerts.iter().map(|a| a.title).collect();
        assert!(titles.contains(&"Volume Spike"));
        assert!(titles.contains(&"Explosive Candle"));
        assert!(titles.contains(&"Buy Pressure"));
        assert!(titles.contains(&"Gamma-Delta Squeeze"));
    }

    #[test]
    fn non_finite_inputs_stay_in_range() {
        let m = MoveMetrics {
            ltp: 1.0, volume: 0.0, volume_ratio: f64::INFINITY, tbq: 0.0, tsq: 0.0,
            ob_ratio: f64::NAN, price_range: 1e300, gamma: 0.0, delta: 0.0, iv: 0.0,
        };
        let s = score(&m, 1e9);
        assert!((0.0..=100.0).contains(&s));
    }

    #[test]
    fn first_tick_has_neutral_ratio() {
        let r = analyze(&tick(), None);
        assert_eq!(r.metrics.volume_ratio, 1.0);
        let r = analyze(&tick(), Some(0.0));
        assert_eq!(r.metrics.volume_ratio, 0.0);
    }

    #[test]
    fn quiet_tick_is_normal() {
        let t = Tick { symbol: "A".into(), ltp: 10.0, tbq: 100.0, tsq: 100.0, ..Default::default() };
        let r = analyze(&t, Some(10.0));
        assert_eq!(r.tier, AlertTier::Normal);
        assert!(r.alerts.is_empty());
    }

    #[test]
    fn sell_pressure_and_tiers() {
        let m = MoveMetrics {
            ltp: 1.0, volume: 0.0, volume_ratio: 0.0, tbq: 100.0, tsq: 1000.0,
            ob_ratio: 0.1, price_range: 0.0, gamma: 0.0, delta: 0.0, iv: 0.0,
        };
        assert_eq!(alerts(&m)[0].title, "Sell Pressure");
        assert_eq!(tier(34.9), AlertTier::Normal);
        assert_eq!(tier(35.0), AlertTier::Watch);
        assert_eq!(tier(55.0), AlertTier::Warning);
        assert_eq!(tier(75.0), AlertTier::Critical);
    }

    #[test]
    fn missing_price_scores_flow_and_greeks_only() {
        let mut t = tick();
        t.ltp = 0.0;
        t.candles.clear();
        let r = analyze(&t, Some(1000.0));
        assert_eq!(r.metrics.price_range, 0.0);
        // volume 35 + book 20 + greeks 15
        assert_eq!(r.score, 70.0);
        assert_eq!(r.tier, AlertTier::Warning);
    }
}
