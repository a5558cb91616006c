// ===============================
// src/indicators.rs
// ===============================
//
// Per-tick indicators. Every function is deterministic for the same inputs
// and returns value + label + strength in [0,1]:
// 1) Order-flow imbalance     -> order_flow
// 2) Spread quality           -> spread
// 3) Momentum                 -> momentum
// 4) Volume spike             -> volume_spike
// 5) Greeks strength          -> greeks_strength
//
// Two gradings exist. `Graded` labels everything it sees; `Strict` only names
// high-conviction readings and calls the rest WEAK.
//

use serde::Serialize;

use crate::domain::{finite, unit};
use crate::state::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grading {
    Graded,
    Strict,
}

// -----------------------------------------------------------------------------
// 1) ORDER-FLOW IMBALANCE
//    OFI = (tbq - tsq) / (tbq + tsq), 0 when both sides are empty.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfiLabel { VeryStrongBuy, StrongBuy, ModerateBuy, SellPressure, Neutral, Weak }

impl OfiLabel {
    pub fn is_strong_buy(&self) -> bool {
        matches!(self, OfiLabel::VeryStrongBuy | OfiLabel::StrongBuy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OfiReading {
    pub value: f64,
    pub label: OfiLabel,
    pub strength: f64,
    pub tbq: f64,
    pub tsq: f64,
}

pub fn order_flow(tbq: f64, tsq: f64, grading: Grading) -> OfiReading {
    let (tbq, tsq) = (finite(tbq), finite(tsq));
    let neutral = match grading {
        Grading::Graded => OfiLabel::Neutral,
        Grading::Strict => OfiLabel::Weak,
    };
    let total = tbq + tsq;
    if total == 0.0 {
        return OfiReading { value: 0.0, label: neutral, strength: 0.0, tbq, tsq };
    }
    let ofi = finite((tbq - tsq) / total);

    let (label, strength) = match grading {
        Grading::Graded => {
            if ofi > 0.5 {
                (OfiLabel::StrongBuy, (ofi - 0.5) * 2.0)
            } else if ofi > 0.3 {
                (OfiLabel::ModerateBuy, (ofi - 0.3) / 0.2)
            } else if ofi < 0.0 {
                (OfiLabel::SellPressure, ofi.abs())
            } else {
                (OfiLabel::Neutral, 0.3 - ofi)
            }
        }
        Grading::Strict => {
            if ofi > 0.7 {
                (OfiLabel::VeryStrongBuy, 1.0)
            } else if ofi > 0.6 {
                (OfiLabel::StrongBuy, 0.8)
            } else {
                (OfiLabel::Weak, 0.0)
            }
        }
    };
    OfiReading { value: ofi, label, strength: unit(strength), tbq, tsq }
}

// -----------------------------------------------------------------------------
// 2) SPREAD QUALITY
//    spread% = (ask - bid) / ltp * 100
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadLabel { Excellent, Good, Caution, Unknown }

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadReading {
    pub value: f64,
    pub pct: f64,
    pub label: SpreadLabel,
    pub strength: f64,
    pub quality: u8,
    pub best_bid: f64,
    pub best_ask: f64,
}

pub fn spread(best_bid: f64, best_ask: f64, ltp: f64) -> SpreadReading {
    let (best_bid, best_ask, ltp) = (finite(best_bid), finite(best_ask), finite(ltp));
    if ltp == 0.0 {
        return SpreadReading {
            value: 0.0, pct: 0.0, label: SpreadLabel::Unknown, strength: 0.0, quality: 0,
            best_bid, best_ask,
        };
    }
    let value = best_ask - best_bid;
    let pct = finite(value / ltp * 100.0);
    let (label, quality) = if pct < 0.2 {
        (SpreadLabel::Excellent, 100u8)
    } else if pct < 0.5 {
        (SpreadLabel::Good, 70)
    } else {
        (SpreadLabel::Caution, 30)
    };
    SpreadReading {
        value, pct, label, strength: quality as f64 / 100.0, quality, best_bid, best_ask,
    }
}

// -----------------------------------------------------------------------------
// 3) MOMENTUM
//    (ltp - mean(window)) / mean(window); the window already holds ltp.
//    Strict grading also wants a steady staircase of up-ticks, so a choppy
//    series that ends slightly higher stays WEAK.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumLabel { VeryStrong, Strong, Bullish, Bearish, Neutral, Weak }

impl MomentumLabel {
    pub fn is_strong(&self) -> bool {
        matches!(self, MomentumLabel::VeryStrong | MomentumLabel::Strong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend { ConsistentUp, MostlyUp, Choppy, None }

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MomentumReading {
    pub value: f64,
    pub label: MomentumLabel,
    pub strength: f64,
    pub trend: Trend,
    pub uptick_ratio: f64,
    pub current: f64,
    pub avg: f64,
    pub ticks: usize,
}

pub fn momentum(prices: &Window, current: f64, grading: Grading, min_history: usize) -> MomentumReading {
    let current = finite(current);
    let ticks = prices.len();
    let neutral = match grading {
        Grading::Graded => MomentumLabel::Neutral,
        Grading::Strict => MomentumLabel::Weak,
    };
    if current <= 0.0 || ticks < min_history.max(2) {
        return MomentumReading {
            value: 0.0, label: neutral, strength: 0.0, trend: Trend::None,
            uptick_ratio: 0.0, current, avg: current, ticks,
        };
    }

    let avg = prices.mean().unwrap_or(0.0);
    let value = if avg > 0.0 { finite((current - avg) / avg) } else { 0.0 };

    let series: Vec<f64> = prices.iter().collect();
    let ups = series.windows(2).filter(|w| w[1] > w[0]).count();
    let uptick_ratio = ups as f64 / (series.len() - 1) as f64;

    let (label, strength, trend) = match grading {
        Grading::Graded => {
            let label = if value > 0.001 {
                MomentumLabel::Bullish
            } else if value < -0.001 {
                MomentumLabel::Bearish
            } else {
                MomentumLabel::Neutral
            };
            (label, unit(value.abs() / 0.01), Trend::None)
        }
        Grading::Strict => {
            if uptick_ratio >= 0.8 && value > 0.003 {
                (MomentumLabel::VeryStrong, 1.0, Trend::ConsistentUp)
            } else if uptick_ratio >= 0.7 && value > 0.002 {
                (MomentumLabel::Strong, 0.7, Trend::MostlyUp)
            } else {
                (MomentumLabel::Weak, 0.0, Trend::Choppy)
            }
        }
    };
    MomentumReading { value, label, strength, trend, uptick_ratio, current, avg, ticks }
}

// -----------------------------------------------------------------------------
// 4) VOLUME SPIKE
//    current / mean(prior window). The caller appends `current` afterwards.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeLabel { Extreme, VeryStrong, Strong, StrongMove, Normal, Neutral, Weak }

impl VolumeLabel {
    pub fn is_spike(&self) -> bool {
        matches!(
            self,
            VolumeLabel::Extreme | VolumeLabel::VeryStrong | VolumeLabel::Strong | VolumeLabel::StrongMove
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeReading {
    pub ratio: f64,
    pub label: VolumeLabel,
    pub strength: f64,
    pub current: f64,
    pub avg: f64,
}

pub fn volume_spike(prior: &Window, current: f64, grading: Grading, min_history: usize) -> VolumeReading {
    let current = finite(current);
    let avg = prior.mean().unwrap_or(0.0);
    if prior.len() < min_history {
        let label = match grading {
            Grading::Graded => VolumeLabel::Neutral,
            Grading::Strict => VolumeLabel::Weak,
        };
        return VolumeReading { ratio: 1.0, label, strength: 0.0, current, avg };
    }
    let ratio = if avg > 0.0 { finite(current / avg) } else { 1.0 };

    let (label, strength) = match grading {
        Grading::Graded => {
            if ratio >= 3.0 {
                (VolumeLabel::VeryStrong, (ratio - 3.0) / 2.0)
            } else if ratio >= 2.0 {
                (VolumeLabel::StrongMove, ratio - 2.0)
            } else {
                (VolumeLabel::Normal, 0.0)
            }
        }
        Grading::Strict => {
            if ratio >= 5.0 {
                (VolumeLabel::Extreme, 1.0)
            } else if ratio >= 4.0 {
                (VolumeLabel::VeryStrong, 0.9)
            } else if ratio >= 3.0 {
                (VolumeLabel::Strong, 0.7)
            } else {
                (VolumeLabel::Weak, 0.0)
            }
        }
    };
    VolumeReading { ratio, label, strength: unit(strength), current, avg }
}

// -----------------------------------------------------------------------------
// 5) GREEKS STRENGTH
//    Additive points; windows must already include the current gamma/delta.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GreeksLabel { VeryStrong, Strong, Weak }

impl GreeksLabel {
    pub fn is_strong(&self) -> bool {
        matches!(self, GreeksLabel::VeryStrong | GreeksLabel::Strong)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GreeksReading {
    pub score: i32,
    pub label: GreeksLabel,
    pub strength: f64,
    pub gamma: f64,
    pub delta: f64,
    pub iv: f64,
    pub gamma_rising: bool,
    pub delta_rising: bool,
    pub notes: Vec<String>,
}

const GREEKS_MAX_POINTS: f64 = 11.0;

pub fn greeks_strength(gammas: &Window, deltas: &Window, gamma: f64, delta: f64, iv: f64) -> GreeksReading {
    let (gamma, delta, iv) = (finite(gamma), finite(delta), finite(iv));
    let gamma_rising = gammas.rising_over_last3();
    let delta_rising = deltas.rising_over_last3();
    let mut score = 0i32;
    let mut notes = Vec::new();

    let g = gamma.abs();
    if g > 0.002 {
        score += 3;
        notes.push(format!("Very high gamma {gamma:.4}"));
    } else if g > 0.001 {
        score += 2;
        notes.push(format!("High gamma {gamma:.4}"));
    }
    if gamma_rising && g > 0.0005 {
        score += 2;
        notes.push("Gamma rising".to_string());
    }

    let d = delta.abs();
    if d > 0.7 {
        score += 3;
        notes.push(format!("Very high delta {delta:.3}"));
    } else if d > 0.6 {
        score += 2;
        notes.push(format!("Good delta {delta:.3}"));
    }
    if delta_rising {
        score += 2;
        notes.push("Delta rising".to_string());
    }

    if iv > 0.15 && iv < 0.30 {
        score += 1;
        notes.push(format!("IV in range {iv:.2}"));
    } else if iv > 0.35 {
        score -= 2;
        notes.push(format!("IV rich {iv:.2}"));
    }

    let label = if score >= 8 {
        GreeksLabel::VeryStrong
    } else if score >= 5 {
        GreeksLabel::Strong
    } else {
        GreeksLabel::Weak
    };
    GreeksReading {
        score,
        label,
        strength: unit(score as f64 / GREEKS_MAX_POINTS),
        gamma,
        delta,
        iv,
        gamma_rising,
        delta_rising,
        notes,
    }
}
