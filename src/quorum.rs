// ===============================
// src/quorum.rs
// ===============================
//
// Multi-condition signal quorum. A policy lists the buy conditions it checks
// and how much each confirmation weighs; a signal fires once `quorum` of them
// hold. Confidence = min(accumulated / ceiling, 1).
//

use serde::Serialize;

use crate::domain::{unit, Action, Signal};
use crate::indicators::{GreeksReading, MomentumReading, OfiReading, VolumeReading};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OiRule {
    /// Open interest above the previous tick.
    AbovePrevious,
    /// Open interest above `factor` x mean of the window before this tick.
    AboveAverage(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    OrderFlow,
    AskBreak,
    VolumeSpike,
    DeltaRising,
    OiTrend(OiRule),
    Momentum,
    GreeksStrength,
    OfiPersistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Flat(f64),
    /// Scaled by the reading's strength in [0,1].
    Strength(f64),
    /// Scaled by the Greeks point score.
    Score(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConditionSpec {
    pub kind: ConditionKind,
    pub weight: Weight,
}

impl ConditionSpec {
    pub const fn new(kind: ConditionKind, weight: Weight) -> Self {
        Self { kind, weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyRules {
    pub conditions: Vec<ConditionSpec>,
    pub quorum: usize,
    pub action: Action,
    pub ceiling: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SellRules {
    pub quorum: usize,
    pub weak_flow_below: f64,
    pub delta_drop: f64,
    pub target_points: f64,
}

/// Everything a condition may look at for one tick of one symbol.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub symbol: &'a str,
    pub ts_ms: i64,
    pub ltp: f64,
    pub top_ask: Option<f64>,
    pub ofi: &'a OfiReading,
    pub momentum: &'a MomentumReading,
    pub volume: &'a VolumeReading,
    pub greeks: &'a GreeksReading,
    pub delta: f64,
    pub prev_delta: Option<f64>,
    pub oi: f64,
    pub prev_oi: Option<f64>,
    /// Mean open interest before this tick was appended.
    pub oi_avg: Option<f64>,
    /// Last three OFI readings (current included) all strong.
    pub ofi_sustained: bool,
    pub prev_ltp: Option<f64>,
    pub entry_ref: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub kind: ConditionKind,
    pub contribution: f64,
    pub description: String,
}

fn holds(kind: ConditionKind, ev: &Evidence<'_>) -> Option<String> {
    match kind {
        ConditionKind::OrderFlow => ev
            .ofi
            .label
            .is_strong_buy()
            .then(|| format!("Strong order flow (OFI {:.2})", ev.ofi.value)),
        ConditionKind::AskBreak => match ev.top_ask {
            Some(ask) if ev.ltp >= ask => Some(format!("Breaking ask {ask:.2}")),
            _ => None,
        },
        ConditionKind::VolumeSpike => ev
            .volume
            .label
            .is_spike()
            .then(|| format!("Volume spike {:.1}x", ev.volume.ratio)),
        ConditionKind::DeltaRising => match ev.prev_delta {
            Some(prev) if ev.delta > prev => {
                Some(format!("Delta rising {prev:.3} -> {:.3}", ev.delta))
            }
            _ => None,
        },
        ConditionKind::OiTrend(OiRule::AbovePrevious) => match ev.prev_oi {
            Some(prev) if ev.oi > prev => Some(format!("OI building {prev:.0} -> {:.0}", ev.oi)),
            _ => None,
        },
        ConditionKind::OiTrend(OiRule::AboveAverage(factor)) => match ev.oi_avg {
            Some(avg) if avg > 0.0 && ev.oi > avg * factor => {
                Some(format!("OI {:.0} above {factor:.2}x average {avg:.0}", ev.oi))
            }
            _ => None,
        },
        ConditionKind::Momentum => ev
            .momentum
            .label
            .is_strong()
            .then(|| format!("Momentum {:.2}% ({:?})", ev.momentum.value * 100.0, ev.momentum.trend)),
        ConditionKind::GreeksStrength => ev
            .greeks
            .label
            .is_strong()
            .then(|| format!("Greeks score {}", ev.greeks.score)),
        ConditionKind::OfiPersistence => ev.ofi_sustained.then(|| "Sustained buying".to_string()),
    }
}

fn contribution(spec: &ConditionSpec, ev: &Evidence<'_>) -> f64 {
    match spec.weight {
        Weight::Flat(w) => w,
        Weight::Strength(w) => {
            let s = match spec.kind {
                ConditionKind::OrderFlow => ev.ofi.strength,
                ConditionKind::VolumeSpike => ev.volume.strength,
                ConditionKind::Momentum => ev.momentum.strength,
                ConditionKind::GreeksStrength => ev.greeks.strength,
                _ => 1.0,
            };
            w * unit(s)
        }
        Weight::Score(w) => w * ev.greeks.score.max(0) as f64,
    }
}

/// Conditions that hold for this tick, in policy order.
pub fn confirmations(rules: &BuyRules, ev: &Evidence<'_>) -> Vec<Confirmation> {
    rules
        .conditions
        .iter()
        .filter_map(|spec| {
            holds(spec.kind, ev).map(|description| Confirmation {
                kind: spec.kind,
                contribution: contribution(spec, ev),
                description,
            })
        })
        .collect()
}

/// No signal without a reference price; the confirmations are still reported.
pub fn evaluate_buy(rules: &BuyRules, ev: &Evidence<'_>) -> Option<Signal> {
    if ev.ltp <= 0.0 {
        return None;
    }
    let hits = confirmations(rules, ev);
    if hits.len() < rules.quorum {
        return None;
    }
    let accumulated: f64 = hits.iter().map(|c| c.contribution).sum();
    let confidence = if rules.ceiling > 0.0 { unit(accumulated / rules.ceiling) } else { 0.0 };
    Some(Signal {
        action: rules.action,
        symbol: ev.symbol.to_string(),
        price: ev.ltp,
        confidence,
        confirmed: hits.len(),
        evaluated: rules.conditions.len(),
        reasons: hits.into_iter().map(|c| c.description).collect(),
        ts_ms: ev.ts_ms,
    })
}

const SELL_CONDITIONS: usize = 4;

pub fn evaluate_sell(rules: &SellRules, ev: &Evidence<'_>) -> Option<Signal> {
    if ev.ltp <= 0.0 {
        return None;
    }
    let mut reasons = Vec::new();
    if ev.ofi.value < rules.weak_flow_below {
        reasons.push(format!("Weak order flow (OFI {:.2})", ev.ofi.value));
    }
    if let Some(prev) = ev.prev_ltp {
        if ev.ltp < prev {
            reasons.push(format!("Price rejected {prev:.2} -> {:.2}", ev.ltp));
        }
    }
    if let Some(prev) = ev.prev_delta {
        if prev - ev.delta > rules.delta_drop {
            reasons.push(format!("Delta falling {prev:.3} -> {:.3}", ev.delta));
        }
    }
    if let Some(entry) = ev.entry_ref {
        if ev.ltp >= entry + rules.target_points {
            reasons.push(format!("Target hit (+{:.2} from {entry:.2})", ev.ltp - entry));
        }
    }

    if reasons.len() < rules.quorum {
        return None;
    }
    Some(Signal {
        action: Action::Sell,
        symbol: ev.symbol.to_string(),
        price: ev.ltp,
        confidence: unit(reasons.len() as f64 / SELL_CONDITIONS as f64),
        confirmed: reasons.len(),
        evaluated: SELL_CONDITIONS,
        reasons,
        ts_ms: ev.ts_ms,
    })
}
