// ===============================
// src/policy.rs
// ===============================
//
// Two signal policies share one pipeline:
// - lenient: graded labels, 5 buy conditions (quorum 3) plus a sell side
// - strict : high-conviction labels, 7 buy conditions (quorum 5), buy only
//

use serde::Serialize;
use std::str::FromStr;

use crate::domain::Action;
use crate::indicators::Grading;
use crate::quorum::{BuyRules, ConditionKind, ConditionSpec, OiRule, SellRules, Weight};
use crate::state::WindowSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Lenient,
    Strict,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Lenient => "lenient",
            PolicyKind::Strict => "strict",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" | "basic" => Ok(PolicyKind::Lenient),
            "strict" | "strong" => Ok(PolicyKind::Strict),
            other => Err(format!("unknown signal policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalPolicy {
    pub kind: PolicyKind,
    pub grading: Grading,
    pub momentum_min_history: usize,
    pub volume_min_history: usize,
    #[serde(skip)]
    pub windows: WindowSpec,
    pub buy: BuyRules,
    pub sell: Option<SellRules>,
}

impl SignalPolicy {
    pub fn lenient() -> Self {
        use ConditionKind::*;
        let flat = Weight::Flat(20.0);
        Self {
            kind: PolicyKind::Lenient,
            grading: Grading::Graded,
            momentum_min_history: 2,
            volume_min_history: 5,
            windows: WindowSpec::default(),
            buy: BuyRules {
                conditions: vec![
                    ConditionSpec::new(OrderFlow, flat),
                    ConditionSpec::new(AskBreak, flat),
                    ConditionSpec::new(VolumeSpike, flat),
                    ConditionSpec::new(DeltaRising, flat),
                    ConditionSpec::new(OiTrend(OiRule::AbovePrevious), flat),
                ],
                quorum: 3,
                action: Action::Buy,
                ceiling: 100.0,
            },
            sell: Some(SellRules {
                quorum: 3,
                weak_flow_below: 0.2,
                delta_drop: 0.02,
                target_points: 5.0,
            }),
        }
    }

    pub fn strict() -> Self {
        use ConditionKind::*;
        Self {
            kind: PolicyKind::Strict,
            grading: Grading::Strict,
            momentum_min_history: 5,
            volume_min_history: 10,
            windows: WindowSpec { prices: 10, ..WindowSpec::default() },
            buy: BuyRules {
                conditions: vec![
                    ConditionSpec::new(OrderFlow, Weight::Strength(20.0)),
                    ConditionSpec::new(VolumeSpike, Weight::Strength(15.0)),
                    ConditionSpec::new(Momentum, Weight::Flat(15.0)),
                    ConditionSpec::new(GreeksStrength, Weight::Score(2.0)),
                    ConditionSpec::new(OiTrend(OiRule::AboveAverage(1.1)), Weight::Flat(10.0)),
                    ConditionSpec::new(AskBreak, Weight::Flat(10.0)),
                    ConditionSpec::new(OfiPersistence, Weight::Flat(10.0)),
                ],
                quorum: 5,
                action: Action::StrongBuy,
                ceiling: 100.0,
            },
            sell: None,
        }
    }

    pub fn for_kind(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Lenient => Self::lenient(),
            PolicyKind::Strict => Self::strict(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}
