// ===============================
// src/pipeline.rs
// ===============================
//
// Tick -> symbol state -> indicators -> quorum + composite score -> board + hub.
//
// One task owns the pipeline and calls `process` for every tick. The symbol's
// state guard is released before anything is published.
//

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{now_ms, Event, Signal, Tick};
use crate::hub::Hub;
use crate::indicators::{
    greeks_strength, momentum, order_flow, spread, volume_spike, GreeksReading, MomentumReading,
    OfiReading, SpreadReading, VolumeReading,
};
use crate::metrics::{
    ALERT_TIERS, ANALYSES, PROCESS_LATENCY, SIGNALS_BY, TICKS, TICKS_BY_SYMBOL, TICKS_REJECTED,
};
use crate::policy::SignalPolicy;
use crate::quorum::{self, Confirmation, Evidence};
use crate::scorer::{self, AnalysisResult};
use crate::state::SymbolStore;

// sustained buying: the last N OFI readings all above the bar
const OFI_SUSTAINED_ABOVE: f64 = 0.5;
const OFI_SUSTAINED_TICKS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("tick has an empty symbol key")]
    EmptySymbol,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub ofi: OfiReading,
    pub spread: SpreadReading,
    pub momentum: MomentumReading,
    pub volume: VolumeReading,
    pub greeks: GreeksReading,
    pub confirmations: Vec<Confirmation>,
}

/// Latest signal view of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalAnalysis {
    pub symbol: String,
    pub ltp: f64,
    pub policy: &'static str,
    pub indicators: IndicatorSnapshot,
    pub buy: Option<Signal>,
    pub sell: Option<Signal>,
    pub ts_ms: i64,
}

/// Most recent results per symbol. Writers swap the Arc, readers clone it.
#[derive(Default)]
pub struct ResultBoard {
    analyses: RwLock<HashMap<String, Arc<AnalysisResult>>>,
    signals: RwLock<HashMap<String, Arc<SignalAnalysis>>>,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_analysis(&self, a: Arc<AnalysisResult>) {
        self.analyses.write().insert(a.symbol.clone(), a);
    }

    pub fn put_signal(&self, s: Arc<SignalAnalysis>) {
        self.signals.write().insert(s.symbol.clone(), s);
    }

    pub fn analysis(&self, symbol: &str) -> Option<Arc<AnalysisResult>> {
        self.analyses.read().get(symbol).cloned()
    }

    pub fn signal(&self, symbol: &str) -> Option<Arc<SignalAnalysis>> {
        self.signals.read().get(symbol).cloned()
    }

    /// All analyses, highest score first.
    pub fn analyses(&self) -> Vec<Arc<AnalysisResult>> {
        let mut out: Vec<_> = self.analyses.read().values().cloned().collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
        out
    }

    pub fn signals(&self) -> BTreeMap<String, Arc<SignalAnalysis>> {
        self.signals
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.analyses.read().len().max(self.signals.read().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub analysis: Arc<AnalysisResult>,
    pub signal: Arc<SignalAnalysis>,
}

pub struct Pipeline {
    policy: SignalPolicy,
    store: Arc<SymbolStore>,
    board: Arc<ResultBoard>,
    hub: Hub,
}

impl Pipeline {
    pub fn new(policy: SignalPolicy, hub: Hub) -> Self {
        let store = Arc::new(SymbolStore::new(policy.windows));
        Self { policy, store, board: Arc::new(ResultBoard::new()), hub }
    }

    pub fn policy(&self) -> &SignalPolicy { &self.policy }
    pub fn store(&self) -> Arc<SymbolStore> { self.store.clone() }
    pub fn board(&self) -> Arc<ResultBoard> { self.board.clone() }
    pub fn hub(&self) -> &Hub { &self.hub }

    pub fn process(&self, tick: Tick) -> Result<Outcome, AnalysisError> {
        let started = Instant::now();
        let mut tick = tick.sanitized();
        if tick.symbol.trim().is_empty() {
            TICKS_REJECTED.inc();
            return Err(AnalysisError::EmptySymbol);
        }
        if tick.ts_ms <= 0 {
            tick.ts_ms = now_ms();
        }

        let (signal, prev_avg) = self.update_symbol(&tick);
        let analysis = Arc::new(scorer::analyze(&tick, prev_avg));
        let signal = Arc::new(signal);

        self.board.put_analysis(analysis.clone());
        self.board.put_signal(signal.clone());
        self.hub.publish(Event::AnalysisUpdate { analysis: analysis.clone() });
        self.hub.publish(Event::SignalUpdate { analysis: signal.clone() });

        TICKS.inc();
        TICKS_BY_SYMBOL.with_label_values(&[tick.symbol.as_str()]).inc();
        ANALYSES.inc();
        ALERT_TIERS.with_label_values(&[analysis.tier.as_str()]).inc();
        for s in signal.buy.iter().chain(signal.sell.iter()) {
            SIGNALS_BY.with_label_values(&[s.action.as_str(), s.symbol.as_str()]).inc();
            info!(
                symbol = %s.symbol,
                action = s.action.as_str(),
                price = s.price,
                confidence = s.confidence,
                confirmed = s.confirmed,
                evaluated = s.evaluated,
                "signal"
            );
        }
        PROCESS_LATENCY.observe(started.elapsed().as_secs_f64() * 1e6);
        debug!(
            symbol = %tick.symbol,
            ltp = tick.ltp,
            score = analysis.score,
            tier = analysis.tier.as_str(),
            "tick processed"
        );

        Ok(Outcome { analysis, signal })
    }

    /// Every window is appended exactly once per tick. Returns the signal view
    /// and the smoothed volume average as it was before this tick.
    fn update_symbol(&self, tick: &Tick) -> (SignalAnalysis, Option<f64>) {
        let p = &self.policy;
        let g = tick.greeks();
        let mut st = self.store.get_or_create(&tick.symbol);
        st.ticks += 1;

        let prev_ltp = st.prices.last();
        let prev_delta = st.deltas.last();
        let prev_oi = st.open_interest.last();
        let oi_avg = st.open_interest.mean();

        let ofi = order_flow(tick.tbq, tick.tsq, p.grading);
        let spread = spread(tick.best_bid(), tick.best_ask(), tick.ltp);

        // ratio against history, then record
        let volume = volume_spike(&st.volumes, tick.ltq, p.grading, p.volume_min_history);
        st.push_volume(tick.ltq);

        // no trade price: keep the price history clean, momentum reads neutral
        if tick.ltp > 0.0 {
            st.push_price(tick.ltp);
        }
        let momentum = momentum(&st.prices, tick.ltp, p.grading, p.momentum_min_history);

        st.push_greeks(g.delta, g.gamma);
        let greeks = greeks_strength(&st.gammas, &st.deltas, g.gamma, g.delta, tick.iv);

        st.push_open_interest(tick.oi);
        st.push_ofi(ofi.value);
        let ofi_sustained = st.ofi.len() >= OFI_SUSTAINED_TICKS
            && st.ofi.recent(OFI_SUSTAINED_TICKS).all(|v| v > OFI_SUSTAINED_ABOVE);

        let ev = Evidence {
            symbol: &tick.symbol,
            ts_ms: tick.ts_ms,
            ltp: tick.ltp,
            top_ask: tick.top_ask(),
            ofi: &ofi,
            momentum: &momentum,
            volume: &volume,
            greeks: &greeks,
            delta: g.delta,
            prev_delta,
            oi: tick.oi,
            prev_oi,
            oi_avg,
            ofi_sustained,
            prev_ltp,
            entry_ref: st.entry_ref,
        };
        let confirmations = quorum::confirmations(&p.buy, &ev);
        let buy = quorum::evaluate_buy(&p.buy, &ev);
        let sell = p.sell.as_ref().and_then(|rules| quorum::evaluate_sell(rules, &ev));

        if buy.is_some() {
            st.entry_ref = Some(tick.ltp);
        } else if sell.is_some() {
            st.entry_ref = None;
        }
        let prev_avg = st.update_volume_average(tick.volume);
        drop(st);

        let analysis = SignalAnalysis {
            symbol: tick.symbol.clone(),
            ltp: tick.ltp,
            policy: p.name(),
            indicators: IndicatorSnapshot { ofi, spread, momentum, volume, greeks, confirmations },
            buy,
            sell,
            ts_ms: tick.ts_ms,
        };
        (analysis, prev_avg)
    }
}
