// ===============================
// src/state.rs (per-symbol rolling state)
// ===============================
//
// One SymbolState per instrument, created on the first tick and kept for the
// life of the process. The pipeline is the only writer; status handlers read
// through `len`/`summary`.
//

use ahash::AHashMap as HashMap;
use parking_lot::{MappedRwLockWriteGuard, RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::finite;

/// Fixed-capacity ring buffer.
#[derive(Debug, Clone)]
pub struct Window {
    buf: VecDeque<f64>,
    cap: usize,
}

impl Window {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { buf: VecDeque::with_capacity(cap), cap }
    }

    /// Append, evicting (and returning) the oldest value once full.
    pub fn push(&mut self, v: f64) -> Option<f64> {
        let v = finite(v);
        let evicted = if self.buf.len() == self.cap {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(v);
        evicted
    }

    pub fn len(&self) -> usize { self.buf.len() }
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    pub fn is_full(&self) -> bool { self.buf.len() == self.cap }
    pub fn last(&self) -> Option<f64> { self.buf.back().copied() }
    pub fn first(&self) -> Option<f64> { self.buf.front().copied() }
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ { self.buf.iter().copied() }

    /// The newest `n` values, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().skip(self.buf.len().saturating_sub(n)).copied()
    }

    /// Summed from the buffer on every call; an evicted outlier leaves no residue.
    pub fn mean(&self) -> Option<f64> {
        if self.buf.is_empty() {
            None
        } else {
            let sum: f64 = self.buf.iter().sum();
            Some(finite(sum / self.buf.len() as f64))
        }
    }

    /// True when at least 3 values exist and the newest beats the one two ticks back.
    pub fn rising_over_last3(&self) -> bool {
        if self.buf.len() < 3 {
            return false;
        }
        let recent: Vec<f64> = self.recent(3).collect();
        recent[2] > recent[0]
    }
}

/// Window capacities, fixed per signal policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub prices: usize,
    pub volumes: usize,
    pub greeks: usize,
    pub open_interest: usize,
    pub ofi: usize,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self { prices: 5, volumes: 60, greeks: 5, open_interest: 5, ofi: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolState {
    pub prices: Window,
    pub volumes: Window,
    pub deltas: Window,
    pub gammas: Window,
    pub open_interest: Window,
    pub ofi: Window,
    pub avg_volume: Option<f64>,
    pub ticks: u64,
    /// Reference price of the last buy-side signal (target-hit rule).
    pub entry_ref: Option<f64>,
}

impl SymbolState {
    pub fn new(spec: &WindowSpec) -> Self {
        Self {
            prices: Window::new(spec.prices),
            volumes: Window::new(spec.volumes),
            deltas: Window::new(spec.greeks),
            gammas: Window::new(spec.greeks),
            open_interest: Window::new(spec.open_interest),
            ofi: Window::new(spec.ofi),
            avg_volume: None,
            ticks: 0,
            entry_ref: None,
        }
    }

    pub fn push_price(&mut self, px: f64) { self.prices.push(px); }
    pub fn push_volume(&mut self, qty: f64) { self.volumes.push(qty); }
    pub fn push_open_interest(&mut self, oi: f64) { self.open_interest.push(oi); }
    pub fn push_ofi(&mut self, ofi: f64) { self.ofi.push(ofi); }

    pub fn push_greeks(&mut self, delta: f64, gamma: f64) {
        self.deltas.push(delta);
        self.gammas.push(gamma);
    }

    /// avg = 0.9*avg + 0.1*current (first observation seeds it).
    /// Returns the average as it was before this update.
    pub fn update_volume_average(&mut self, current: f64) -> Option<f64> {
        let current = finite(current);
        let prev = self.avg_volume;
        let next = match prev {
            Some(avg) => avg * 0.9 + current * 0.1,
            None => current,
        };
        self.avg_volume = Some(finite(next));
        prev
    }
}

/// Read-only copy handed to status handlers.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub ticks: u64,
    pub last_price: Option<f64>,
    pub avg_volume: Option<f64>,
    pub price_window: usize,
    pub volume_window: usize,
}

pub struct SymbolStore {
    spec: WindowSpec,
    inner: RwLock<HashMap<String, SymbolState>>,
}

impl SymbolStore {
    pub fn new(spec: WindowSpec) -> Self {
        Self { spec, inner: RwLock::new(HashMap::new()) }
    }

    /// Exclusive handle on the symbol's state, created empty on first use.
    /// Readers wait until the guard drops, so never hold it across an await.
    pub fn get_or_create(&self, symbol: &str) -> MappedRwLockWriteGuard<'_, SymbolState> {
        let spec = &self.spec;
        RwLockWriteGuard::map(self.inner.write(), |m| {
            m.entry(symbol.to_string())
                .or_insert_with(|| SymbolState::new(spec))
        })
    }

    pub fn len(&self) -> usize { self.inner.read().len() }
    pub fn is_empty(&self) -> bool { self.inner.read().is_empty() }

    pub fn summary(&self, symbol: &str) -> Option<SymbolSummary> {
        let map = self.inner.read();
        map.get(symbol).map(|st| SymbolSummary {
            symbol: symbol.to_string(),
            ticks: st.ticks,
            last_price: st.prices.last(),
            avg_volume: st.avg_volume,
            price_window: st.prices.len(),
            volume_window: st.volumes.len(),
        })
    }
}
