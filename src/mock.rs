// ===============================
// src/mock.rs
// ===============================
//
// Random-walk tick generator for running without upstream credentials.
// Every interval each instrument gets one full tick: book, Greeks, I1 candle,
// and now and then a volume burst (x3 / x5 / x8) so the analytics have
// something to react to.
//

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::domain::{now_ms, Candle, Greeks, Quote, Tick};
use crate::feed::{stopped, FeedError, FeedState, FeedStatus, StopSignal, TickSource};

/// Used when no instruments are configured.
pub const DEFAULT_INSTRUMENTS: [(&str, f64); 4] = [
    ("NSE_FO|NIFTY25JAN50CE", 250.0),
    ("NSE_FO|BANKNIFTY25JAN50CE", 180.0),
    ("NSE_INDEX|Nifty 50", 19_500.0),
    ("NSE_INDEX|Nifty Bank", 43_000.0),
];

// 4 in 7 ticks are quiet
const SPIKES: [f64; 7] = [1.0, 1.0, 1.0, 1.0, 3.0, 5.0, 8.0];

struct Walk {
    key: String,
    base: f64,
    price: f64,
    volume: f64,
    oi: f64,
}

pub struct MockFeed {
    interval: Duration,
    status: FeedStatus,
    rng: StdRng,
}

impl MockFeed {
    pub fn new(interval: Duration, status: FeedStatus) -> Self {
        Self { interval, status, rng: StdRng::from_entropy() }
    }

    pub fn with_seed(interval: Duration, status: FeedStatus, seed: u64) -> Self {
        Self { interval, status, rng: StdRng::seed_from_u64(seed) }
    }

    fn walks(&mut self, keys: &[String]) -> Vec<Walk> {
        let pairs: Vec<(String, f64)> = if keys.is_empty() {
            DEFAULT_INSTRUMENTS.iter().map(|(k, b)| (k.to_string(), *b)).collect()
        } else {
            keys.iter()
                .map(|k| {
                    let base = DEFAULT_INSTRUMENTS
                        .iter()
                        .find(|(d, _)| d == k)
                        .map(|(_, b)| *b)
                        .unwrap_or(100.0);
                    (k.clone(), base)
                })
                .collect()
        };
        pairs
            .into_iter()
            .map(|(key, base)| Walk {
                key,
                base,
                price: base,
                volume: self.rng.gen_range(100_000.0..500_000.0),
                oi: self.rng.gen_range(100_000.0..1_000_000.0),
            })
            .collect()
    }

    fn next_tick(&mut self, w: &mut Walk) -> Tick {
        let rng = &mut self.rng;
        let change: f64 = rng.gen_range(-1.0..1.0);
        w.price = (w.price * (1.0 + change / 100.0)).max(w.base * 0.05);
        w.volume *= rng.gen_range(0.95..1.05);
        w.oi = (w.oi * rng.gen_range(0.98..1.02)).max(1.0);

        let spike = *SPIKES.choose(rng).unwrap_or(&1.0);
        let ltp = (w.price * 100.0).round() / 100.0;
        let ts_ms = now_ms();
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        Tick {
            ts_ms,
            symbol: w.key.clone(),
            ltp,
            ltq: rng.gen_range(100.0..1_000.0_f64).round() * spike,
            tbq: rng.gen_range(50_000.0..500_000.0_f64).round() * *[2.0, 3.0, 1.0].choose(rng).unwrap_or(&1.0),
            tsq: rng.gen_range(50_000.0..500_000.0_f64).round(),
            volume: (w.volume * spike).round(),
            oi: w.oi.round(),
            iv: rng.gen_range(0.15..0.35),
            quote: Some(Quote {
                bid_px: ltp - rng.gen_range(0.1..5.0),
                bid_qty: rng.gen_range(1_000.0..50_000.0_f64).round(),
                ask_px: ltp + rng.gen_range(0.1..5.0),
                ask_qty: rng.gen_range(1_000.0..50_000.0_f64).round(),
            }),
            candles: vec![Candle {
                interval: "I1".to_string(),
                open: w.base,
                high: ltp * (1.0 + rng.gen_range(0.0..0.02)),
                low: ltp * (1.0 - rng.gen_range(0.0..0.02)),
                close: ltp,
                volume: (w.volume * spike).round(),
                ts_ms,
            }],
            greeks: Some(Greeks {
                delta: rng.gen_range(0.3..0.9) * sign,
                gamma: rng.gen_range(0.0001..0.003),
                theta: rng.gen_range(-0.1..-0.01),
                vega: rng.gen_range(0.01..0.1),
                rho: rng.gen_range(-0.01..0.01),
            }),
        }
    }
}

#[async_trait]
impl TickSource for MockFeed {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run(
        &mut self,
        instrument_keys: &[String],
        on_tick: &mut (dyn FnMut(Tick) + Send),
        mut stop: StopSignal,
    ) -> Result<(), FeedError> {
        let mut walks = self.walks(instrument_keys);
        info!(instruments = walks.len(), interval_ms = self.interval.as_millis() as u64, "mock feed: started");
        self.status.set_state(FeedState::Streaming);

        loop {
            if *stop.borrow() {
                break;
            }
            for w in walks.iter_mut() {
                let tick = self.next_tick(w);
                self.status.record_tick(tick.ts_ms);
                on_tick(tick);
            }
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = sleep(self.interval) => {}
            }
        }

        self.status.set_state(FeedState::Stopped);
        info!("mock feed: stopped");
        Ok(())
    }
}
