// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Pipeline --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "ticks processed by the pipeline").unwrap());

pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_symbol", "ticks processed per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static TICKS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ticks_rejected_total", "ticks skipped by the pipeline").unwrap()
});

pub static ANALYSES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("analyses_total", "composite analyses produced").unwrap());

pub static ALERT_TIERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("analysis_tier_total", "composite analyses by alert tier"),
        &["tier"],
    )
    .unwrap()
});

pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signals_total_by", "signals by action & symbol (labels: action, symbol)"),
        &["action", "symbol"],
    )
    .unwrap()
});

// Wall time of one Pipeline::process call (microseconds)
pub static PROCESS_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("tick_process_latency_us", "Pipeline latency per tick (us)")
            .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
    )
    .unwrap()
});

// -------- Upstream feed health --------
pub static FEED_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_connected", "1 if the upstream session is subscribed or streaming").unwrap()
});

pub static FEED_STATE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_state", "feed connector state (see FeedState discriminants)").unwrap()
});

pub static FEED_RETRIES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("feed_retries", "consecutive reconnect attempts").unwrap());

pub static FEED_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feed_reconnects_total", "number of reconnects to the upstream feed").unwrap()
});

pub static FEED_LAST_TICK_TS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_last_tick_ts", "Unix seconds of the last received tick").unwrap()
});

pub static DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feed_decode_errors_total", "frames that failed to decode").unwrap()
});

// -------- Broadcast hub --------
pub static SUBSCRIBERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("hub_subscribers", "live stream subscribers").unwrap());

pub static EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("hub_events_published_total", "events published (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub static EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("hub_events_dropped_total", "oldest events dropped on full queues").unwrap()
});

pub static SUBSCRIBERS_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("hub_subscribers_evicted_total", "subscribers removed after sink failure")
        .unwrap()
});

// ---- Config visibility (feed / policy / symbols) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_POLICY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_signal_policy", "signal policy (label: policy)"),
        &["policy"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured instruments (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry; a second call is a no-op
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(TICKS_REJECTED.clone())),
        REGISTRY.register(Box::new(ANALYSES.clone())),
        REGISTRY.register(Box::new(ALERT_TIERS.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(PROCESS_LATENCY.clone())),
        // Feed health
        REGISTRY.register(Box::new(FEED_CONNECTED.clone())),
        REGISTRY.register(Box::new(FEED_STATE.clone())),
        REGISTRY.register(Box::new(FEED_RETRIES.clone())),
        REGISTRY.register(Box::new(FEED_RECONNECTS.clone())),
        REGISTRY.register(Box::new(FEED_LAST_TICK_TS.clone())),
        REGISTRY.register(Box::new(DECODE_ERRORS.clone())),
        // Hub
        REGISTRY.register(Box::new(SUBSCRIBERS.clone())),
        REGISTRY.register(Box::new(EVENTS_PUBLISHED.clone())),
        REGISTRY.register(Box::new(EVENTS_DROPPED.clone())),
        REGISTRY.register(Box::new(SUBSCRIBERS_EVICTED.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_POLICY.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        let _ = m;
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}
