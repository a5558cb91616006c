// ===============================
// src/main.rs
// ===============================
/*
 # latest results
curl -s localhost:5000/api/analysis | jq '.results[0]'
curl -s localhost:5000/api/signals  | jq '.analyses | keys'

 # live stream (SSE)
curl -N localhost:5000/stream

 # active config & feed health
curl -s localhost:5000/metrics | egrep '^config_(feed_mode|policy|symbol)'
curl -s localhost:5000/metrics | egrep '^feed_(connected|state|retries)'
curl -s localhost:5000/metrics | grep '^signals_total_by'

*/
/*
=============================================================================
Project : tick_radar_rust — real-time tick analytics pipeline in Rust
Module  : main.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Streams option/index ticks (mock or live websocket feed), keeps
          per-symbol rolling state, scores big moves, raises quorum-based
          signals, fans results out over SSE, exposes Prometheus metrics,
          and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{select, sync::watch, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tick_radar::codec::JsonTickDecoder;
use tick_radar::config::{self, FeedMode};
use tick_radar::domain::Tick;
use tick_radar::feed::{FeedConnector, FeedError, FeedStatus, TickSource};
use tick_radar::hub::Hub;
use tick_radar::metrics;
use tick_radar::mock::MockFeed;
use tick_radar::pipeline::Pipeline;
use tick_radar::policy::SignalPolicy;
use tick_radar::recorder;
use tick_radar::server::{self, AppState};
use tick_radar::upstream::WsUpstream;

// Bad credentials / bad config
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config ----
    let args = match config::load() {
        Ok(a) => a,
        Err(e) => {
            error!(%e, "config error");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let policy = SignalPolicy::for_kind(args.policy);

    // ---- Metrics ----
    metrics::init();

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        feed_mode = args.feed_mode.as_str(),
        policy = policy.name(),
        instruments = ?args.instruments,
        http_port = args.http_port,
        subscriber_queue = args.subscriber_queue,
        heartbeat_secs = args.heartbeat_secs,
        max_retries = args.max_retries,
        record_file = ?args.record_file,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
    metrics::CONFIG_POLICY.with_label_values(&[policy.name()]).set(1);
    for s in &args.instruments {
        metrics::CONFIG_SYMBOL.with_label_values(&[s.as_str()]).set(1);
    }

    // ---- Core ----
    let hub = Hub::new(args.subscriber_queue);
    let pipeline = Arc::new(Pipeline::new(policy, hub.clone()));
    let status = FeedStatus::new();
    let (stop_tx, stop_rx) = watch::channel(false);

    // ---- Recorder (optional) ----
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(hub.subscribe(), path, Duration::from_secs(1)));
    }

    // ---- HTTP (api / health / metrics / stream) ----
    let state = AppState {
        board: pipeline.board(),
        store: pipeline.store(),
        hub: hub.clone(),
        status: status.clone(),
        mode: args.feed_mode.as_str(),
        policy: pipeline.policy().name(),
        heartbeat: args.heartbeat(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let http = tokio::spawn(server::serve(addr, state, stop_rx.clone()));

    // ---- FEED ----
    let mut source: Box<dyn TickSource> = match args.feed_mode {
        FeedMode::Mock => Box::new(MockFeed::new(args.mock_interval(), status.clone())),
        FeedMode::Live => {
            let token = args.access_token.clone().unwrap_or_default();
            let timeout = Duration::from_secs(args.connect_timeout_secs);
            warn!(
                decoder = "json",
                "live feed: only JSON frames are decoded; protobuf (binary) market frames \
                 are counted in feed_decode_errors_total and skipped"
            );
            match WsUpstream::new(&args.authorize_url, &token, timeout) {
                Ok(up) => Box::new(FeedConnector::new(
                    up,
                    Box::new(JsonTickDecoder),
                    args.feed_config(),
                    status.clone(),
                )),
                Err(e) => {
                    error!(%e, "feed setup failed");
                    std::process::exit(EXIT_CONFIG);
                }
            }
        }
    };

    let keys = args.instruments.clone();
    let feed_stop = stop_rx.clone();
    let feed_pipeline = pipeline.clone();
    let mut feed = tokio::spawn(async move {
        info!(source = source.name(), "feed task started");
        let mut on_tick = |tick: Tick| {
            if let Err(e) = feed_pipeline.process(tick) {
                warn!(%e, "tick rejected");
            }
        };
        source.run(&keys, &mut on_tick, feed_stop).await
    });

    // ---- Run until ctrl-c (or a fatal feed error) ----
    let mut feed_done = false;
    select! {
        res = &mut feed => {
            feed_done = true;
            match res {
                Ok(Ok(())) => info!("feed ended"),
                Ok(Err(e)) if e.is_fatal() && !matches!(e, FeedError::RetriesExhausted { .. }) => {
                    error!(%e, "feed failed");
                    hub.close();
                    std::process::exit(EXIT_CONFIG);
                }
                Ok(Err(e)) => error!(%e, "feed gave up, still serving http until ctrl-c"),
                Err(e) => error!(?e, "feed task panicked"),
            }
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(?e, "ctrl-c handler failed");
            }
        }
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                error!(?e, "ctrl-c handler failed");
            }
        }
    }

    // ---- Shutdown ----
    info!("shutting down");
    let _ = stop_tx.send(true);
    if !feed_done {
        let _ = feed.await;
    }
    hub.close();
    match http.await {
        Ok(Err(e)) => error!(%e, "http server error"),
        Err(e) => error!(?e, "http task panicked"),
        Ok(Ok(())) => {}
    }
    info!(ticks = status.ticks(), reconnects = status.reconnects(), "bye");
}
