// ===============================
// src/feed.rs
// ===============================
//
// Tick sources:
// - FeedConnector : upstream session state machine (authorize -> connect ->
//                   subscribe -> stream), linear backoff, bounded retries
// - MockFeed      : see mock.rs
//
// State machine:
//   Disconnected -> Authorizing -> Connecting -> Subscribed -> Streaming
//   any transient error / close frame / end of stream -> Reconnecting
//   Reconnecting: retries += 1, sleep min(base * retries, max)
//   retries == max_retries -> Stopped (RetriesExhausted)
//   credential or config errors -> Stopped immediately
//
// Notes:
// - The first tick of a session resets the retry counter.
// - An idle read (read_timeout) sends a keepalive ping instead of dropping.
// - The subscription is re-sent after every successful connect.
//

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::codec::TickDecoder;
use crate::domain::Tick;
use crate::metrics::{
    DECODE_ERRORS, FEED_CONNECTED, FEED_LAST_TICK_TS, FEED_RECONNECTS, FEED_RETRIES, FEED_STATE,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected = 0,
    Authorizing = 1,
    Connecting = 2,
    Subscribed = 3,
    Streaming = 4,
    Reconnecting = 5,
    Stopped = 6,
}

impl FeedState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => FeedState::Authorizing,
            2 => FeedState::Connecting,
            3 => FeedState::Subscribed,
            4 => FeedState::Streaming,
            5 => FeedState::Reconnecting,
            6 => FeedState::Stopped,
            _ => FeedState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedState::Disconnected => "disconnected",
            FeedState::Authorizing => "authorizing",
            FeedState::Connecting => "connecting",
            FeedState::Subscribed => "subscribed",
            FeedState::Streaming => "streaming",
            FeedState::Reconnecting => "reconnecting",
            FeedState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection health shared with the status surface. Cheap to clone.
#[derive(Clone, Default)]
pub struct FeedStatus {
    inner: Arc<StatusInner>,
}

#[derive(Default)]
struct StatusInner {
    connected: AtomicBool,
    state: AtomicU8,
    retries: AtomicU32,
    reconnects: AtomicU64,
    ticks: AtomicU64,
    last_tick_ms: AtomicI64,
}

impl FeedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FeedState {
        FeedState::from_u8(self.inner.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, s: FeedState) {
        let connected = matches!(s, FeedState::Subscribed | FeedState::Streaming);
        self.inner.state.store(s as u8, Ordering::Relaxed);
        self.inner.connected.store(connected, Ordering::Relaxed);
        FEED_STATE.set(s as i64);
        FEED_CONNECTED.set(i64::from(connected));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u32 {
        self.inner.retries.load(Ordering::Relaxed)
    }

    fn set_retries(&self, n: u32) {
        self.inner.retries.store(n, Ordering::Relaxed);
        FEED_RETRIES.set(i64::from(n));
    }

    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    fn note_reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
        FEED_RECONNECTS.inc();
    }

    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }

    pub fn last_tick_ms(&self) -> Option<i64> {
        match self.inner.last_tick_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn record_tick(&self, ts_ms: i64) {
        self.inner.ticks.fetch_add(1, Ordering::Relaxed);
        let ts_ms = if ts_ms > 0 { ts_ms } else { crate::domain::now_ms() };
        self.inner.last_tick_ms.store(ts_ms, Ordering::Relaxed);
        FEED_LAST_TICK_TS.set(ts_ms / 1000);
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("credentials rejected: {0}")]
    Credentials(String),
    #[error("invalid feed configuration: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out during {0}")]
    Timeout(&'static str),
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

impl FeedError {
    /// Fatal errors stop the connector without another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::Credentials(_) | FeedError::Config(_) | FeedError::RetriesExhausted { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Close,
    /// Control frames (ping/pong) and anything else without payload for us.
    Other,
}

/// One live upstream connection.
#[async_trait]
pub trait FeedSession: Send {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError>;
    /// `None` when the stream ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, FeedError>>;
    async fn ping(&mut self) -> Result<(), FeedError>;
}

/// Authorization + transport for the market feed.
#[async_trait]
pub trait Upstream: Send + Sync {
    type Session: FeedSession;
    /// Returns the (short-lived) websocket URL to connect to.
    async fn authorize(&self) -> Result<String, FeedError>;
    async fn connect(&self, url: &str) -> Result<Self::Session, FeedError>;
}

/// Cooperative stop: `true` means stop.
pub type StopSignal = watch::Receiver<bool>;

/// Resolves once stop is requested. Never resolves if the sender is gone
/// without having asked for a stop.
pub async fn stopped(stop: &mut StopSignal) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Produces ticks until stopped (Ok) or until it gives up (Err).
#[async_trait]
pub trait TickSource: Send {
    fn name(&self) -> &'static str;
    async fn run(
        &mut self,
        instrument_keys: &[String],
        on_tick: &mut (dyn FnMut(Tick) + Send),
        stop: StopSignal,
    ) -> Result<(), FeedError>;
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub guid: String,
    pub mode: String,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            guid: "tick_radar".to_string(),
            mode: "full".to_string(),
            max_retries: 5,
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub fn backoff_delay(cfg: &FeedConfig, attempt: u32) -> Duration {
    cfg.retry_base.saturating_mul(attempt.max(1)).min(cfg.retry_max)
}

pub fn subscription_message(cfg: &FeedConfig, instrument_keys: &[String]) -> String {
    serde_json::json!({
        "guid": cfg.guid,
        "method": "sub",
        "data": {
            "mode": cfg.mode,
            "instrumentKeys": instrument_keys,
        }
    })
    .to_string()
}

enum SessionEnd {
    Stopped,
    Disconnected,
}

pub struct FeedConnector<U: Upstream> {
    upstream: U,
    decoder: Box<dyn TickDecoder>,
    cfg: FeedConfig,
    status: FeedStatus,
}

impl<U: Upstream> FeedConnector<U> {
    pub fn new(upstream: U, decoder: Box<dyn TickDecoder>, cfg: FeedConfig, status: FeedStatus) -> Self {
        Self { upstream, decoder, cfg, status }
    }

    pub fn status(&self) -> FeedStatus {
        self.status.clone()
    }

    fn stop_now(&self) {
        self.status.set_state(FeedState::Stopped);
        info!("feed: stopped");
    }

    async fn session(
        &mut self,
        subscription: &str,
        on_tick: &mut (dyn FnMut(Tick) + Send),
        stop: &mut StopSignal,
        retries: &mut u32,
    ) -> Result<SessionEnd, FeedError> {
        let connect_timeout = self.cfg.connect_timeout;

        // stop wins over a slow handshake
        self.status.set_state(FeedState::Authorizing);
        let url = tokio::select! {
            biased;
            _ = stopped(stop) => return Ok(SessionEnd::Stopped),
            r = timeout(connect_timeout, self.upstream.authorize()) => {
                r.map_err(|_| FeedError::Timeout("authorize"))??
            }
        };

        self.status.set_state(FeedState::Connecting);
        let mut session = tokio::select! {
            biased;
            _ = stopped(stop) => return Ok(SessionEnd::Stopped),
            r = timeout(connect_timeout, self.upstream.connect(&url)) => {
                r.map_err(|_| FeedError::Timeout("connect"))??
            }
        };

        session.send_text(subscription.to_string()).await?;
        self.status.set_state(FeedState::Subscribed);
        info!("feed: connected & subscribed");

        loop {
            let next = tokio::select! {
                biased;
                _ = stopped(stop) => return Ok(SessionEnd::Stopped),
                r = timeout(self.cfg.read_timeout, session.next_frame()) => r,
            };
            match next {
                Err(_) => {
                    debug!("feed: read idle, sending keepalive ping");
                    session.ping().await?;
                }
                Ok(None) | Ok(Some(Ok(Frame::Close))) => return Ok(SessionEnd::Disconnected),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(Frame::Binary(bytes)))) => self.dispatch(&bytes, on_tick, retries),
                Ok(Some(Ok(Frame::Text(text)))) => self.dispatch(text.as_bytes(), on_tick, retries),
                Ok(Some(Ok(Frame::Other))) => {}
            }
        }
    }

    fn dispatch(&self, payload: &[u8], on_tick: &mut (dyn FnMut(Tick) + Send), retries: &mut u32) {
        let ticks = match self.decoder.decode(payload) {
            Ok(t) => t,
            Err(e) => {
                DECODE_ERRORS.inc();
                warn!(error = %e, bytes = payload.len(), "feed: undecodable frame skipped");
                return;
            }
        };
        for tick in ticks {
            if self.status.state() != FeedState::Streaming {
                self.status.set_state(FeedState::Streaming);
                info!("feed: streaming");
            }
            if *retries > 0 {
                *retries = 0;
                self.status.set_retries(0);
            }
            self.status.record_tick(tick.ts_ms);
            on_tick(tick);
        }
    }
}

#[async_trait]
impl<U: Upstream + 'static> TickSource for FeedConnector<U> {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn run(
        &mut self,
        instrument_keys: &[String],
        on_tick: &mut (dyn FnMut(Tick) + Send),
        mut stop: StopSignal,
    ) -> Result<(), FeedError> {
        let subscription = subscription_message(&self.cfg, instrument_keys);
        let mut retries: u32 = 0;
        self.status.set_retries(0);
        info!(instruments = instrument_keys.len(), "feed: starting");

        loop {
            if *stop.borrow() {
                self.stop_now();
                return Ok(());
            }

            match self.session(&subscription, on_tick, &mut stop, &mut retries).await {
                Ok(SessionEnd::Stopped) => {
                    self.stop_now();
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected) => info!("feed: upstream closed the session"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "feed: fatal error, not retrying");
                    self.status.set_state(FeedState::Stopped);
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "feed: session failed"),
            }

            self.status.set_state(FeedState::Reconnecting);
            retries += 1;
            self.status.set_retries(retries);
            if retries >= self.cfg.max_retries {
                error!(attempts = retries, "feed: max retries reached");
                self.status.set_state(FeedState::Stopped);
                return Err(FeedError::RetriesExhausted { attempts: retries });
            }

            let delay = backoff_delay(&self.cfg, retries);
            warn!(attempt = retries, delay_ms = delay.as_millis() as u64, "feed: reconnecting");
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => {
                    self.stop_now();
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }
            self.status.note_reconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonTickDecoder;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum Step {
        Frame(Frame),
        /// Stay silent for one read (read timeout fires).
        Idle,
        End,
    }

    struct ScriptSession {
        steps: VecDeque<Step>,
        sent: Arc<Mutex<Vec<String>>>,
        pings: Arc<AtomicU32>,
    }

    #[async_trait]
    impl FeedSession for ScriptSession {
        async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn next_frame(&mut self) -> Option<Result<Frame, FeedError>> {
            match self.steps.pop_front() {
                Some(Step::Frame(f)) => Some(Ok(f)),
                Some(Step::End) => None,
                Some(Step::Idle) | None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<(), FeedError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptUpstream {
        reject_auth: bool,
        hang_auth: bool,
        hang_connect: bool,
        connects: Mutex<VecDeque<Option<Vec<Step>>>>,
        authorizations: AtomicU32,
        attempts: AtomicU32,
        sent: Arc<Mutex<Vec<String>>>,
        pings: Arc<AtomicU32>,
    }

    impl ScriptUpstream {
        fn new(connects: Vec<Option<Vec<Step>>>) -> Self {
            Self { connects: Mutex::new(connects.into()), ..Default::default() }
        }
    }

    #[async_trait]
    impl Upstream for Arc<ScriptUpstream> {
        type Session = ScriptSession;

        async fn authorize(&self) -> Result<String, FeedError> {
            self.authorizations.fetch_add(1, Ordering::SeqCst);
            if self.hang_auth {
                std::future::pending::<()>().await;
            }
            if self.reject_auth {
                return Err(FeedError::Credentials("401 Unauthorized".into()));
            }
            Ok("wss://feed.test/v3".into())
        }

        async fn connect(&self, _url: &str) -> Result<ScriptSession, FeedError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.hang_connect {
                std::future::pending::<()>().await;
            }
            match self.connects.lock().pop_front() {
                Some(Some(steps)) => Ok(ScriptSession {
                    steps: steps.into(),
                    sent: self.sent.clone(),
                    pings: self.pings.clone(),
                }),
                _ => Err(FeedError::Transport("connection refused".into())),
            }
        }
    }

    fn fast_cfg() -> FeedConfig {
        FeedConfig {
            retry_base: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
            read_timeout: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
            ..FeedConfig::default()
        }
    }

    fn tick_frame(key: &str) -> Step {
        let payload = serde_json::json!({
            "feeds": {key: {"fullFeed": {"marketFF": {"ltpc": {"ltp": 100.0, "ltq": 10}}}}}
        });
        Step::Frame(Frame::Text(payload.to_string()))
    }

    fn connector(up: &Arc<ScriptUpstream>) -> FeedConnector<Arc<ScriptUpstream>> {
        FeedConnector::new(up.clone(), Box::new(JsonTickDecoder), fast_cfg(), FeedStatus::new())
    }

    fn keys() -> Vec<String> {
        vec!["NSE_FO|1".to_string()]
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let cfg = FeedConfig::default();
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_secs(15));
        assert_eq!(backoff_delay(&cfg, 9), Duration::from_secs(30));
    }

    #[test]
    fn subscription_message_shape() {
        let msg = subscription_message(&FeedConfig::default(), &keys());
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["method"], "sub");
        assert_eq!(v["guid"], "tick_radar");
        assert_eq!(v["data"]["mode"], "full");
        assert_eq!(v["data"]["instrumentKeys"][0], "NSE_FO|1");
    }

    #[tokio::test]
    async fn five_failures_stop_the_feed() {
        let up = Arc::new(ScriptUpstream::new(vec![None, None, None, None, None, None]));
        let mut feed = connector(&up);
        let status = feed.status();
        let (_tx, rx) = watch::channel(false);

        let res = feed.run(&keys(), &mut |_t| {}, rx).await;
        assert!(matches!(res, Err(FeedError::RetriesExhausted { attempts: 5 })));
        assert_eq!(status.state(), FeedState::Stopped);
        assert!(!status.is_connected());
        assert_eq!(up.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn success_on_third_attempt_resets_retries() {
        let up = Arc::new(ScriptUpstream::new(vec![None, None, Some(vec![tick_frame("NSE_FO|1")])]));
        let mut feed = connector(&up);
        let status = feed.status();
        let (tx, rx) = watch::channel(false);

        let seen = status.clone();
        let mut observed = None;
        let res = feed
            .run(
                &keys(),
                &mut |t: Tick| {
                    observed = Some((t.symbol.clone(), seen.retries(), seen.is_connected()));
                    let _ = tx.send(true);
                },
                rx,
            )
            .await;

        assert!(res.is_ok());
        assert_eq!(observed, Some(("NSE_FO|1".to_string(), 0, true)));
        assert_eq!(up.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(status.reconnects(), 2);
        assert_eq!(status.ticks(), 1);
        assert_eq!(status.state(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn credential_rejection_is_not_retried() {
        let up = Arc::new(ScriptUpstream { reject_auth: true, ..Default::default() });
        let mut feed = connector(&up);
        let (_tx, rx) = watch::channel(false);

        let res = feed.run(&keys(), &mut |_t| {}, rx).await;
        assert!(matches!(res, Err(FeedError::Credentials(_))));
        assert_eq!(up.authorizations.load(Ordering::SeqCst), 1);
        assert_eq!(up.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(feed.status().state(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn stop_interrupts_a_hanging_handshake() {
        for (hang_auth, hang_connect) in [(true, false), (false, true)] {
            let up = Arc::new(ScriptUpstream { hang_auth, hang_connect, ..Default::default() });
            let cfg = FeedConfig { connect_timeout: Duration::from_secs(60), ..fast_cfg() };
            let mut feed = FeedConnector::new(up.clone(), Box::new(JsonTickDecoder), cfg, FeedStatus::new());
            let status = feed.status();
            let (tx, rx) = watch::channel(false);

            tokio::spawn(async move {
                sleep(Duration::from_millis(20)).await;
                let _ = tx.send(true);
            });
            let res = tokio::time::timeout(Duration::from_secs(2), feed.run(&keys(), &mut |_t| {}, rx))
                .await
                .expect("stop should end the handshake well before the connect timeout");
            assert!(res.is_ok());
            assert_eq!(status.state(), FeedState::Stopped);
            assert_eq!(status.reconnects(), 0);
            assert_eq!(up.authorizations.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn idle_read_sends_keepalive() {
        let up = Arc::new(ScriptUpstream::new(vec![Some(vec![Step::Idle, tick_frame("A")])]));
        let mut feed = connector(&up);
        let (tx, rx) = watch::channel(false);

        let res = feed.run(&keys(), &mut |_t| { let _ = tx.send(true); }, rx).await;
        assert!(res.is_ok());
        assert_eq!(up.pings.load(Ordering::SeqCst), 1);
        assert_eq!(up.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_frame_reconnects_and_resubscribes() {
        let up = Arc::new(ScriptUpstream::new(vec![
            Some(vec![Step::Frame(Frame::Binary(b"not json".to_vec())), Step::Frame(Frame::Close)]),
            Some(vec![Step::End]),
            Some(vec![tick_frame("B")]),
        ]));
        let mut feed = connector(&up);
        let (tx, rx) = watch::channel(false);

        let mut got = Vec::new();
        let res = feed
            .run(
                &keys(),
                &mut |t: Tick| {
                    got.push(t.symbol);
                    let _ = tx.send(true);
                },
                rx,
            )
            .await;

        assert!(res.is_ok());
        assert_eq!(got, vec!["B".to_string()]);
        let sent = up.sent.lock();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.contains("\"method\":\"sub\"")));
    }

    #[tokio::test]
    async fn stop_before_start_returns_ok() {
        let up = Arc::new(ScriptUpstream::new(vec![]));
        let mut feed = connector(&up);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert!(feed.run(&keys(), &mut |_t| {}, rx).await.is_ok());
        assert_eq!(up.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(feed.status().state(), FeedState::Stopped);
    }

    #[test]
    fn fatal_classification() {
        assert!(FeedError::Credentials("x".into()).is_fatal());
        assert!(FeedError::Config("x".into()).is_fatal());
        assert!(!FeedError::Transport("x".into()).is_fatal());
        assert!(!FeedError::Timeout("connect").is_fatal());
    }
}
