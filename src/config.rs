// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : tick_radar_rust — real-time tick analytics pipeline in Rust
Module  : config.rs
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
use ahash::AHashSet;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FeedConfig;
use crate::policy::PolicyKind;
use crate::upstream::DEFAULT_AUTHORIZE_URL;

/// Where ticks come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Live,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::Live => "live",
        }
    }
}

impl FromStr for FeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(FeedMode::Mock),
            "live" | "upstox" => Ok(FeedMode::Live),
            other => Err(format!("unknown feed mode '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required when FEED_MODE=live")]
    Missing { key: &'static str },
    #[error("invalid {key}: {msg}")]
    Invalid { key: &'static str, msg: String },
}

// Live-mode default watch list
const DEFAULT_LIVE_INSTRUMENTS: [&str; 2] = ["NSE_FO|59022", "NSE_FO|59023"];

#[derive(Clone, Debug)]
pub struct Args {
    // source
    pub feed_mode: FeedMode,
    pub policy: PolicyKind,
    pub instruments: Vec<String>,

    // upstream
    pub access_token: Option<String>,
    pub authorize_url: String,
    pub sub_mode: String,
    pub sub_guid: String,
    pub max_retries: u32,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    // fan-out / http / files
    pub heartbeat_secs: u64,
    pub subscriber_queue: usize,
    pub http_port: u16,
    pub record_file: Option<String>,
    pub mock_interval_ms: u64,
}

impl Args {
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            guid: self.sub_guid.clone(),
            mode: self.sub_mode.clone(),
            max_retries: self.max_retries,
            retry_base: Duration::from_secs(self.retry_base_secs),
            retry_max: Duration::from_secs(self.retry_max_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn mock_interval(&self) -> Duration {
        Duration::from_millis(self.mock_interval_ms)
    }
}

/// Read `.env` then the process environment.
pub fn load() -> Result<Args, ConfigError> {
    let _ = dotenv();
    from_lookup(|k| env::var(k).ok())
}

/// Build the config from any key lookup (the environment in production).
pub fn from_lookup<F>(get: F) -> Result<Args, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let num = |key: &str, default: u64| -> u64 {
        get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
    };
    let text = |key: &str, default: &str| -> String {
        get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    // ===== Mode =====
    let feed_mode = match get("FEED_MODE") {
        Some(s) if !s.trim().is_empty() => s
            .parse::<FeedMode>()
            .map_err(|msg| ConfigError::Invalid { key: "FEED_MODE", msg })?,
        _ => FeedMode::Mock,
    };
    let policy = match get("SIGNAL_POLICY") {
        Some(s) if !s.trim().is_empty() => s
            .parse::<PolicyKind>()
            .map_err(|msg| ConfigError::Invalid { key: "SIGNAL_POLICY", msg })?,
        _ => PolicyKind::Lenient,
    };

    // INSTRUMENTS=NSE_FO|59022,NSE_INDEX|Nifty 50  (keys are case-sensitive)
    // first occurrence wins, order kept
    let mut seen = AHashSet::new();
    let mut instruments: Vec<String> = get("INSTRUMENTS")
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty() && seen.insert(x.to_string()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if instruments.is_empty() && feed_mode == FeedMode::Live {
        instruments = DEFAULT_LIVE_INSTRUMENTS.iter().map(|s| s.to_string()).collect();
    }

    // ===== Upstream =====
    let access_token = get("ACCESS_TOKEN")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if feed_mode == FeedMode::Live && access_token.is_none() {
        return Err(ConfigError::Missing { key: "ACCESS_TOKEN" });
    }

    let http_port = num("HTTP_PORT", 5000);
    let http_port = u16::try_from(http_port).map_err(|_| ConfigError::Invalid {
        key: "HTTP_PORT",
        msg: format!("{http_port} is not a port"),
    })?;

    Ok(Args {
        feed_mode,
        policy,
        instruments,
        access_token,
        authorize_url: text("AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
        sub_mode: text("SUB_MODE", "full"),
        sub_guid: text("SUB_GUID", "tick_radar"),
        max_retries: num("MAX_RETRIES", 5).clamp(1, u32::MAX as u64) as u32,
        retry_base_secs: num("RETRY_BASE_SECS", 5),
        retry_max_secs: num("RETRY_MAX_SECS", 30),
        read_timeout_secs: num("READ_TIMEOUT_SECS", 60).max(1),
        connect_timeout_secs: num("CONNECT_TIMEOUT_SECS", 10).max(1),
        heartbeat_secs: num("HEARTBEAT_SECS", 30).max(1),
        subscriber_queue: num("SUBSCRIBER_QUEUE", 100).max(1) as usize,
        http_port,
        record_file: get("RECORD_FILE").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        mock_interval_ms: num("MOCK_INTERVAL_MS", 500).max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(pairs: &[(&str, &str)]) -> Result<Args, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_are_mock_and_lenient() {
        let a = load_from(&[]).unwrap();
        assert_eq!(a.feed_mode, FeedMode::Mock);
        assert_eq!(a.policy, PolicyKind::Lenient);
        assert!(a.instruments.is_empty());
        assert_eq!((a.http_port, a.subscriber_queue, a.heartbeat_secs), (5000, 100, 30));
        let f = a.feed_config();
        assert_eq!(f.max_retries, 5);
        assert_eq!(f.retry_base, Duration::from_secs(5));
        assert_eq!(f.retry_max, Duration::from_secs(30));
        assert_eq!(f.read_timeout, Duration::from_secs(60));
        assert_eq!(f.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn live_mode_requires_token() {
        assert_eq!(
            load_from(&[("FEED_MODE", "live")]).unwrap_err(),
            ConfigError::Missing { key: "ACCESS_TOKEN" }
        );
        let a = load_from(&[("FEED_MODE", "live"), ("ACCESS_TOKEN", "abc")]).unwrap();
        assert_eq!(a.instruments, vec!["NSE_FO|59022", "NSE_FO|59023"]);
    }

    #[test]
    fn parses_lists_and_overrides() {
        let a = load_from(&[
            ("SIGNAL_POLICY", "strict"),
            ("INSTRUMENTS", " NSE_FO|1 , NSE_INDEX|Nifty 50,,"),
            ("MAX_RETRIES", "0"),
            ("HTTP_PORT", "8080"),
            ("RECORD_FILE", "out/events.jsonl"),
            ("MOCK_INTERVAL_MS", "junk"),
        ])
        .unwrap();
        assert_eq!(a.policy, PolicyKind::Strict);
        assert_eq!(a.instruments, vec!["NSE_FO|1", "NSE_INDEX|Nifty 50"]);
        assert_eq!(a.max_retries, 1);
        assert_eq!(a.http_port, 8080);
        assert_eq!(a.record_file.as_deref(), Some("out/events.jsonl"));
        assert_eq!(a.mock_interval_ms, 500);
    }

    #[test]
    fn repeated_instruments_subscribe_once() {
        let a = load_from(&[("INSTRUMENTS", "A,B,A, B ,C")]).unwrap();
        assert_eq!(a.instruments, vec!["A", "B", "C"]);
    }

    #[test]
    fn bad_choices_are_errors() {
        assert!(matches!(load_from(&[("FEED_MODE", "binance")]), Err(ConfigError::Invalid { key: "FEED_MODE", .. })));
        assert!(matches!(load_from(&[("SIGNAL_POLICY", "yolo")]), Err(ConfigError::Invalid { key: "SIGNAL_POLICY", .. })));
        assert!(matches!(load_from(&[("HTTP_PORT", "70000")]), Err(ConfigError::Invalid { key: "HTTP_PORT", .. })));
    }
}
