// ===============================
// src/server.rs
// ===============================
//
// HTTP surface (hyper 0.14):
//   GET /api/analysis  latest composite analysis per symbol, highest score first
//   GET /api/signals   latest signal view per symbol
//   GET /health        feed + pipeline status
//   GET /metrics       Prometheus text format
//   GET /stream        text/event-stream, one hub subscriber per connection
//
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::Event;
use crate::feed::{stopped, FeedStatus, StopSignal};
use crate::hub::Hub;
use crate::metrics::encode_metrics;
use crate::pipeline::ResultBoard;
use crate::state::SymbolStore;

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<ResultBoard>,
    pub store: Arc<SymbolStore>,
    pub hub: Hub,
    pub status: FeedStatus,
    pub mode: &'static str,
    pub policy: &'static str,
    pub heartbeat: Duration,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn respond(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(buf) => respond(StatusCode::OK, "application/json", Body::from(buf)),
        Err(e) => {
            error!(?e, "server: serialize failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Body::from("serialize error"))
        }
    }
}

/// One SSE frame; heartbeats are comment lines.
pub fn sse_frame(ev: &Event) -> Option<String> {
    if let Event::Heartbeat { .. } = ev {
        return Some(": heartbeat\n\n".to_string());
    }
    match serde_json::to_string(ev) {
        Ok(s) => Some(format!("data: {s}\n\n")),
        Err(e) => {
            error!(?e, kind = ev.kind(), "server: event serialize failed");
            None
        }
    }
}

fn health(state: &AppState) -> Response<Body> {
    let upstream = if state.status.is_connected() { "connected" } else { "disconnected" };
    let symbols: Vec<_> = state
        .board
        .signals()
        .keys()
        .filter_map(|k| state.store.summary(k))
        .collect();
    json(&serde_json::json!({
        "status": "ok",
        "mode": state.mode,
        "policy": state.policy,
        "upstream": upstream,
        "feed_state": state.status.state(),
        "retries": state.status.retries(),
        "reconnects": state.status.reconnects(),
        "instruments_analyzed": state.board.len(),
        "symbols_tracked": state.store.len(),
        "symbols": symbols,
        "subscribers": state.hub.subscriber_count(),
        "ticks": state.status.ticks(),
        "last_tick_ms": state.status.last_tick_ms(),
        "timestamp": timestamp(),
    }))
}

fn stream(state: &AppState) -> Response<Body> {
    let sub = state.hub.subscribe();
    let heartbeat = state.heartbeat;
    let (mut sender, body) = Body::channel();

    tokio::spawn(async move {
        while let Some(ev) = sub.recv(heartbeat).await {
            let Some(frame) = sse_frame(&ev) else { continue };
            if sender.send_data(Bytes::from(frame)).await.is_err() {
                debug!(id = sub.id(), "server: stream client went away");
                sub.mark_failed();
                break;
            }
        }
    });

    let mut resp = respond(StatusCode::OK, "text/event-stream", body);
    resp.headers_mut().insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

pub async fn route(req: Request<Body>, state: AppState) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", Body::from("Method not allowed")));
    }
    let resp = match req.uri().path() {
        "/api/analysis" => json(&serde_json::json!({
            "results": state.board.analyses(),
            "timestamp": timestamp(),
        })),
        "/api/signals" => json(&serde_json::json!({
            "analyses": state.board.signals(),
            "timestamp": timestamp(),
        })),
        "/health" => health(&state),
        "/metrics" => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Body::from(encode_metrics()),
        ),
        "/stream" => stream(&state),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", Body::from("Not found")),
    };
    Ok(resp)
}

/// Serve until `shutdown` flips to true.
pub async fn serve(addr: SocketAddr, state: AppState, mut shutdown: StopSignal) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| route(req, state.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("http listening on http://{addr} (/api/analysis, /api/signals, /health, /metrics, /stream)");
    server
        .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Tick;
    use crate::pipeline::Pipeline;
    use crate::policy::SignalPolicy;
    use hyper::body::HttpBody;

    fn state_with(p: &Pipeline) -> AppState {
        AppState {
            board: p.board(),
            store: p.store(),
            hub: p.hub().clone(),
            status: FeedStatus::new(),
            mode: "mock",
            policy: p.policy().name(),
            heartbeat: Duration::from_secs(30),
        }
    }

    async fn get(path: &str, state: AppState) -> (StatusCode, serde_json::Value) {
        let req = Request::get(path).body(Body::empty()).unwrap();
        let resp = route(req, state).await.unwrap();
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    fn tick(symbol: &str, ltp: f64) -> Tick {
        Tick { symbol: symbol.into(), ltp, tbq: 10.0, tsq: 1.0, ..Default::default() }
    }

    #[tokio::test]
    async fn analysis_and_signals_endpoints() {
        let p = Pipeline::new(SignalPolicy::lenient(), Hub::new(10));
        p.process(tick("A", 10.0)).unwrap();
        p.process(tick("B", 20.0)).unwrap();
        let state = state_with(&p);

        let (code, body) = get("/api/analysis", state.clone()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["results"].as_array().map(|a| a.len()), Some(2));

        let (_, body) = get("/api/signals", state.clone()).await;
        assert_eq!(body["analyses"]["B"]["ltp"], 20.0);
        assert_eq!(body["analyses"]["A"]["policy"], "lenient");
    }

    #[tokio::test]
    async fn health_reports_feed_and_counts() {
        let p = Pipeline::new(SignalPolicy::strict(), Hub::new(10));
        p.process(tick("A", 10.0)).unwrap();
        let state = state_with(&p);
        let (code, body) = get("/health", state).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["upstream"], "disconnected");
        assert_eq!(body["feed_state"], "disconnected");
        assert_eq!(body["instruments_analyzed"], 1);
        assert_eq!(body["policy"], "strict");
        assert_eq!(body["symbols"][0]["symbol"], "A");
        assert_eq!(body["symbols"][0]["ticks"], 1);
    }

    #[tokio::test]
    async fn unknown_path_and_method() {
        let p = Pipeline::new(SignalPolicy::lenient(), Hub::new(10));
        let (code, _) = get("/nope", state_with(&p)).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        let req = Request::post("/health").body(Body::empty()).unwrap();
        let resp = route(req, state_with(&p)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn heartbeat_is_a_comment_frame() {
        assert_eq!(sse_frame(&Event::heartbeat()).as_deref(), Some(": heartbeat\n\n"));
        let f = sse_frame(&Event::connected()).unwrap();
        assert!(f.starts_with("data: {\"type\":\"connected\""));
        assert!(f.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn stream_sends_ack_then_updates() {
        let p = Pipeline::new(SignalPolicy::lenient(), Hub::new(10));
        let state = state_with(&p);
        let req = Request::get("/stream").body(Body::empty()).unwrap();
        let resp = route(req, state).await.unwrap();
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/event-stream");
        let mut body = resp.into_body();

        let first = body.data().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("\"type\":\"connected\""));

        p.process(tick("A", 10.0)).unwrap();
        let next = body.data().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&next).contains("\"type\":\"analysis_update\""));

        drop(body);
        p.hub().close();
    }
}
