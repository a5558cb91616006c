// ===============================
// src/upstream.rs
// ===============================
//
// Live market-feed transport:
// - authorize : GET <AUTHORIZE_URL> with `Authorization: Bearer <token>`,
//               answer carries `data.authorized_redirect_uri` (one-shot wss URL)
// - connect   : tokio-tungstenite websocket to that URL
//
// The subscription request goes out as a binary frame; the feed rejects text.
//

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::feed::{FeedError, FeedSession, Frame, Upstream};

pub const DEFAULT_AUTHORIZE_URL: &str = "https://api.upstox.com/v3/feed/market-data-feed/authorize";

pub struct WsUpstream {
    http: reqwest::Client,
    authorize_url: Url,
    token: String,
}

impl WsUpstream {
    pub fn new(authorize_url: &str, token: &str, request_timeout: Duration) -> Result<Self, FeedError> {
        if token.trim().is_empty() {
            return Err(FeedError::Credentials("access token is empty".into()));
        }
        let authorize_url = Url::parse(authorize_url)
            .map_err(|e| FeedError::Config(format!("authorize url '{authorize_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("http client: {e}")))?;
        Ok(Self { http, authorize_url, token: token.trim().to_string() })
    }
}

/// Pull the websocket URL out of the authorize response body.
pub fn redirect_uri(body: &Value) -> Result<String, FeedError> {
    body.get("data")
        .and_then(|d| d.get("authorized_redirect_uri"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FeedError::Transport("authorize response has no authorized_redirect_uri".into()))
}

#[async_trait]
impl Upstream for WsUpstream {
    type Session = WsSession;

    async fn authorize(&self) -> Result<String, FeedError> {
        let resp = self
            .http
            .get(self.authorize_url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FeedError::Transport(format!("authorize request: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FeedError::Credentials(format!("authorize returned {status}")));
        }
        if !status.is_success() {
            return Err(FeedError::Transport(format!("authorize returned {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FeedError::Transport(format!("authorize body: {e}")))?;
        let uri = redirect_uri(&body)?;
        debug!("feed: authorized");
        Ok(uri)
    }

    async fn connect(&self, url: &str) -> Result<WsSession, FeedError> {
        let url = Url::parse(url).map_err(|e| FeedError::Config(format!("feed url: {e}")))?;
        info!(host = url.host_str().unwrap_or_default(), "feed: connecting websocket");
        let (ws, _resp) = connect_async(url)
            .await
            .map_err(|e| FeedError::Transport(format!("websocket connect: {e}")))?;
        Ok(WsSession { ws })
    }
}

pub struct WsSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn frame_of(msg: Message) -> Frame {
    match msg {
        Message::Binary(b) => Frame::Binary(b),
        Message::Text(t) => Frame::Text(t),
        Message::Close(_) => Frame::Close,
        _ => Frame::Other,
    }
}

#[async_trait]
impl FeedSession for WsSession {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        self.ws
            .send(Message::Binary(text.into_bytes()))
            .await
            .map_err(|e| FeedError::Transport(format!("websocket send: {e}")))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, FeedError>> {
        match self.ws.next().await? {
            Ok(msg) => Some(Ok(frame_of(msg))),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Some(Ok(Frame::Close)),
            Err(e) => Some(Err(FeedError::Transport(format!("websocket read: {e}")))),
        }
    }

    async fn ping(&mut self) -> Result<(), FeedError> {
        self.ws
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| FeedError::Transport(format!("websocket ping: {e}")))
    }
}
