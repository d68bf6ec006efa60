use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::SyncError;
use crate::model::{LocationId, RoomId};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// A logical subscription target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Room(RoomId),
    Location(LocationId),
    Global,
}

impl Scope {
    /// Registry key, e.g. `room_3`.
    pub fn key(&self) -> String {
        match self {
            Scope::Room(id) => format!("room_{id}"),
            Scope::Location(id) => format!("location_{id}"),
            Scope::Global => "global".to_string(),
        }
    }

    /// Server path, e.g. `/ws/rooms/3/`.
    pub fn path(&self) -> String {
        match self {
            Scope::Room(id) => format!("/ws/rooms/{id}/"),
            Scope::Location(id) => format!("/ws/locations/{id}/"),
            Scope::Global => "/ws/global/".to_string(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close frame code; `None` when the stream ended without one.
    Close(Option<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Expected; do not reconnect.
    Clean,
    /// Credentials rejected; refresh once and reopen.
    Unauthorized,
    /// Anything else; reconnect with backoff.
    Abnormal,
}

pub fn classify(code: Option<u16>) -> CloseKind {
    match code {
        Some(CLOSE_NORMAL | CLOSE_GOING_AWAY) => CloseKind::Clean,
        Some(CLOSE_UNAUTHORIZED) => CloseKind::Unauthorized,
        _ => CloseKind::Abnormal,
    }
}

/// Opens realtime connections for a scope.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, scope: Scope) -> Result<Box<dyn Connection>, SyncError>;

    /// Called once after an authentication-class close, before reopening.
    async fn refresh_credentials(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// One open realtime connection.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError>;

    /// Next data or close frame. Control frames are handled internally.
    async fn next_frame(&mut self) -> Result<Frame, SyncError>;

    async fn close(&mut self, code: u16);
}

/// Supplies the bearer token appended to WebSocket URLs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Option<String>;

    async fn refresh(&self) -> Result<(), SyncError>;
}

/// Token kept in a file by whoever logs the user in. Read again on every
/// connect so a rotated token is picked up.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for TokenFile {
    async fn token(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let token = text.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "token file unreadable: {e}");
                None
            }
        }
    }

    /// Nothing to renew locally; succeed once a token is present again.
    async fn refresh(&self) -> Result<(), SyncError> {
        self.token().await.map(|_| ()).ok_or(SyncError::Unauthorized)
    }
}

// ── WebSocket transport ──────────────────────────────────────────

pub struct WsTransport {
    base_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn url_for(&self, scope: Scope, token: Option<&str>) -> String {
        match token {
            Some(t) => format!("{}{}?token={t}", self.base_url, scope.path()),
            None => format!("{}{}", self.base_url, scope.path()),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, scope: Scope) -> Result<Box<dyn Connection>, SyncError> {
        let token = match &self.tokens {
            Some(t) => t.token().await,
            None => None,
        };
        let url = self.url_for(scope, token.as_deref());
        tracing::info!(%scope, "connecting sync WebSocket");
        let (stream, _response) = connect_async(url.as_str()).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(resp)
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                SyncError::Unauthorized
            }
            other => SyncError::Transport(other.to_string()),
        })?;
        Ok(Box::new(WsConnection { stream }))
    }

    async fn refresh_credentials(&self) -> Result<(), SyncError> {
        match &self.tokens {
            Some(t) => t.refresh().await,
            None => Err(SyncError::Unauthorized),
        }
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn next_frame(&mut self) -> Result<Frame, SyncError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Frame::Close(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(_)) => {
                    // Ping / Pong / Binary; tungstenite answers pings itself.
                }
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                None => return Ok(Frame::Close(None)),
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "client disconnect".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!("WebSocket close failed: {e}");
        }
    }
}
