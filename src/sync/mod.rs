//! Push channel that keeps desk, booking, lock and room state current.
//!
//! [`SyncManager`] owns one background task per open [`Scope`]. Each task
//! drives a [`Connection`] through open / reconnect / close and hands typed
//! [`SyncEvent`]s to the [`Subscription`] returned by [`SyncManager::open`].

pub mod backoff;
pub mod delta;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use delta::{BookingAction, Delta, DeskLive, LiveState};
pub use transport::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_UNAUTHORIZED, CloseKind, Connection, Frame, Scope,
    TokenFile, TokenSource, Transport, WsTransport, classify,
};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::SyncError;
use crate::observability::{SYNC_CONNECTIONS_ACTIVE, SYNC_DELTAS_TOTAL, SYNC_RECONNECTS_TOTAL};

/// Liveness probe sent right after a connection opens.
pub const PING: &str = r#"{"type":"ping"}"#;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Opened,
    Delta(Delta),
    Reconnecting { attempt: u32, delay: Duration },
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Server closed normally.
    Clean,
    /// `close`, `close_all`, or the subscription was dropped.
    ClientClosed,
    /// Credentials were refreshed once and still rejected.
    Unauthorized,
    /// Reconnect attempts exhausted.
    GaveUp,
}

struct ConnectionHandle {
    id: Ulid,
    scope: Scope,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    fn stop(self) {
        // Ignored when the task already finished.
        let _ = self.stop.send(true);
        drop(self.task);
    }
}

/// Registry of open sync connections, keyed by scope.
pub struct SyncManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl SyncManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Open (or reopen) the connection for `scope`. An existing connection
    /// for the same scope is closed first and its subscription ends.
    pub fn open(&self, scope: Scope) -> Subscription {
        let key = scope.key();
        if let Some((_, old)) = self.connections.remove(&key) {
            debug!(%scope, "replacing existing sync connection");
            old.stop();
        }

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let (stop, stop_rx) = watch::channel(false);
        let id = Ulid::new();
        let runner = Runner {
            id,
            scope,
            transport: self.transport.clone(),
            policy: self.policy,
            events,
            stop: stop_rx,
            registry: self.connections.clone(),
        };
        let task = tokio::spawn(runner.run());
        self.connections.insert(key, ConnectionHandle { id, scope, stop, task });
        Subscription { scope, rx }
    }

    /// Close one scope. Returns whether it was open.
    pub fn close(&self, scope: Scope) -> bool {
        match self.connections.remove(&scope.key()) {
            Some((_, handle)) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let keys: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.connections.remove(&key) {
                handle.stop();
            }
        }
    }

    pub fn is_open(&self, scope: Scope) -> bool {
        self.connections.contains_key(&scope.key())
    }

    pub fn active_scopes(&self) -> Vec<Scope> {
        self.connections.iter().map(|e| e.value().scope).collect()
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Typed event stream for one scope. Dropping it closes the connection and
/// frees the scope in the registry.
pub struct Subscription {
    scope: Scope,
    rx: mpsc::Receiver<SyncEvent>,
}

impl Subscription {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.rx.recv().await
    }

    /// Skip lifecycle events up to the next delta.
    pub async fn next_delta(&mut self) -> Option<Delta> {
        while let Some(event) = self.rx.recv().await {
            match event {
                SyncEvent::Delta(delta) => return Some(delta),
                SyncEvent::Closed(_) => return None,
                SyncEvent::Opened | SyncEvent::Reconnecting { .. } => {}
            }
        }
        None
    }
}

impl Stream for Subscription {
    type Item = SyncEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SyncEvent>> {
        self.rx.poll_recv(cx)
    }
}

// ── Connection task ──────────────────────────────────────────────

enum SessionEnd {
    Stopped,
    Closed { kind: CloseKind, healthy: bool },
}

struct Runner {
    id: Ulid,
    scope: Scope,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    events: mpsc::Sender<SyncEvent>,
    stop: watch::Receiver<bool>,
    registry: Arc<DashMap<String, ConnectionHandle>>,
}

impl Runner {
    async fn run(mut self) {
        let reason = self.drive().await;
        info!(scope = %self.scope, ?reason, "sync connection finished");
        let _ = self.events.send(SyncEvent::Closed(reason)).await;
        // Only drop our own entry; a reopen may already have replaced it.
        let id = self.id;
        self.registry.remove_if(&self.scope.key(), |_, h| h.id == id);
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err() || self.events.is_closed()
    }

    async fn emit(&self, event: SyncEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Sleep unless asked to stop, or the subscriber left, first. Returns
    /// false on stop.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.stop.changed() => false,
            _ = self.events.closed() => false,
        }
    }

    async fn drive(&mut self) -> CloseReason {
        let mut attempts: u32 = 0;
        let mut auth_retried = false;

        loop {
            if self.stop_requested() {
                return CloseReason::ClientClosed;
            }

            let connected = tokio::select! {
                res = self.transport.connect(self.scope) => Some(res),
                _ = self.stop.changed() => None,
                _ = self.events.closed() => None,
            };
            let Some(connected) = connected else {
                return CloseReason::ClientClosed;
            };

            let kind = match connected {
                Ok(mut conn) => {
                    attempts = 0;
                    metrics::gauge!(SYNC_CONNECTIONS_ACTIVE).increment(1.0);
                    let end = self.session(conn.as_mut()).await;
                    metrics::gauge!(SYNC_CONNECTIONS_ACTIVE).decrement(1.0);
                    match end {
                        SessionEnd::Stopped => return CloseReason::ClientClosed,
                        SessionEnd::Closed { kind, healthy } => {
                            if healthy {
                                auth_retried = false;
                            }
                            kind
                        }
                    }
                }
                Err(SyncError::Unauthorized) => CloseKind::Unauthorized,
                Err(e) => {
                    warn!(scope = %self.scope, "sync connect failed: {e}");
                    CloseKind::Abnormal
                }
            };

            match kind {
                CloseKind::Clean => return CloseReason::Clean,
                CloseKind::Unauthorized => {
                    if auth_retried {
                        warn!(scope = %self.scope, "sync channel still unauthorized after refresh");
                        return CloseReason::Unauthorized;
                    }
                    auth_retried = true;
                    if let Err(e) = self.transport.refresh_credentials().await {
                        warn!(scope = %self.scope, "credential refresh failed: {e}");
                        return CloseReason::Unauthorized;
                    }
                    let delay = self.policy.auth_retry_delay();
                    if !self.pause(delay).await {
                        return CloseReason::ClientClosed;
                    }
                }
                CloseKind::Abnormal => {
                    if attempts >= self.policy.max_attempts {
                        warn!(scope = %self.scope, attempts, "giving up on sync channel");
                        return CloseReason::GaveUp;
                    }
                    attempts += 1;
                    let delay = self.policy.delay_for(attempts);
                    metrics::counter!(SYNC_RECONNECTS_TOTAL).increment(1);
                    info!(scope = %self.scope, attempt = attempts, delay_ms = delay.as_millis() as u64, "sync reconnect scheduled");
                    if !self.emit(SyncEvent::Reconnecting { attempt: attempts, delay }).await {
                        return CloseReason::ClientClosed;
                    }
                    if !self.pause(delay).await {
                        return CloseReason::ClientClosed;
                    }
                }
            }
        }
    }

    /// Pump one open connection until it closes or we are told to stop.
    async fn session(&mut self, conn: &mut dyn Connection) -> SessionEnd {
        if let Err(e) = conn.send_text(PING.to_string()).await {
            warn!(scope = %self.scope, "sync ping failed: {e}");
            return SessionEnd::Closed {
                kind: CloseKind::Abnormal,
                healthy: false,
            };
        }
        info!(scope = %self.scope, "sync connection open");
        if !self.emit(SyncEvent::Opened).await {
            conn.close(CLOSE_NORMAL).await;
            return SessionEnd::Stopped;
        }

        let mut healthy = false;
        loop {
            let frame = tokio::select! {
                frame = conn.next_frame() => frame,
                _ = self.stop.changed() => {
                    conn.close(CLOSE_NORMAL).await;
                    return SessionEnd::Stopped;
                }
                _ = self.events.closed() => {
                    debug!(scope = %self.scope, "subscription dropped");
                    conn.close(CLOSE_NORMAL).await;
                    return SessionEnd::Stopped;
                }
            };
            match frame {
                Ok(Frame::Text(text)) => match serde_json::from_str::<Delta>(&text) {
                    Ok(Delta::Pong) => {
                        healthy = true;
                        debug!(scope = %self.scope, "pong");
                    }
                    Ok(delta) => {
                        healthy = true;
                        metrics::counter!(SYNC_DELTAS_TOTAL).increment(1);
                        if !self.emit(SyncEvent::Delta(delta)).await {
                            conn.close(CLOSE_NORMAL).await;
                            return SessionEnd::Stopped;
                        }
                    }
                    Err(e) => {
                        warn!(scope = %self.scope, error = %e, raw = %text, "unknown or malformed sync message");
                    }
                },
                Ok(Frame::Close(code)) => {
                    info!(scope = %self.scope, ?code, "sync connection closed by server");
                    return SessionEnd::Closed {
                        kind: classify(code),
                        healthy,
                    };
                }
                Err(e) => {
                    warn!(scope = %self.scope, "sync receive error: {e}");
                    return SessionEnd::Closed {
                        kind: CloseKind::Abnormal,
                        healthy,
                    };
                }
            }
        }
    }
}
