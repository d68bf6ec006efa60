//! Per-desk soft lock held while a booking form is open.
//!
//! The client side ([`LockCoordinator`], [`LockLease`]) asks the booking
//! service for the lock and keeps it alive with a heartbeat; the server side
//! ([`LockTable`]) is the single source of truth and expires locks on its own.

mod table;

pub use table::{LockRecord, LockTable};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{BookingApi, LockReply};
use crate::error::{BookingError, ConfigError};
use crate::model::DeskId;
use crate::observability::{LOCK_CONFLICTS_TOTAL, LOCK_HEARTBEATS_TOTAL, LOCKS_GRANTED_TOTAL, LOCKS_LOST_TOTAL};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(300);

/// Lock timing. Construction enforces `heartbeat < ttl <= max_hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    heartbeat: Duration,
    ttl: Duration,
    max_hold: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            ttl: DEFAULT_TTL,
            max_hold: DEFAULT_MAX_HOLD,
        }
    }
}

impl LockConfig {
    pub fn new(heartbeat: Duration, ttl: Duration, max_hold: Duration) -> Result<Self, ConfigError> {
        if heartbeat.is_zero() {
            return Err(ConfigError::Invalid("lock heartbeat must be non-zero"));
        }
        if heartbeat >= ttl {
            return Err(ConfigError::HeartbeatNotBelowTtl {
                heartbeat_ms: heartbeat.as_millis() as u64,
                ttl_ms: ttl.as_millis() as u64,
            });
        }
        if ttl > max_hold {
            return Err(ConfigError::TtlAboveMaxHold {
                ttl_ms: ttl.as_millis() as u64,
                max_hold_ms: max_hold.as_millis() as u64,
            });
        }
        Ok(Self { heartbeat, ttl, max_hold })
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }
}

pub enum LockOutcome {
    Granted(LockLease),
    /// Somebody else is booking this desk. Abandon, do not wait.
    Conflict { holder: String },
}

impl std::fmt::Debug for LockOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockOutcome::Granted(lease) => write!(f, "Granted(desk {})", lease.desk_id),
            LockOutcome::Conflict { holder } => write!(f, "Conflict({holder})"),
        }
    }
}

#[derive(Clone)]
pub struct LockCoordinator {
    api: Arc<dyn BookingApi>,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(api: Arc<dyn BookingApi>, config: LockConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Ask for the desk. Anything other than an explicit grant or denial is
    /// an error, and the caller must not open the form.
    pub async fn acquire(&self, desk_id: DeskId) -> Result<LockOutcome, BookingError> {
        match self.api.acquire_lock(desk_id).await {
            Ok(LockReply::Granted) => {
                metrics::counter!(LOCKS_GRANTED_TOTAL).increment(1);
                info!(desk_id, user = %self.api.user().name, "desk lock granted");
                Ok(LockOutcome::Granted(LockLease::start(
                    self.api.clone(),
                    desk_id,
                    self.config.heartbeat,
                )))
            }
            Ok(LockReply::Denied { holder }) | Err(BookingError::Locked { holder, .. }) => {
                metrics::counter!(LOCK_CONFLICTS_TOTAL).increment(1);
                warn!(desk_id, %holder, "desk lock held by another user");
                Ok(LockOutcome::Conflict { holder })
            }
            Err(e) => {
                // The grant may have landed even though the reply did not.
                self.api.release_lock_beacon(desk_id);
                warn!(desk_id, "desk lock request failed: {e}");
                Err(e)
            }
        }
    }
}

/// A granted lock. Heartbeats run until the lease is released or dropped;
/// dropping without [`release`](Self::release) fires the beacon release.
pub struct LockLease {
    desk_id: DeskId,
    api: Arc<dyn BookingApi>,
    heartbeat: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
    released: bool,
}

impl LockLease {
    fn start(api: Arc<dyn BookingApi>, desk_id: DeskId, every: Duration) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let heartbeat = tokio::spawn(run_heartbeat(api.clone(), desk_id, every, lost.clone()));
        Self {
            desk_id,
            api,
            heartbeat: Some(heartbeat),
            lost,
            released: false,
        }
    }

    pub fn desk_id(&self) -> DeskId {
        self.desk_id
    }

    /// The server refused a heartbeat: the lock expired or hit its max hold.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    /// Normal close. On failure the lock is left to expire.
    pub async fn release(mut self) -> Result<(), BookingError> {
        self.stop_heartbeat();
        let result = self.api.release_lock(self.desk_id).await;
        match &result {
            Ok(()) => {
                self.released = true;
                info!(desk_id = self.desk_id, "desk lock released");
            }
            Err(e) => warn!(desk_id = self.desk_id, "desk lock release failed, waiting out TTL: {e}"),
        }
        result
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.stop_heartbeat();
        if !self.released {
            debug!(desk_id = self.desk_id, "lease dropped, sending beacon release");
            self.api.release_lock_beacon(self.desk_id);
        }
    }
}

async fn run_heartbeat(api: Arc<dyn BookingApi>, desk_id: DeskId, every: Duration, lost: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the lock was just granted.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match api.refresh_lock(desk_id).await {
            Ok(true) => {
                metrics::counter!(LOCK_HEARTBEATS_TOTAL).increment(1);
                debug!(desk_id, "desk lock refreshed");
            }
            Ok(false) => {
                metrics::counter!(LOCKS_LOST_TOTAL).increment(1);
                warn!(desk_id, "desk lock lost");
                lost.store(true, Ordering::Relaxed);
                break;
            }
            // Transient; the TTL still covers at least one more beat.
            Err(e) => debug!(desk_id, "desk lock refresh failed: {e}"),
        }
    }
}
