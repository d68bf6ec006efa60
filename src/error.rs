use crate::model::{BookingId, DeskId};

/// Failures of booking and lock calls against the booking service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The interval collides with another booking on the desk.
    Conflict { desk_id: DeskId, holder: Option<String> },
    /// Somebody else holds the desk's lock.
    Locked { desk_id: DeskId, holder: String },
    NotFound(BookingId),
    DeskNotFound(DeskId),
    Forbidden(&'static str),
    Invalid(&'static str),
    Transport(String),
}

impl BookingError {
    /// Contention is surfaced to the user and never retried automatically.
    pub fn is_contention(&self) -> bool {
        matches!(self, BookingError::Conflict { .. } | BookingError::Locked { .. })
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Conflict { desk_id, holder: Some(h) } => {
                write!(f, "desk {desk_id} is already booked by {h} for that time")
            }
            BookingError::Conflict { desk_id, holder: None } => {
                write!(f, "desk {desk_id} is already booked for that time")
            }
            BookingError::Locked { desk_id, holder } => {
                write!(f, "desk {desk_id} is being booked by {holder}")
            }
            BookingError::NotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::DeskNotFound(id) => write!(f, "desk not found: {id}"),
            BookingError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            BookingError::Invalid(msg) => write!(f, "invalid booking: {msg}"),
            BookingError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Server rejected our credentials.
    Unauthorized,
    Transport(String),
    /// Frame could not be decoded.
    Malformed(String),
    Closed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Unauthorized => write!(f, "sync channel unauthorized"),
            SyncError::Transport(e) => write!(f, "sync transport error: {e}"),
            SyncError::Malformed(e) => write!(f, "malformed sync frame: {e}"),
            SyncError::Closed => write!(f, "sync channel closed"),
        }
    }
}

impl std::error::Error for SyncError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The heartbeat must fire before the lock it keeps alive expires.
    HeartbeatNotBelowTtl { heartbeat_ms: u64, ttl_ms: u64 },
    TtlAboveMaxHold { ttl_ms: u64, max_hold_ms: u64 },
    UnknownTimezone(String),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::HeartbeatNotBelowTtl { heartbeat_ms, ttl_ms } => write!(
                f,
                "lock heartbeat ({heartbeat_ms}ms) must be shorter than lock TTL ({ttl_ms}ms)"
            ),
            ConfigError::TtlAboveMaxHold { ttl_ms, max_hold_ms } => write!(
                f,
                "lock TTL ({ttl_ms}ms) must not exceed max hold ({max_hold_ms}ms)"
            ),
            ConfigError::UnknownTimezone(name) => write!(f, "unknown timezone: {name}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
