use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::model::*;

/// Query for `list_bookings`. `[start, end)` bounds the bookings returned by
/// overlap, not containment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingFilter {
    pub desk: Option<DeskId>,
    pub start: Ms,
    pub end: Ms,
    #[serde(default)]
    pub mine_only: bool,
}

impl BookingFilter {
    pub fn window(window: Span) -> Self {
        Self {
            desk: None,
            start: window.start,
            end: window.end,
            mine_only: false,
        }
    }

    pub fn desk(desk: DeskId, window: Span) -> Self {
        Self {
            desk: Some(desk),
            ..Self::window(window)
        }
    }

    pub fn mine(mut self) -> Self {
        self.mine_only = true;
        self
    }

    pub fn span(&self) -> Option<Span> {
        (self.start < self.end).then(|| Span::new(self.start, self.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub desk_id: DeskId,
    #[serde(rename = "start_time", with = "crate::timemath::iso_ms")]
    pub start: Ms,
    #[serde(rename = "end_time", with = "crate::timemath::iso_ms")]
    pub end: Ms,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

/// Server answer to a lock request. A denial is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReply {
    Granted,
    Denied { holder: String },
}

/// The booking service as seen by one signed-in user.
///
/// Implementations own the transport; the scheduling core only calls these.
#[async_trait]
pub trait BookingApi: Send + Sync {
    /// Identity the calls are made as.
    fn user(&self) -> &UserRef;

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError>;

    async fn create_booking(&self, request: &NewBooking) -> Result<Booking, BookingError>;

    async fn update_booking(&self, id: BookingId, patch: &BookingPatch) -> Result<Booking, BookingError>;

    async fn cancel_booking(&self, id: BookingId) -> Result<(), BookingError>;

    async fn acquire_lock(&self, desk: DeskId) -> Result<LockReply, BookingError>;

    /// `Ok(false)` when the lock is gone or held by somebody else.
    async fn refresh_lock(&self, desk: DeskId) -> Result<bool, BookingError>;

    async fn release_lock(&self, desk: DeskId) -> Result<(), BookingError>;

    /// Fire-and-forget release for teardown paths that cannot await.
    /// Must return immediately; delivery is best effort.
    fn release_lock_beacon(&self, desk: DeskId);
}
