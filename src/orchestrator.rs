//! End-to-end "pick a time, hold the desk, confirm" flow.
//!
//! [`BookingOrchestrator::open`] takes the desk's lock before anything is
//! shown; the returned [`BookingSession`] owns that lock, the desk's
//! bookings for the visible window, and the selection state machine. The
//! lock goes back on [`BookingSession::close`], or by beacon when the
//! session is dropped on any other path.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::api::{BookingApi, BookingFilter, BookingPatch, NewBooking};
use crate::calendar::{
    CalendarView, DayBuckets, DayColumn, ViewMode, columns, expand_by_day, first_conflict, free_spans, visible_window,
};
use crate::error::BookingError;
use crate::lock::{LockConfig, LockCoordinator, LockLease, LockOutcome};
use crate::model::*;
use crate::observability::{BOOKING_CONFLICTS_TOTAL, BOOKINGS_COMMITTED_TOTAL};
use crate::selection::{
    CellTarget, ClickOutcome, DraftSlot, GridHit, InteractionMode, Phase, Selection, SelectionEngine,
    SlotPoint, hit_test,
};
use crate::sync::Delta;

pub struct BookingOrchestrator {
    api: Arc<dyn BookingApi>,
    locks: LockCoordinator,
    tz: Tz,
    mode: InteractionMode,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened(BookingSession),
    /// Somebody else is booking the desk. Show who and stop.
    Blocked { holder: String },
}

impl BookingOrchestrator {
    pub fn new(api: Arc<dyn BookingApi>, lock_config: LockConfig, tz: Tz, mode: InteractionMode) -> Self {
        Self {
            locks: LockCoordinator::new(api.clone(), lock_config),
            api,
            tz,
            mode,
        }
    }

    pub fn user(&self) -> &UserRef {
        self.api.user()
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Open the booking form for a desk. No form without a granted lock.
    pub async fn open(&self, desk_id: DeskId, view: CalendarView, now: Ms) -> Result<OpenOutcome, BookingError> {
        let lease = match self.locks.acquire(desk_id).await? {
            LockOutcome::Granted(lease) => lease,
            LockOutcome::Conflict { holder } => return Ok(OpenOutcome::Blocked { holder }),
        };
        let mut session = BookingSession {
            api: self.api.clone(),
            lease: Some(lease),
            desk_id,
            tz: self.tz,
            view,
            selection: SelectionEngine::new(self.mode, view.mode, self.tz),
            bookings: Vec::new(),
            buckets: DayBuckets::new(),
            error: None,
            opened_at: now,
        };
        session.refetch().await;
        info!(desk_id, user = %self.api.user().name, "booking form opened");
        Ok(OpenOutcome::Opened(session))
    }

    /// Open the form to move the end of an existing booking.
    pub async fn open_edit(&self, booking: &Booking, view: CalendarView, now: Ms) -> Result<OpenOutcome, BookingError> {
        if booking.user_id != self.api.user().id {
            return Err(BookingError::Forbidden("only the owner can change a booking"));
        }
        let view = if view.mode == ViewMode::Month {
            view.with_mode(ViewMode::Week)
        } else {
            view
        };
        let mut outcome = self.open(booking.desk.id, view, now).await?;
        if let OpenOutcome::Opened(session) = &mut outcome {
            session.selection.begin_edit(booking);
        }
        Ok(outcome)
    }

    pub async fn cancel_booking(&self, id: BookingId) -> Result<(), BookingError> {
        self.api.cancel_booking(id).await?;
        info!(booking_id = id, "booking cancelled");
        Ok(())
    }
}

/// What the form shows under the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSummary {
    pub start: SlotPoint,
    pub end: Option<SlotPoint>,
    pub duration: Option<String>,
    pub awaiting_end: bool,
    /// Owner of a known booking the selection runs into. A hint only.
    pub conflict_with: Option<String>,
}

/// An open booking form holding the desk's lock.
pub struct BookingSession {
    api: Arc<dyn BookingApi>,
    lease: Option<LockLease>,
    desk_id: DeskId,
    tz: Tz,
    view: CalendarView,
    selection: SelectionEngine,
    bookings: Vec<Booking>,
    buckets: DayBuckets,
    error: Option<BookingError>,
    opened_at: Ms,
}

impl std::fmt::Debug for BookingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingSession")
            .field("desk_id", &self.desk_id)
            .field("view", &self.view)
            .field("phase", &self.selection.phase())
            .field("bookings", &self.bookings.len())
            .field("error", &self.error)
            .finish()
    }
}

impl BookingSession {
    pub fn desk_id(&self) -> DeskId {
        self.desk_id
    }

    pub fn view(&self) -> CalendarView {
        self.view
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn buckets(&self) -> &DayBuckets {
        &self.buckets
    }

    /// Last form-level error, cleared by the next successful confirm.
    pub fn error(&self) -> Option<&BookingError> {
        self.error.as_ref()
    }

    pub fn opened_at(&self) -> Ms {
        self.opened_at
    }

    /// The server stopped honouring our heartbeat.
    pub fn lock_lost(&self) -> bool {
        self.lease.as_ref().is_none_or(LockLease::is_lost)
    }

    pub fn columns(&self, today: NaiveDate) -> Vec<DayColumn<'_>> {
        columns(&self.view, &self.buckets, today)
    }

    pub fn drafts(&self) -> Vec<DraftSlot> {
        self.selection.drafts()
    }

    /// Unbooked stretches of the drawn hours on `date`. The booking being
    /// edited counts as free.
    pub fn free_time(&self, date: NaiveDate) -> Vec<Span> {
        free_spans(visible_window(date, self.tz), &self.bookings, self.editing_id())
    }

    fn viewer(&self) -> UserId {
        self.api.user().id
    }

    fn editing_id(&self) -> Option<BookingId> {
        self.selection.editing().map(|t| t.booking_id)
    }

    pub fn target_at(&self, hit: GridHit) -> CellTarget {
        hit_test(&self.buckets, hit, self.tz, Some(self.viewer()), self.editing_id())
    }

    // ── Pointer input ────────────────────────────────────────────

    pub fn click(&mut self, hit: GridHit, now: Ms) -> ClickOutcome {
        let target = self.target_at(hit);
        self.selection.click(hit, target, now)
    }

    pub fn hover(&mut self, hit: GridHit, now: Ms) {
        self.selection.hover(hit, now);
    }

    pub fn pointer_down(&mut self, hit: GridHit, now: Ms) -> ClickOutcome {
        let target = self.target_at(hit);
        self.selection.pointer_down(hit, target, now)
    }

    pub fn pointer_move(&mut self, hit: GridHit, now: Ms) {
        self.selection.pointer_move(hit, now);
    }

    pub fn pointer_up(&mut self, hit: Option<GridHit>, now: Ms) -> Option<Selection> {
        self.selection.pointer_up(hit, now)
    }

    pub fn pointer_cancel(&mut self) {
        self.selection.pointer_cancel();
    }

    /// Escape: drop the gesture in flight.
    pub fn cancel_gesture(&mut self) {
        self.selection.cancel();
    }

    pub fn clear(&mut self) {
        self.selection.clear();
    }

    /// Turn the open form into an edit of one of the viewer's own bookings,
    /// typically after a click reported [`ClickOutcome::OwnBooking`]. The
    /// desk lock already held carries over.
    pub async fn begin_edit(&mut self, booking_id: BookingId) -> Result<(), BookingError> {
        let booking = self
            .bookings
            .iter()
            .find(|b| b.id == booking_id)
            .cloned()
            .ok_or(BookingError::NotFound(booking_id))?;
        if booking.user_id != self.viewer() {
            return Err(BookingError::Forbidden("only the owner can change a booking"));
        }
        let to_week = self.view.mode == ViewMode::Month;
        if to_week {
            self.view = self.view.with_mode(ViewMode::Week);
        }
        // Leaves month view on its own side as well.
        self.selection.begin_edit(&booking);
        if to_week {
            self.refetch().await;
        }
        info!(booking_id, desk_id = self.desk_id, "editing booking");
        Ok(())
    }

    pub fn summary(&self) -> Option<SelectionSummary> {
        if let Some(sel) = self.selection.committed() {
            let span = sel.to_span(self.tz);
            return Some(SelectionSummary {
                start: sel.start,
                end: Some(sel.end),
                duration: Some(sel.duration_label(self.tz)),
                awaiting_end: false,
                conflict_with: first_conflict(&span, &self.bookings, self.editing_id()).map(|b| b.username.clone()),
            });
        }
        let start = self.selection.pending_start()?;
        Some(SelectionSummary {
            start,
            end: None,
            duration: None,
            awaiting_end: matches!(self.selection.phase(), Phase::AwaitingEnd | Phase::Dragging),
            conflict_with: None,
        })
    }

    // ── Window ───────────────────────────────────────────────────

    pub async fn set_view(&mut self, mode: ViewMode) {
        if mode == self.view.mode {
            return;
        }
        self.view = self.view.with_mode(mode);
        self.selection.set_view(mode);
        // The engine refuses month view while editing.
        self.view = self.view.with_mode(self.selection.view());
        self.refetch().await;
    }

    /// Page forward or back. Going back past today's page is refused.
    pub async fn navigate(&mut self, dir: i32, today: NaiveDate) -> bool {
        if dir < 0 && !self.view.can_go_back(today) {
            return false;
        }
        self.view = self.view.navigate(dir);
        self.refetch().await;
        true
    }

    /// Reload the desk's bookings for the visible window. On failure the
    /// grid is left empty and the error is shown.
    pub async fn refetch(&mut self) {
        let filter = BookingFilter::desk(self.desk_id, self.view.fetch_window(self.tz));
        match self.api.list_bookings(&filter).await {
            Ok(bookings) => self.bookings = bookings,
            Err(e) => {
                warn!(desk_id = self.desk_id, "booking fetch failed: {e}");
                self.bookings.clear();
                self.error = Some(e);
            }
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.buckets = expand_by_day(&self.bookings, self.tz, Some(self.viewer()));
    }

    fn upsert(&mut self, booking: Booking) {
        self.bookings.retain(|b| b.id != booking.id);
        let window = self.view.fetch_window(self.tz);
        if booking.desk.id == self.desk_id && booking.span().overlaps(&window) {
            self.bookings.push(booking);
        }
    }

    /// Fold a pushed delta into the grid. Returns whether it changed.
    pub fn apply_delta(&mut self, delta: &Delta) -> bool {
        let Delta::UpdateBookings {
            desk_id,
            bookings,
            deleted_ids,
            ..
        } = delta
        else {
            return false;
        };
        if *desk_id != self.desk_id {
            return false;
        }
        for b in bookings {
            self.upsert(b.clone());
        }
        self.bookings.retain(|b| !deleted_ids.contains(&b.id));
        self.bookings.sort_by_key(|b| (b.start, b.id));
        self.rebuild();
        true
    }

    // ── Confirm / close ──────────────────────────────────────────

    /// Submit the committed selection: a new booking, or the new end of the
    /// booking being edited. Contention refreshes the grid and clears the
    /// selection; other failures keep it so the user can retry.
    pub async fn confirm(&mut self) -> Result<Booking, BookingError> {
        let Some(sel) = self.selection.committed() else {
            return Err(BookingError::Invalid("pick a start and an end first"));
        };
        let span = sel.to_span(self.tz);
        let result = match self.selection.editing() {
            Some(target) => {
                let patch = BookingPatch {
                    start: None,
                    end: Some(span.end),
                };
                self.api.update_booking(target.booking_id, &patch).await
            }
            None => {
                let request = NewBooking {
                    desk_id: self.desk_id,
                    start: span.start,
                    end: span.end,
                };
                self.api.create_booking(&request).await
            }
        };

        match result {
            Ok(booking) => {
                metrics::counter!(BOOKINGS_COMMITTED_TOTAL).increment(1);
                info!(booking_id = booking.id, desk_id = self.desk_id, "booking confirmed");
                self.error = None;
                self.upsert(booking.clone());
                self.bookings.sort_by_key(|b| (b.start, b.id));
                self.rebuild();
                self.selection.end_edit();
                Ok(booking)
            }
            Err(e) if e.is_contention() => {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                warn!(desk_id = self.desk_id, "booking refused: {e}");
                self.refetch().await;
                self.selection.clear();
                self.error = Some(e.clone());
                Err(e)
            }
            Err(e) => {
                warn!(desk_id = self.desk_id, "booking submit failed: {e}");
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Close the form and hand the lock back. A failed release is left to
    /// the lock's TTL.
    pub async fn close(mut self) {
        if let Some(lease) = self.lease.take() {
            let _ = lease.release().await;
        }
        info!(desk_id = self.desk_id, "booking form closed");
    }
}
