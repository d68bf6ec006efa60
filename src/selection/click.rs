use crate::calendar::{DayBuckets, segments_on};
use crate::model::{Ms, UserId};

use super::*;

/// What sits under the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellTarget {
    Grid,
    /// The booking currently being edited. Transparent to clicks.
    EditingBooking,
    OwnBooking(BookingId),
    OtherBooking { holder: String },
}

/// Resolve a grid position against the rendered bookings.
pub fn hit_test(
    buckets: &DayBuckets,
    hit: GridHit,
    tz: Tz,
    viewer: Option<UserId>,
    editing: Option<BookingId>,
) -> CellTarget {
    for segment in segments_on(buckets, hit.date) {
        let (start, end) = segment.hours(tz);
        if !(start <= hit.hour && hit.hour < end) {
            continue;
        }
        let booking = &segment.booking;
        if Some(booking.id) == editing {
            return CellTarget::EditingBooking;
        }
        return if viewer.is_some_and(|v| v == booking.user_id) {
            CellTarget::OwnBooking(booking.id)
        } else {
            CellTarget::OtherBooking {
                holder: booking.username.clone(),
            }
        };
    }
    CellTarget::Grid
}

// ── Click-click ──────────────────────────────────────────────────

impl SelectionEngine {
    fn clicks_enabled(&self) -> bool {
        self.mode == InteractionMode::ClickClick || self.editing.is_some()
    }

    /// A click on the day/week grid, or on a month cell.
    pub fn click(&mut self, hit: GridHit, target: CellTarget, now: Ms) -> ClickOutcome {
        if self.view == ViewMode::Month {
            return self.click_day(hit.date, now);
        }
        if !self.clicks_enabled() {
            return ClickOutcome::Ignored;
        }
        match target {
            CellTarget::OtherBooking { holder } => return ClickOutcome::Absorbed { holder },
            CellTarget::OwnBooking(id) => return ClickOutcome::OwnBooking(id),
            CellTarget::Grid | CellTarget::EditingBooking => {}
        }

        let guard = PastGuard::new(now, self.tz);
        match self.state {
            State::AwaitingEnd { start, pinned, .. } => {
                let Some(point) = self.admit_end(hit, &guard) else {
                    return ClickOutcome::Ignored;
                };
                // A pinned start cannot move; the end has to come after it.
                if pinned && point < start {
                    return ClickOutcome::Ignored;
                }
                let sel = self.finalize(normalize(start, point), &guard, pinned);
                self.commit(sel)
            }
            State::Idle | State::Committed(_) => {
                let Some(point) = guard.admit(hit) else {
                    return ClickOutcome::Ignored;
                };
                self.state = State::AwaitingEnd {
                    start: point,
                    hover: None,
                    pinned: false,
                };
                ClickOutcome::Started(point)
            }
            State::Dragging(_) | State::MonthPending { .. } => ClickOutcome::Ignored,
        }
    }

    /// Past positions are refused, except inside the block being edited so a
    /// running booking can be cut short.
    fn admit_end(&self, hit: GridHit, guard: &PastGuard) -> Option<SlotPoint> {
        if let Some(point) = guard.admit(hit) {
            return Some(point);
        }
        let target = self.editing?;
        let point = SlotPoint::snapped(hit);
        let at = point.instant(self.tz);
        (target.span.start <= at && at <= target.span.end).then_some(point)
    }

    /// Pointer hovering while the end is still open; drives the preview.
    pub fn hover(&mut self, hit: GridHit, now: Ms) {
        if self.view == ViewMode::Month {
            self.hover_day(hit.date);
            return;
        }
        let guard = PastGuard::new(now, self.tz);
        let candidate = self.admit_end(hit, &guard);
        if let State::AwaitingEnd { start, hover, pinned } = &mut self.state {
            *hover = candidate.filter(|p| !*pinned || *p >= *start);
        }
    }
}
