//! Turns grid pointer events into a committed booking interval.
//!
//! Day and week views default to drag selection; click-click is used when
//! editing an existing booking or when the caller asks for it, and the month
//! view always picks whole days with two clicks.

mod click;
mod drag;
mod guard;
mod month;

pub use click::{CellTarget, hit_test};
pub use guard::PastGuard;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::ViewMode;
use crate::limits::{MIN_BOOKING_MS, MINUTE_MS};
use crate::model::*;
use crate::timemath::*;

use drag::DragScratch;

/// A date/time position on the grid. Orders by date, then time, which is
/// also column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotPoint {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// Pointer position snapped to the half hour and kept on the drawn grid.
    pub fn snapped(hit: GridHit) -> Self {
        Self::new(hit.date, hour_to_time(clamp_visible(snap_to_half_hour(hit.hour))))
    }

    /// Pointer position without snapping.
    pub fn raw(hit: GridHit) -> Self {
        Self::new(hit.date, hour_to_time(hit.hour))
    }

    pub fn from_instant(instant: Ms, tz: Tz) -> Self {
        let local = to_local(instant, tz);
        Self::new(local.date_naive(), local.time())
    }

    pub fn hour(&self) -> f64 {
        time_to_hour(self.time)
    }

    pub fn instant(&self, tz: Tz) -> Ms {
        local_instant(self.date, self.time, tz)
    }

    pub fn plus_minutes(&self, minutes: i64) -> Self {
        let shifted: NaiveDateTime = self.date.and_time(self.time) + TimeDelta::minutes(minutes);
        Self::new(shifted.date(), shifted.time())
    }
}

/// Where the pointer is: the column's date and an unsnapped decimal hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHit {
    pub date: NaiveDate,
    pub hour: f64,
}

impl GridHit {
    pub fn new(date: NaiveDate, hour: f64) -> Self {
        Self { date, hour }
    }
}

/// A committed `(start, end)` pair, always with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: SlotPoint,
    pub end: SlotPoint,
}

impl Selection {
    /// Instants to submit. A wall-clock pair that collapses across a DST
    /// change still yields the minimum booking length.
    pub fn to_span(&self, tz: Tz) -> Span {
        let start = self.start.instant(tz);
        let end = self.end.instant(tz).max(start + MIN_BOOKING_MS);
        Span::new(start, end)
    }

    pub fn duration_label(&self, tz: Tz) -> String {
        format_duration(self.to_span(tz).duration_ms())
    }
}

/// Order two points and widen a zero-length pick to one slot.
pub fn normalize(a: SlotPoint, b: SlotPoint) -> Selection {
    let (start, end) = if b < a { (b, a) } else { (a, b) };
    let end = if start == end {
        start.plus_minutes(MIN_BOOKING_MS / MINUTE_MS)
    } else {
        end
    };
    Selection { start, end }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    Drag,
    ClickClick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dragging,
    AwaitingEnd,
    Committed,
}

/// Result of a pointer-down or click.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Past cell, wrong mode, or nothing to do.
    Ignored,
    /// Landed on somebody else's booking; swallowed.
    Absorbed { holder: String },
    /// Landed on one of the viewer's own bookings outside edit mode.
    OwnBooking(BookingId),
    Started(SlotPoint),
    Committed(Selection),
}

/// Live preview block for the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DraftSlot {
    pub date: NaiveDate,
    pub start_hour: f64,
    pub end_hour: f64,
    /// The single start marker shown while the end is still open.
    pub is_anchor: bool,
}

/// The booking being shortened or extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTarget {
    pub booking_id: BookingId,
    pub span: Span,
    pub start: SlotPoint,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Dragging(DragScratch),
    AwaitingEnd {
        start: SlotPoint,
        hover: Option<SlotPoint>,
        pinned: bool,
    },
    MonthPending {
        start: NaiveDate,
        hover: Option<NaiveDate>,
    },
    Committed(Selection),
}

#[derive(Debug, Clone)]
pub struct SelectionEngine {
    mode: InteractionMode,
    view: ViewMode,
    tz: Tz,
    editing: Option<EditTarget>,
    state: State,
}

impl SelectionEngine {
    pub fn new(mode: InteractionMode, view: ViewMode, tz: Tz) -> Self {
        Self {
            mode,
            view,
            tz,
            editing: None,
            state: State::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Dragging(_) => Phase::Dragging,
            State::AwaitingEnd { .. } | State::MonthPending { .. } => Phase::AwaitingEnd,
            State::Committed(_) => Phase::Committed,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn editing(&self) -> Option<&EditTarget> {
        self.editing.as_ref()
    }

    pub fn committed(&self) -> Option<Selection> {
        match self.state {
            State::Committed(sel) => Some(sel),
            _ => None,
        }
    }

    /// Start point chosen so far, committed or not.
    pub fn pending_start(&self) -> Option<SlotPoint> {
        match &self.state {
            State::Idle => None,
            State::Dragging(scratch) => Some(scratch.anchor.min(scratch.cursor)),
            State::AwaitingEnd { start, .. } => Some(*start),
            State::MonthPending { start, .. } => Some(SlotPoint::new(*start, NaiveTime::MIN)),
            State::Committed(sel) => Some(sel.start),
        }
    }

    /// Global pointer tracking is only wanted while a drag is live.
    pub fn is_capturing_pointer(&self) -> bool {
        matches!(self.state, State::Dragging(_))
    }

    /// Drags are only offered in day/week views outside edit mode.
    fn drag_enabled(&self) -> bool {
        self.mode == InteractionMode::Drag && self.view != ViewMode::Month && self.editing.is_none()
    }

    /// Back to the entry state: idle, or awaiting the new end when editing.
    pub fn clear(&mut self) {
        self.state = self.entry_state();
    }

    fn entry_state(&self) -> State {
        match self.editing {
            Some(target) if self.view != ViewMode::Month => State::AwaitingEnd {
                start: target.start,
                hover: None,
                pinned: true,
            },
            _ => State::Idle,
        }
    }

    /// Switching views throws away any draft.
    pub fn set_view(&mut self, view: ViewMode) {
        self.view = view;
        self.clear();
    }

    /// Enter edit mode: the start is pinned to the booking's start and only
    /// the end is left to pick.
    pub fn begin_edit(&mut self, booking: &Booking) {
        self.editing = Some(EditTarget {
            booking_id: booking.id,
            span: booking.span(),
            start: SlotPoint::from_instant(booking.start, self.tz),
        });
        if self.view == ViewMode::Month {
            self.view = ViewMode::Week;
        }
        self.clear();
    }

    pub fn end_edit(&mut self) {
        self.editing = None;
        self.clear();
    }

    /// Escape key: abandon the gesture in flight.
    pub fn cancel(&mut self) {
        match self.state {
            State::Dragging(_) | State::AwaitingEnd { .. } | State::MonthPending { .. } => self.clear(),
            State::Idle | State::Committed(_) => {}
        }
    }

    /// Final guard on a commit: an unpinned start is never behind now.
    fn finalize(&self, sel: Selection, guard: &PastGuard, pinned: bool) -> Selection {
        if pinned {
            return sel;
        }
        let start = guard.clamp(sel.start);
        if start == sel.start {
            return sel;
        }
        normalize(start, sel.end.max(start))
    }

    fn commit(&mut self, sel: Selection) -> ClickOutcome {
        self.state = State::Committed(sel);
        ClickOutcome::Committed(sel)
    }

    /// Preview blocks for the current state.
    pub fn drafts(&self) -> Vec<DraftSlot> {
        match &self.state {
            State::Idle | State::MonthPending { .. } => Vec::new(),
            State::Dragging(scratch) => draft_slots(&scratch.preview()),
            State::AwaitingEnd { start, hover, .. } => match hover {
                Some(h) if h != start => draft_slots(&normalize(*start, *h)),
                _ => vec![DraftSlot {
                    date: start.date,
                    start_hour: start.hour(),
                    end_hour: start.hour() + 0.5,
                    is_anchor: true,
                }],
            },
            State::Committed(sel) => draft_slots(sel),
        }
    }
}

/// One slot per spanned day: the real times on the first and last day, the
/// whole visible day in between.
pub fn draft_slots(sel: &Selection) -> Vec<DraftSlot> {
    let mut slots = Vec::new();
    let mut day = sel.start.date;
    while day <= sel.end.date {
        let is_first = day == sel.start.date;
        let is_last = day == sel.end.date;
        let start_hour = if is_first { sel.start.hour() } else { VISIBLE_HOUR_START };
        let end_hour = if is_last { sel.end.hour() } else { VISIBLE_HOUR_END };
        if end_hour > start_hour {
            slots.push(DraftSlot {
                date: day,
                start_hour,
                end_hour,
                is_anchor: false,
            });
        }
        day = add_days(day, 1);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn pt(d: u32, h: u32, m: u32) -> SlotPoint {
        SlotPoint::new(date(2030, 5, d), NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    #[test]
    fn normalize_swaps_reversed_points() {
        let sel = normalize(pt(5, 10, 0), pt(5, 9, 30));
        assert_eq!(sel.start, pt(5, 9, 30));
        assert_eq!(sel.end, pt(5, 10, 0));
        // Column order wins over time of day.
        let sel = normalize(pt(6, 8, 0), pt(5, 15, 0));
        assert_eq!(sel.start, pt(5, 15, 0));
    }

    #[test]
    fn normalize_widens_same_point() {
        let sel = normalize(pt(5, 14, 0), pt(5, 14, 0));
        assert_eq!(sel.end, pt(5, 14, 30));
        let late = normalize(pt(5, 23, 45), pt(5, 23, 45));
        assert_eq!(late.end, pt(6, 0, 15));
    }

    #[test]
    fn selection_span_never_empty() {
        let sel = normalize(pt(5, 14, 0), pt(5, 14, 0));
        assert_eq!(sel.to_span(Tz::UTC).duration_ms(), MIN_BOOKING_MS);
        assert_eq!(sel.duration_label(Tz::UTC), "30m");
    }

    #[test]
    fn multi_day_drafts_fill_interior_days() {
        let slots = draft_slots(&normalize(pt(5, 15, 0), pt(7, 10, 0)));
        assert_eq!(slots.len(), 3);
        assert_eq!((slots[0].start_hour, slots[0].end_hour), (15.0, VISIBLE_HOUR_END));
        assert_eq!((slots[1].start_hour, slots[1].end_hour), (VISIBLE_HOUR_START, VISIBLE_HOUR_END));
        assert_eq!((slots[2].start_hour, slots[2].end_hour), (VISIBLE_HOUR_START, 10.0));
    }

    #[test]
    fn view_change_discards_draft() {
        let mut engine = SelectionEngine::new(InteractionMode::ClickClick, ViewMode::Week, Tz::UTC);
        engine.state = State::Committed(normalize(pt(5, 9, 0), pt(5, 10, 0)));
        engine.set_view(ViewMode::Day);
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(engine.drafts().is_empty());
    }
}
