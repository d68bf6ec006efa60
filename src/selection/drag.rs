use tracing::debug;

use crate::model::Ms;

use super::*;

/// Mutable cursor of a live drag. Only turned into a [`Selection`] on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct DragScratch {
    pub anchor: SlotPoint,
    pub cursor: SlotPoint,
}

impl DragScratch {
    fn begin(anchor: SlotPoint) -> Self {
        Self { anchor, cursor: anchor }
    }

    fn track(&mut self, point: SlotPoint) {
        self.cursor = point;
    }

    pub fn preview(&self) -> Selection {
        normalize(self.anchor, self.cursor)
    }
}

// ── Drag gesture ─────────────────────────────────────────────────

impl SelectionEngine {
    /// Press on the grid. Starts a drag when the cell is free and not past.
    pub fn pointer_down(&mut self, hit: GridHit, target: CellTarget, now: Ms) -> ClickOutcome {
        if !self.drag_enabled() {
            return ClickOutcome::Ignored;
        }
        match target {
            CellTarget::OtherBooking { holder } => return ClickOutcome::Absorbed { holder },
            CellTarget::OwnBooking(id) => return ClickOutcome::OwnBooking(id),
            CellTarget::Grid | CellTarget::EditingBooking => {}
        }
        let guard = PastGuard::new(now, self.tz);
        let Some(point) = guard.admit(hit) else {
            debug!(date = %hit.date, hour = hit.hour, "drag start in the past ignored");
            return ClickOutcome::Ignored;
        };
        self.state = State::Dragging(DragScratch::begin(point));
        ClickOutcome::Started(point)
    }

    /// Pointer moved while a drag is live. Positions behind now are pulled
    /// forward to now instead of extending the selection backwards.
    pub fn pointer_move(&mut self, hit: GridHit, now: Ms) {
        let guard = PastGuard::new(now, self.tz);
        if let State::Dragging(scratch) = &mut self.state {
            scratch.track(guard.clamp(SlotPoint::snapped(hit)));
        }
    }

    /// Release. `hit` is `None` when the pointer left the grid; the last
    /// tracked position is used.
    pub fn pointer_up(&mut self, hit: Option<GridHit>, now: Ms) -> Option<Selection> {
        let State::Dragging(mut scratch) = self.state else {
            return None;
        };
        let guard = PastGuard::new(now, self.tz);
        if let Some(hit) = hit {
            scratch.track(guard.clamp(SlotPoint::snapped(hit)));
        }
        let sel = self.finalize(scratch.preview(), &guard, false);
        self.commit(sel);
        Some(sel)
    }

    /// Pointer capture lost mid-drag.
    pub fn pointer_cancel(&mut self) {
        if matches!(self.state, State::Dragging(_)) {
            self.state = State::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn ms(rfc3339: &str) -> Ms {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 5, d).unwrap()
    }

    fn pt(d: u32, h: u32, m: u32) -> SlotPoint {
        SlotPoint::new(date(d), NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn engine() -> SelectionEngine {
        SelectionEngine::new(InteractionMode::Drag, ViewMode::Week, Tz::UTC)
    }

    const EARLY: &str = "2030-05-01T06:00:00Z";

    #[test]
    fn reversed_drag_commits_swapped() {
        let now = ms(EARLY);
        let mut e = engine();
        let out = e.pointer_down(GridHit::new(date(6), 10.0), CellTarget::Grid, now);
        assert_eq!(out, ClickOutcome::Started(pt(6, 10, 0)));
        assert!(e.is_capturing_pointer());
        e.pointer_move(GridHit::new(date(6), 9.6), now);
        let sel = e.pointer_up(Some(GridHit::new(date(6), 9.5)), now).unwrap();
        assert_eq!(sel.start, pt(6, 9, 30));
        assert_eq!(sel.end, pt(6, 10, 0));
        assert_eq!(e.phase(), Phase::Committed);
        assert!(!e.is_capturing_pointer());
    }

    #[test]
    fn zero_width_drag_is_one_slot() {
        let now = ms(EARLY);
        let mut e = engine();
        e.pointer_down(GridHit::new(date(6), 14.1), CellTarget::Grid, now);
        let sel = e.pointer_up(None, now).unwrap();
        assert_eq!((sel.start, sel.end), (pt(6, 14, 0), pt(6, 14, 30)));
    }

    #[test]
    fn multi_column_drag_drafts() {
        let now = ms(EARLY);
        let mut e = engine();
        e.pointer_down(GridHit::new(date(6), 15.0), CellTarget::Grid, now);
        e.pointer_move(GridHit::new(date(8), 11.0), now);
        let drafts = e.drafts();
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[1].start_hour, VISIBLE_HOUR_START);
        assert_eq!(drafts[1].end_hour, VISIBLE_HOUR_END);
    }

    #[test]
    fn drag_into_past_clamps_to_now() {
        // 10:10 on the 6th.
        let now = ms("2030-05-06T10:10:00Z");
        let mut e = engine();
        e.pointer_down(GridHit::new(date(6), 12.0), CellTarget::Grid, now);
        e.pointer_move(GridHit::new(date(5), 9.0), now);
        let sel = e.pointer_up(None, now).unwrap();
        assert_eq!(sel.start, pt(6, 10, 30));
        assert_eq!(sel.end, pt(6, 12, 0));
        assert!(sel.to_span(Tz::UTC).start >= now);
    }

    #[test]
    fn past_press_and_foreign_blocks_do_not_start() {
        let now = ms("2030-05-06T10:10:00Z");
        let mut e = engine();
        assert_eq!(e.pointer_down(GridHit::new(date(5), 12.0), CellTarget::Grid, now), ClickOutcome::Ignored);
        assert_eq!(
            e.pointer_down(
                GridHit::new(date(6), 12.0),
                CellTarget::OtherBooking { holder: "alice".into() },
                now
            ),
            ClickOutcome::Absorbed { holder: "alice".into() }
        );
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn commit_after_clock_moves_on_stays_in_future() {
        let pressed = ms("2030-05-06T10:20:00Z");
        let released = ms("2030-05-06T10:40:00Z");
        let mut e = engine();
        e.pointer_down(GridHit::new(date(6), 10.45), CellTarget::Grid, pressed);
        let sel = e.pointer_up(Some(GridHit::new(date(6), 12.0)), released).unwrap();
        assert!(sel.to_span(Tz::UTC).start >= released);
        assert_eq!(sel.start, pt(6, 11, 0));
    }

    #[test]
    fn month_view_does_not_drag() {
        let mut e = SelectionEngine::new(InteractionMode::Drag, ViewMode::Month, Tz::UTC);
        assert_eq!(
            e.pointer_down(GridHit::new(date(6), 10.0), CellTarget::Grid, ms(EARLY)),
            ClickOutcome::Ignored
        );
    }

    #[test]
    fn cancel_releases_capture() {
        let mut e = engine();
        e.pointer_down(GridHit::new(date(6), 10.0), CellTarget::Grid, ms(EARLY));
        e.pointer_cancel();
        assert_eq!(e.phase(), Phase::Idle);
        assert!(e.pointer_up(None, ms(EARLY)).is_none());
    }
}
