use crate::model::Ms;

use super::*;

// ── Month view: whole-day click-click ────────────────────────────

impl SelectionEngine {
    /// Pick the first or second day of a month-view range.
    ///
    /// The committed range starts at midnight of the earlier day, or at the
    /// next half hour from now when that day is today, and ends at 23:59 of
    /// the later day.
    pub fn click_day(&mut self, date: NaiveDate, now: Ms) -> ClickOutcome {
        let guard = PastGuard::new(now, self.tz);
        if guard.is_past_date(date) {
            return ClickOutcome::Ignored;
        }
        match self.state {
            State::MonthPending { start, .. } => {
                let (first, last) = if date < start { (date, start) } else { (start, date) };
                let start_point = if first == guard.today() {
                    guard.now_point()
                } else {
                    SlotPoint::new(first, NaiveTime::MIN)
                };
                let end_point = SlotPoint::new(last, end_of_day());
                let sel = normalize(start_point, end_point.max(start_point));
                self.commit(sel)
            }
            State::Idle | State::Committed(_) => {
                self.state = State::MonthPending { start: date, hover: None };
                ClickOutcome::Started(SlotPoint::new(date, NaiveTime::MIN))
            }
            State::Dragging(_) | State::AwaitingEnd { .. } => ClickOutcome::Ignored,
        }
    }

    pub fn hover_day(&mut self, date: NaiveDate) {
        if let State::MonthPending { hover, .. } = &mut self.state {
            *hover = Some(date);
        }
    }

    /// Days strictly between the pending day and the hovered day.
    pub fn in_range(&self, date: NaiveDate) -> bool {
        match self.state {
            State::MonthPending { start, hover: Some(hover) } => {
                let (lo, hi) = if hover < start { (hover, start) } else { (start, hover) };
                lo < date && date < hi
            }
            State::Committed(sel) if self.view == ViewMode::Month => {
                sel.start.date < date && date < sel.end.date
            }
            _ => false,
        }
    }

    /// The pending day and the hovered day themselves.
    pub fn is_range_end(&self, date: NaiveDate) -> bool {
        match self.state {
            State::MonthPending { start, hover } => date == start || hover == Some(date),
            State::Committed(sel) if self.view == ViewMode::Month => {
                date == sel.start.date || date == sel.end.date
            }
            _ => false,
        }
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}
