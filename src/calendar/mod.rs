//! Day/week/month grid model. Drawing is left to the consumer; this module
//! decides which days are visible, what window to fetch, and where blocks sit.

pub mod availability;
pub mod expander;

pub use availability::{first_conflict, free_spans, visible_window};
pub use expander::{DayBuckets, DaySegment, expand_by_day, segments_on};

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::timemath::*;

/// Month grids always show six full weeks.
pub const MONTH_GRID_DAYS: usize = 42;

/// Shortest block a renderer should draw, in percent of the visible window.
pub const MIN_BLOCK_HEIGHT_PCT: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarView {
    pub mode: ViewMode,
    pub anchor: NaiveDate,
}

impl CalendarView {
    pub fn new(mode: ViewMode, anchor: NaiveDate) -> Self {
        Self { mode, anchor }
    }

    /// Visible dates in column order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let (first, count) = match self.mode {
            ViewMode::Day => (self.anchor, 1),
            ViewMode::Week => (start_of_week(self.anchor), 7),
            ViewMode::Month => (start_of_week(start_of_month(self.anchor)), MONTH_GRID_DAYS),
        };
        (0..count as i64).map(|i| add_days(first, i)).collect()
    }

    pub fn first_day(&self) -> NaiveDate {
        match self.mode {
            ViewMode::Day => self.anchor,
            ViewMode::Week => start_of_week(self.anchor),
            ViewMode::Month => start_of_week(start_of_month(self.anchor)),
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        let len = match self.mode {
            ViewMode::Day => 1,
            ViewMode::Week => 7,
            ViewMode::Month => MONTH_GRID_DAYS as i64,
        };
        add_days(self.first_day(), len - 1)
    }

    /// Step one page forward (`dir > 0`) or back.
    pub fn navigate(&self, dir: i32) -> Self {
        let anchor = match self.mode {
            ViewMode::Day => add_days(self.anchor, i64::from(dir)),
            ViewMode::Week => add_days(self.anchor, 7 * i64::from(dir)),
            ViewMode::Month => add_months(start_of_month(self.anchor), dir),
        };
        Self { mode: self.mode, anchor }
    }

    pub fn with_mode(&self, mode: ViewMode) -> Self {
        Self { mode, anchor: self.anchor }
    }

    /// Going back is pointless once the current page already holds today.
    pub fn can_go_back(&self, today: NaiveDate) -> bool {
        match self.mode {
            ViewMode::Day => self.anchor > today,
            ViewMode::Week => start_of_week(self.anchor) > start_of_week(today),
            ViewMode::Month => {
                (self.anchor.year(), self.anchor.month()) > (today.year(), today.month())
            }
        }
    }

    /// Instants to fetch bookings for: first visible midnight up to the
    /// midnight after the last visible day.
    pub fn fetch_window(&self, tz: Tz) -> Span {
        Span::new(
            local_midnight_instant(self.first_day(), tz),
            local_midnight_instant(add_days(self.last_day(), 1), tz),
        )
    }

    /// Month cells outside the anchored month are drawn dimmed.
    pub fn in_focus_month(&self, date: NaiveDate) -> bool {
        self.mode != ViewMode::Month
            || (date.year(), date.month()) == (self.anchor.year(), self.anchor.month())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first_day() <= date && date <= self.last_day()
    }
}

// ── Renderer contract ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockGeometry {
    pub top_pct: f64,
    pub height_pct: f64,
}

/// Vertical placement of `[start_hour, end_hour)` in the visible window.
/// `None` when nothing of it is visible.
pub fn block_geometry(start_hour: f64, end_hour: f64) -> Option<BlockGeometry> {
    let top = clamp_visible(start_hour);
    let bottom = clamp_visible(end_hour);
    if bottom <= top {
        return None;
    }
    let range = VISIBLE_HOUR_END - VISIBLE_HOUR_START;
    Some(BlockGeometry {
        top_pct: (top - VISIBLE_HOUR_START) / range * 100.0,
        height_pct: ((bottom - top) / range * 100.0).max(MIN_BLOCK_HEIGHT_PCT),
    })
}

pub fn segment_geometry(segment: &DaySegment, tz: Tz) -> Option<BlockGeometry> {
    let (start, end) = segment.hours(tz);
    block_geometry(start, end)
}

/// Position of the "now" marker when `date` is today and now is on screen.
pub fn now_line_pct(now: Ms, tz: Tz, date: NaiveDate) -> Option<f64> {
    if local_date_key(now, tz) != date {
        return None;
    }
    let hour = decimal_hour(now, tz);
    (VISIBLE_HOUR_START..=VISIBLE_HOUR_END)
        .contains(&hour)
        .then(|| (hour - VISIBLE_HOUR_START) / (VISIBLE_HOUR_END - VISIBLE_HOUR_START) * 100.0)
}

/// Everything a renderer needs for one column or month cell.
#[derive(Debug, Clone)]
pub struct DayColumn<'a> {
    pub date: NaiveDate,
    pub is_today: bool,
    pub is_past: bool,
    pub in_focus_month: bool,
    pub segments: &'a [DaySegment],
}

pub fn columns<'a>(view: &CalendarView, buckets: &'a DayBuckets, today: NaiveDate) -> Vec<DayColumn<'a>> {
    view.days()
        .into_iter()
        .map(|date| DayColumn {
            date,
            is_today: date == today,
            is_past: date < today,
            in_focus_month: view.in_focus_month(date),
            segments: segments_on(buckets, date),
        })
        .collect()
}
