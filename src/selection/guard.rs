use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::model::Ms;
use crate::timemath::{add_days, decimal_hour, hour_to_time, local_date_key, snap_up_to_half_hour};

use super::{GridHit, SlotPoint};

/// Decides which grid positions are in the past, relative to one `now`.
#[derive(Debug, Clone, Copy)]
pub struct PastGuard {
    now: Ms,
    tz: Tz,
    today: NaiveDate,
}

impl PastGuard {
    pub fn new(now: Ms, tz: Tz) -> Self {
        Self {
            now,
            tz,
            today: local_date_key(now, tz),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn is_past_date(&self, date: NaiveDate) -> bool {
        date < self.today
    }

    pub fn is_past_point(&self, point: &SlotPoint) -> bool {
        point.instant(self.tz) < self.now
    }

    /// Now, rounded up to the next half hour. Rolls into tomorrow after 23:30.
    pub fn now_point(&self) -> SlotPoint {
        let hour = snap_up_to_half_hour(decimal_hour(self.now, self.tz));
        if hour >= 24.0 {
            SlotPoint::new(add_days(self.today, 1), hour_to_time(0.0))
        } else {
            SlotPoint::new(self.today, hour_to_time(hour))
        }
    }

    /// Snap a pointer position, refusing past cells. A pointer in the current
    /// half hour whose snapped value would land behind now is moved up to
    /// [`now_point`](Self::now_point).
    pub fn admit(&self, hit: GridHit) -> Option<SlotPoint> {
        if self.is_past_date(hit.date) {
            return None;
        }
        let snapped = SlotPoint::snapped(hit);
        if !self.is_past_point(&snapped) {
            return Some(snapped);
        }
        if self.is_past_point(&SlotPoint::raw(hit)) {
            return None;
        }
        Some(self.now_point().max(snapped))
    }

    /// Pull a point that drifted into the past forward to now.
    pub fn clamp(&self, point: SlotPoint) -> SlotPoint {
        if self.is_past_point(&point) {
            point.max(self.now_point())
        } else {
            point
        }
    }
}
