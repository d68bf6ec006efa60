use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::warn;

use crate::limits::MAX_DAY_WALK;
use crate::model::*;
use crate::timemath::{add_days, days_between, decimal_hour, local_date_key, local_midnight_instant};

/// One booking's share of one local day.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySegment {
    pub date: NaiveDate,
    pub booking: Booking,
    pub is_own: bool,
    /// Half-open. Non-last days end at the next local midnight so the
    /// segments of a booking tile `[start, end)` exactly.
    pub clipped: Span,
    pub is_first: bool,
    pub is_last: bool,
}

impl DaySegment {
    /// End instant as shown to the user: one second before the next midnight
    /// on days the booking runs past.
    pub fn display_end(&self) -> Ms {
        if self.is_last {
            self.clipped.end
        } else {
            self.clipped.end - 1_000
        }
    }

    /// Decimal start/end hours inside the segment's own day, `0.0`/`24.0` at
    /// the cut edges.
    pub fn hours(&self, tz: Tz) -> (f64, f64) {
        let start = if self.is_first {
            decimal_hour(self.clipped.start, tz)
        } else {
            0.0
        };
        let end = if self.is_last && local_date_key(self.clipped.end, tz) == self.date {
            decimal_hour(self.clipped.end, tz)
        } else {
            24.0
        };
        (start, end)
    }
}

pub type DayBuckets = BTreeMap<NaiveDate, Vec<DaySegment>>;

/// Split every booking at local midnights in `tz` and bucket the pieces by
/// local date. `viewer` marks which bookings are the caller's own.
///
/// The last day is the one holding `end - 1ms`, so a booking ending exactly at
/// midnight does not produce an empty record for the following day.
pub fn expand_by_day(bookings: &[Booking], tz: Tz, viewer: Option<UserId>) -> DayBuckets {
    let mut buckets = DayBuckets::new();

    for booking in bookings {
        if !booking.is_valid() {
            warn!(booking_id = booking.id, "skipping booking with end <= start");
            continue;
        }
        let start_key = local_date_key(booking.start, tz);
        let end_key = local_date_key(booking.end - 1, tz);
        let walk = days_between(start_key, end_key);
        if walk < 0 || walk as usize >= MAX_DAY_WALK {
            warn!(booking_id = booking.id, days = walk, "skipping booking outside day-walk bound");
            continue;
        }

        let is_own = viewer.is_some_and(|v| v == booking.user_id);
        let mut day = start_key;
        loop {
            let is_first = day == start_key;
            let is_last = day == end_key;
            let next = add_days(day, 1);

            let clipped_start = if is_first {
                booking.start
            } else {
                local_midnight_instant(day, tz)
            };
            let clipped_end = if is_last {
                booking.end
            } else {
                local_midnight_instant(next, tz)
            };

            if clipped_start < clipped_end {
                buckets.entry(day).or_default().push(DaySegment {
                    date: day,
                    booking: booking.clone(),
                    is_own,
                    clipped: Span::new(clipped_start, clipped_end),
                    is_first,
                    is_last,
                });
            }

            if is_last {
                break;
            }
            day = next;
        }
    }

    for segments in buckets.values_mut() {
        segments.sort_by_key(|s| s.clipped.start);
    }
    buckets
}

/// Segments for one day, empty when nothing touches it.
pub fn segments_on(buckets: &DayBuckets, date: NaiveDate) -> &[DaySegment] {
    buckets.get(&date).map(Vec::as_slice).unwrap_or(&[])
}
