use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::model::*;
use crate::timemath::{VISIBLE_HOUR_END, VISIBLE_HOUR_START, hour_to_time, local_instant};

// ── Free/busy over a desk's bookings ─────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Merged busy time of `bookings`, ignoring the one being edited.
pub fn busy_spans(bookings: &[Booking], exclude: Option<BookingId>) -> Vec<Span> {
    let mut spans: Vec<Span> = bookings
        .iter()
        .filter(|b| b.is_valid() && Some(b.id) != exclude)
        .map(Booking::span)
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Free parts of `window`.
pub fn free_spans(window: Span, bookings: &[Booking], exclude: Option<BookingId>) -> Vec<Span> {
    subtract_intervals(&[window], &busy_spans(bookings, exclude))
}

/// First known booking that collides with `span`. Only a hint: the booking
/// service decides for real when the booking is submitted.
pub fn first_conflict<'a>(
    span: &Span,
    bookings: &'a [Booking],
    exclude: Option<BookingId>,
) -> Option<&'a Booking> {
    bookings
        .iter()
        .filter(|b| b.is_valid() && Some(b.id) != exclude)
        .find(|b| b.span().overlaps(span))
}

/// The drawn part of a local day as instants.
pub fn visible_window(date: NaiveDate, tz: Tz) -> Span {
    Span::new(
        local_instant(date, hour_to_time(VISIBLE_HOUR_START), tz),
        local_instant(date, hour_to_time(VISIBLE_HOUR_END), tz),
    )
}
