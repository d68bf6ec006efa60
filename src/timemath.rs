//! Pure date/time helpers. Every function takes the zone explicitly; nothing
//! here reads the clock except [`now_ms`].

use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::limits::*;
use crate::model::Ms;

/// First and last hour drawn on the day/week grid.
pub const VISIBLE_HOUR_START: f64 = 7.0;
pub const VISIBLE_HOUR_END: f64 = 21.0;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

fn utc(instant: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant).unwrap_or_default()
}

pub fn to_local(instant: Ms, tz: Tz) -> DateTime<Tz> {
    utc(instant).with_timezone(&tz)
}

/// Calendar date `instant` falls on in `tz`, following the zone's rules
/// rather than a fixed offset.
pub fn local_date_key(instant: Ms, tz: Tz) -> NaiveDate {
    to_local(instant, tz).date_naive()
}

/// Wall-clock time of `instant` in `tz`.
pub fn local_time(instant: Ms, tz: Tz) -> NaiveTime {
    to_local(instant, tz).time()
}

/// First instant of the local day `date` in `tz`.
pub fn local_midnight_instant(date: NaiveDate, tz: Tz) -> Ms {
    local_instant(date, NaiveTime::MIN, tz)
}

/// Resolve a local wall-clock reading to an instant.
///
/// Ambiguous readings (autumn fold) take the earlier instant. A reading that
/// falls in a spring-forward gap is interpreted with the offset in force
/// before the gap, which lands on the transition itself when the reading is
/// the first skipped minute (the usual case for a skipped midnight).
pub fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Ms {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => {
            // Probe the offset half a day earlier, well clear of the gap.
            let probe = naive - Duration::hours(12);
            let offset = tz
                .offset_from_local_datetime(&probe)
                .earliest()
                .map(|o| o.fix())
                .unwrap_or_else(|| tz.offset_from_utc_datetime(&naive).fix());
            let shifted: NaiveDateTime =
                naive - Duration::seconds(i64::from(offset.local_minus_utc()));
            shifted.and_utc().timestamp_millis()
        }
    }
}

/// Hour of day in `tz` including the fractional minutes, e.g. 14:45 → 14.75.
pub fn decimal_hour(instant: Ms, tz: Tz) -> f64 {
    time_to_hour(local_time(instant, tz))
}

pub fn time_to_hour(time: NaiveTime) -> f64 {
    time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0
}

/// Nearest half hour.
pub fn snap_to_half_hour(hour: f64) -> f64 {
    (hour * 2.0).round() / 2.0
}

/// Next half hour at or after `hour`. Used where snapping down would select a
/// moment already in the past.
pub fn snap_up_to_half_hour(hour: f64) -> f64 {
    (hour * 2.0).ceil() / 2.0
}

/// Clamp for display only; the underlying interval keeps its real bounds.
pub fn clamp_visible(hour: f64) -> f64 {
    hour.clamp(VISIBLE_HOUR_START, VISIBLE_HOUR_END)
}

/// Decimal hour to a wall-clock time. Anything at or past 24 saturates to
/// 23:59 so a full-day value never wraps to the next midnight.
pub fn hour_to_time(hour: f64) -> NaiveTime {
    let minutes = (hour.max(0.0) * 60.0).round() as u32;
    let minutes = minutes.min(23 * 60 + 59);
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

/// Monday of the week containing `date`.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    add_days(date, -i64::from(date.weekday().num_days_from_monday()))
}

pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Whole days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Human duration such as `1d 2h 30m`. Zero-valued units are omitted.
pub fn format_duration(ms: Ms) -> String {
    let total_minutes = ms.max(0) / MINUTE_MS;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.join(" ")
}

/// Serde adapter: unix millis on our side, RFC 3339 strings on the wire.
pub mod iso_ms {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(value: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
        let dt = DateTime::<Utc>::from_timestamp_millis(*value)
            .ok_or_else(|| serde::ser::Error::custom("timestamp out of range"))?;
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ms, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.timestamp_millis())
            .map_err(serde::de::Error::custom)
    }
}
