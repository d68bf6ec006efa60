use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Grid granularity, also the shortest booking the server accepts.
pub const MIN_BOOKING_MS: Ms = 30 * MINUTE_MS;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

/// Safety valve for the per-day walk over a booking. A booking touching more
/// local days than this is treated as malformed.
pub const MAX_DAY_WALK: usize = 400;

/// Widest window a single `list_bookings` call may ask for.
pub const MAX_QUERY_WINDOW_MS: Ms = 400 * DAY_MS;

pub const MAX_NAME_LEN: usize = 255;
