//! Hour-slot arithmetic and display formatting.

use chrono::DateTime;
use chrono::FixedOffset;

/// Length of one bookable slot in seconds.
pub const SLOT_SECS: i64 = 3600;

/// Number of slots materialized by the rolling calendar view.
pub const CALENDAR_SLOTS: usize = 48;

/// Default site display offset from UTC, in hours.
pub const DEFAULT_DISPLAY_OFFSET_HOURS: i32 = 8;

/// Truncate `ts` down to its hour boundary.
pub fn hour_floor(ts: i64) -> i64 {
    ts - ts.rem_euclid(SLOT_SECS)
}

/// Whether `ts` sits exactly on an hour boundary.
pub fn is_hour_aligned(ts: i64) -> bool {
    ts.rem_euclid(SLOT_SECS) == 0
}

/// The `CALENDAR_SLOTS` hour-aligned timestamps starting at the hour
/// containing `now`.
pub fn slot_window(now: i64) -> impl Iterator<Item = i64> {
    let start = hour_floor(now);
    (0..CALENDAR_SLOTS as i64).map(move |i| start + i * SLOT_SECS)
}

/// Format `ts` for display in the site-local fixed offset zone.
pub fn display_time(ts: i64, offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(offset_hours.clamp(-23, 23) * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    match DateTime::from_timestamp(ts, 0) {
        Some(utc) => utc.with_timezone(&offset).format("%m-%d %H:%M").to_string(),
        None => String::new(),
    }
}
