//! Timestamp tick conversion
//!
//! A tick is 100 nanoseconds. Tick 0 is 0001-01-01T00:00:00 and the last
//! valid tick is 9999-12-31T23:59:59.9999999.

use chrono::{DateTime, NaiveDateTime};

/// Ticks per second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Largest valid tick value
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// Seconds between 0001-01-01 and the Unix epoch
const EPOCH_OFFSET_SECONDS: i64 = 62_135_596_800;

/// Converts a timestamp to ticks.
///
/// Timestamps outside years 1..=9999 produce values outside
/// `[0, MAX_TICKS]`; see [`is_valid_ticks`].
pub fn to_ticks(value: &NaiveDateTime) -> i64 {
    let utc = value.and_utc();
    let seconds = utc.timestamp() + EPOCH_OFFSET_SECONDS;
    let sub = i64::from(utc.timestamp_subsec_nanos()) / 100;
    seconds
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(sub)
}

/// Converts ticks back to a timestamp, or `None` if out of range
pub fn from_ticks(ticks: i64) -> Option<NaiveDateTime> {
    if !is_valid_ticks(ticks) {
        return None;
    }
    let seconds = ticks / TICKS_PER_SECOND - EPOCH_OFFSET_SECONDS;
    let nanos = (ticks % TICKS_PER_SECOND) * 100;
    DateTime::from_timestamp(seconds, nanos as u32).map(|dt| dt.naive_utc())
}

/// Returns true if `ticks` lies within `[0, MAX_TICKS]`
pub fn is_valid_ticks(ticks: i64) -> bool {
    (0..=MAX_TICKS).contains(&ticks)
}

/// The timestamp at tick 0
pub fn min_date_time() -> NaiveDateTime {
    from_ticks(0).unwrap_or_default()
}
