//! Index keys
//!
//! - Closed set of key shapes, dispatched by `match`
//! - Fixed serialized size per shape
//! - Total order, including doubles
//! - Min/max sentinels for open range bounds

mod fixed_length;
mod ticks;

pub use fixed_length::FixedLengthKey;
pub use ticks::{from_ticks, is_valid_ticks, min_date_time, to_ticks, MAX_TICKS, TICKS_PER_SECOND};
