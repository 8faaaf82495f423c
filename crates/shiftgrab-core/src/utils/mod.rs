//! Utility functions for config time values and request ids.

pub mod request_id;
pub mod time;

pub use request_id::request_id;
pub use time::{parse_datetime, parse_duration, parse_time_of_day, parse_time_zone};
