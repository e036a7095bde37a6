#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_millis() as i64
}

/// Whole seconds of a unix-ms stamp, as reported by `heartbeat`.
#[inline]
pub fn unix_secs(unix_ms: i64) -> i64 {
	unix_ms.div_euclid(1000)
}
