//! Time bucket helpers shared by the aggregator and the storage backends.

use chrono::Utc;

/// Width of one aggregation window in milliseconds.
pub const MINUTE_BUCKET_MILLIS: i64 = 60_000;

/// Truncate a unix timestamp (milliseconds) to its minute bucket.
///
/// Uses floor division, so the bucket of a timestamp never lies after it.
pub fn minute_time_bucket(unix_millis: i64) -> i64 {
    unix_millis.div_euclid(MINUTE_BUCKET_MILLIS)
}

/// First millisecond covered by a minute bucket.
pub fn bucket_start_millis(time_bucket: i64) -> i64 {
    time_bucket * MINUTE_BUCKET_MILLIS
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
