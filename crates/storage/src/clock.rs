//! Wall-clock helpers.
//!
//! All record timestamps are absolute UTC milliseconds since the Unix epoch,
//! stored as `i64` so that [`NEVER`] (`-1`) fits alongside real instants.

/// Sentinel expiration value meaning "does not expire".
pub const NEVER: i64 = -1;

/// Returns the current UTC time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_utc_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns `now + seconds` in milliseconds, saturating instead of overflowing.
#[must_use]
pub fn after_seconds(now_ms: i64, seconds: u64) -> i64 {
    let delta = i64::try_from(seconds).unwrap_or(i64::MAX).saturating_mul(1000);
    now_ms.saturating_add(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_utc_ms() > 1_577_836_800_000);
    }

    #[test]
    fn after_seconds_saturates() {
        assert_eq!(after_seconds(1_000, 2), 3_000);
        assert_eq!(after_seconds(1_000, u64::MAX), i64::MAX);
    }
}
