use std::time::SystemTime;
use time::OffsetDateTime;

/// Wall-clock UTC time in epoch milliseconds.
pub fn utc_now_ms() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// A filesystem timestamp in epoch milliseconds.
pub fn system_time_ms(t: SystemTime) -> i128 {
    OffsetDateTime::from(t).unix_timestamp_nanos() / 1_000_000
}

/// Milliseconds elapsed since `then_ms`, clamped at zero when the clock went backwards.
pub fn age_ms(then_ms: i128) -> u64 {
    let age = utc_now_ms() - then_ms;
    u64::try_from(age.max(0)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn age_of_past_and_future() {
        let now = utc_now_ms();
        assert!(age_ms(now - 5_000) >= 5_000);
        assert_eq!(age_ms(now + 60_000), 0);
    }

    #[test]
    fn system_time_matches_wall_clock() {
        let ms = system_time_ms(SystemTime::UNIX_EPOCH + Duration::from_millis(1_234));
        assert_eq!(ms, 1_234);
    }
}
