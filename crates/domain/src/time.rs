//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for event times, expiries, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return `ts` advanced by `duration`, saturating on overflow.
#[must_use]
pub fn after(ts: Timestamp, duration: Duration) -> Timestamp {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| ts.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_advance_timestamp_by_duration() {
        let ts = now();
        let later = after(ts, Duration::from_secs(20));
        assert_eq!(later - ts, chrono::Duration::seconds(20));
    }

    #[test]
    fn should_saturate_when_duration_overflows() {
        let ts = now();
        let later = after(ts, Duration::from_secs(u64::MAX));
        assert_eq!(later, DateTime::<Utc>::MAX_UTC);
    }
}
