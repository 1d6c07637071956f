//! Timestamp utilities

use chrono::{DateTime, Datelike, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix epoch seconds
pub fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Calendar year of a timestamp, used to scope radicate sequences
pub fn year_of(timestamp: &DateTime<Utc>) -> i32 {
    timestamp.year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_unix_seconds_matches_now() {
        let a = unix_seconds();
        let b = now().timestamp();
        assert!((b - a).abs() <= 1);
    }

    #[test]
    fn test_year_of() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(year_of(&ts), 2024);
    }
}
