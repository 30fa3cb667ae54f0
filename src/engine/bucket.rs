//! Hourly time buckets.
//!
//! Every aggregate is windowed by a `YYYY-MM-DD-HH` (UTC) key. The format is
//! fixed-width, so lexicographic order of keys equals chronological order.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

/// chrono format string for bucket keys.
pub const BUCKET_FORMAT: &str = "%Y-%m-%d-%H";

/// Map a timestamp to its hourly bucket key.
pub fn bucket_for(ts: DateTime<Utc>) -> String {
    ts.format(BUCKET_FORMAT).to_string()
}

/// Bucket key for "now".
pub fn current_bucket() -> String {
    bucket_for(Utc::now())
}

/// The bucket containing `now` and the `n - 1` hourly buckets before it,
/// **oldest first**. `n == 0` yields an empty list.
pub fn last_n_buckets(n: usize, now: DateTime<Utc>) -> Vec<String> {
    (0..n)
        .rev()
        .map(|back| bucket_for(now - Duration::hours(back as i64)))
        .collect()
}

/// Parse a bucket key back into the UTC instant its hour starts at.
/// Returns `None` for anything that is not a well-formed `YYYY-MM-DD-HH`.
pub fn parse_bucket(key: &str) -> Option<DateTime<Utc>> {
    // strict shape check first: chrono would also accept unpadded fields
    let b = key.as_bytes();
    if b.len() != 13 || b[4] != b'-' || b[7] != b'-' || b[10] != b'-' {
        return None;
    }
    if !key
        .bytes()
        .enumerate()
        .all(|(i, c)| matches!(i, 4 | 7 | 10) || c.is_ascii_digit())
    {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&format!("{key}:00:00"), "%Y-%m-%d-%H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Start of the hour containing `ts`.
pub fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_bucket_for_truncates_to_hour() {
        assert_eq!(bucket_for(at(2025, 1, 1, 10, 0, 0)), "2025-01-01-10");
        assert_eq!(bucket_for(at(2025, 1, 1, 10, 59, 59)), "2025-01-01-10");
        assert_eq!(bucket_for(at(2025, 12, 31, 23, 30, 0)), "2025-12-31-23");
    }

    #[test]
    fn test_bucket_for_is_deterministic_to_the_millisecond() {
        let ts = Utc.timestamp_millis_opt(1_735_725_600_123).unwrap();
        assert_eq!(bucket_for(ts), bucket_for(ts));
        assert_eq!(bucket_for(ts), "2025-01-01-10");
    }

    #[test]
    fn test_bucket_keys_sort_chronologically() {
        let times = [
            at(2024, 12, 31, 23, 0, 0),
            at(2025, 1, 1, 0, 0, 0),
            at(2025, 1, 1, 9, 0, 0),
            at(2025, 1, 1, 10, 0, 0),
            at(2025, 2, 1, 1, 0, 0),
            at(2025, 10, 1, 1, 0, 0),
        ];
        let keys: Vec<String> = times.iter().map(|t| bucket_for(*t)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_last_n_buckets_oldest_first() {
        let now = at(2025, 1, 1, 1, 15, 0);
        assert_eq!(
            last_n_buckets(3, now),
            vec!["2024-12-31-23", "2025-01-01-00", "2025-01-01-01"]
        );
        assert!(last_n_buckets(0, now).is_empty());
        assert_eq!(last_n_buckets(24, now).len(), 24);
    }

    #[test]
    fn test_parse_bucket() {
        assert_eq!(parse_bucket("2025-01-01-10"), Some(at(2025, 1, 1, 10, 0, 0)));
        assert_eq!(parse_bucket("2025-1-01-10"), None);
        assert_eq!(parse_bucket("2025-01-01T10"), None);
        assert_eq!(parse_bucket("2025-01-01-24"), None);
        assert_eq!(parse_bucket("garbage"), None);
    }

    #[test]
    fn test_hour_start() {
        assert_eq!(hour_start(at(2025, 1, 1, 10, 42, 7)), at(2025, 1, 1, 10, 0, 0));
    }
}
