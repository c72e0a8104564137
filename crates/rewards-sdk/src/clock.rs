//! Calendar source for daily claim keys
//!
//! Every client-side day key is a UTC date. Procedures assign their own date
//! server-side; only the fallback tiers and the streak projection read this.

use chrono::{NaiveDate, Utc};

pub trait Clock: Send + Sync {
    /// Today's date in UTC
    fn today(&self) -> NaiveDate;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock pinned to one date, for tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Day key as stored in claim records (`YYYY-MM-DD`)
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored date; accepts bare dates and RFC 3339 timestamps
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc).date_naive())
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(parse_day("2025-03-14"), Some(expected));
        assert_eq!(parse_day("2025-03-14T23:30:00+00:00"), Some(expected));
        assert_eq!(parse_day("2025-03-14 08:00:00"), Some(expected));
        assert_eq!(parse_day("yesterday"), None);
    }

    #[test]
    fn test_timestamps_normalise_to_utc() {
        // 01:00 at +02:00 is still the previous day in UTC
        let date = parse_day("2025-03-15T01:00:00+02:00").unwrap();
        assert_eq!(day_key(date), "2025-03-14");
    }
}
