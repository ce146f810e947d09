//! Timestamp utilities

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC timestamp as RFC 3339 text, the storage format for all timestamp columns
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Current UTC calendar day
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Date `days_back` days before today (negative values clamp to today)
pub fn cutoff_date(days_back: i64) -> NaiveDate {
    today() - Duration::days(days_back.max(0))
}

/// Parse a stored timestamp, accepting RFC 3339 or `YYYY-MM-DD HH:MM:SS`
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
