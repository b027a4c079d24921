//! Permissive calendar date grammar
//!
//! A value is a date when it parses under any of the formats below. Only
//! the calendar date survives: time-of-day and offsets are discarded by
//! the caller. Month-first numeric forms are tried before day-first ones,
//! so `05/06/2024` reads as May 6th.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// A strftime pattern with an example value it accepts.
#[derive(Debug, Clone, Copy)]
pub struct DateFormatSpec {
    pub pattern: &'static str,
    pub example: &'static str,
}

const fn spec(pattern: &'static str, example: &'static str) -> DateFormatSpec {
    DateFormatSpec { pattern, example }
}

/// Date-only formats (ordered by precedence)
pub const DATE_FORMATS: &[DateFormatSpec] = &[
    // ISO formats
    spec("%Y-%m-%d", "2024-05-31"),
    spec("%Y/%m/%d", "2024/05/31"),
    spec("%Y.%m.%d", "2024.05.31"),
    // US formats (MM/DD/YYYY)
    spec("%m/%d/%Y", "05/31/2024"),
    spec("%m-%d-%Y", "05-31-2024"),
    // European formats (DD/MM/YYYY)
    spec("%d/%m/%Y", "31/05/2024"),
    spec("%d-%m-%Y", "31-05-2024"),
    spec("%d.%m.%Y", "31.05.2024"),
    // Short year
    spec("%m/%d/%y", "05/31/24"),
    spec("%d/%m/%y", "31/05/24"),
    // Month names
    spec("%b %d %Y", "May 31 2024"),
    spec("%b %d, %Y", "May 31, 2024"),
    spec("%B %d %Y", "May 31 2024"),
    spec("%B %d, %Y", "May 31, 2024"),
    spec("%d %b %Y", "31 May 2024"),
    spec("%d %B %Y", "31 May 2024"),
    spec("%d-%b-%Y", "31-May-2024"),
    spec("%a, %d %b %Y", "Fri, 31 May 2024"),
];

/// Date + time-of-day formats without an offset
pub const DATETIME_FORMATS: &[DateFormatSpec] = &[
    spec("%Y-%m-%dT%H:%M:%S%.f", "2024-05-31T13:45:00.123"),
    spec("%Y-%m-%d %H:%M:%S%.f", "2024-05-31 13:45:00.123"),
    spec("%Y-%m-%dT%H:%M", "2024-05-31T13:45"),
    spec("%Y-%m-%d %H:%M", "2024-05-31 13:45"),
    spec("%Y/%m/%d %H:%M:%S", "2024/05/31 13:45:00"),
    spec("%m/%d/%Y %H:%M:%S", "05/31/2024 13:45:00"),
    spec("%m/%d/%Y %H:%M", "05/31/2024 13:45"),
    spec("%m/%d/%Y %I:%M:%S %p", "05/31/2024 01:45:00 PM"),
    spec("%m/%d/%Y %I:%M %p", "05/31/2024 01:45 PM"),
    spec("%d/%m/%Y %H:%M:%S", "31/05/2024 13:45:00"),
    spec("%d/%m/%Y %H:%M", "31/05/2024 13:45"),
    spec("%b %d %Y %H:%M:%S", "May 31 2024 13:45:00"),
    spec("%b %d, %Y %H:%M:%S", "May 31, 2024 13:45:00"),
    spec("%d %b %Y %H:%M:%S", "31 May 2024 13:45:00"),
];

/// Parse `text` as a calendar date, discarding any time-of-day.
///
/// For values carrying an offset the date is the one written in the
/// value, not the date after shifting to UTC.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local().date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.naive_local().date());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f.pattern).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f.pattern).ok())
        })
}
