//! Value classification and conversion
//!
//! Every cell is looked at on its own: [`classify`] tags the text with the
//! first [`PropertyType`] it satisfies, in priority order, and [`convert`]
//! turns text into the JSON value for a declared type. Column types come
//! from a majority vote over classified samples (see [`majority`]).
//!
//! # Classification order
//!
//! 1. integer: parses as a finite number, no `.` in the text
//! 2. number: parses as a finite number, with a `.`
//! 3. boolean: `true`/`false` (and `t`/`f` when permissive), any case
//! 4. datetime: see [`date_formats`]
//! 5. string: everything else

pub mod date_formats;
pub mod majority;

pub use date_formats::{parse_date, DATE_FORMATS, DATETIME_FORMATS};
pub use majority::{infer_column, ColumnTallies, TypeTally};

use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tabula_protocol::PropertyType;
use thiserror::Error;

use crate::config::{BooleanTokens, InferenceConfig};

/// Wire format for datetime values: UTC with millisecond precision.
pub const DATETIME_WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("'{text}' is not a valid {expected}")]
    Unconvertible {
        expected: PropertyType,
        text: String,
    },

    #[error("Midnight of {date} does not exist in {tz}")]
    NoMidnight { date: NaiveDate, tz: Tz },
}

/// Tag `text` with the first type it satisfies.
pub fn classify(text: &str, tokens: BooleanTokens) -> PropertyType {
    let text = text.trim();
    if is_integer_literal(text) {
        return PropertyType::Integer;
    }
    if is_numeric(text) {
        return PropertyType::Number;
    }
    if parse_boolean(text, tokens).is_some() {
        return PropertyType::Boolean;
    }
    if parse_date(text).is_some() {
        return PropertyType::DateTime;
    }
    PropertyType::String
}

/// Convert `text` into the JSON value for `declared`.
///
/// Strings are passed through untouched; every other type is parsed from
/// the trimmed text.
pub fn convert(
    declared: PropertyType,
    text: &str,
    config: &InferenceConfig,
) -> Result<Value, InferenceError> {
    let trimmed = text.trim();
    let unconvertible = || InferenceError::Unconvertible {
        expected: declared,
        text: text.to_string(),
    };

    match declared {
        PropertyType::Integer => {
            if !is_integer_literal(trimmed) {
                return Err(unconvertible());
            }
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            // Out of i64 range
            parse_finite(trimmed)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(unconvertible)
        }
        PropertyType::Number => parse_finite(trimmed)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(unconvertible),
        PropertyType::Boolean => parse_boolean(trimmed, config.boolean_tokens)
            .map(Value::Bool)
            .ok_or_else(unconvertible),
        PropertyType::DateTime => {
            let date = parse_date(trimmed).ok_or_else(unconvertible)?;
            midnight_utc(date, config.reference_tz).map(Value::String)
        }
        PropertyType::String => Ok(Value::String(text.to_string())),
    }
}

/// Match `text` against the boolean token set, ignoring case.
pub fn parse_boolean(text: &str, tokens: BooleanTokens) -> Option<bool> {
    let lower = text.trim().to_ascii_lowercase();
    match (lower.as_str(), tokens) {
        ("true", _) | ("t", BooleanTokens::Permissive) => Some(true),
        ("false", _) | ("f", BooleanTokens::Permissive) => Some(false),
        _ => None,
    }
}

/// Midnight of `date` in `tz`, rendered in UTC.
pub fn midnight_utc(date: NaiveDate, tz: Tz) -> Result<String, InferenceError> {
    let local = date.and_hms_opt(0, 0, 0).ok_or(InferenceError::NoMidnight { date, tz })?;
    let instant = tz
        .from_local_datetime(&local)
        .earliest()
        .ok_or(InferenceError::NoMidnight { date, tz })?;
    Ok(instant
        .with_timezone(&Utc)
        .format(DATETIME_WIRE_FORMAT)
        .to_string())
}

/// Optional sign followed by ASCII digits only.
fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_numeric(text: &str) -> bool {
    text.bytes().any(|b| b.is_ascii_digit()) && parse_finite(text).is_some()
}

fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
