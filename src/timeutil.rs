//! Time helpers shared by the pricing paths

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::errors::{Result, SignalError};

/// Minimum time to expiry: one day, in years.
pub const MIN_TIME_TO_EXPIRY: f64 = 1.0 / 365.25;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// Parse an expiry given as an ISO-8601 datetime or a plain date
/// (interpreted as midnight UTC).
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    Err(SignalError::validation(format!(
        "Invalid expiry date format: '{raw}'"
    )))
}

/// Time to expiry in years, floored at one day for dates in the past.
pub fn time_to_expiry_years(expiry: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (expiry - now).num_seconds() as f64;
    (seconds / SECONDS_PER_YEAR).max(MIN_TIME_TO_EXPIRY)
}
