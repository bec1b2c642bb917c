//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service: money formatting, campaign-local
//! time arithmetic and UTC offset parsing.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};

/// Seconds in one calendar day.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Widest offset in civil use (±14:00).
const MAX_OFFSET_SECS: i32 = 14 * 3600;

/// Format an amount in minor currency units as a human-readable string.
///
/// Minor units are hundredths (cents), so 1,000 minor units = 10.00.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_minor_units(2_000), "20.00");
/// assert_eq!(format_minor_units(123_456_789), "1,234,567.89");
/// ```
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / 100;
    let frac = abs % 100;

    // Add thousands separators
    let whole_str = whole.to_string();
    let mut result = String::new();
    for (i, c) in whole_str.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    let reversed: String = result.chars().rev().collect();

    format!("{}{}.{:02}", sign, reversed, frac)
}

/// Parse a fixed UTC offset such as `"+05:30"`, `"-0400"`, `"Z"` or `"UTC"`.
///
/// ## Returns
///
/// * `Ok(FixedOffset)` - Parsed offset
/// * `Err(String)` - Malformed input or offset beyond ±14:00
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let offset: FixedOffset = trimmed
        .parse()
        .map_err(|e| format!("Offset must look like +HH:MM ({}): {}", e, raw))?;

    if offset.local_minus_utc().abs() > MAX_OFFSET_SECS {
        return Err(format!("Offset out of range: {}", raw));
    }
    Ok(offset)
}

/// Render a fixed offset back to `+HH:MM` form.
pub fn format_utc_offset(offset: &FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total < 0 { '-' } else { '+' };
    let abs = total.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Calendar date of `now` in the given offset.
pub fn local_date(now: DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    now.with_timezone(offset).date_naive()
}

/// Seconds elapsed since local midnight in the given offset.
pub fn seconds_since_local_midnight(now: DateTime<Utc>, offset: &FixedOffset) -> u32 {
    now.with_timezone(offset).num_seconds_from_midnight()
}

/// Ratio with an explicit zero-denominator guard.
///
/// Returns `0.0` when the denominator is zero so derived metrics
/// never carry NaN or infinity.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(2_000), "20.00");
        assert_eq!(format_minor_units(0), "0.00");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(123_456_789), "1,234,567.89");
        assert_eq!(format_minor_units(-150), "-1.50");
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19_800);
        assert_eq!(parse_utc_offset("-0400").unwrap().local_minus_utc(), -14_400);

        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+5:3").is_err());
        assert!(parse_utc_offset("+15:00").is_err());
        assert!(parse_utc_offset("+14:00").is_ok());
        assert!(parse_utc_offset("-14:30").is_err());
        assert_eq!(parse_utc_offset(" utc ").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn test_offset_round_trip_format() {
        let offset = parse_utc_offset("-03:30").unwrap();
        assert_eq!(format_utc_offset(&offset), "-03:30");
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        // 02:00 UTC is still the previous evening in Miami (-04:00)
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap();
        let miami = parse_utc_offset("-04:00").unwrap();
        assert_eq!(local_date(now, &miami), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        assert_eq!(seconds_since_local_midnight(now, &miami), 22 * 3600);
    }

    #[test]
    fn test_safe_ratio_guards_zero() {
        assert_eq!(safe_ratio(5.0, 0.0), 0.0);
        assert_eq!(safe_ratio(0.0, 0.0), 0.0);
        assert_eq!(safe_ratio(1.0, 4.0), 0.25);
    }
}
