//! Shared parsing utilities for raw incident records.
//!
//! Date, time-of-day, and coordinate coercions used by the field-mapping
//! extractors in [`crate::source_def`].

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Utc,
};

/// Datetime layouts without an offset, tried in order.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date-only layouts, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// A datetime string parsed into whichever precision it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedDateTime {
    /// Carried its own UTC offset.
    Zoned(DateTime<FixedOffset>),
    /// Wall-clock time in the source's local zone.
    Local(NaiveDateTime),
    /// Calendar date with no time of day.
    DateOnly(NaiveDate),
}

impl ParsedDateTime {
    /// The calendar date in the value's own zone.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Zoned(dt) => dt.date_naive(),
            Self::Local(naive) => naive.date(),
            Self::DateOnly(date) => *date,
        }
    }
}

/// Parses an ISO 8601 (optionally fractional, optionally offset) or US
/// style datetime. Date-only strings parse as [`ParsedDateTime::DateOnly`].
#[must_use]
pub fn parse_datetime(s: &str) -> Option<ParsedDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ParsedDateTime::Zoned(dt));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ParsedDateTime::Local(naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(ParsedDateTime::DateOnly(date));
        }
    }
    None
}

/// Last representable second of a day, used for `2400` style times.
#[must_use]
pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Time assigned to incidents whose time of day is unknown.
#[must_use]
pub fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Parses an `HHMM` time, zero-padding short values (`"30"` is 00:30).
///
/// `"2400"` maps to 23:59:59. Anything else outside a valid clock time
/// returns `None`.
#[must_use]
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.is_empty() || s.len() > 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{s:0>4}");
    let hour = padded[..2].parse::<u32>().ok()?;
    let minute = padded[2..].parse::<u32>().ok()?;
    if hour == 24 && minute == 0 {
        return Some(end_of_day());
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parses an `HH:MM:SS` (or `HH:MM`) time. `"24:00:00"` maps to 23:59:59.
#[must_use]
pub fn parse_hhmmss(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s == "24:00:00" || s == "24:00" {
        return Some(end_of_day());
    }
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Interprets a wall-clock time in a fixed-offset zone as a UTC instant.
#[must_use]
pub fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Coerces a JSON string or number into an `f64`.
#[must_use]
pub fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerces a JSON string or number into trimmed text. Integral floats are
/// rendered without a fractional part (`1430.0` becomes `"1430"`).
#[must_use]
pub fn coerce_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i.to_string());
            }
            let f = n.as_f64()?;
            if f.is_finite() && f.fract() == 0.0 {
                #[allow(clippy::cast_possible_truncation)]
                return Some((f as i64).to_string());
            }
            Some(f.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Timelike as _;

    use super::*;

    #[test]
    fn parses_iso_with_fractional() {
        let parsed = parse_datetime("2024-01-15T14:30:00.000").unwrap();
        let ParsedDateTime::Local(naive) = parsed else {
            panic!("expected local datetime, got {parsed:?}");
        };
        assert_eq!(naive.to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn parses_iso_without_fractional() {
        assert!(matches!(
            parse_datetime("2024-01-15T14:30:00"),
            Some(ParsedDateTime::Local(_))
        ));
    }

    #[test]
    fn parses_offset_datetime_as_zoned() {
        let parsed = parse_datetime("2024-01-15T14:30:00-08:00").unwrap();
        let ParsedDateTime::Zoned(dt) = parsed else {
            panic!("expected zoned datetime, got {parsed:?}");
        };
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.with_timezone(&Utc).hour(), 22);
    }

    #[test]
    fn parses_us_style_datetime() {
        let parsed = parse_datetime("01/15/2024 02:30:00 PM").unwrap();
        let ParsedDateTime::Local(naive) = parsed else {
            panic!("expected local datetime, got {parsed:?}");
        };
        assert_eq!(naive.hour(), 14);
    }

    #[test]
    fn parses_date_only() {
        assert_eq!(
            parse_datetime("2024-01-15"),
            Some(ParsedDateTime::DateOnly(
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
            ))
        );
    }

    #[test]
    fn rejects_invalid_date() {
        assert!(parse_datetime("not-a-date").is_none());
        assert!(parse_datetime("   ").is_none());
    }

    #[test]
    fn hhmm_zero_pads_short_values() {
        assert_eq!(
            parse_hhmm("30"),
            Some(NaiveTime::from_hms_opt(0, 30, 0).unwrap())
        );
        assert_eq!(
            parse_hhmm("930"),
            Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
        assert_eq!(
            parse_hhmm("1430"),
            Some(NaiveTime::from_hms_opt(14, 30, 0).unwrap())
        );
    }

    #[test]
    fn hhmm_2400_is_end_of_day() {
        assert_eq!(parse_hhmm("2400"), Some(end_of_day()));
        assert_eq!(parse_hhmmss("24:00:00"), Some(end_of_day()));
    }

    #[test]
    fn hhmm_rejects_garbage() {
        assert!(parse_hhmm("2561").is_none());
        assert!(parse_hhmm("12:30").is_none());
        assert!(parse_hhmm("").is_none());
        assert!(parse_hhmm("12345").is_none());
    }

    #[test]
    fn hhmmss_accepts_minutes_only() {
        assert_eq!(
            parse_hhmmss("07:05"),
            Some(NaiveTime::from_hms_opt(7, 5, 0).unwrap())
        );
    }

    #[test]
    fn local_time_shifts_by_offset() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let offset = FixedOffset::west_opt(8 * 3600).unwrap();
        let utc = local_to_utc(naive, offset).unwrap();
        assert_eq!(utc.to_string(), "2024-01-16 06:00:00 UTC");
    }

    #[test]
    fn coerces_numbers_and_strings() {
        assert_eq!(coerce_f64(&serde_json::json!("34.05")), Some(34.05));
        assert_eq!(coerce_f64(&serde_json::json!(-118.2)), Some(-118.2));
        assert_eq!(coerce_f64(&serde_json::json!(null)), None);
        assert_eq!(coerce_text(&serde_json::json!(1430.0)).as_deref(), Some("1430"));
        assert_eq!(coerce_text(&serde_json::json!(210)).as_deref(), Some("210"));
        assert_eq!(coerce_text(&serde_json::json!("  ")), None);
    }
}
