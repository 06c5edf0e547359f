use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::LessonError;

/// Normalizes a caller-supplied date to the calendar day used in session keys.
///
/// Timestamps are truncated to start-of-day in their own offset, so
/// `2024-03-01T23:30:00-05:00` keys as 2024-03-01.
pub fn normalize_session_date(raw: &str) -> Result<NaiveDate, LessonError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(LessonError::validation("date must not be empty"));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(LessonError::validation(format!(
        "date must be YYYY-MM-DD or an RFC 3339 timestamp, got {:?}",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn plain_dates_pass_through() {
        assert_eq!(normalize_session_date("2024-03-01").unwrap(), day(2024, 3, 1));
        assert_eq!(normalize_session_date(" 2024-03-01 ").unwrap(), day(2024, 3, 1));
    }

    #[test]
    fn timestamps_truncate_to_their_own_day() {
        assert_eq!(
            normalize_session_date("2024-03-01T23:30:00-05:00").unwrap(),
            day(2024, 3, 1)
        );
        assert_eq!(
            normalize_session_date("2024-03-01T00:00:00Z").unwrap(),
            day(2024, 3, 1)
        );
        assert_eq!(
            normalize_session_date("2024-03-01T14:05:09.250").unwrap(),
            day(2024, 3, 1)
        );
        assert_eq!(
            normalize_session_date("2024-03-01 08:15:00").unwrap(),
            day(2024, 3, 1)
        );
    }

    #[test]
    fn same_day_inputs_share_a_key() {
        let a = normalize_session_date("2024-03-01").unwrap();
        let b = normalize_session_date("2024-03-01T09:00:00+02:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_blank_and_garbage() {
        assert!(matches!(
            normalize_session_date("   "),
            Err(LessonError::Validation(_))
        ));
        assert!(normalize_session_date("03/01/2024").is_err());
        assert!(normalize_session_date("2024-02-30").is_err());
    }
}
