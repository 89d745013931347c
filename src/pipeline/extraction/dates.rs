use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Date shapes accepted anywhere a date is expected, as a regex fragment.
pub const DATE_SHAPE: &str = r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{4}";

static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})$").expect("valid regex")
});

static DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})$").expect("valid regex")
});

/// Parse a printed date. Day-first is assumed when the year comes last.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let (y, m, d) = if let Some(c) = YEAR_FIRST.captures(raw) {
        (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
    } else if let Some(c) = DAY_FIRST.captures(raw) {
        (c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?)
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Parse and render as `YYYY-MM-DD`.
pub fn to_iso(raw: &str) -> Option<String> {
    parse_date(raw).map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_shapes_normalize_to_iso() {
        for raw in ["2024-03-15", "2024/03/15", "15/03/2024", "15-03-2024", "15.03.2024", "2024-3-5"] {
            let iso = to_iso(raw);
            assert!(iso.is_some(), "Expected {raw} to parse");
        }
        assert_eq!(to_iso("15/03/2024").as_deref(), Some("2024-03-15"));
        assert_eq!(to_iso("2024-3-5").as_deref(), Some("2024-03-05"));
    }

    #[test]
    fn impossible_calendar_dates_are_rejected() {
        assert_eq!(to_iso("2024-02-30"), None);
        assert_eq!(to_iso("31/04/2024"), None);
        assert_eq!(to_iso("2024-13-01"), None);
    }

    #[test]
    fn leap_day() {
        assert_eq!(to_iso("29/02/2024").as_deref(), Some("2024-02-29"));
        assert_eq!(to_iso("29/02/2023"), None);
    }

    #[test]
    fn free_text_is_not_a_date() {
        assert_eq!(parse_date("March 15"), None);
        assert_eq!(parse_date("2024"), None);
    }
}
