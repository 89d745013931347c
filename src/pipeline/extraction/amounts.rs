//! Monetary amounts and quantities as printed on invoices.
//!
//! Separator rules, applied after dropping currency marks and spaces:
//! - both `.` and `,` present: the last one is the decimal separator
//! - one kind, repeated: thousands grouping (`1.071.000`)
//! - one kind, once, followed by exactly three digits after a 1–3 digit
//!   non-zero head: thousands grouping (`50.000`)
//! - otherwise it is the decimal separator (`5600,17`, `96.00`)

use std::sync::LazyLock;

use regex::Regex;

/// A token that reads as a number, optionally with a currency mark.
static NUMERIC_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[$€£]|US\$|COP|USD|EUR)?\s*-?\d[\d.,]*%?$").expect("valid regex")
});

pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let negative =
        trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if !cleaned.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    let dots = cleaned.matches('.').count();
    let commas = cleaned.matches(',').count();

    let canonical = match (dots, commas) {
        (0, 0) => cleaned.to_string(),
        (d, c) if d > 0 && c > 0 => {
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let (decimal, grouping) = if last_dot > last_comma { ('.', ',') } else { (',', '.') };
            cleaned
                .chars()
                .filter(|&ch| ch != grouping)
                .map(|ch| if ch == decimal { '.' } else { ch })
                .collect()
        }
        (d, c) => {
            let sep = if d > 0 { '.' } else { ',' };
            let count = d.max(c);
            if count > 1 || is_thousands_group(cleaned, sep) {
                cleaned.chars().filter(|&ch| ch != sep).collect()
            } else {
                cleaned.replace(sep, ".")
            }
        }
    };

    let value: f64 = canonical.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// `50.000` or `1,500`: one separator, 1–3 digit head not starting with 0, exactly 3 trailing digits.
fn is_thousands_group(s: &str, sep: char) -> bool {
    match s.split_once(sep) {
        Some((head, tail)) => {
            tail.len() == 3 && (1..=3).contains(&head.len()) && !head.starts_with('0')
        }
        None => false,
    }
}

/// Whether a whitespace-delimited token is a number for table purposes.
pub fn is_numeric_token(token: &str) -> bool {
    NUMERIC_TOKEN.is_match(token)
}

/// Values within a relative or absolute tolerance of each other.
pub fn approx_equal(a: f64, b: f64, relative: f64, absolute: f64) -> bool {
    (a - b).abs() <= absolute.max(relative * b.abs().max(a.abs())) + 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(raw: &str) -> f64 {
        parse_amount(raw).unwrap_or_else(|| panic!("Expected {raw:?} to parse"))
    }

    #[test]
    fn plain_decimal() {
        assert_eq!(amount("96.00"), 96.0);
        assert_eq!(amount("$ 96.00"), 96.0);
        assert_eq!(amount("5600,17"), 5600.17);
    }

    #[test]
    fn repeated_separator_is_grouping() {
        assert_eq!(amount("1.071.000"), 1_071_000.0);
        assert_eq!(amount("1,071,000"), 1_071_000.0);
    }

    #[test]
    fn mixed_separators_last_is_decimal() {
        assert_eq!(amount("1,071,000.50"), 1_071_000.5);
        assert_eq!(amount("1.071.000,50"), 1_071_000.5);
    }

    #[test]
    fn single_group_of_three_is_thousands() {
        assert_eq!(amount("$50.000"), 50_000.0);
        assert_eq!(amount("171.000"), 171_000.0);
        assert_eq!(amount("0.125"), 0.125);
        assert_eq!(amount("1234.567"), 1234.567);
    }

    #[test]
    fn negatives() {
        assert_eq!(amount("-12.50"), -12.5);
        assert_eq!(amount("(12.50)"), -12.5);
    }

    #[test]
    fn not_a_number() {
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount("."), None);
    }

    #[test]
    fn numeric_tokens() {
        assert!(is_numeric_token("40.00"));
        assert!(is_numeric_token("$1.071.000"));
        assert!(is_numeric_token("2"));
        assert!(!is_numeric_token("INV-2024-001"));
        assert!(!is_numeric_token("Widget"));
        assert!(!is_numeric_token("900.123.456-7"));
    }

    #[test]
    fn tolerance() {
        assert!(approx_equal(80.0, 80.4, 0.01, 0.01));
        assert!(!approx_equal(80.0, 82.0, 0.01, 0.01));
        assert!(approx_equal(0.0, 0.005, 0.01, 0.01));
    }
}
