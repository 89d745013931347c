//! Declared output formats, one per normalizable field.
//!
//! A model answer is accepted only when it matches the anchored pattern in
//! full; dates must also exist on the calendar.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::pipeline::extraction::FieldKey;

pub struct DeclaredFormat {
    pub field: FieldKey,
    /// Shown to the model, e.g. `YYYY-MM-DD`.
    pub description: &'static str,
    pattern: Regex,
    extra_check: Option<fn(&str) -> bool>,
}

impl DeclaredFormat {
    fn new(field: FieldKey, description: &'static str, pattern: &str) -> Self {
        Self {
            field,
            description,
            pattern: Regex::new(pattern).expect("valid format pattern"),
            extra_check: None,
        }
    }

    /// Whether `value` satisfies the format exactly.
    pub fn accepts(&self, value: &str) -> bool {
        self.pattern.is_match(value) && self.extra_check.map_or(true, |check| check(value))
    }
}

fn is_calendar_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

static FORMATS: LazyLock<Vec<DeclaredFormat>> = LazyLock::new(|| {
    use FieldKey::*;

    const AMOUNT: &str = r"^-?\d{1,12}(?:\.\d{1,2})?$";
    let date = |field| DeclaredFormat {
        extra_check: Some(is_calendar_date),
        ..DeclaredFormat::new(field, "YYYY-MM-DD", r"^\d{4}-\d{2}-\d{2}$")
    };

    vec![
        DeclaredFormat::new(
            SupplierName,
            "company name as printed, letters digits and punctuation only",
            r"^[\p{L}0-9&.,'\- ]{2,80}$",
        ),
        DeclaredFormat::new(
            SupplierAddress,
            "street address on one line",
            r"^[\p{L}0-9#°º.,'/\- ]{5,120}$",
        ),
        DeclaredFormat::new(
            TaxId,
            "6 to 15 digits, optionally followed by -<check digit>, no dots or spaces",
            r"^\d{6,15}(?:-\d)?$",
        ),
        DeclaredFormat::new(
            InvoiceNumber,
            "uppercase letters, digits, '-' or '/', no spaces",
            r"^[A-Z0-9][A-Z0-9\-/]{0,29}$",
        ),
        date(IssueDate),
        date(DueDate),
        DeclaredFormat::new(Currency, "ISO 4217 code, three uppercase letters", r"^[A-Z]{3}$"),
        DeclaredFormat::new(Subtotal, "plain number with '.' as decimal point, no thousands separators", AMOUNT),
        DeclaredFormat::new(Tax, "plain number with '.' as decimal point, no thousands separators", AMOUNT),
        DeclaredFormat::new(Total, "plain number with '.' as decimal point, no thousands separators", AMOUNT),
    ]
});

/// The declared format for a field.
pub fn format_for(field: FieldKey) -> Option<&'static DeclaredFormat> {
    FORMATS.iter().find(|f| f.field == field)
}
