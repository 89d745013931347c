use serde::{Deserialize, Serialize};

use super::field::TrackedField;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub supplier_name: TrackedField<String>,
    pub supplier_address: TrackedField<String>,
    pub tax_id: TrackedField<String>,
    pub invoice_number: TrackedField<String>,
    /// ISO `YYYY-MM-DD`.
    pub issue_date: TrackedField<String>,
    /// ISO `YYYY-MM-DD`.
    pub due_date: TrackedField<String>,
    /// ISO 4217 code.
    pub currency: TrackedField<String>,
    /// Electronic invoice code, lowercase hex.
    pub cufe: TrackedField<String>,
    /// Supplier's CIIU activity code.
    pub economic_activity: TrackedField<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// Position of the row in the source table, 0-based.
    pub row_index: usize,
    pub description: TrackedField<String>,
    pub quantity: TrackedField<f64>,
    pub unit_price: TrackedField<f64>,
    pub line_total: TrackedField<f64>,
    /// quantity × unit_price does not match line_total within tolerance,
    /// or one of the three is missing.
    pub arithmetic_suspect: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: TrackedField<f64>,
    pub tax: TrackedField<f64>,
    pub total: TrackedField<f64>,
    /// Withholding tax rate in percent, when printed.
    pub withholding_rate: TrackedField<f64>,
}

/// Outcome of the `subtotal + tax = total` check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArithmeticCheck {
    Consistent { difference: f64 },
    Inconsistent { difference: f64 },
    Incomplete { missing: Vec<&'static str> },
}

impl ArithmeticCheck {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent { .. })
    }
}

impl InvoiceTotals {
    /// Check `|subtotal + tax − total| ≤ epsilon`.
    pub fn check_arithmetic(&self, epsilon: f64) -> ArithmeticCheck {
        let (subtotal, tax, total) = match (
            self.subtotal.copied(),
            self.tax.copied(),
            self.total.copied(),
        ) {
            (Some(s), Some(t), Some(g)) => (s, t, g),
            (s, t, g) => {
                let mut missing = Vec::new();
                if s.is_none() {
                    missing.push("subtotal");
                }
                if t.is_none() {
                    missing.push("tax");
                }
                if g.is_none() {
                    missing.push("total");
                }
                return ArithmeticCheck::Incomplete { missing };
            }
        };

        let difference = (subtotal + tax - total).abs();
        // Tolerate float representation error on top of epsilon.
        if difference <= epsilon + 1e-9 {
            ArithmeticCheck::Consistent { difference }
        } else {
            ArithmeticCheck::Inconsistent { difference }
        }
    }

    /// Effective tax rate in percent, if subtotal and tax are known.
    pub fn effective_tax_rate(&self) -> Option<f64> {
        let subtotal = self.subtotal.copied()?;
        let tax = self.tax.copied()?;
        if subtotal <= 0.0 {
            return None;
        }
        Some(tax / subtotal * 100.0)
    }
}

/// Header, items and totals: the unit the Normalizer and Validator work on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub header: InvoiceHeader,
    pub items: Vec<InvoiceItem>,
    pub totals: InvoiceTotals,
}

impl InvoiceRecord {
    /// Names of core header and totals fields with no value. Supplementary
    /// fields such as the CUFE are absent from most invoices and not listed.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let h = &self.header;
        let t = &self.totals;
        let checks: [(&'static str, bool); 10] = [
            ("supplier_name", h.supplier_name.is_missing()),
            ("supplier_address", h.supplier_address.is_missing()),
            ("tax_id", h.tax_id.is_missing()),
            ("invoice_number", h.invoice_number.is_missing()),
            ("issue_date", h.issue_date.is_missing()),
            ("due_date", h.due_date.is_missing()),
            ("currency", h.currency.is_missing()),
            ("subtotal", t.subtotal.is_missing()),
            ("tax", t.tax.is_missing()),
            ("total", t.total.is_missing()),
        ];
        checks
            .into_iter()
            .filter(|(_, missing)| *missing)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(subtotal: f64, tax: f64, total: f64) -> InvoiceTotals {
        InvoiceTotals {
            subtotal: TrackedField::extracted(subtotal, 90.0, "t"),
            tax: TrackedField::extracted(tax, 90.0, "t"),
            total: TrackedField::extracted(total, 90.0, "t"),
            ..InvoiceTotals::default()
        }
    }

    #[test]
    fn coherent_totals_pass() {
        let check = totals(80.00, 16.00, 96.00).check_arithmetic(0.01);
        assert!(check.is_consistent(), "Expected consistent, got {check:?}");
    }

    #[test]
    fn incoherent_total_is_flagged() {
        let check = totals(80.00, 16.00, 100.00).check_arithmetic(0.01);
        match check {
            ArithmeticCheck::Inconsistent { difference } => {
                assert!((difference - 4.0).abs() < 1e-9, "Expected 4.0, got {difference}");
            }
            other => panic!("Expected inconsistent, got {other:?}"),
        }
    }

    #[test]
    fn cent_level_rounding_stays_within_epsilon() {
        let check = totals(1000.10, 190.02, 1190.12).check_arithmetic(0.01);
        assert!(check.is_consistent());
    }

    #[test]
    fn missing_total_is_incomplete() {
        let mut t = totals(80.0, 16.0, 96.0);
        t.total = TrackedField::missing();
        assert_eq!(
            t.check_arithmetic(0.01),
            ArithmeticCheck::Incomplete { missing: vec!["total"] }
        );
    }

    #[test]
    fn effective_rate_from_subtotal_and_tax() {
        let rate = totals(100.0, 19.0, 119.0).effective_tax_rate().unwrap();
        assert!((rate - 19.0).abs() < 1e-9);
        let zero = totals(0.0, 0.0, 0.0).effective_tax_rate();
        assert!(zero.is_none());
    }

    #[test]
    fn empty_record_reports_every_core_field_missing() {
        let record = InvoiceRecord::default();
        let missing = record.missing_fields();
        assert_eq!(missing.len(), 10);
        assert!(!missing.contains(&"cufe"), "Supplementary fields are optional, got {missing:?}");
    }
}
