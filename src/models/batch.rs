use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::EntryStatus;
use super::result::InvoiceResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub source_file: String,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvoiceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn succeeded(source_file: String, result: InvoiceResult) -> Self {
        Self {
            source_file,
            status: EntryStatus::Succeeded,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(source_file: String, error: String) -> Self {
        Self {
            source_file,
            status: EntryStatus::Failed,
            result: None,
            error: Some(error),
        }
    }
}

/// Sums of extracted totals for one currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub documents: usize,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTally {
    pub passed: usize,
    pub failed: usize,
}

/// Consolidated record for a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub total_documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub count_valid: usize,
    pub count_invalid: usize,
    /// Keyed by ISO currency code, `"unknown"` when the currency was not found.
    pub totals_by_currency: BTreeMap<String, CurrencyTotals>,
    pub rule_tallies: BTreeMap<String, RuleTally>,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn from_entries(entries: Vec<BatchEntry>) -> Self {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut count_valid = 0;
        let mut count_invalid = 0;
        let mut totals_by_currency: BTreeMap<String, CurrencyTotals> = BTreeMap::new();
        let mut rule_tallies: BTreeMap<String, RuleTally> = BTreeMap::new();

        for entry in &entries {
            let Some(result) = &entry.result else {
                failed += 1;
                continue;
            };
            succeeded += 1;
            if result.valid {
                count_valid += 1;
            } else {
                count_invalid += 1;
            }

            let currency = result
                .header
                .currency
                .get()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let sums = totals_by_currency.entry(currency).or_default();
            sums.documents += 1;
            sums.subtotal += result.totals.subtotal.copied().unwrap_or(0.0);
            sums.tax += result.totals.tax.copied().unwrap_or(0.0);
            sums.total += result.totals.total.copied().unwrap_or(0.0);

            for finding in &result.findings {
                let tally = rule_tallies.entry(finding.rule_id.clone()).or_default();
                if finding.passed {
                    tally.passed += 1;
                } else {
                    tally.failed += 1;
                }
            }
        }

        Self {
            generated_at: Utc::now(),
            total_documents: entries.len(),
            succeeded,
            failed,
            count_valid,
            count_invalid,
            totals_by_currency,
            rule_tallies,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{OcrQuality, RuleClass};
    use crate::models::field::TrackedField;
    use crate::models::invoice::InvoiceRecord;
    use crate::models::result::{RunMetadata, ValidationFinding};
    use uuid::Uuid;

    fn result(valid: bool, currency: Option<&str>, total: f64) -> InvoiceResult {
        let mut record = InvoiceRecord::default();
        if let Some(c) = currency {
            record.header.currency = TrackedField::extracted(c.to_string(), 90.0, "c");
        }
        record.totals.total = TrackedField::extracted(total, 90.0, "t");
        let now = Utc::now();
        let findings = vec![ValidationFinding {
            rule_id: "totals.arithmetic".into(),
            class: RuleClass::Required,
            passed: valid,
            reason: String::new(),
            insufficient_evidence: false,
            citations: vec![],
        }];
        InvoiceResult::from_parts(
            record,
            findings,
            valid,
            RunMetadata {
                run_id: Uuid::new_v4(),
                document: "doc".into(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                page_count: 1,
                region_count: 0,
                engines: vec![],
                mean_region_confidence: 0.0,
                ocr_quality: OcrQuality::VeryLow,
                policy_index_generation: None,
                warnings: vec![],
            },
        )
    }

    #[test]
    fn counts_and_tallies_are_aggregated() {
        let report = BatchReport::from_entries(vec![
            BatchEntry::succeeded("a.png".into(), result(true, Some("COP"), 119.0)),
            BatchEntry::succeeded("b.png".into(), result(false, Some("COP"), 81.0)),
            BatchEntry::succeeded("c.png".into(), result(true, None, 10.0)),
            BatchEntry::failed("d.png".into(), "no recognition output".into()),
        ]);

        assert_eq!(report.total_documents, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.count_valid, 2);
        assert_eq!(report.count_invalid, 1);

        let cop = &report.totals_by_currency["COP"];
        assert_eq!(cop.documents, 2);
        assert!((cop.total - 200.0).abs() < 1e-9);
        assert!(report.totals_by_currency.contains_key("unknown"));

        let tally = &report.rule_tallies["totals.arithmetic"];
        assert_eq!((tally.passed, tally.failed), (2, 1));
    }

    #[test]
    fn failed_entry_serializes_error_without_result() {
        let entry = BatchEntry::failed("x.pdf".into(), "boom".into());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("result").is_none());
    }
}
