//! Normalizer: fills gaps in an extracted record with model answers.
//!
//! Candidates are the fields that are missing or extracted below the trust
//! floor. Each gets one bounded prompt; the answer is accepted only if it
//! passes the field's declared format. Trusted fields are never candidates,
//! so evidence cannot be overwritten.

use std::sync::Arc;

use super::format::format_for;
use super::model::LanguageModel;
use super::prompt::{build_field_prompt, parse_answer};
use super::sanitize::{sanitize_excerpt, sanitize_output};
use crate::models::{FieldAlternative, InvoiceRecord, PipelineStage, PipelineWarning, TrackedField};
use crate::pipeline::extraction::{FieldKey, ALL_FIELDS};
use crate::pipeline_config::NormalizerConfig;

#[derive(Debug)]
pub struct NormalizationOutcome {
    pub record: InvoiceRecord,
    pub warnings: Vec<PipelineWarning>,
    /// Fields upgraded to `normalized`, in processing order.
    pub normalized_fields: Vec<&'static str>,
}

pub struct Normalizer {
    model: Option<Arc<dyn LanguageModel>>,
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, config: NormalizerConfig) -> Self {
        Self { model, config }
    }

    pub fn normalize(&self, mut record: InvoiceRecord, full_text: &str) -> NormalizationOutcome {
        let floor = self.config.trust_floor;
        let mut warnings = Vec::new();
        let mut normalized_fields = Vec::new();

        let candidates: Vec<FieldKey> = ALL_FIELDS
            .into_iter()
            .filter(|f| !slot(&mut record, *f).is_trusted(floor))
            .collect();

        let model = match &self.model {
            Some(model) if self.config.enabled => model,
            _ => {
                tracing::debug!("Normalizer disabled, record passes through");
                return NormalizationOutcome {
                    record,
                    warnings,
                    normalized_fields,
                };
            }
        };

        if candidates.is_empty() {
            tracing::debug!("Every field trusted, nothing to normalize");
            return NormalizationOutcome {
                record,
                warnings,
                normalized_fields,
            };
        }

        let unavailable = match model.is_available() {
            Ok(true) => None,
            Ok(false) => Some(format!("model {} is not installed", model.name())),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = unavailable {
            tracing::warn!(model = model.name(), reason = %reason, "Normalizer skipped");
            warnings.push(PipelineWarning::new(
                PipelineStage::Normalization,
                format!("Normalizer skipped ({reason}); {} field(s) left unchanged", candidates.len()),
            ));
            return NormalizationOutcome {
                record,
                warnings,
                normalized_fields,
            };
        }

        let excerpt = sanitize_excerpt(full_text, self.config.prompt_excerpt_chars);
        let known: Vec<(&'static str, String)> = ALL_FIELDS
            .into_iter()
            .filter_map(|f| {
                let s = slot(&mut record, f);
                if s.is_trusted(floor) {
                    s.display_value().map(|v| (f.as_str(), v))
                } else {
                    None
                }
            })
            .collect();

        tracing::info!(
            model = model.name(),
            candidates = candidates.len(),
            "Normalizing low-confidence fields"
        );

        for field in candidates {
            let Some(format) = format_for(field) else {
                continue;
            };
            let uncertain = slot(&mut record, field).display_value();
            let prompt = build_field_prompt(field.as_str(), format, &known, uncertain.as_deref(), &excerpt);

            let raw = match model.complete(&prompt, format) {
                Ok(raw) => raw,
                Err(e) if e.is_connection() => {
                    tracing::warn!(field = field.as_str(), error = %e, "Model connection lost");
                    warnings.push(PipelineWarning::new(
                        PipelineStage::Normalization,
                        format!("Model connection lost at {}: {e}", field.as_str()),
                    ));
                    break;
                }
                Err(e) => {
                    tracing::warn!(field = field.as_str(), error = %e, "Model call failed");
                    warnings.push(PipelineWarning::new(
                        PipelineStage::Normalization,
                        format!("Model call for {} failed: {e}", field.as_str()),
                    ));
                    continue;
                }
            };

            let Some(answer) = parse_answer(&sanitize_output(&raw)) else {
                tracing::debug!(field = field.as_str(), "Model gave no value");
                continue;
            };
            // The answer must already be in the declared form; nothing is
            // rewritten before the gate.
            let value = answer.value.trim();
            if !format.accepts(value) {
                tracing::debug!(
                    field = field.as_str(),
                    format = format.description,
                    "Answer rejected by declared format"
                );
                continue;
            }

            let rationale = answer
                .rationale
                .unwrap_or_else(|| format!("inferred by {}", model.name()));
            if slot(&mut record, field).upgrade(value, self.config.normalized_confidence, rationale) {
                tracing::debug!(field = field.as_str(), "Field normalized");
                normalized_fields.push(field.as_str());
            }
        }

        tracing::info!(normalized = ?normalized_fields, "Normalization finished");
        NormalizationOutcome {
            record,
            warnings,
            normalized_fields,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Field access by key
// ═══════════════════════════════════════════════════════════

enum Slot<'a> {
    Text(&'a mut TrackedField<String>),
    Amount(&'a mut TrackedField<f64>),
}

fn slot(record: &mut InvoiceRecord, field: FieldKey) -> Slot<'_> {
    let h = &mut record.header;
    let t = &mut record.totals;
    match field {
        FieldKey::SupplierName => Slot::Text(&mut h.supplier_name),
        FieldKey::SupplierAddress => Slot::Text(&mut h.supplier_address),
        FieldKey::TaxId => Slot::Text(&mut h.tax_id),
        FieldKey::InvoiceNumber => Slot::Text(&mut h.invoice_number),
        FieldKey::IssueDate => Slot::Text(&mut h.issue_date),
        FieldKey::DueDate => Slot::Text(&mut h.due_date),
        FieldKey::Currency => Slot::Text(&mut h.currency),
        FieldKey::Cufe => Slot::Text(&mut h.cufe),
        FieldKey::EconomicActivity => Slot::Text(&mut h.economic_activity),
        FieldKey::Subtotal => Slot::Amount(&mut t.subtotal),
        FieldKey::Tax => Slot::Amount(&mut t.tax),
        FieldKey::Total => Slot::Amount(&mut t.total),
        FieldKey::WithholdingRate => Slot::Amount(&mut t.withholding_rate),
    }
}

impl Slot<'_> {
    fn is_trusted(&self, floor: f32) -> bool {
        match self {
            Slot::Text(f) => f.is_trusted(floor),
            Slot::Amount(f) => f.is_trusted(floor),
        }
    }

    fn display_value(&self) -> Option<String> {
        match self {
            Slot::Text(f) => f.get().cloned(),
            Slot::Amount(f) => f.copied().map(|v| format!("{v:.2}")),
        }
    }

    /// Replace with a normalized value. A value equal to the current one
    /// leaves the field as it is.
    fn upgrade(self, value: &str, confidence: f32, rationale: String) -> bool {
        match self {
            Slot::Text(f) => replace_field(f, value.to_string(), confidence, rationale),
            Slot::Amount(f) => match value.parse::<f64>() {
                Ok(v) => replace_field(f, v, confidence, rationale),
                Err(_) => false,
            },
        }
    }
}

fn replace_field<T: Clone + PartialEq>(
    field: &mut TrackedField<T>,
    value: T,
    confidence: f32,
    rationale: String,
) -> bool {
    if field.get() == Some(&value) {
        return false;
    }
    let mut alternatives = std::mem::take(&mut field.alternatives);
    if let Some(previous) = field.value.take() {
        alternatives.insert(
            0,
            FieldAlternative {
                value: previous,
                confidence: field.confidence,
                pattern: field.rationale.take().unwrap_or_else(|| "extracted".to_string()),
            },
        );
    }
    *field = TrackedField::normalized(value, confidence, rationale).with_alternatives(alternatives);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;
    use crate::pipeline::normalize::model::MockLanguageModel;

    fn config() -> NormalizerConfig {
        NormalizerConfig::default()
    }

    fn normalizer(model: MockLanguageModel) -> (Normalizer, Arc<MockLanguageModel>) {
        let model = Arc::new(model);
        let dyn_model: Arc<dyn LanguageModel> = model.clone();
        (Normalizer::new(Some(dyn_model), config()), model)
    }

    fn fully_extracted() -> InvoiceRecord {
        let mut r = InvoiceRecord::default();
        let text = |v: &str| TrackedField::extracted(v.to_string(), 90.0, "p");
        r.header.supplier_name = text("ACME S.A.S.");
        r.header.supplier_address = text("Calle 50 #30-20");
        r.header.tax_id = text("900123456-7");
        r.header.invoice_number = text("INV-2024-001");
        r.header.issue_date = text("2024-03-15");
        r.header.due_date = text("2024-04-14");
        r.header.currency = text("COP");
        r.totals.subtotal = TrackedField::extracted(80.0, 90.0, "p");
        r.totals.tax = TrackedField::extracted(16.0, 90.0, "p");
        r.totals.total = TrackedField::extracted(96.0, 90.0, "p");
        r
    }

    #[test]
    fn trusted_fields_are_never_sent_to_the_model() {
        let (n, model) = normalizer(MockLanguageModel::new().answer(FieldKey::Total, "VALUE: 1"));
        let record = fully_extracted();
        let outcome = n.normalize(record.clone(), "text");
        assert_eq!(model.calls(), 0);
        assert_eq!(outcome.record, record);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn fills_missing_field_with_rationale() {
        let (n, _) = normalizer(
            MockLanguageModel::new().answer(FieldKey::TaxId, "VALUE: 900123456-7\nRATIONALE: printed after NIT"),
        );
        let mut record = fully_extracted();
        record.header.tax_id = TrackedField::missing();

        let outcome = n.normalize(record, "NIT 900123456-7");
        let tax_id = &outcome.record.header.tax_id;
        assert_eq!(tax_id.provenance, Provenance::Normalized);
        assert_eq!(tax_id.get().map(String::as_str), Some("900123456-7"));
        assert_eq!(tax_id.confidence, 50.0);
        assert_eq!(tax_id.rationale.as_deref(), Some("printed after NIT"));
        assert_eq!(outcome.normalized_fields, vec!["tax_id"]);
    }

    #[test]
    fn answer_violating_format_is_discarded() {
        let (n, model) = normalizer(
            MockLanguageModel::new()
                .answer(FieldKey::TaxId, "VALUE: 900.123.456-7")
                .answer(FieldKey::IssueDate, "VALUE: 2024-02-30"),
        );
        let mut record = fully_extracted();
        record.header.tax_id = TrackedField::missing();
        record.header.issue_date = TrackedField::missing();

        let outcome = n.normalize(record, "");
        assert_eq!(model.calls(), 2);
        assert!(outcome.record.header.tax_id.is_missing());
        assert!(outcome.record.header.issue_date.is_missing(), "Feb 30 must not pass");
        assert!(outcome.normalized_fields.is_empty());
    }

    #[test]
    fn lowercase_answer_is_rejected_not_uppercased() {
        let (n, model) = normalizer(
            MockLanguageModel::new()
                .answer(FieldKey::Currency, "VALUE: usd")
                .answer(FieldKey::InvoiceNumber, "VALUE: inv-2024-001"),
        );
        let mut record = fully_extracted();
        record.header.currency = TrackedField::missing();
        record.header.invoice_number = TrackedField::missing();

        let outcome = n.normalize(record, "Total usd 96.00");
        assert_eq!(model.calls(), 2);
        assert!(
            outcome.record.header.currency.is_missing(),
            "Expected rejection, got {:?}",
            outcome.record.header.currency.get()
        );
        assert!(outcome.record.header.invoice_number.is_missing());
        assert!(outcome.normalized_fields.is_empty());
    }

    #[test]
    fn low_confidence_value_is_replaced_and_kept_as_alternative() {
        let (n, _) = normalizer(MockLanguageModel::new().answer(FieldKey::InvoiceNumber, "VALUE: INV-2024-001"));
        let mut record = fully_extracted();
        record.header.invoice_number = TrackedField::extracted("INV-2O24-001".into(), 55.0, "invoice_number.shape");

        let outcome = n.normalize(record, "");
        let field = &outcome.record.header.invoice_number;
        assert_eq!(field.provenance, Provenance::Normalized);
        assert_eq!(field.get().map(String::as_str), Some("INV-2024-001"));
        assert_eq!(field.alternatives.len(), 1);
        assert_eq!(field.alternatives[0].value, "INV-2O24-001");
        assert_eq!(field.alternatives[0].pattern, "invoice_number.shape");
    }

    #[test]
    fn confirming_answer_keeps_extracted_evidence() {
        let (n, _) = normalizer(MockLanguageModel::new().answer(FieldKey::Total, "VALUE: 96.00"));
        let mut record = fully_extracted();
        record.totals.total = TrackedField::extracted(96.0, 60.0, "total.neighborhood");

        let outcome = n.normalize(record, "");
        assert_eq!(outcome.record.totals.total.provenance, Provenance::Extracted);
        assert_eq!(outcome.record.totals.total.confidence, 60.0);
    }

    #[test]
    fn unavailable_model_skips_with_warning() {
        let (n, model) = normalizer(MockLanguageModel::unavailable());
        let mut record = fully_extracted();
        record.header.currency = TrackedField::missing();

        let outcome = n.normalize(record.clone(), "");
        assert_eq!(model.calls(), 0);
        assert_eq!(outcome.record, record);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].stage, PipelineStage::Normalization);
    }

    #[test]
    fn connection_loss_stops_further_calls() {
        let (n, model) = normalizer(MockLanguageModel::connection_lost());
        let mut record = fully_extracted();
        record.header.currency = TrackedField::missing();
        record.header.tax_id = TrackedField::missing();
        record.totals.tax = TrackedField::missing();

        let outcome = n.normalize(record, "");
        assert_eq!(model.calls(), 1, "Expected a single attempt, got {}", model.calls());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.record.header.currency.is_missing());
    }

    #[test]
    fn disabled_normalizer_passes_through_silently() {
        let model: Arc<dyn LanguageModel> = Arc::new(MockLanguageModel::new());
        let n = Normalizer::new(
            Some(model),
            NormalizerConfig {
                enabled: false,
                ..config()
            },
        );
        let outcome = n.normalize(InvoiceRecord::default(), "");
        assert!(outcome.warnings.is_empty());
        assert!(outcome.record.header.tax_id.is_missing());
    }

    #[test]
    fn prompt_lists_only_trusted_fields() {
        let (n, model) = normalizer(MockLanguageModel::new());
        let mut record = fully_extracted();
        record.header.currency = TrackedField::missing();
        record.header.supplier_name = TrackedField::extracted("ACME".into(), 40.0, "p");

        n.normalize(record, "Total COP 96.00");
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        let currency_prompt = prompts.iter().find(|p| p.contains("Field: currency")).unwrap();
        assert!(currency_prompt.contains("- tax_id: 900123456-7"));
        assert!(!currency_prompt.contains("- supplier_name:"));
        assert!(currency_prompt.contains("Total COP 96.00"));
    }
}
