//! Field Extractor: reconciled layout → typed invoice record.
//!
//! Pure and deterministic. Every declared pattern for a field contributes
//! at most its first valid match; the winner is the most specific, then
//! most confident, then earliest declared. Losing values that differ are
//! kept as alternatives for audit.

use super::amounts::parse_amount;
use super::dates::to_iso;
use super::patterns::{patterns_for, FieldKey, FieldPattern, Matcher, Specificity};
use super::table::TableExtractor;
use crate::models::{
    FieldAlternative, InvoiceHeader, InvoiceRecord, InvoiceTotals, TrackedField,
};
use crate::pipeline::reconcile::ReconciledLayout;
use crate::pipeline_config::ExtractionConfig;

#[derive(Debug)]
struct Candidate<T> {
    value: T,
    confidence: f32,
    pattern: &'static str,
    specificity: Specificity,
    order: usize,
}

pub struct FieldExtractor {
    config: ExtractionConfig,
    single_source_weight: f32,
}

impl FieldExtractor {
    pub fn new(config: ExtractionConfig, single_source_weight: f32) -> Self {
        Self {
            config,
            single_source_weight,
        }
    }

    pub fn extract(&self, layout: &ReconciledLayout) -> InvoiceRecord {
        let header = InvoiceHeader {
            supplier_name: self.text_field(layout, FieldKey::SupplierName),
            supplier_address: self.text_field(layout, FieldKey::SupplierAddress),
            tax_id: self.text_field(layout, FieldKey::TaxId),
            invoice_number: self.text_field(layout, FieldKey::InvoiceNumber),
            issue_date: self.text_field(layout, FieldKey::IssueDate),
            due_date: self.text_field(layout, FieldKey::DueDate),
            currency: self.text_field(layout, FieldKey::Currency),
            cufe: self.text_field(layout, FieldKey::Cufe),
            economic_activity: self.text_field(layout, FieldKey::EconomicActivity),
        };
        let totals = InvoiceTotals {
            subtotal: self.amount_field(layout, FieldKey::Subtotal),
            tax: self.amount_field(layout, FieldKey::Tax),
            total: self.amount_field(layout, FieldKey::Total),
            withholding_rate: self.resolve(layout, FieldKey::WithholdingRate, parse_percent),
        };
        let items = TableExtractor::new(layout, &self.config, self.single_source_weight).extract();

        let record = InvoiceRecord {
            header,
            items,
            totals,
        };
        tracing::info!(
            items = record.items.len(),
            missing = ?record.missing_fields(),
            "Fields extracted"
        );
        record
    }

    fn text_field(&self, layout: &ReconciledLayout, field: FieldKey) -> TrackedField<String> {
        self.resolve(layout, field, |raw| convert_text(field, raw))
    }

    fn amount_field(&self, layout: &ReconciledLayout, field: FieldKey) -> TrackedField<f64> {
        self.resolve(layout, field, parse_amount)
    }

    fn resolve<T: Clone + PartialEq>(
        &self,
        layout: &ReconciledLayout,
        field: FieldKey,
        convert: impl Fn(&str) -> Option<T>,
    ) -> TrackedField<T> {
        let mut candidates: Vec<Candidate<T>> = patterns_for(field)
            .filter_map(|(order, pattern)| {
                self.first_match(layout, pattern, &convert)
                    .map(|(value, confidence)| Candidate {
                        value,
                        confidence,
                        pattern: pattern.id,
                        specificity: pattern.specificity,
                        order,
                    })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.order.cmp(&b.order))
        });

        let mut ranked = candidates.into_iter();
        let Some(best) = ranked.next() else {
            tracing::debug!(field = field.as_str(), "No pattern matched");
            return TrackedField::missing();
        };

        let mut alternatives: Vec<FieldAlternative<T>> = Vec::new();
        for other in ranked {
            if other.value != best.value && !alternatives.iter().any(|a| a.value == other.value) {
                alternatives.push(FieldAlternative {
                    value: other.value,
                    confidence: other.confidence,
                    pattern: other.pattern.to_string(),
                });
            }
        }
        if !alternatives.is_empty() {
            tracing::debug!(
                field = field.as_str(),
                pattern = best.pattern,
                alternatives = alternatives.len(),
                "Conflicting matches"
            );
        }

        TrackedField::extracted(best.value, best.confidence, best.pattern).with_alternatives(alternatives)
    }

    /// First valid value a pattern yields, with its confidence.
    fn first_match<T>(
        &self,
        layout: &ReconciledLayout,
        pattern: &FieldPattern,
        convert: &impl Fn(&str) -> Option<T>,
    ) -> Option<(T, f32)> {
        let weight = pattern.specificity.weight();
        let regions = layout.regions();

        match &pattern.matcher {
            Matcher::Text(re) => {
                let text = layout.full_text();
                for caps in re.captures_iter(text) {
                    let (Some(whole), Some(v)) = (caps.get(0), caps.name("v")) else {
                        continue;
                    };
                    if is_rejected(&text[..whole.start()], pattern.reject_preceding) {
                        continue;
                    }
                    let Some(value) = convert(v.as_str()) else {
                        continue;
                    };
                    if let Some(conf) = layout.confidence_over(v.range(), self.single_source_weight) {
                        return Some((value, conf * weight));
                    }
                }
                None
            }
            Matcher::Region(re) => regions.iter().find_map(|region| {
                let caps = re.captures(region.text.trim())?;
                let value = convert(caps.name("v")?.as_str())?;
                Some((value, region.effective_confidence(self.single_source_weight) * weight))
            }),
            Matcher::Neighborhood { label, value } => {
                for (i, region) in regions.iter().enumerate() {
                    if !label.is_match(region.text.trim()) {
                        continue;
                    }
                    let neighbors = [layout.right_neighbor(i), layout.region_below(i)];
                    for n in neighbors.into_iter().flatten() {
                        let neighbor = &regions[n];
                        let found = value
                            .captures(neighbor.text.trim())
                            .and_then(|caps| caps.name("v").and_then(|v| convert(v.as_str())));
                        if let Some(found) = found {
                            return Some((
                                found,
                                neighbor.effective_confidence(self.single_source_weight) * weight,
                            ));
                        }
                    }
                }
                None
            }
        }
    }
}

/// Whether the word right before a match disqualifies it.
fn is_rejected(before: &str, words: &[&str]) -> bool {
    if words.is_empty() {
        return false;
    }
    let last_word = before
        .trim_end()
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .to_lowercase();
    words.iter().any(|w| last_word == *w)
}

/// Canonical form of a header value, or `None` when the match is unusable.
fn convert_text(field: FieldKey, raw: &str) -> Option<String> {
    let raw = raw.trim();
    let value = match field {
        FieldKey::InvoiceNumber => raw
            .trim_end_matches(['-', '/', '.'])
            .to_uppercase(),
        FieldKey::TaxId => {
            let cleaned: String = raw.chars().filter(|c| *c != '.' && !c.is_whitespace()).collect();
            let cleaned = cleaned.trim_matches('-').to_string();
            if cleaned.chars().filter(char::is_ascii_digit).count() < 5 {
                return None;
            }
            cleaned
        }
        FieldKey::IssueDate | FieldKey::DueDate => to_iso(raw)?,
        FieldKey::Currency => match raw {
            "€" => "EUR".to_string(),
            "US$" => "USD".to_string(),
            "£" => "GBP".to_string(),
            code if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => code.to_uppercase(),
            _ => return None,
        },
        FieldKey::SupplierName | FieldKey::SupplierAddress => {
            let v = raw.trim_end_matches([',', ';', ':']).trim();
            if v.chars().filter(|c| c.is_alphabetic()).count() < 2 {
                return None;
            }
            v.to_string()
        }
        FieldKey::Cufe => {
            let hex: String = raw
                .chars()
                .filter(char::is_ascii_hexdigit)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            if hex.len() < CUFE_MIN_HEX {
                return None;
            }
            hex
        }
        FieldKey::EconomicActivity => raw.chars().filter(char::is_ascii_digit).collect(),
        FieldKey::Subtotal | FieldKey::Tax | FieldKey::Total | FieldKey::WithholdingRate => {
            raw.to_string()
        }
    };
    (!value.is_empty()).then_some(value)
}

/// Shorter hex runs after a CUFE label are reference numbers, not codes.
const CUFE_MIN_HEX: usize = 32;

/// A printed percentage, `2,5` or `11`.
fn parse_percent(raw: &str) -> Option<f64> {
    parse_amount(raw).filter(|p| (0.0..=100.0).contains(p))
}
