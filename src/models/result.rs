use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EngineStatus, OcrQuality, PipelineStage, RuleClass};
use super::invoice::{InvoiceHeader, InvoiceItem, InvoiceRecord, InvoiceTotals};

/// A retrieved policy passage. Only the Policy Index creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    chunk_id: String,
    source_document: String,
    text_excerpt: String,
    relevance_score: f32,
    /// Full chunk text. Rules judge against this; the excerpt is for display.
    #[serde(skip)]
    passage: String,
}

impl Citation {
    pub(crate) fn new(
        chunk_id: String,
        source_document: String,
        passage: String,
        text_excerpt: String,
        relevance_score: f32,
    ) -> Self {
        Self {
            chunk_id,
            source_document,
            text_excerpt,
            relevance_score,
            passage,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn source_document(&self) -> &str {
        &self.source_document
    }

    pub fn text_excerpt(&self) -> &str {
        &self.text_excerpt
    }

    /// The whole retrieved chunk. A citation read back from JSON has no
    /// passage and falls back to its excerpt.
    pub fn passage(&self) -> &str {
        if self.passage.is_empty() {
            &self.text_excerpt
        } else {
            &self.passage
        }
    }

    /// Cosine similarity between query and chunk embeddings.
    pub fn relevance_score(&self) -> f32 {
        self.relevance_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub rule_id: String,
    pub class: RuleClass,
    pub passed: bool,
    pub reason: String,
    /// Set when an evidence-backed rule retrieved nothing usable.
    pub insufficient_evidence: bool,
    pub citations: Vec<Citation>,
}

/// Per-backend, per-page recognition summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub source: String,
    pub page: usize,
    pub status: EngineStatus,
    pub observation_count: usize,
    pub mean_confidence: Option<f32>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recoverable degradation recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineWarning {
    pub stage: PipelineStage,
    pub message: String,
}

impl PipelineWarning {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub document: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub page_count: usize,
    pub region_count: usize,
    pub engines: Vec<EngineReport>,
    /// Mean reconciled region confidence, 0–100.
    pub mean_region_confidence: f32,
    pub ocr_quality: OcrQuality,
    pub policy_index_generation: Option<u64>,
    pub warnings: Vec<PipelineWarning>,
}

/// The record handed to the reporting layer, one per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub header: InvoiceHeader,
    pub items: Vec<InvoiceItem>,
    pub totals: InvoiceTotals,
    pub findings: Vec<ValidationFinding>,
    /// AND over required findings.
    pub valid: bool,
    pub metadata: RunMetadata,
}

impl InvoiceResult {
    pub fn from_parts(
        record: InvoiceRecord,
        findings: Vec<ValidationFinding>,
        valid: bool,
        metadata: RunMetadata,
    ) -> Self {
        Self {
            header: record.header,
            items: record.items,
            totals: record.totals,
            findings,
            valid,
            metadata,
        }
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(|f| !f.passed)
    }
}

#[cfg(test)]
impl Citation {
    pub(crate) fn fixture(chunk_id: &str, source: &str, text: &str, score: f32) -> Self {
        Self::new(chunk_id.into(), source.into(), text.into(), text.into(), score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_serializes_all_fields() {
        let c = Citation::fixture("policy#0-abcd1234", "policy.txt", "IVA rate is 19%", 0.42);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["chunk_id"], "policy#0-abcd1234");
        assert_eq!(json["source_document"], "policy.txt");
        assert!(json["relevance_score"].as_f64().unwrap() > 0.4);
        assert!(json.get("passage").is_none(), "Passage must stay out of the JSON");
    }

    #[test]
    fn deserialized_citation_falls_back_to_excerpt() {
        let c = Citation::fixture("p#0", "policy.txt", "IVA rate is 19%", 0.5);
        let back: Citation = serde_json::from_str(&serde_json::to_string(&c).unwrap()).unwrap();
        assert_eq!(back.passage(), "IVA rate is 19%");
    }

    #[test]
    fn warning_constructor_accepts_str() {
        let w = PipelineWarning::new(PipelineStage::Normalization, "model unavailable");
        assert_eq!(w.stage.as_str(), "normalization");
        assert_eq!(w.message, "model unavailable");
    }
}
