//! Pipeline configuration: every threshold the stages consult.
//!
//! Loaded from an optional JSON file; any key left out keeps its default,
//! so a config file only needs to name what it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Observation Reconciler thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Intersection-over-union at which two observations describe the same region.
    pub overlap_iou: f32,
    /// Normalized edit distance (0–1) up to which two readings still agree.
    pub agreement_edit_distance: f32,
    /// Confidence points within which two readings count as equally confident.
    /// Ties go to the reading with more agreeing support, then to backend order.
    pub tie_margin: f32,
    /// Lower bound on the disagreement penalty, so any disagreement costs something.
    pub min_disagreement_severity: f32,
    /// Trust multiplier applied downstream to regions seen by one backend only.
    pub single_source_weight: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            overlap_iou: 0.5,
            agreement_edit_distance: 0.05,
            tie_margin: 0.5,
            min_disagreement_severity: 0.1,
            single_source_weight: 0.9,
        }
    }
}

/// Field Extractor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Relative tolerance for quantity × unit price ≈ line total.
    pub item_relative_tolerance: f64,
    /// Absolute tolerance for the same check (currency units).
    pub item_absolute_tolerance: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            item_relative_tolerance: 0.01,
            item_absolute_tolerance: 0.01,
        }
    }
}

/// Normalizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Extracted fields at or above this confidence are never rewritten.
    pub trust_floor: f32,
    /// Confidence given to accepted model answers.
    pub normalized_confidence: f32,
    /// Characters of reconciled text included in the prompt. 0 sends fields only.
    pub prompt_excerpt_chars: usize,
    pub timeout_secs: u64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: crate::config::DEFAULT_OLLAMA_URL.to_string(),
            model: crate::config::DEFAULT_MODEL.to_string(),
            trust_floor: 70.0,
            normalized_confidence: 50.0,
            prompt_excerpt_chars: 1000,
            timeout_secs: 30,
        }
    }
}

/// Policy Index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    pub min_chunk_chars: usize,
    /// Characters of chunk text copied into a citation.
    pub excerpt_chars: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 500,
            overlap_chars: 80,
            min_chunk_chars: 20,
            excerpt_chars: 240,
        }
    }
}

/// Validator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Allowed |subtotal + tax − total|.
    pub totals_epsilon: f64,
    pub top_k: usize,
    /// Citations scoring below this are not evidence.
    pub min_relevance: f32,
    /// Allowed gap, in percentage points, between effective and cited tax rate.
    pub tax_rate_tolerance: f64,
    pub max_invoice_age_days: i64,
    pub max_payment_term_days: i64,
    /// Highest plausible withholding tax rate, in percent.
    pub max_withholding_rate: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            totals_epsilon: 0.01,
            top_k: 3,
            min_relevance: 0.05,
            tax_rate_tolerance: 0.5,
            max_invoice_age_days: 5 * 365,
            max_payment_term_days: 180,
            max_withholding_rate: 15.0,
        }
    }
}

/// Recognition and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tesseract page-segmentation modes; each one runs as its own backend.
    pub tesseract_psm: Vec<u8>,
    pub tesseract_languages: String,
    pub recognition_timeout_secs: u64,
    pub render_dpi: u32,
    /// Documents processed concurrently in batch mode.
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4);
        Self {
            tesseract_psm: vec![6, 4, 11],
            tesseract_languages: "spa+eng".to_string(),
            recognition_timeout_secs: 60,
            render_dpi: 300,
            workers,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reconcile: ReconcileConfig,
    pub extraction: ExtractionConfig,
    pub normalizer: NormalizerConfig,
    pub policy: PolicyConfig,
    pub validation: ValidationConfig,
    pub runtime: RuntimeConfig,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |key: &'static str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    reason: format!("{v} is outside 0..=1"),
                })
            }
        };
        unit("reconcile.overlap_iou", self.reconcile.overlap_iou)?;
        unit("reconcile.agreement_edit_distance", self.reconcile.agreement_edit_distance)?;
        unit("reconcile.min_disagreement_severity", self.reconcile.min_disagreement_severity)?;
        unit("reconcile.single_source_weight", self.reconcile.single_source_weight)?;

        if !(0.0..=100.0).contains(&self.normalizer.trust_floor) {
            return Err(ConfigError::Invalid {
                key: "normalizer.trust_floor",
                reason: format!("{} is outside 0..=100", self.normalizer.trust_floor),
            });
        }
        if self.policy.overlap_chars >= self.policy.max_chunk_chars {
            return Err(ConfigError::Invalid {
                key: "policy.overlap_chars",
                reason: "overlap must be smaller than max_chunk_chars".into(),
            });
        }
        if self.validation.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "validation.top_k",
                reason: "must be at least 1".into(),
            });
        }
        if self.validation.totals_epsilon < 0.0 {
            return Err(ConfigError::Invalid {
                key: "validation.totals_epsilon",
                reason: "must not be negative".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.validation.max_withholding_rate) {
            return Err(ConfigError::Invalid {
                key: "validation.max_withholding_rate",
                reason: format!("{} is outside 0..=100", self.validation.max_withholding_rate),
            });
        }
        if self.runtime.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "runtime.workers",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.recognition_timeout_secs)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_thresholds() {
        let c = PipelineConfig::default();
        assert_eq!(c.reconcile.overlap_iou, 0.5);
        assert_eq!(c.validation.totals_epsilon, 0.01);
        assert_eq!(c.runtime.tesseract_psm, vec![6, 4, 11]);
        assert!(c.runtime.workers >= 1 && c.runtime.workers <= 4);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"validation": {{"top_k": 5}}, "normalizer": {{"enabled": false}}}}"#)
            .unwrap();

        let c = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(c.validation.top_k, 5);
        assert!(!c.normalizer.enabled);
        assert_eq!(c.validation.min_relevance, 0.05);
        assert_eq!(c.policy.max_chunk_chars, 500);
    }

    #[test]
    fn out_of_range_iou_is_rejected() {
        let mut c = PipelineConfig::default();
        c.reconcile.overlap_iou = 1.5;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("overlap_iou"), "got {err}");
    }

    #[test]
    fn overlap_larger_than_chunk_is_rejected() {
        let mut c = PipelineConfig::default();
        c.policy.overlap_chars = 600;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { key: "policy.overlap_chars", .. })
        ));
    }

    #[test]
    fn withholding_ceiling_is_a_percentage() {
        let mut c = PipelineConfig::default();
        assert_eq!(c.validation.max_withholding_rate, 15.0);
        c.validation.max_withholding_rate = 150.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { key: "validation.max_withholding_rate", .. })
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn config_serializes_to_json() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["normalizer"]["trust_floor"], 70.0);
    }
}
