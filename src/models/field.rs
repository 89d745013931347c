//! Tagged field value carried by every invoice field.
//!
//! `value` is `Some` exactly when `provenance` is not `Missing`. The
//! constructors are the only way the pipeline builds fields, which keeps
//! that pairing intact and makes the Normalizer's trust-floor check a
//! plain method call.

use serde::{Deserialize, Serialize};

use super::enums::Provenance;

/// A competing reading kept for audit when more than one pattern matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAlternative<T> {
    pub value: T,
    /// 0–100
    pub confidence: f32,
    /// Identifier of the pattern that produced this reading.
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedField<T> {
    pub value: Option<T>,
    /// 0–100. Always 0 for missing fields.
    pub confidence: f32,
    pub provenance: Provenance,
    /// Pattern id for extracted fields, model-stated rationale for normalized ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<FieldAlternative<T>>,
}

impl<T> TrackedField<T> {
    pub fn missing() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            provenance: Provenance::Missing,
            rationale: None,
            alternatives: Vec::new(),
        }
    }

    pub fn extracted(value: T, confidence: f32, pattern: &str) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 100.0),
            provenance: Provenance::Extracted,
            rationale: Some(pattern.to_string()),
            alternatives: Vec::new(),
        }
    }

    pub fn normalized(value: T, confidence: f32, rationale: String) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 100.0),
            provenance: Provenance::Normalized,
            rationale: Some(rationale),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<FieldAlternative<T>>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_missing(&self) -> bool {
        self.provenance == Provenance::Missing
    }

    /// Extracted evidence at or above the floor. The Normalizer never touches these.
    pub fn is_trusted(&self, trust_floor: f32) -> bool {
        self.provenance == Provenance::Extracted && self.confidence >= trust_floor
    }
}

impl<T> Default for TrackedField<T> {
    fn default() -> Self {
        Self::missing()
    }
}

impl<T: Copy> TrackedField<T> {
    pub fn copied(&self) -> Option<T> {
        self.value
    }
}
