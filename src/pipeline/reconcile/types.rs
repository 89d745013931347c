use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pipeline::recognition::BoundingBox;

/// A reading that lost to the chosen text but disagreed with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeReading {
    pub text: String,
    pub confidence: f32,
    pub source: String,
    /// Normalized edit distance to the chosen text, 0–1.
    pub edit_distance: f32,
}

/// One logical text region after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// 0-based page index.
    pub page: usize,
    pub text: String,
    pub region: BoundingBox,
    /// Consensus confidence, 0–100.
    pub confidence: f32,
    pub contributing_sources: BTreeSet<String>,
    /// Only one backend saw this region.
    pub single_source: bool,
    pub alternatives: Vec<AlternativeReading>,
}

impl TextRegion {
    pub fn has_disagreement(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// Confidence with the single-source trust penalty applied.
    pub fn effective_confidence(&self, single_source_weight: f32) -> f32 {
        if self.single_source {
            self.confidence * single_source_weight
        } else {
            self.confidence
        }
    }

    /// The chosen text followed by every alternative.
    pub fn readings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.text.as_str()).chain(self.alternatives.iter().map(|a| a.text.as_str()))
    }
}

#[cfg(test)]
pub(crate) fn region(text: &str, x: f32, y: f32, w: f32, h: f32, confidence: f32) -> TextRegion {
    TextRegion {
        page: 0,
        text: text.to_string(),
        region: BoundingBox::new(x, y, w, h),
        confidence,
        contributing_sources: ["test".to_string()].into_iter().collect(),
        single_source: false,
        alternatives: Vec::new(),
    }
}
