//! Test doubles for the recognition boundary.

use std::time::Duration;

use super::types::{BoundingBox, RecognitionEngine, TextObservation};
use super::RecognitionError;
use crate::pipeline::import::PageImage;

/// Returns a fixed set of observations for every page.
pub struct MockRecognitionEngine {
    source: String,
    observations: Vec<TextObservation>,
}

impl MockRecognitionEngine {
    pub fn new(source: &str, lines: &[(&str, BoundingBox, f32)]) -> Self {
        let observations = lines
            .iter()
            .map(|(text, region, confidence)| TextObservation {
                text: text.to_string(),
                region: *region,
                confidence: *confidence,
                source: source.to_string(),
            })
            .collect();
        Self {
            source: source.to_string(),
            observations,
        }
    }
}

impl RecognitionEngine for MockRecognitionEngine {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn extract(&self, _page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        Ok(self.observations.clone())
    }
}

/// Always fails.
pub struct FailingRecognitionEngine {
    source: String,
}

impl FailingRecognitionEngine {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }
}

impl RecognitionEngine for FailingRecognitionEngine {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn extract(&self, _page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        Err(RecognitionError::Processing {
            source_id: self.source.clone(),
            reason: "engine crashed".into(),
        })
    }
}

/// Sleeps before answering, to exercise dispatch timeouts.
pub struct SlowRecognitionEngine {
    inner: MockRecognitionEngine,
    delay: Duration,
}

impl SlowRecognitionEngine {
    pub fn new(inner: MockRecognitionEngine, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl RecognitionEngine for SlowRecognitionEngine {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    fn extract(&self, page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        std::thread::sleep(self.delay);
        self.inner.extract(page)
    }
}

/// Delegates to a closure, so a test can vary output per page.
pub struct ScriptedRecognitionEngine<F> {
    source: String,
    script: F,
}

impl<F> ScriptedRecognitionEngine<F>
where
    F: Fn(&PageImage) -> Result<Vec<TextObservation>, RecognitionError> + Send + Sync,
{
    pub fn new(source: &str, script: F) -> Self {
        Self {
            source: source.to_string(),
            script,
        }
    }
}

impl<F> RecognitionEngine for ScriptedRecognitionEngine<F>
where
    F: Fn(&PageImage) -> Result<Vec<TextObservation>, RecognitionError> + Send + Sync,
{
    fn source_id(&self) -> &str {
        &self.source
    }

    fn extract(&self, page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        (self.script)(page)
    }
}

/// A page with no real image data, for engines that ignore it.
pub fn blank_page(index: usize) -> PageImage {
    PageImage {
        index,
        bytes: std::sync::Arc::new(Vec::new()),
        width: 1000,
        height: 1400,
    }
}

/// Line observations of a typical one-page invoice, one per visual cell.
///
/// Totals are coherent (80 + 16 = 96) at a 20% tax rate.
pub fn invoice_lines(confidence: f32) -> Vec<(&'static str, BoundingBox, f32)> {
    let rows: [&[&'static str]; 11] = [
        &["ACME S.A.S."],
        &["NIT: 800.197.268-4"],
        &["Calle 50 #30-20"],
        &["Invoice No: INV-2024-001", "Fecha: 2024-03-15"],
        &["Due date: 2024-04-14"],
        &["Description", "Qty", "Unit Price", "Total"],
        &["Widget", "2", "20.00", "40.00"],
        &["Gadget", "1", "40.00", "40.00"],
        &["Subtotal:", "80.00"],
        &["IVA (20%):", "16.00"],
        &["Total:", "COP 96.00"],
    ];
    let mut lines = Vec::new();
    for (r, cells) in rows.iter().enumerate() {
        for (c, text) in cells.iter().enumerate() {
            let region = BoundingBox::new(20.0 + 160.0 * c as f32, 40.0 * r as f32, 150.0, 30.0);
            lines.push((*text, region, confidence));
        }
    }
    lines
}
