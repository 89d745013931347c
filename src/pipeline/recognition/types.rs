use serde::{Deserialize, Serialize};

use super::RecognitionError;
use crate::pipeline::import::PageImage;

/// Axis-aligned rectangle in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union. Zero-area boxes never overlap anything.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Vertical overlap as a fraction of the shorter box height.
    pub fn vertical_overlap_ratio(&self, other: &BoundingBox) -> f32 {
        let overlap = self.bottom().min(other.bottom()) - self.y.max(other.y);
        let shorter = self.height.min(other.height);
        if overlap <= 0.0 || shorter <= 0.0 {
            0.0
        } else {
            overlap / shorter
        }
    }
}

/// One text fragment as reported by a single recognition backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextObservation {
    pub text: String,
    pub region: BoundingBox,
    /// 0–100
    pub confidence: f32,
    /// Engine identifier, e.g. `tesseract-psm6`.
    pub source: String,
}

/// A text-recognition backend.
///
/// Implementations must be shareable across documents processed in
/// parallel; every call is independent.
pub trait RecognitionEngine: Send + Sync {
    /// Stable identifier written into every observation's `source`.
    fn source_id(&self) -> &str;

    /// Recognize one page. An empty vector means the engine ran but saw nothing.
    fn extract(&self, page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError>;
}
