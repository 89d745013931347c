pub mod types;
pub mod similarity;
pub mod confidence;
pub mod reconciler;
pub mod layout;

pub use types::*;
pub use confidence::{classify_quality, thresholds};
pub use layout::{LayoutRow, ReconciledLayout};
pub use reconciler::ObservationReconciler;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("No recognition output from any of {backends} backend(s)")]
    NoRecognitionOutput { backends: usize },

    #[error("Reconciled layout contains no text")]
    EmptyLayout,
}
