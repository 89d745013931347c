pub mod types;
pub mod tsv;
pub mod tesseract_cli;
#[cfg(feature = "ocr")]
pub mod bundled;
#[cfg(test)]
pub mod mock;
pub mod dispatch;

pub use types::*;
pub use dispatch::{BackendOutput, RecognitionDispatcher};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Recognition engine initialization failed: {0}")]
    Init(String),

    #[error("Recognition failed in {source_id}: {reason}")]
    Processing { source_id: String, reason: String },

    #[error("Recognition timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
