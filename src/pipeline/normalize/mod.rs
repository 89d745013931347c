pub mod format;
pub mod model;
pub mod normalizer;
pub mod ollama;
pub mod prompt;
pub mod sanitize;

pub use format::{format_for, DeclaredFormat};
pub use model::{LanguageModel, UnavailableModel};
pub use normalizer::{NormalizationOutcome, Normalizer};
pub use ollama::OllamaClient;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("Language model is not reachable at {0}")]
    Connection(String),

    #[error("Language model returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed model response: {0}")]
    ResponseParsing(String),

    #[error("Language model client could not be created: {0}")]
    ClientUnavailable(String),
}

impl NormalizationError {
    /// Errors after which no further call in this run can succeed.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
