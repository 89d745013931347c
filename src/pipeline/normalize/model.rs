use super::format::DeclaredFormat;
use super::NormalizationError;

/// Language-model boundary. The returned text is untrusted: callers must
/// check it against `format` before using it.
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs and warnings.
    fn name(&self) -> &str;

    fn is_available(&self) -> Result<bool, NormalizationError>;

    fn complete(&self, prompt: &str, format: &DeclaredFormat) -> Result<String, NormalizationError>;
}

/// Stands in for a model whose client failed to build, so every document
/// records why normalization was skipped instead of silently losing it.
pub struct UnavailableModel {
    name: String,
    reason: String,
}

impl UnavailableModel {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    fn error(&self) -> NormalizationError {
        NormalizationError::ClientUnavailable(self.reason.clone())
    }
}

impl LanguageModel for UnavailableModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> Result<bool, NormalizationError> {
        Err(self.error())
    }

    fn complete(&self, _prompt: &str, _format: &DeclaredFormat) -> Result<String, NormalizationError> {
        Err(self.error())
    }
}

#[cfg(test)]
pub use mock::MockLanguageModel;
