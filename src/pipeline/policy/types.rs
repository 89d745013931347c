use serde::{Deserialize, Serialize};

use super::PolicyError;

/// One policy file's text.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDocument {
    /// File name, used as the citation source.
    pub name: String,
    pub text: String,
}

impl PolicyDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// File name without extension, used in chunk ids.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.name)
    }
}

/// A bounded, overlapping slice of a policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChunk {
    /// `<stem>#<ordinal>-<8 hex>`, stable while the text is unchanged.
    pub id: String,
    pub source_document: String,
    pub ordinal: usize,
    pub text: String,
    /// Character offset of the chunk in its document.
    pub char_offset: usize,
}

/// Embedding model abstraction
pub trait EmbeddingModel: Send + Sync {
    /// Identifier stored with persisted vectors; a different id invalidates them.
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, PolicyError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PolicyError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
