pub mod chunker;
pub mod corpus;
pub mod embedder;
pub mod index;
pub mod persist;
pub mod snapshot;
pub mod types;

pub use chunker::PolicyChunker;
pub use corpus::{corpus_fingerprint, load_corpus};
pub use embedder::HashingEmbedder;
#[cfg(feature = "onnx-embeddings")]
pub use embedder::OnnxEmbedder;
pub use index::{IndexStats, PolicyIndex};
pub use snapshot::IndexSnapshot;
pub use types::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::import::ImportError;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy corpus is empty: {0}")]
    EmptyCorpus(String),

    #[error("Policy index has not been built")]
    NotBuilt,

    #[error("Embedding model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Index persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Index cache is unusable: {0}")]
    InvalidCache(String),

    #[error("Failed to read policy document: {0}")]
    Import(#[from] ImportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
