//! Shared, read-mostly policy index with atomic rebuilds.
//!
//! A rebuild chunks and embeds the whole corpus without holding any lock,
//! then publishes the finished snapshot with one write-locked pointer swap.
//! Searches clone the current `Arc` under a read lock and run unlocked, so
//! they never see a partially built index and never wait on embedding.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;

use super::chunker::PolicyChunker;
use super::corpus::{corpus_fingerprint, load_corpus};
use super::persist;
use super::snapshot::IndexSnapshot;
use super::types::{EmbeddingModel, PolicyDocument};
use super::PolicyError;
use crate::models::Citation;
use crate::pipeline::import::PdfDocumentReader;
use crate::pipeline_config::PolicyConfig;

/// Summary of a completed build or cache load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub generation: u64,
    pub from_cache: bool,
}

pub struct PolicyIndex {
    embedder: Arc<dyn EmbeddingModel>,
    chunker: PolicyChunker,
    excerpt_chars: usize,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    generation: AtomicU64,
}

impl PolicyIndex {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, config: &PolicyConfig) -> Self {
        Self {
            embedder,
            chunker: PolicyChunker::new(config),
            excerpt_chars: config.excerpt_chars,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Rebuild from `documents`. On any error the previous index stays published.
    pub fn index(&self, documents: &[PolicyDocument]) -> Result<IndexStats, PolicyError> {
        let snapshot = self.build(documents)?;
        Ok(self.publish(snapshot, false))
    }

    /// Top-k citations for `query`, by descending relevance.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<Citation>, PolicyError> {
        let snapshot = self.snapshot().ok_or(PolicyError::NotBuilt)?;
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query)?;
        let hits = snapshot.search(&vector, top_k, self.excerpt_chars);
        tracing::debug!(query, hits = hits.len(), "Policy search");
        Ok(hits)
    }

    /// Load the corpus in `corpus_dir` and publish it, reusing `cache_path`
    /// when it was built from the same corpus with the same embedder.
    ///
    /// A cache that cannot be read or written only costs a rebuild.
    pub fn open_or_build(
        &self,
        corpus_dir: &Path,
        cache_path: Option<&Path>,
        pdf: &dyn PdfDocumentReader,
    ) -> Result<IndexStats, PolicyError> {
        let documents = load_corpus(corpus_dir, pdf)?;
        let fingerprint = corpus_fingerprint(&documents);

        if let Some(path) = cache_path {
            match persist::load(path) {
                Ok(Some(cached)) if self.matches(&cached, &fingerprint) => {
                    tracing::info!(path = %path.display(), "Reusing policy index cache");
                    return Ok(self.publish(cached, true));
                }
                Ok(Some(_)) => {
                    tracing::info!(path = %path.display(), "Policy index cache is stale, rebuilding");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Policy index cache unreadable, rebuilding");
                }
            }
        }

        let snapshot = self.build(&documents)?;
        if let Some(path) = cache_path {
            if let Err(e) = persist::save(path, &snapshot) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write policy index cache");
            }
        }
        Ok(self.publish(snapshot, false))
    }

    /// The currently published snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of snapshots published so far; 0 until the first build.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn matches(&self, cached: &IndexSnapshot, fingerprint: &str) -> bool {
        cached.fingerprint() == fingerprint
            && cached.embedder_id() == self.embedder.id()
            && cached.dimension() == self.embedder.dimension()
    }

    fn build(&self, documents: &[PolicyDocument]) -> Result<IndexSnapshot, PolicyError> {
        let chunks: Vec<_> = documents.iter().flat_map(|d| self.chunker.chunk(d)).collect();
        if chunks.is_empty() {
            return Err(PolicyError::EmptyCorpus(format!(
                "{} document(s) produced no text",
                documents.len()
            )));
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).map_err(|e| {
            tracing::warn!(error = %e, "Policy index rebuild failed, keeping previous index");
            e
        })?;

        IndexSnapshot::new(
            chunks,
            vectors,
            self.embedder.dimension(),
            self.embedder.id().to_string(),
            corpus_fingerprint(documents),
            Utc::now(),
        )
    }

    fn publish(&self, snapshot: IndexSnapshot, from_cache: bool) -> IndexStats {
        let documents = snapshot.document_count();
        let chunks = snapshot.len();
        let snapshot = Arc::new(snapshot);
        {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(snapshot);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(documents, chunks, generation, from_cache, "Policy index published");
        IndexStats {
            documents,
            chunks,
            generation,
            from_cache,
        }
    }
}
