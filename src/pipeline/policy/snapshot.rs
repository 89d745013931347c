//! An immutable, fully built index: chunks plus their vectors.
//!
//! Snapshots are never mutated after construction. A rebuild produces a new
//! one, which `PolicyIndex` publishes with a single pointer swap.

use chrono::{DateTime, Utc};

use super::types::PolicyChunk;
use super::PolicyError;
use crate::models::Citation;

#[derive(Debug)]
pub struct IndexSnapshot {
    chunks: Vec<PolicyChunk>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
    embedder_id: String,
    fingerprint: String,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn new(
        chunks: Vec<PolicyChunk>,
        vectors: Vec<Vec<f32>>,
        dimension: usize,
        embedder_id: String,
        fingerprint: String,
        built_at: DateTime<Utc>,
    ) -> Result<Self, PolicyError> {
        if chunks.len() != vectors.len() {
            return Err(PolicyError::Embedding(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(PolicyError::Embedding(format!(
                "vector of dimension {} in a {dimension}-dimension index",
                bad.len()
            )));
        }
        Ok(Self {
            chunks,
            vectors,
            dimension,
            embedder_id,
            fingerprint,
            built_at,
        })
    }

    pub fn chunks(&self) -> &[PolicyChunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn document_count(&self) -> usize {
        let mut names: Vec<&str> = self.chunks.iter().map(|c| c.source_document.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    /// Exact cosine top-k. Equal scores keep chunk order.
    pub fn search(&self, query: &[f32], top_k: usize, excerpt_chars: usize) -> Vec<Citation> {
        if query.len() != self.dimension {
            tracing::warn!(
                query_dim = query.len(),
                index_dim = self.dimension,
                "Query dimension does not match index"
            );
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| cosine_similarity(query, v).map(|s| (i, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                Citation::new(
                    chunk.id.clone(),
                    chunk.source_document.clone(),
                    chunk.text.clone(),
                    excerpt(&chunk.text, excerpt_chars),
                    score,
                )
            })
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom) as f32)
}

/// First `max_chars` characters, cut back to a word boundary.
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> PolicyChunk {
        PolicyChunk {
            id: id.into(),
            source_document: "p.txt".into(),
            ordinal: 0,
            text: text.into(),
            char_offset: 0,
        }
    }

    fn snapshot() -> IndexSnapshot {
        IndexSnapshot::new(
            vec![chunk("a", "alpha"), chunk("b", "beta"), chunk("c", "gamma")],
            vec![vec![1.0, 0.0], vec![0.6, 0.8], vec![0.0, 1.0]],
            2,
            "test".into(),
            "fp".into(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let hits = snapshot().search(&[1.0, 0.0], 3, 100);
        let ids: Vec<&str> = hits.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].relevance_score() - 1.0).abs() < 1e-6);
        assert!((hits[1].relevance_score() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn top_k_limits_results() {
        assert_eq!(snapshot().search(&[0.0, 1.0], 1, 100).len(), 1);
        assert_eq!(snapshot().search(&[0.0, 1.0], 10, 100).len(), 3);
    }

    #[test]
    fn zero_query_matches_nothing() {
        assert!(snapshot().search(&[0.0, 0.0], 3, 100).is_empty());
    }

    #[test]
    fn wrong_dimension_query_matches_nothing() {
        assert!(snapshot().search(&[1.0, 0.0, 0.0], 3, 100).is_empty());
    }

    #[test]
    fn mismatched_vectors_are_rejected() {
        let result = IndexSnapshot::new(
            vec![chunk("a", "alpha")],
            vec![vec![1.0, 0.0, 0.0]],
            2,
            "test".into(),
            "fp".into(),
            Utc::now(),
        );
        assert!(matches!(result, Err(PolicyError::Embedding(_))));
    }

    #[test]
    fn citation_carries_the_whole_chunk_beyond_the_excerpt() {
        let long = format!("{} The IVA tax rate is 19%.", "General invoicing terms apply. ".repeat(10));
        let snapshot = IndexSnapshot::new(
            vec![chunk("long", &long)],
            vec![vec![1.0, 0.0]],
            2,
            "test".into(),
            "fp".into(),
            Utc::now(),
        )
        .unwrap();

        let hit = &snapshot.search(&[1.0, 0.0], 1, 240)[0];
        assert!(!hit.text_excerpt().contains("19%"), "Excerpt should be cut, got {}", hit.text_excerpt());
        assert_eq!(hit.passage(), long);
    }

    #[test]
    fn excerpt_is_cut_at_word_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("IVA rate is nineteen percent", 12), "IVA rate is…");
    }
}
