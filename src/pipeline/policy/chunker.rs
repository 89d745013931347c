//! Policy text → overlapping chunks of bounded size.
//!
//! Windows are measured in characters, never bytes, so multi-byte text
//! cannot be cut inside a code point. Each window ends at the best break
//! in its second half (paragraph, then sentence, then word) and the next
//! one starts `overlap_chars` earlier, at a word boundary.

use sha2::{Digest, Sha256};

use super::types::{PolicyChunk, PolicyDocument};
use crate::pipeline_config::PolicyConfig;

pub struct PolicyChunker {
    max_chunk_chars: usize,
    overlap_chars: usize,
    min_chunk_chars: usize,
}

impl PolicyChunker {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars.max(1),
            overlap_chars: config.overlap_chars.min(config.max_chunk_chars.saturating_sub(1)),
            min_chunk_chars: config.min_chunk_chars,
        }
    }

    pub fn chunk(&self, document: &PolicyDocument) -> Vec<PolicyChunk> {
        let chars: Vec<char> = document.text.chars().collect();
        let n = chars.len();
        let mut chunks = Vec::new();
        let mut start = skip_whitespace(&chars, 0);

        while start < n {
            let hard_end = (start + self.max_chunk_chars).min(n);
            let mut end = if hard_end < n {
                break_point(&chars, start, hard_end)
            } else {
                n
            };
            // Fold a short remainder into this chunk rather than emit a sliver.
            if n - end < self.min_chunk_chars {
                end = n;
            }

            let text = chars[start..end].iter().collect::<String>().trim().to_string();
            if !text.is_empty() {
                chunks.push(make_chunk(document, chunks.len(), start, text));
            }
            if end >= n {
                break;
            }

            let mut next = end.saturating_sub(self.overlap_chars).max(start + 1);
            while next < end && !chars[next - 1].is_whitespace() {
                next += 1;
            }
            start = skip_whitespace(&chars, next);
        }

        tracing::debug!(document = %document.name, chunks = chunks.len(), "Chunked policy document");
        chunks
    }
}

fn make_chunk(document: &PolicyDocument, ordinal: usize, char_offset: usize, text: String) -> PolicyChunk {
    let digest = Sha256::digest(text.as_bytes());
    let short_hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    PolicyChunk {
        id: format!("{}#{ordinal}-{short_hash}", document.stem()),
        source_document: document.name.clone(),
        ordinal,
        text,
        char_offset,
    }
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Best end position in the second half of `start..hard_end`.
fn break_point(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;
    let last = |pred: &dyn Fn(usize) -> bool| (floor..hard_end).rev().find(|&i| pred(i));

    if let Some(i) = last(&|i| i > 0 && chars[i] == '\n' && chars[i - 1] == '\n') {
        return i + 1;
    }
    if let Some(i) = last(&|i| {
        matches!(chars[i], '.' | ';' | ':' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
    }) {
        return i + 1;
    }
    if let Some(i) = last(&|i| chars[i].is_whitespace()) {
        return i;
    }
    hard_end
}
