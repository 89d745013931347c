//! Policy corpus loading: a directory of `.txt`, `.md` and `.pdf` files.

use std::path::Path;

use sha2::{Digest, Sha256};

use super::types::PolicyDocument;
use super::PolicyError;
use crate::pipeline::import::{document_name, PdfDocumentReader};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Read every policy file directly inside `dir`, sorted by file name.
///
/// Files with no text (blank, or a PDF without a text layer) are skipped
/// with a warning. Fails with `EmptyCorpus` when nothing usable remains.
pub fn load_corpus(dir: &Path, pdf: &dyn PdfDocumentReader) -> Result<Vec<PolicyDocument>, PolicyError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let text = if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            std::fs::read_to_string(&path)?
        } else if extension == "pdf" {
            let bytes = std::fs::read(&path)?;
            pdf.page_texts(&bytes)?.join("\n\n")
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-policy file");
            continue;
        };

        if text.trim().is_empty() {
            tracing::warn!(path = %path.display(), "Policy document has no text, skipped");
            continue;
        }
        documents.push(PolicyDocument::new(document_name(&path), text));
    }

    if documents.is_empty() {
        return Err(PolicyError::EmptyCorpus(dir.display().to_string()));
    }
    tracing::info!(dir = %dir.display(), documents = documents.len(), "Policy corpus loaded");
    Ok(documents)
}

/// SHA-256 over names and contents, independent of input order.
pub fn corpus_fingerprint(documents: &[PolicyDocument]) -> String {
    let mut sorted: Vec<&PolicyDocument> = documents.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for doc in sorted {
        hasher.update((doc.name.len() as u64).to_le_bytes());
        hasher.update(doc.name.as_bytes());
        hasher.update((doc.text.len() as u64).to_le_bytes());
        hasher.update(doc.text.as_bytes());
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}
