use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ImportError;

/// Input formats the pipeline can recognize text from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Pdf,
    Png,
    Jpeg,
    Tiff,
    Unsupported,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Tiff => "tiff",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg | Self::Tiff)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB

/// Detect file format from magic bytes (NOT file extensions).
pub fn detect_format(path: &Path) -> Result<InputFormat, ImportError> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(ImportError::FileTooLarge {
            size_mb: metadata.len() as f64 / (1024.0 * 1024.0),
            max_mb: MAX_FILE_SIZE / (1024 * 1024),
        });
    }

    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 8];
    let bytes_read = file.read(&mut header)?;

    Ok(format_from_magic(&header[..bytes_read]))
}

pub fn format_from_magic(header: &[u8]) -> InputFormat {
    match header {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => InputFormat::Pdf,
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => InputFormat::Jpeg,
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => InputFormat::Png,
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => InputFormat::Tiff,
        _ => InputFormat::Unsupported,
    }
}

/// Expand an input path into the documents to process.
///
/// A file is returned as-is (format is checked later, per document, so an
/// unreadable file becomes a failed batch entry). A directory yields every
/// supported file directly inside it, sorted by name.
pub fn collect_documents(input: &Path) -> Result<Vec<PathBuf>, ImportError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match detect_format(&path) {
            Ok(format) if format.is_supported() => documents.push(path),
            Ok(_) => {
                tracing::debug!(path = %path.display(), "Skipping unsupported file");
            }
            Err(e) => {
                // Keep it: the batch records why it could not be processed.
                tracing::warn!(path = %path.display(), error = %e, "Format detection failed");
                documents.push(path);
            }
        }
    }
    documents.sort();
    Ok(documents)
}

/// Display name for a document path: the file name, or the full path if it has none.
pub fn document_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
