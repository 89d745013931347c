use std::path::{Path, PathBuf};

use super::tsv::parse_tsv_lines;
use super::types::{RecognitionEngine, TextObservation};
use super::RecognitionError;
use crate::pipeline::import::PageImage;

/// In-process Tesseract via libtesseract.
/// Only available when compiled with the `ocr` feature flag.
pub struct BundledTesseract {
    tessdata_dir: PathBuf,
    languages: String,
    psm: u8,
    source: String,
}

impl BundledTesseract {
    /// Initialize with a tessdata directory.
    /// Uses "spa+eng" when Spanish data is installed, else English only.
    pub fn new(tessdata_dir: &Path, psm: u8) -> Result<Self, RecognitionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(RecognitionError::Init(format!(
                "eng.traineddata not found in {}",
                tessdata_dir.display()
            )));
        }

        let languages = if tessdata_dir.join("spa.traineddata").exists() {
            "spa+eng".to_string()
        } else {
            tracing::warn!(
                "No Spanish traineddata found at {}, using English only",
                tessdata_dir.display()
            );
            "eng".to_string()
        };

        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            languages,
            psm,
            source: format!("libtesseract-psm{psm}"),
        })
    }

    /// Set language(s) for OCR (e.g., "eng", "spa+eng")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.languages = langs.to_string();
        self
    }

    fn processing_error(&self, reason: String) -> RecognitionError {
        RecognitionError::Processing {
            source_id: self.source.clone(),
            reason,
        }
    }
}

impl RecognitionEngine for BundledTesseract {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn extract(&self, page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| RecognitionError::Init("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.languages))
            .map_err(|e| RecognitionError::Init(format!("{e:?}")))?
            .set_variable("tessedit_pageseg_mode", &self.psm.to_string())
            .map_err(|e| RecognitionError::Init(format!("Failed to set psm: {e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(&page.bytes)
            .map_err(|e| self.processing_error(format!("{e:?}")))?;

        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| self.processing_error(format!("{e:?}")))?;

        Ok(parse_tsv_lines(&tsv, &self.source))
    }
}

/// Locate tessdata directory from environment or system paths.
pub fn find_tessdata_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&path);
        if p.join("eng.traineddata").exists() {
            return Some(p);
        }
    }

    [
        "/usr/share/tesseract-ocr/5/tessdata",
        "/usr/share/tesseract-ocr/4.00/tessdata",
        "/usr/share/tessdata",
        "/usr/local/share/tessdata",
        "/opt/homebrew/share/tessdata",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.join("eng.traineddata").exists())
}
