use std::path::Path;
use std::sync::Arc;

use image::GenericImageView;

use super::format::{detect_format, InputFormat};
use super::pdf::PdfDocumentReader;
use super::ImportError;

/// One page ready for recognition: encoded image bytes plus pixel size.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index within the document.
    pub index: usize,
    pub bytes: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl PageImage {
    /// Decode just enough of the image to validate it and learn its size.
    pub fn from_encoded(index: usize, bytes: Vec<u8>) -> Result<Self, ImportError> {
        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            ImportError::ImageProcessing(format!("Failed to decode page {index}: {e}"))
        })?;
        let (width, height) = decoded.dimensions();
        Ok(Self {
            index,
            bytes: Arc::new(bytes),
            width,
            height,
        })
    }
}

/// Load every page of a document as an image.
///
/// Images become a single page; PDFs are rendered page by page at `dpi`.
pub fn load_pages(
    path: &Path,
    pdf: &dyn PdfDocumentReader,
    dpi: u32,
) -> Result<Vec<PageImage>, ImportError> {
    let format = detect_format(path)?;
    let bytes = std::fs::read(path)?;

    let pages = match format {
        f if f.is_image() => vec![PageImage::from_encoded(0, bytes)?],
        InputFormat::Pdf => {
            let count = pdf.page_count(&bytes)?;
            let mut pages = Vec::with_capacity(count);
            for page_number in 0..count {
                let png = pdf.render_page(&bytes, page_number, dpi)?;
                pages.push(PageImage::from_encoded(page_number, png)?);
            }
            pages
        }
        other => {
            return Err(ImportError::UnsupportedFormat(format!(
                "{} ({})",
                path.display(),
                other.as_str()
            )))
        }
    };

    if pages.is_empty() {
        return Err(ImportError::NoPages);
    }

    tracing::debug!(
        path = %path.display(),
        format = format.as_str(),
        pages = pages.len(),
        "Loaded document pages"
    );
    Ok(pages)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::pipeline::import::pdf::MockPdfReader;

    /// Encode a blank RGB image of the given size as PNG.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn image_file_is_one_page_with_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, png_bytes(7, 3)).unwrap();

        let pages = load_pages(&path, &MockPdfReader { pages: vec![] }, 300).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].width, pages[0].height), (7, 3));
        assert_eq!(pages[0].index, 0);
    }

    #[test]
    fn pdf_is_rendered_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        std::fs::write(&path, b"%PDF-1.7 fake").unwrap();

        let reader = MockPdfReader {
            pages: vec![String::new(), String::new(), String::new()],
        };
        let pages = load_pages(&path, &reader, 200).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].index, 2);
        assert_eq!(pages[2].width, 3, "Mock renders page N with width N+1");
    }

    #[test]
    fn empty_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let err = load_pages(&path, &MockPdfReader { pages: vec![] }, 200).unwrap_err();
        assert!(matches!(err, ImportError::NoPages), "got {err:?}");
    }

    #[test]
    fn corrupt_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, [0x89, 0x50, 0x4E, 0x47, 0x00, 0x01]).unwrap();

        let err = load_pages(&path, &MockPdfReader { pages: vec![] }, 200).unwrap_err();
        assert!(matches!(err, ImportError::ImageProcessing(_)), "got {err:?}");
    }

    #[test]
    fn unsupported_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"just text").unwrap();

        let err = load_pages(&path, &MockPdfReader { pages: vec![] }, 200).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }
}
