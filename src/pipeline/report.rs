//! Writes run output as pretty JSON: one file per successful document plus
//! `batch_report.json` for the consolidated record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::{BatchReport, InvoiceResult};

pub const BATCH_REPORT_FILE: &str = "batch_report.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Output file name for a document: its stem plus `.json`.
///
/// `taken` holds names already used in this run; on a clash (`a.png` and
/// `a.pdf`) the full document name is kept instead.
fn output_name(document: &str, taken: &mut HashSet<String>) -> String {
    let stem = Path::new(document)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    let mut name = format!("{stem}.json");
    if !taken.insert(name.clone()) || name == BATCH_REPORT_FILE {
        name = format!("{document}.json");
        let mut n = 1;
        while !taken.insert(name.clone()) {
            n += 1;
            name = format!("{document}.{n}.json");
        }
    }
    name
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_dir(dir: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write a single document's result to `<out_dir>/<stem>.json`.
pub fn write_result(out_dir: &Path, result: &InvoiceResult) -> Result<PathBuf, ReportError> {
    ensure_dir(out_dir)?;
    let path = out_dir.join(output_name(&result.metadata.document, &mut HashSet::new()));
    write_json(&path, result)?;
    Ok(path)
}

/// Write every successful result and the consolidated report.
///
/// Returns the paths written, the batch report last.
pub fn write_batch(out_dir: &Path, report: &BatchReport) -> Result<Vec<PathBuf>, ReportError> {
    ensure_dir(out_dir)?;
    let mut taken = HashSet::from([BATCH_REPORT_FILE.to_string()]);
    let mut written = Vec::with_capacity(report.succeeded + 1);

    for entry in &report.entries {
        let Some(result) = &entry.result else {
            continue;
        };
        let path = out_dir.join(output_name(&entry.source_file, &mut taken));
        write_json(&path, result)?;
        written.push(path);
    }

    let path = out_dir.join(BATCH_REPORT_FILE);
    write_json(&path, report)?;
    written.push(path);

    tracing::info!(dir = %out_dir.display(), files = written.len(), "Reports written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{BatchEntry, InvoiceRecord, OcrQuality, RunMetadata, TrackedField};

    fn result(document: &str) -> InvoiceResult {
        let mut record = InvoiceRecord::default();
        record.header.invoice_number = TrackedField::extracted("INV-1".to_string(), 90.0, "n");
        let now = Utc::now();
        InvoiceResult::from_parts(
            record,
            vec![],
            true,
            RunMetadata {
                run_id: Uuid::new_v4(),
                document: document.into(),
                started_at: now,
                finished_at: now,
                duration_ms: 3,
                page_count: 1,
                region_count: 0,
                engines: vec![],
                mean_region_confidence: 0.0,
                ocr_quality: OcrQuality::VeryLow,
                policy_index_generation: None,
                warnings: vec![],
            },
        )
    }

    #[test]
    fn single_result_uses_document_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result(dir.path(), &result("invoice_7.pdf")).unwrap();
        assert_eq!(path.file_name().unwrap(), "invoice_7.json");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["metadata"]["document"], "invoice_7.pdf");
        assert_eq!(json["valid"], true);
    }

    #[test]
    fn batch_writes_successes_and_consolidated_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out");
        let report = BatchReport::from_entries(vec![
            BatchEntry::succeeded("a.png".into(), result("a.png")),
            BatchEntry::failed("broken.png".into(), "all backends failed".into()),
            BatchEntry::succeeded("a.pdf".into(), result("a.pdf")),
        ]);

        let written = write_batch(&out, &report).unwrap();
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "a.pdf.json", "batch_report.json"]);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(BATCH_REPORT_FILE)).unwrap())
                .unwrap();
        assert_eq!(json["total_documents"], 3);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["entries"][1]["status"], "failed");
        assert_eq!(json["entries"][1]["error"], "all backends failed");
    }

    #[test]
    fn document_named_like_the_batch_report_does_not_overwrite_it() {
        let mut taken = HashSet::from([BATCH_REPORT_FILE.to_string()]);
        assert_eq!(output_name("batch_report.png", &mut taken), "batch_report.png.json");
    }
}
