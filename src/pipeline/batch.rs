//! Batch mode: run many documents through one pipeline on a bounded
//! worker pool and fold the outcomes into a consolidated report.
//!
//! Workers pull the next document index from a shared counter, so a slow
//! document never stalls the others. Entries are reassembled in input order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::models::{BatchEntry, BatchReport, InvoiceResult};
use crate::pipeline::import::{collect_documents, document_name, ImportError};
use crate::pipeline::processor::{InvoicePipeline, ProcessingError};

/// Process every supported document under `input` (a file or a directory).
pub fn run_batch(
    pipeline: &InvoicePipeline,
    input: &Path,
    workers: usize,
) -> Result<BatchReport, ImportError> {
    let documents = collect_documents(input)?;
    tracing::info!(input = %input.display(), documents = documents.len(), workers, "Starting batch");
    Ok(run_documents(pipeline, &documents, workers))
}

/// Process an explicit list of document paths.
pub fn run_documents(pipeline: &InvoicePipeline, documents: &[PathBuf], workers: usize) -> BatchReport {
    run_batch_with(
        documents,
        workers,
        |path| document_name(path),
        |path| pipeline.process_file(path),
    )
}

/// Generic worker pool: `name_of` labels an item for its entry, `process`
/// turns it into a result. A failed item becomes a failed entry and the
/// batch carries on.
pub fn run_batch_with<T, N, F>(items: &[T], workers: usize, name_of: N, process: F) -> BatchReport
where
    T: Sync,
    N: Fn(&T) -> String + Sync,
    F: Fn(&T) -> Result<InvoiceResult, ProcessingError> + Sync,
{
    let start = Instant::now();
    let workers = workers.clamp(1, items.len().max(1));
    let next = AtomicUsize::new(0);

    let mut slots: Vec<(usize, BatchEntry)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(item) = items.get(i) else {
                            break;
                        };
                        done.push((i, run_one(item, &name_of, &process)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(done) => done,
                Err(_) => {
                    tracing::error!("Batch worker panicked");
                    Vec::new()
                }
            })
            .collect()
    });

    // A panicked worker loses the items it had claimed; report them as failed.
    slots.sort_by_key(|(i, _)| *i);
    let mut entries = Vec::with_capacity(items.len());
    let mut slots = slots.into_iter().peekable();
    for (i, item) in items.iter().enumerate() {
        match slots.next_if(|(j, _)| *j == i) {
            Some((_, entry)) => entries.push(entry),
            None => entries.push(BatchEntry::failed(
                name_of(item),
                "worker terminated before completing this document".to_string(),
            )),
        }
    }

    let report = BatchReport::from_entries(entries);
    tracing::info!(
        documents = report.total_documents,
        succeeded = report.succeeded,
        failed = report.failed,
        valid = report.count_valid,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Batch complete"
    );
    report
}

fn run_one<T, N, F>(item: &T, name_of: &N, process: &F) -> BatchEntry
where
    N: Fn(&T) -> String,
    F: Fn(&T) -> Result<InvoiceResult, ProcessingError>,
{
    let name = name_of(item);
    match process(item) {
        Ok(result) => BatchEntry::succeeded(name, result),
        Err(e) => {
            tracing::warn!(document = %name, error = %e, "Document failed");
            BatchEntry::failed(name, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::EntryStatus;
    use crate::pipeline::import::pages::tests::png_bytes;
    use crate::pipeline::import::{MockPdfReader, PageImage};
    use crate::pipeline::recognition::mock::{
        blank_page, invoice_lines, MockRecognitionEngine, ScriptedRecognitionEngine,
    };
    use crate::pipeline::recognition::{RecognitionEngine, RecognitionError};
    use crate::pipeline_config::PipelineConfig;

    /// Both backends read the invoice unless the page is `poison_width` wide.
    fn pipeline(poison_width: u32) -> InvoicePipeline {
        let engine = |source: &'static str, confidence: f32| -> Arc<dyn RecognitionEngine> {
            let inner = MockRecognitionEngine::new(source, &invoice_lines(confidence));
            Arc::new(ScriptedRecognitionEngine::new(source, move |page: &PageImage| {
                if page.width == poison_width {
                    Err(RecognitionError::Processing {
                        source_id: source.to_string(),
                        reason: "cannot read page".to_string(),
                    })
                } else {
                    inner.extract(page)
                }
            }))
        };
        InvoicePipeline::new(
            &PipelineConfig::default(),
            vec![engine("a", 90.0), engine("b", 85.0)],
            Box::new(MockPdfReader { pages: vec![] }),
            None,
            None,
        )
    }

    #[test]
    fn one_unreadable_document_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..10u32 {
            let path = dir.path().join(format!("invoice_{i:02}.png"));
            // Document 6 is 13 pixels wide, which both backends reject.
            let width = if i == 6 { 13 } else { 20 + i };
            std::fs::write(&path, png_bytes(width, 20)).unwrap();
            paths.push(path);
        }

        let report = run_documents(&pipeline(13), &paths, 3);

        assert_eq!(report.total_documents, 10);
        assert_eq!(report.succeeded, 9, "Expected 9 successes, got {}", report.succeeded);
        assert_eq!(report.failed, 1);
        let names: Vec<_> = report.entries.iter().map(|e| e.source_file.as_str()).collect();
        assert_eq!(names[0], "invoice_00.png");
        assert_eq!(names[9], "invoice_09.png");
        let failed = &report.entries[6];
        assert_eq!(failed.status, EntryStatus::Failed);
        assert!(failed.result.is_none());
        assert!(failed.error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[test]
    fn directory_input_is_collected_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), png_bytes(30, 20)).unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes(30, 20)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an invoice").unwrap();

        let report = run_batch(&pipeline(13), dir.path(), 2).unwrap();
        let names: Vec<_> = report.entries.iter().map(|e| e.source_file.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.totals_by_currency["COP"].documents, 2);
    }

    #[test]
    fn generic_pool_preserves_order_with_more_workers_than_items() {
        let p = pipeline(13);
        let items = vec![0usize, 1, 2];
        let report = run_batch_with(
            &items,
            8,
            |i| format!("doc-{i}"),
            |i| p.process_pages(&format!("doc-{i}"), &[blank_page(0)]),
        );
        let names: Vec<_> = report.entries.iter().map(|e| e.source_file.as_str()).collect();
        assert_eq!(names, vec!["doc-0", "doc-1", "doc-2"]);
        assert_eq!(report.succeeded, 3);
    }

    #[test]
    fn empty_batch_is_an_empty_report() {
        let report = run_documents(&pipeline(13), &[], 4);
        assert_eq!(report.total_documents, 0);
        assert!(report.entries.is_empty());
    }
}
