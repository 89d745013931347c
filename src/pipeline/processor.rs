//! Invoice processing orchestrator.
//!
//! Drives one document through the full pipeline:
//! pages → recognition → reconciliation → extraction → normalization → validation.
//!
//! Uses trait-based DI for every external collaborator (recognition engines,
//! PDF reader, language model, embedder) so the orchestrator is fully
//! testable with mocks. Only fatal-per-document conditions come back as
//! `Err`; everything recoverable is recorded in the result's metadata.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    EngineReport, EngineStatus, InvoiceResult, PipelineStage, PipelineWarning, RunMetadata,
};
use crate::pipeline::extraction::FieldExtractor;
use crate::pipeline::import::{document_name, load_pages, ImportError, PageImage, PdfDocumentReader, PdfiumReader};
use crate::pipeline::normalize::{LanguageModel, Normalizer, OllamaClient, UnavailableModel};
use crate::pipeline::policy::{EmbeddingModel, HashingEmbedder, PolicyIndex};
use crate::pipeline::recognition::tesseract_cli::TesseractCliEngine;
use crate::pipeline::recognition::{RecognitionDispatcher, RecognitionEngine};
use crate::pipeline::reconcile::{classify_quality, ObservationReconciler, ReconcileError};
use crate::pipeline::validation::Validator;
use crate::pipeline_config::PipelineConfig;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Conditions that end one document's run. A batch records them as failed entries.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Recognition failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("No recognition engines configured")]
    NoEngines,

    #[error("Recognition engine initialization failed: {0}")]
    EngineInit(String),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// One configured pipeline, shareable across worker threads.
pub struct InvoicePipeline {
    dispatcher: RecognitionDispatcher,
    reconciler: ObservationReconciler,
    extractor: FieldExtractor,
    normalizer: Normalizer,
    validator: Validator,
    index: Option<Arc<PolicyIndex>>,
    pdf: Box<dyn PdfDocumentReader + Send + Sync>,
    render_dpi: u32,
}

impl InvoicePipeline {
    pub fn new(
        config: &PipelineConfig,
        engines: Vec<Arc<dyn RecognitionEngine>>,
        pdf: Box<dyn PdfDocumentReader + Send + Sync>,
        model: Option<Arc<dyn LanguageModel>>,
        index: Option<Arc<PolicyIndex>>,
    ) -> Self {
        Self {
            dispatcher: RecognitionDispatcher::new(engines, config.recognition_timeout()),
            reconciler: ObservationReconciler::new(config.reconcile.clone()),
            extractor: FieldExtractor::new(
                config.extraction.clone(),
                config.reconcile.single_source_weight,
            ),
            normalizer: Normalizer::new(model, config.normalizer.clone()),
            validator: Validator::new(index.clone(), config.validation.clone()),
            index,
            pdf,
            render_dpi: config.runtime.render_dpi,
        }
    }

    pub fn policy_index(&self) -> Option<&Arc<PolicyIndex>> {
        self.index.as_ref()
    }

    /// Full pipeline from a file path (image or PDF).
    pub fn process_file(&self, path: &Path) -> Result<InvoiceResult, ProcessingError> {
        let document = document_name(path);
        tracing::info!(document = %document, "Processing: loading pages");
        let pages = load_pages(path, self.pdf.as_ref(), self.render_dpi)?;
        self.process_pages(&document, &pages)
    }

    /// Full pipeline over already-loaded pages.
    pub fn process_pages(
        &self,
        document: &str,
        pages: &[PageImage],
    ) -> Result<InvoiceResult, ProcessingError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut warnings = Vec::new();

        if self.dispatcher.engine_count() == 0 {
            return Err(ProcessingError::NoEngines);
        }

        // Step 1: Recognition, every backend on every page
        let mut per_page = Vec::with_capacity(pages.len());
        let mut engines: Vec<EngineReport> = Vec::new();
        for page in pages {
            let outputs = self.dispatcher.run(page);
            let mut observations = Vec::with_capacity(outputs.len());
            for output in outputs {
                if matches!(output.report.status, EngineStatus::Failed | EngineStatus::TimedOut) {
                    warnings.push(PipelineWarning::new(
                        PipelineStage::Recognition,
                        format!(
                            "{} on page {}: {}",
                            output.source,
                            page.index + 1,
                            output.report.error.as_deref().unwrap_or(output.report.status.as_str())
                        ),
                    ));
                }
                engines.push(output.report);
                observations.push(output.observations);
            }
            per_page.push(observations);
        }

        // Step 2: Reconciliation
        let layout = self.reconciler.reconcile(&per_page).map_err(|e| {
            tracing::warn!(document, error = %e, "Processing: reconciliation failed");
            e
        })?;

        // Step 3: Extraction
        let record = self.extractor.extract(&layout);

        // Step 4: Normalization
        let normalized = self.normalizer.normalize(record, layout.full_text());
        warnings.extend(normalized.warnings);
        if !normalized.normalized_fields.is_empty() {
            tracing::info!(
                document,
                fields = ?normalized.normalized_fields,
                "Processing: fields normalized"
            );
        }
        let record = normalized.record;

        // Step 5: Validation
        let validation = self.validator.validate(&record);
        warnings.extend(validation.warnings);

        let mean_region_confidence = layout.mean_confidence().unwrap_or(0.0);
        let metadata = RunMetadata {
            run_id: Uuid::new_v4(),
            document: document.to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.elapsed().as_millis() as u64,
            page_count: pages.len(),
            region_count: layout.regions().len(),
            engines,
            mean_region_confidence,
            ocr_quality: classify_quality(mean_region_confidence),
            policy_index_generation: self
                .index
                .as_ref()
                .filter(|index| index.is_built())
                .map(|index| index.generation()),
            warnings,
        };

        tracing::info!(
            document,
            valid = validation.valid,
            ocr_quality = metadata.ocr_quality.as_str(),
            mean_confidence = mean_region_confidence,
            warnings = metadata.warnings.len(),
            duration_ms = metadata.duration_ms,
            "Processing complete"
        );

        Ok(InvoiceResult::from_parts(
            record,
            validation.findings,
            validation.valid,
            metadata,
        ))
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build an `InvoicePipeline` with production implementations.
///
/// - Recognition: one Tesseract backend per configured page-segmentation mode
///   (in-process with the `ocr` feature and tessdata present, else the CLI)
/// - PDF: `PdfiumReader`
/// - Language model: `OllamaClient`, unless the normalizer is disabled
/// - Policy index: `index`, built beforehand by `build_policy_index`
pub fn build_pipeline(
    config: &PipelineConfig,
    index: Option<Arc<PolicyIndex>>,
) -> Result<InvoicePipeline, ProcessingError> {
    let engines = build_recognition_engines(config)?;
    let model = build_language_model(config);
    Ok(InvoicePipeline::new(
        config,
        engines,
        Box::new(PdfiumReader::new()),
        model,
        index,
    ))
}

fn build_recognition_engines(
    config: &PipelineConfig,
) -> Result<Vec<Arc<dyn RecognitionEngine>>, ProcessingError> {
    let runtime = &config.runtime;
    if runtime.tesseract_psm.is_empty() {
        return Err(ProcessingError::NoEngines);
    }

    #[cfg(feature = "ocr")]
    {
        use crate::pipeline::recognition::bundled::{find_tessdata_dir, BundledTesseract};

        if let Some(tessdata) = find_tessdata_dir() {
            let mut engines: Vec<Arc<dyn RecognitionEngine>> = Vec::new();
            for &psm in &runtime.tesseract_psm {
                let engine = BundledTesseract::new(&tessdata, psm)
                    .map_err(|e| ProcessingError::EngineInit(e.to_string()))?
                    .with_languages(&runtime.tesseract_languages);
                engines.push(Arc::new(engine));
            }
            tracing::info!(tessdata = %tessdata.display(), backends = engines.len(), "In-process Tesseract initialized");
            return Ok(engines);
        }
        tracing::warn!("Tesseract data not found, falling back to the tesseract executable");
    }

    let timeout = config.recognition_timeout();
    let engines: Vec<TesseractCliEngine> = runtime
        .tesseract_psm
        .iter()
        .map(|&psm| TesseractCliEngine::new(psm, &runtime.tesseract_languages, timeout))
        .collect();
    if let Some(first) = engines.first() {
        if !first.is_installed() {
            return Err(ProcessingError::EngineInit(
                "tesseract executable not found on PATH; install tesseract-ocr".into(),
            ));
        }
    }
    tracing::info!(backends = engines.len(), "Tesseract CLI backends configured");
    Ok(engines
        .into_iter()
        .map(|e| Arc::new(e) as Arc<dyn RecognitionEngine>)
        .collect())
}

fn build_language_model(config: &PipelineConfig) -> Option<Arc<dyn LanguageModel>> {
    if !config.normalizer.enabled {
        tracing::info!("Normalizer disabled by configuration");
        return None;
    }
    match OllamaClient::from_config(&config.normalizer) {
        Ok(client) => {
            tracing::info!(model = %config.normalizer.model, url = %config.normalizer.base_url, "Normalizer using Ollama");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ollama client unavailable, normalization will be skipped");
            Some(Arc::new(UnavailableModel::new(&config.normalizer.model, e.to_string())))
        }
    }
}

/// Embedding model for the policy index: ONNX when compiled in and its model
/// files are present, else the built-in hashing embedder.
pub fn build_embedder() -> Arc<dyn EmbeddingModel> {
    #[cfg(feature = "onnx-embeddings")]
    {
        let dir = crate::config::embedding_model_dir();
        match crate::pipeline::policy::OnnxEmbedder::load(&dir) {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => {
                tracing::warn!(error = %e, "ONNX embedder unavailable, using hashing embedder");
            }
        }
    }
    Arc::new(HashingEmbedder::new())
}

/// Build (or load from cache) the policy index for `corpus_dir`.
///
/// A corpus that cannot be indexed leaves the index unbuilt rather than
/// failing: validation then reports insufficient evidence for
/// evidence-backed rules.
pub fn build_policy_index(
    config: &PipelineConfig,
    corpus_dir: &Path,
    cache_path: Option<&Path>,
) -> Arc<PolicyIndex> {
    let index = Arc::new(PolicyIndex::new(build_embedder(), &config.policy));
    match index.open_or_build(corpus_dir, cache_path, &PdfiumReader::new()) {
        Ok(stats) => {
            tracing::info!(
                corpus = %corpus_dir.display(),
                documents = stats.documents,
                chunks = stats.chunks,
                from_cache = stats.from_cache,
                "Policy index ready"
            );
        }
        Err(e) => {
            tracing::warn!(corpus = %corpus_dir.display(), error = %e, "Policy index not built");
        }
    }
    index
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
