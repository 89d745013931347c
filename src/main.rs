//! Facturalens command line.
//!
//! `facturalens <INPUT> --output <DIR>` processes one invoice or every invoice
//! in a directory and writes JSON results. The exit status is zero whenever the
//! run completed, even if some invoices were invalid or failed.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use facturalens_lib::config;
use facturalens_lib::pipeline::batch::run_batch;
use facturalens_lib::pipeline::processor::{build_pipeline, build_policy_index};
use facturalens_lib::pipeline::report::{write_batch, write_result};
use facturalens_lib::pipeline_config::PipelineConfig;

#[derive(Parser)]
#[command(name = "facturalens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract and validate invoice data from scanned documents", long_about = None)]
struct Cli {
    /// Invoice file (PDF, PNG, JPEG, TIFF) or a directory of them
    input: PathBuf,

    /// Directory for JSON results
    #[arg(short, long)]
    output: PathBuf,

    /// Directory of policy documents (.txt, .md, .pdf) used as evidence
    #[arg(short, long)]
    policies: Option<PathBuf>,

    /// Pipeline config file (JSON); omitted keys keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Documents processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Tesseract page-segmentation modes, one backend each
    #[arg(long, value_delimiter = ',')]
    engine_psm: Vec<u8>,

    /// Skip the language-model normalizer
    #[arg(long)]
    no_llm: bool,

    /// Ollama endpoint for the normalizer
    #[arg(long, env = "FACTURALENS_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Model name for the normalizer
    #[arg(long, env = "FACTURALENS_MODEL")]
    model: Option<String>,

    /// Policy index cache file
    #[arg(long)]
    index_cache: Option<PathBuf>,

    /// Rebuild the policy index without reading or writing the cache
    #[arg(long)]
    no_cache: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.runtime.workers = workers;
        }
        if !self.engine_psm.is_empty() {
            config.runtime.tesseract_psm = self.engine_psm.clone();
        }
        if self.no_llm {
            config.normalizer.enabled = false;
        }
        if let Some(url) = &self.ollama_url {
            config.normalizer.base_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.normalizer.model = model.clone();
        }
        config.validate().context("Invalid command-line override")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    facturalens_lib::init_logging(cli.verbose);
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    if !cli.input.exists() {
        bail!("Input {} does not exist", cli.input.display());
    }
    let pipeline_config = cli.pipeline_config()?;

    let index = cli.policies.as_deref().map(|dir| {
        let cache = if cli.no_cache {
            None
        } else {
            Some(cli.index_cache.clone().unwrap_or_else(config::policy_index_cache_path))
        };
        build_policy_index(&pipeline_config, dir, cache.as_deref())
    });

    let pipeline = build_pipeline(&pipeline_config, index)
        .context("Failed to initialize the recognition pipeline")?;

    if cli.input.is_file() {
        let result = pipeline
            .process_file(&cli.input)
            .with_context(|| format!("Failed to process {}", cli.input.display()))?;
        let path = write_result(&cli.output, &result).context("Failed to write result")?;
        println!(
            "{}: {} ({} of {} rules failed) -> {}",
            result.metadata.document,
            if result.valid { "valid" } else { "invalid" },
            result.failed_rules().count(),
            result.findings.len(),
            path.display()
        );
        return Ok(());
    }

    let report = run_batch(&pipeline, &cli.input, pipeline_config.runtime.workers)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    write_batch(&cli.output, &report).context("Failed to write batch output")?;
    println!(
        "{} documents: {} succeeded, {} failed, {} valid, {} invalid -> {}",
        report.total_documents,
        report.succeeded,
        report.failed,
        report.count_valid,
        report.count_invalid,
        cli.output.display()
    );
    Ok(())
}
