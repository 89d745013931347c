//! Tesseract via its command-line executable.
//!
//! The page image is piped to `tesseract stdin stdout ... tsv` and the TSV
//! written to stdout is parsed into line observations. Every run has a hard
//! deadline: a process still alive at the deadline is killed.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::tsv::parse_tsv_lines;
use super::types::{RecognitionEngine, TextObservation};
use super::RecognitionError;
use crate::pipeline::import::PageImage;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct TesseractCliEngine {
    binary: PathBuf,
    psm: u8,
    languages: String,
    tessdata_dir: Option<PathBuf>,
    timeout: Duration,
    source: String,
}

impl TesseractCliEngine {
    pub fn new(psm: u8, languages: &str, timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            psm,
            languages: languages.to_string(),
            tessdata_dir: None,
            timeout,
            source: format!("tesseract-psm{psm}"),
        }
    }

    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_tessdata_dir(mut self, dir: PathBuf) -> Self {
        self.tessdata_dir = Some(dir);
        self
    }

    /// Whether the executable can be launched at all.
    pub fn is_installed(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("stdin").arg("stdout");
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.arg("--psm")
            .arg(self.psm.to_string())
            .arg("-l")
            .arg(&self.languages)
            .arg("tsv");
        cmd
    }

    fn processing_error(&self, reason: impl Into<String>) -> RecognitionError {
        RecognitionError::Processing {
            source_id: self.source.clone(),
            reason: reason.into(),
        }
    }
}

impl RecognitionEngine for TesseractCliEngine {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn extract(&self, page: &PageImage) -> Result<Vec<TextObservation>, RecognitionError> {
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RecognitionError::EngineUnavailable(format!(
                        "{} not found on PATH",
                        self.binary.display()
                    ))
                } else {
                    RecognitionError::Io(e)
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.processing_error("stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.processing_error("stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.processing_error("stderr not captured"))?;

        // Feed and drain on separate threads so a full pipe cannot stall the child.
        let image = Arc::clone(&page.bytes);
        let writer = thread::spawn(move || stdin.write_all(&image));
        let reader = thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });
        let err_reader = thread::spawn(move || {
            let mut out = String::new();
            let _ = stderr.read_to_string(&mut out);
            out
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(
                    source = %self.source,
                    page = page.index,
                    timeout_secs = self.timeout.as_secs(),
                    "Tesseract killed at deadline"
                );
                return Err(RecognitionError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A broken pipe here only means tesseract stopped reading early; the exit status decides.
        let _ = writer.join();
        let tsv = reader
            .join()
            .map_err(|_| self.processing_error("stdout reader panicked"))??;
        let diagnostics = err_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(self.processing_error(format!(
                "exit status {status}: {}",
                diagnostics.trim()
            )));
        }

        let observations = parse_tsv_lines(&tsv, &self.source);
        tracing::debug!(
            source = %self.source,
            page = page.index,
            lines = observations.len(),
            "Tesseract CLI finished"
        );
        Ok(observations)
    }
}
