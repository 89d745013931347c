//! Run every registered backend on a page, each with a bounded wait.
//!
//! Backends run on their own threads. Results are collected over a channel
//! until the shared deadline; a backend that has not answered by then is
//! reported as timed out and its thread is left to finish on its own.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::types::{RecognitionEngine, TextObservation};
use super::RecognitionError;
use crate::models::{EngineReport, EngineStatus};
use crate::pipeline::import::PageImage;

/// One backend's contribution to a page.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub source: String,
    /// Empty when the backend failed or timed out.
    pub observations: Vec<TextObservation>,
    pub report: EngineReport,
}

impl BackendOutput {
    pub fn succeeded(&self) -> bool {
        self.report.status == EngineStatus::Ok
    }
}

pub struct RecognitionDispatcher {
    engines: Vec<Arc<dyn RecognitionEngine>>,
    timeout: Duration,
}

impl RecognitionDispatcher {
    pub fn new(engines: Vec<Arc<dyn RecognitionEngine>>, timeout: Duration) -> Self {
        Self { engines, timeout }
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn sources(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.source_id().to_string()).collect()
    }

    /// Recognize one page with every backend.
    ///
    /// Output order matches registration order. Never fails: a backend
    /// error or timeout becomes an empty output with the matching status.
    pub fn run(&self, page: &PageImage) -> Vec<BackendOutput> {
        let (tx, rx) = mpsc::channel::<(usize, Result<Vec<TextObservation>, RecognitionError>, u64)>();

        for (slot, engine) in self.engines.iter().enumerate() {
            let engine = Arc::clone(engine);
            let page = page.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = engine.extract(&page);
                // Receiver may be gone after the deadline
                let _ = tx.send((slot, result, started.elapsed().as_millis() as u64));
            });
        }
        drop(tx);

        let mut outputs: Vec<Option<BackendOutput>> = vec![None; self.engines.len()];
        let deadline = Instant::now() + self.timeout;
        let mut pending = self.engines.len();

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((slot, result, elapsed_ms)) => {
                    let source = self.engines[slot].source_id().to_string();
                    outputs[slot] = Some(to_output(source, page.index, result, elapsed_ms));
                    pending -= 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                // All senders dropped: every thread has reported or panicked
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        outputs
            .into_iter()
            .enumerate()
            .map(|(slot, output)| {
                output.unwrap_or_else(|| {
                    let source = self.engines[slot].source_id().to_string();
                    tracing::warn!(
                        source = %source,
                        page = page.index,
                        timeout_ms,
                        "Recognition backend did not answer before the deadline"
                    );
                    BackendOutput {
                        report: EngineReport {
                            source: source.clone(),
                            page: page.index,
                            status: EngineStatus::TimedOut,
                            observation_count: 0,
                            mean_confidence: None,
                            elapsed_ms: timeout_ms,
                            error: Some(format!(
                                "no answer within {}s",
                                self.timeout.as_secs_f32()
                            )),
                        },
                        source,
                        observations: Vec::new(),
                    }
                })
            })
            .collect()
    }
}

fn to_output(
    source: String,
    page: usize,
    result: Result<Vec<TextObservation>, RecognitionError>,
    elapsed_ms: u64,
) -> BackendOutput {
    match result {
        Ok(observations) => {
            let status = if observations.is_empty() {
                EngineStatus::Empty
            } else {
                EngineStatus::Ok
            };
            let mean_confidence = if observations.is_empty() {
                None
            } else {
                Some(
                    observations.iter().map(|o| o.confidence).sum::<f32>()
                        / observations.len() as f32,
                )
            };
            tracing::debug!(
                source = %source,
                page,
                observations = observations.len(),
                elapsed_ms,
                "Recognition backend finished"
            );
            BackendOutput {
                report: EngineReport {
                    source: source.clone(),
                    page,
                    status,
                    observation_count: observations.len(),
                    mean_confidence,
                    elapsed_ms,
                    error: None,
                },
                source,
                observations,
            }
        }
        Err(e) => {
            let status = match e {
                RecognitionError::Timeout { .. } => EngineStatus::TimedOut,
                _ => EngineStatus::Failed,
            };
            tracing::warn!(source = %source, page, error = %e, "Recognition backend failed");
            BackendOutput {
                report: EngineReport {
                    source: source.clone(),
                    page,
                    status,
                    observation_count: 0,
                    mean_confidence: None,
                    elapsed_ms,
                    error: Some(e.to_string()),
                },
                source,
                observations: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recognition::mock::{
        blank_page, FailingRecognitionEngine, MockRecognitionEngine, SlowRecognitionEngine,
    };
    use crate::pipeline::recognition::BoundingBox;

    fn line(text: &'static str, conf: f32) -> (&'static str, BoundingBox, f32) {
        (text, BoundingBox::new(10.0, 10.0, 200.0, 30.0), conf)
    }

    #[test]
    fn outputs_follow_registration_order() {
        let dispatcher = RecognitionDispatcher::new(
            vec![
                Arc::new(MockRecognitionEngine::new("a", &[line("Total: 96.00", 90.0)])),
                Arc::new(MockRecognitionEngine::new("b", &[line("Total: 96.00", 80.0)])),
            ],
            Duration::from_secs(5),
        );
        let outputs = dispatcher.run(&blank_page(0));
        let sources: Vec<&str> = outputs.iter().map(|o| o.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);
        assert!(outputs.iter().all(|o| o.succeeded()));
        assert_eq!(outputs[0].report.mean_confidence, Some(90.0));
    }

    #[test]
    fn failing_backend_degrades_to_empty_output() {
        let dispatcher = RecognitionDispatcher::new(
            vec![
                Arc::new(FailingRecognitionEngine::new("broken")),
                Arc::new(MockRecognitionEngine::new("ok", &[line("NIT: 900123456", 85.0)])),
            ],
            Duration::from_secs(5),
        );
        let outputs = dispatcher.run(&blank_page(0));
        assert_eq!(outputs[0].report.status, EngineStatus::Failed);
        assert!(outputs[0].observations.is_empty());
        assert!(outputs[0].report.error.as_deref().unwrap_or("").contains("engine crashed"));
        assert_eq!(outputs[1].report.status, EngineStatus::Ok);
    }

    #[test]
    fn empty_backend_is_reported_as_empty() {
        let dispatcher = RecognitionDispatcher::new(
            vec![Arc::new(MockRecognitionEngine::new("blank", &[]))],
            Duration::from_secs(5),
        );
        let outputs = dispatcher.run(&blank_page(3));
        assert_eq!(outputs[0].report.status, EngineStatus::Empty);
        assert_eq!(outputs[0].report.page, 3);
        assert_eq!(outputs[0].report.mean_confidence, None);
    }

    #[test]
    fn slow_backend_times_out_without_blocking_others() {
        let slow = SlowRecognitionEngine::new(
            MockRecognitionEngine::new("slow", &[line("late", 99.0)]),
            Duration::from_secs(3),
        );
        let dispatcher = RecognitionDispatcher::new(
            vec![
                Arc::new(slow),
                Arc::new(MockRecognitionEngine::new("fast", &[line("on time", 70.0)])),
            ],
            Duration::from_millis(200),
        );
        let started = Instant::now();
        let outputs = dispatcher.run(&blank_page(0));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "Expected dispatch to return near the deadline, took {:?}",
            started.elapsed()
        );
        assert_eq!(outputs[0].report.status, EngineStatus::TimedOut);
        assert!(outputs[0].observations.is_empty());
        assert_eq!(outputs[1].report.status, EngineStatus::Ok);
    }
}
