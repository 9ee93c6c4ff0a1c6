//! # Multi-Pass Text Recognition Module
//!
//! Runs a normalized receipt image through Tesseract four times with
//! different page-segmentation/whitelist configurations and aggregates the
//! attempts. Receipt folios are printed in wildly varying layouts, so no
//! single segmentation mode wins on every photo; the extractor downstream
//! works over the concatenation of every successful pass.
//!
//! The four passes run as parallel blocking tasks joined by the aggregator.
//! A failed pass contributes no attempt and is logged, not retried.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::error_logging;
use crate::instance_manager::OcrInstanceManager;
use crate::ocr_config::{OcrConfig, PageSegMode};
use crate::ocr_errors::OcrError;

/// The recognition configurations attempted on every receipt, in label order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    SingleLine,
    SingleBlock,
    Auto,
    SparseText,
}

impl PassMode {
    /// All passes a run executes
    pub fn all() -> [PassMode; 4] {
        [
            PassMode::SingleLine,
            PassMode::SingleBlock,
            PassMode::Auto,
            PassMode::SparseText,
        ]
    }

    /// Stable label recorded with each attempt
    pub fn label(&self) -> &'static str {
        match self {
            PassMode::SingleLine => "SINGLE_LINE",
            PassMode::SingleBlock => "SINGLE_BLOCK",
            PassMode::Auto => "AUTO",
            PassMode::SparseText => "SPARSE_TEXT",
        }
    }

    /// Tesseract page segmentation mode for this pass
    pub fn psm(&self) -> PageSegMode {
        match self {
            PassMode::SingleLine => PageSegMode::SingleLine,
            PassMode::SingleBlock => PageSegMode::SingleBlock,
            PassMode::Auto => PageSegMode::Auto,
            PassMode::SparseText => PageSegMode::SparseText,
        }
    }

    /// Whether this pass restricts output to the folio character whitelist.
    /// The automatic pass runs unrestricted to pick up label context words.
    pub fn whitelisted(&self) -> bool {
        !matches!(self, PassMode::Auto)
    }
}

/// One completed recognition attempt. Immutable once produced.
#[derive(Debug, Clone)]
pub struct OcrAttempt {
    pub recognized_text: String,
    /// Mean text confidence reported by the engine, 0-100
    pub confidence: f32,
    pub mode: PassMode,
}

/// Aggregate over the attempts of one recognition run.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub attempts: Vec<OcrAttempt>,
    /// All attempts' text joined by newline
    pub concatenated_text: String,
    /// Mean of succeeded attempts' confidence; 0.0 when none succeeded
    pub average_confidence: f32,
    /// Text of the attempt with maximum confidence
    pub best_attempt_text: String,
}

impl OcrOutcome {
    /// Build the aggregate from whichever attempts succeeded.
    ///
    /// Failed invocations are simply absent: the average is computed only
    /// over the attempts present, never penalized by failures.
    pub fn from_attempts(attempts: Vec<OcrAttempt>) -> Self {
        let concatenated_text = attempts
            .iter()
            .map(|a| a.recognized_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let average_confidence = if attempts.is_empty() {
            0.0
        } else {
            attempts.iter().map(|a| a.confidence).sum::<f32>() / attempts.len() as f32
        };

        let best_attempt_text = attempts
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|a| a.recognized_text.clone())
            .unwrap_or_default();

        Self {
            attempts,
            concatenated_text,
            average_confidence,
            best_attempt_text,
        }
    }

    /// Whether any pass produced text at all
    pub fn detected_any_text(&self) -> bool {
        !self.concatenated_text.trim().is_empty()
    }
}

/// Recognize text in a normalized receipt image.
///
/// Writes the PNG buffer to a temporary file (Tesseract reads from paths),
/// then runs the four passes concurrently on the blocking pool, each bounded
/// by the configured per-pass timeout. An all-passes-failed run is an
/// "undetected" outcome, not an error.
pub async fn recognize_receipt(
    png_bytes: &[u8],
    config: &OcrConfig,
    manager: &Arc<OcrInstanceManager>,
) -> Result<OcrOutcome, OcrError> {
    let start_time = std::time::Instant::now();

    if png_bytes.is_empty() {
        return Err(OcrError::Validation(
            "empty image buffer handed to recognition".to_string(),
        ));
    }

    let mut temp_file = tempfile::Builder::new()
        .prefix("boleta_ocr_")
        .suffix(".png")
        .tempfile()
        .map_err(|e| OcrError::ImageLoad(format!("Failed to create temp image: {}", e)))?;
    temp_file
        .write_all(png_bytes)
        .map_err(|e| OcrError::ImageLoad(format!("Failed to write temp image: {}", e)))?;
    let image_path = temp_file.path().to_path_buf();

    let [a, b, c, d] = PassMode::all();
    let (first, second, third, fourth) = tokio::join!(
        run_pass_with_timeout(a, image_path.clone(), config.clone(), Arc::clone(manager)),
        run_pass_with_timeout(b, image_path.clone(), config.clone(), Arc::clone(manager)),
        run_pass_with_timeout(c, image_path.clone(), config.clone(), Arc::clone(manager)),
        run_pass_with_timeout(d, image_path, config.clone(), Arc::clone(manager)),
    );

    let attempts: Vec<OcrAttempt> = [first, second, third, fourth]
        .into_iter()
        .flatten()
        .collect();

    let outcome = OcrOutcome::from_attempts(attempts);

    info!(
        attempts = outcome.attempts.len(),
        average_confidence = outcome.average_confidence,
        total_ms = start_time.elapsed().as_millis() as u64,
        "Multi-pass recognition completed"
    );
    crate::observability::record_recognition_run(
        outcome.attempts.len(),
        start_time.elapsed(),
    );

    Ok(outcome)
}

/// Run one pass on the blocking pool under the configured timeout.
/// Any failure (including timeout) degrades to `None`.
async fn run_pass_with_timeout(
    mode: PassMode,
    image_path: PathBuf,
    config: OcrConfig,
    manager: Arc<OcrInstanceManager>,
) -> Option<OcrAttempt> {
    let pass_start = std::time::Instant::now();
    let timeout_secs = config.recovery.operation_timeout_secs;
    let timeout = Duration::from_secs(timeout_secs);

    let handle =
        tokio::task::spawn_blocking(move || execute_pass(mode, &image_path, &config, &manager));

    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(OcrError::Extraction(format!(
            "OCR pass task failed: {}",
            join_err
        ))),
        Err(_) => Err(OcrError::Timeout(format!(
            "pass {} exceeded {}s",
            mode.label(),
            timeout_secs
        ))),
    };

    match result {
        Ok(attempt) => {
            debug!(
                pass = mode.label(),
                confidence = attempt.confidence,
                chars = attempt.recognized_text.len(),
                elapsed_ms = pass_start.elapsed().as_millis() as u64,
                "OCR pass succeeded"
            );
            crate::observability::record_ocr_pass(mode.label(), true);
            Some(attempt)
        }
        Err(err) => {
            warn!(pass = mode.label(), "OCR pass failed: {}", err);
            error_logging::log_ocr_error(
                &err,
                "recognize_receipt",
                Some(mode.label()),
                None,
                Some(pass_start.elapsed()),
            );
            crate::observability::record_ocr_pass(mode.label(), false);
            None
        }
    }
}

/// Core Tesseract invocation for a single pass. Runs on the blocking pool.
fn execute_pass(
    mode: PassMode,
    image_path: &std::path::Path,
    config: &OcrConfig,
    manager: &OcrInstanceManager,
) -> Result<OcrAttempt, OcrError> {
    let instance = manager
        .get_instance(config, mode.psm(), mode.whitelisted())
        .map_err(|e| OcrError::Initialization(e.to_string()))?;

    let (raw_text, confidence) = {
        let mut tess = instance
            .lock()
            .expect("Failed to acquire Tesseract instance lock");

        tess.set_image(image_path)
            .map_err(|e| OcrError::ImageLoad(format!("Failed to load image for OCR: {}", e)))?;

        let text = tess
            .get_utf8_text()
            .map_err(|e| OcrError::Extraction(format!("Failed to extract text: {}", e)))?;

        let confidence = tess.mean_text_conf();
        (text, confidence)
    };

    // Clean up the extracted text (remove extra whitespace and empty lines)
    let cleaned_text = raw_text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n");

    Ok(OcrAttempt {
        recognized_text: cleaned_text,
        confidence: (confidence.clamp(0, 100)) as f32,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(text: &str, confidence: f32, mode: PassMode) -> OcrAttempt {
        OcrAttempt {
            recognized_text: text.to_string(),
            confidence,
            mode,
        }
    }

    #[test]
    fn test_outcome_averages_only_successes() {
        // Two passes succeeded out of four; the average covers exactly those two
        let outcome = OcrOutcome::from_attempts(vec![
            attempt("BOLETA 12345", 80.0, PassMode::SingleLine),
            attempt("N 12345", 60.0, PassMode::SparseText),
        ]);
        assert!((outcome.average_confidence - 70.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_outcome_concatenates_with_newlines() {
        let outcome = OcrOutcome::from_attempts(vec![
            attempt("first", 10.0, PassMode::SingleLine),
            attempt("second", 20.0, PassMode::SingleBlock),
        ]);
        assert_eq!(outcome.concatenated_text, "first\nsecond");
    }

    #[test]
    fn test_outcome_best_attempt_by_confidence() {
        let outcome = OcrOutcome::from_attempts(vec![
            attempt("low", 30.0, PassMode::SingleLine),
            attempt("high", 90.0, PassMode::Auto),
            attempt("mid", 50.0, PassMode::SparseText),
        ]);
        assert_eq!(outcome.best_attempt_text, "high");
    }

    #[test]
    fn test_all_passes_failed_is_empty_outcome() {
        let outcome = OcrOutcome::from_attempts(Vec::new());
        assert_eq!(outcome.concatenated_text, "");
        assert_eq!(outcome.average_confidence, 0.0);
        assert_eq!(outcome.best_attempt_text, "");
        assert!(!outcome.detected_any_text());
    }

    #[tokio::test]
    async fn test_empty_buffer_rejected_before_any_pass() {
        let config = crate::ocr_config::OcrConfig::default();
        let manager = Arc::new(crate::instance_manager::OcrInstanceManager::new());
        let result = recognize_receipt(&[], &config, &manager).await;
        assert!(matches!(result, Err(OcrError::Validation(_))));
        assert_eq!(manager.instance_count(), 0);
    }

    #[test]
    fn test_pass_roster_and_whitelisting() {
        let labels: Vec<&str> = PassMode::all().iter().map(|m| m.label()).collect();
        assert_eq!(
            labels,
            vec!["SINGLE_LINE", "SINGLE_BLOCK", "AUTO", "SPARSE_TEXT"]
        );
        // Only the automatic pass runs without the whitelist
        assert!(PassMode::SingleLine.whitelisted());
        assert!(PassMode::SingleBlock.whitelisted());
        assert!(PassMode::SparseText.whitelisted());
        assert!(!PassMode::Auto.whitelisted());
    }
}
