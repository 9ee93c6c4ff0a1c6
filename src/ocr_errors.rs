//! # OCR Error Types
//!
//! Error variants produced by the recognition pipeline. Each variant maps to
//! a distinct failure stage so callers can log and degrade accordingly.

use std::fmt;

/// Errors that can occur during OCR processing
#[derive(Debug, Clone, PartialEq)]
pub enum OcrError {
    /// Input image failed validation (format, size)
    Validation(String),
    /// Tesseract instance could not be initialized
    Initialization(String),
    /// Image could not be loaded into the engine
    ImageLoad(String),
    /// Text extraction itself failed
    Extraction(String),
    /// The OCR operation exceeded its timeout
    Timeout(String),
}

impl fmt::Display for OcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrError::Validation(msg) => write!(f, "OCR validation error: {}", msg),
            OcrError::Initialization(msg) => write!(f, "OCR initialization error: {}", msg),
            OcrError::ImageLoad(msg) => write!(f, "OCR image load error: {}", msg),
            OcrError::Extraction(msg) => write!(f, "OCR extraction error: {}", msg),
            OcrError::Timeout(msg) => write!(f, "OCR timeout: {}", msg),
        }
    }
}

impl std::error::Error for OcrError {}
