//! # OCR Configuration Module
//!
//! Configuration structures for receipt text recognition: language and model
//! selection, page segmentation modes for the multi-pass recognizer, the
//! folio character whitelist, and recovery/circuit-breaker settings.

// Constants for OCR configuration
pub const DEFAULT_LANGUAGES: &str = "spa";
pub const FORMAT_DETECTION_BUFFER_SIZE: usize = 32;
pub const MIN_FORMAT_BYTES: usize = 8;
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024; // 5MB upload ceiling

/// Characters Tesseract is restricted to on whitelisted passes: digits plus
/// the Latin letters and punctuation that appear in "N°"/"No"/"BOLETA"/"FOLIO"
/// labels on Chilean receipts.
pub const FOLIO_CHAR_WHITELIST: &str = "0123456789NnOoBbLlEeTtAaFfIiUuMmRrSsCc°º#:.- ";

/// Recovery configuration for fault handling
///
/// There is no retry anywhere in the pipeline; recovery here means timeouts
/// and circuit breaking for the branch scan.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Timeout for a single OCR pass in seconds
    pub operation_timeout_secs: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: 30, // 30 seconds per pass
            circuit_breaker_threshold: 3,
            circuit_breaker_reset_secs: 120, // 2 minutes
        }
    }
}

impl RecoveryConfig {
    /// Validate recovery configuration parameters
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.operation_timeout_secs == 0 {
            return Err(crate::errors::AppError::Config(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(crate::errors::AppError::Config(
                "circuit_breaker_threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker_reset_secs == 0 {
            return Err(crate::errors::AppError::Config(
                "circuit_breaker_reset_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Format-specific file size limits for uploaded receipt photos
#[derive(Debug, Clone)]
pub struct FormatSizeLimits {
    /// PNG format limit
    pub png_max: u64,
    /// JPEG format limit
    pub jpeg_max: u64,
    /// Threshold above which files are rejected without format sniffing
    pub min_quick_reject: u64,
}

impl Default for FormatSizeLimits {
    fn default() -> Self {
        Self {
            png_max: 5 * 1024 * 1024,           // 5MB for PNG
            jpeg_max: 5 * 1024 * 1024,          // 5MB for JPEG
            min_quick_reject: 20 * 1024 * 1024, // 20MB quick reject
        }
    }
}

impl FormatSizeLimits {
    /// Validate format size limits
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.png_max == 0 || self.jpeg_max == 0 {
            return Err(crate::errors::AppError::Config(
                "format size limits must be greater than 0".to_string(),
            ));
        }
        if self.min_quick_reject < self.png_max || self.min_quick_reject < self.jpeg_max {
            return Err(crate::errors::AppError::Config(
                "min_quick_reject must be at least as large as every format limit".to_string(),
            ));
        }
        Ok(())
    }
}

/// Page Segmentation Mode for Tesseract OCR
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PageSegMode {
    /// Fully automatic page segmentation
    #[default]
    Auto = 3,
    /// Assume a single uniform block of text
    SingleBlock = 6,
    /// Treat the image as a single text line
    SingleLine = 7,
    /// Find as much text as possible in no particular order
    SparseText = 11,
}

impl PageSegMode {
    /// Convert PSM mode to string value for Tesseract
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSegMode::Auto => "3",
            PageSegMode::SingleBlock => "6",
            PageSegMode::SingleLine => "7",
            PageSegMode::SparseText => "11",
        }
    }
}

/// Tesseract model type for different accuracy/speed trade-offs
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ModelType {
    /// Fast model (tessdata_fast) - faster processing, lower accuracy
    #[default]
    Fast,
    /// Best model (tessdata_best) - slower processing, higher accuracy
    Best,
}

impl ModelType {
    /// Get the tessdata directory name for this model type
    pub fn tessdata_dir(&self) -> &'static str {
        match self {
            ModelType::Fast => "tessdata_fast",
            ModelType::Best => "tessdata_best",
        }
    }
}

/// OCR processing configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract language codes (e.g. "spa")
    pub languages: String,
    /// Model type controlling the tessdata directory
    pub model_type: ModelType,
    /// General maximum file size for receipt images
    pub max_file_size: u64,
    /// Buffer size for format detection reads
    pub buffer_size: usize,
    /// Minimum bytes required for format detection
    pub min_format_bytes: usize,
    /// Format-specific size limits
    pub format_limits: FormatSizeLimits,
    /// Recovery settings (timeouts, circuit breaking)
    pub recovery: RecoveryConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES.to_string(),
            model_type: ModelType::default(),
            max_file_size: MAX_FILE_SIZE,
            buffer_size: FORMAT_DETECTION_BUFFER_SIZE,
            min_format_bytes: MIN_FORMAT_BYTES,
            format_limits: FormatSizeLimits::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl OcrConfig {
    /// Validate OCR configuration
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.languages.trim().is_empty() {
            return Err(crate::errors::AppError::Config(
                "OCR languages cannot be empty".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(crate::errors::AppError::Config(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size < self.min_format_bytes {
            return Err(crate::errors::AppError::Config(format!(
                "buffer_size ({}) must be >= min_format_bytes ({})",
                self.buffer_size, self.min_format_bytes
            )));
        }
        self.format_limits.validate()?;
        self.recovery.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OcrConfig::default().validate().is_ok());
    }

    #[test]
    fn test_psm_mode_strings() {
        assert_eq!(PageSegMode::SingleLine.as_str(), "7");
        assert_eq!(PageSegMode::SingleBlock.as_str(), "6");
        assert_eq!(PageSegMode::Auto.as_str(), "3");
        assert_eq!(PageSegMode::SparseText.as_str(), "11");
    }

    #[test]
    fn test_empty_languages_rejected() {
        let mut config = OcrConfig::default();
        config.languages = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_whitelist_contains_digits_and_label_letters() {
        for digit in '0'..='9' {
            assert!(FOLIO_CHAR_WHITELIST.contains(digit));
        }
        for label_char in ['N', 'o', '°', 'B', 'F'] {
            assert!(FOLIO_CHAR_WHITELIST.contains(label_char));
        }
    }
}
