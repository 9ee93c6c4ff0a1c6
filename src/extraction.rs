//! # Folio Extraction Module
//!
//! Heuristic extraction of a receipt/folio number from noisy OCR text.
//! An ordered list of patterns is tried from most to least specific; when no
//! pattern matches, the longest digit run wins as a last resort. This is
//! best-effort by design: OCR noise means there is no correctness guarantee,
//! only a priority order tuned on real receipt photos.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("whitespace pattern compiles");

    /// Extraction patterns in priority order, most specific first.
    /// Each has a stable label used in trace output.
    static ref FOLIO_PATTERNS: Vec<(&'static str, Regex)> = vec![
        // "N 123456", "N° 123456", "No 123456", "NO: 123456"
        (
            "label_n",
            Regex::new(r"(?i)\bN(?:[°º]|o)?\s*[:.#-]?\s*(\d{5,})").expect("label_n compiles"),
        ),
        // Bounded non-digit gap tolerates qualifiers like "BOLETA ELECTRONICA N°"
        ("boleta", Regex::new(r"(?i)\bBOLETA\D{0,20}?(\d{5,})").expect("boleta compiles")),
        ("folio", Regex::new(r"(?i)\bFOLIO\D{0,10}?(\d{5,})").expect("folio compiles")),
        ("numero", Regex::new(r"(?i)\bNUM(?:ERO)?\D{0,10}?(\d{5,})").expect("numero compiles")),
        // Looser single-letter prefix, tolerating the label fused to noise
        ("loose_n", Regex::new(r"(?i)N\s*[:.-]?\s*(\d{5,})").expect("loose_n compiles")),
        ("run_7_plus", Regex::new(r"(\d{7,})").expect("run_7_plus compiles")),
        ("exact_6", Regex::new(r"\b(\d{6})\b").expect("exact_6 compiles")),
        ("exact_5", Regex::new(r"\b(\d{5})\b").expect("exact_5 compiles")),
        ("run_4_plus", Regex::new(r"(\d{4,})").expect("run_4_plus compiles")),
    ];

    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").expect("digit run compiles");
}

/// Minimum length a bare digit run must have to count as a folio candidate
const MIN_FALLBACK_DIGITS: usize = 4;

/// Extracts candidate folio numbers from concatenated OCR text.
#[derive(Debug, Clone, Default)]
pub struct FolioExtractor;

impl FolioExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a folio candidate, or `None` when the text holds nothing usable.
    ///
    /// The returned string is all digits (`^\d+$`).
    pub fn extract(&self, ocr_text: &str) -> Option<String> {
        let collapsed = WHITESPACE.replace_all(ocr_text, " ").trim().to_string();
        if collapsed.is_empty() {
            return None;
        }

        for (label, pattern) in FOLIO_PATTERNS.iter() {
            if let Some(captures) = pattern.captures(&collapsed) {
                let folio = captures[1].to_string();
                debug!(pattern = label, folio = %folio, "Folio pattern matched");
                return Some(folio);
            }
        }

        // Last resort: longest digit run of usable length, first occurrence wins ties
        let mut longest: Option<&str> = None;
        for run in DIGIT_RUN.find_iter(&collapsed) {
            let run = run.as_str();
            if run.len() >= MIN_FALLBACK_DIGITS
                && run.len() > longest.map_or(0, str::len)
            {
                longest = Some(run);
            }
        }

        match longest {
            Some(run) => {
                debug!(folio = %run, "Folio taken from longest digit run");
                Some(run.to_string())
            }
            None => {
                debug!("No folio candidate found in OCR text");
                None
            }
        }
    }
}
