//! # OCR Instance Manager Module
//!
//! Thread-safe management of reusable Tesseract instances. The multi-pass
//! recognizer runs one instance per (language, model, segmentation mode,
//! whitelist) combination; reusing them avoids the 100-500ms initialization
//! cost on every request.

use leptess::LepTess;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::ocr_config::{ModelType, OcrConfig, PageSegMode, FOLIO_CHAR_WHITELIST};

/// Thread-safe pool of Tesseract instances keyed by pass configuration
pub struct OcrInstanceManager {
    instances: Mutex<HashMap<String, Arc<Mutex<LepTess>>>>,
}

impl OcrInstanceManager {
    /// Create a new, empty instance manager
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create an OCR instance for the given pass configuration
    ///
    /// Returns an existing instance when one was already built for this
    /// combination, otherwise initializes Tesseract, applies the PSM mode and
    /// (optionally) the folio character whitelist, and caches the result.
    pub fn get_instance(
        &self,
        config: &OcrConfig,
        psm: PageSegMode,
        whitelist: bool,
    ) -> anyhow::Result<Arc<Mutex<LepTess>>> {
        let key = format!(
            "{}:{}:{}:{}",
            config.languages,
            config.model_type.tessdata_dir(),
            psm.as_str(),
            whitelist
        );

        // Try to get existing instance
        {
            let instances = self
                .instances
                .lock()
                .expect("Failed to acquire instances lock");
            if let Some(instance) = instances.get(&key) {
                return Ok(Arc::clone(instance));
            }
        }

        info!(
            "Creating new OCR instance for languages: {} psm: {} whitelist: {}",
            config.languages,
            psm.as_str(),
            whitelist
        );

        let tessdata_path = Self::get_tessdata_path(config.model_type);

        let mut tess = LepTess::new(tessdata_path.as_deref(), &config.languages)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Tesseract OCR instance: {}", e))?;

        tess.set_variable(leptess::Variable::TesseditPagesegMode, psm.as_str())
            .map_err(|e| anyhow::anyhow!("Failed to set PSM mode: {}", e))?;

        if whitelist {
            tess.set_variable(
                leptess::Variable::TesseditCharWhitelist,
                FOLIO_CHAR_WHITELIST,
            )
            .map_err(|e| anyhow::anyhow!("Failed to set character whitelist: {}", e))?;
        }

        let instance = Arc::new(Mutex::new(tess));

        // Store the instance
        {
            let mut instances = self
                .instances
                .lock()
                .expect("Failed to acquire instances lock");
            instances.insert(key, Arc::clone(&instance));
        }

        Ok(instance)
    }

    /// Get the tessdata path for the specified model type
    ///
    /// Tries the common installation locations and falls back to the library
    /// default when none exists.
    fn get_tessdata_path(model_type: ModelType) -> Option<String> {
        let possible_paths = match model_type {
            ModelType::Fast => vec![
                "/usr/share/tesseract-ocr/5/tessdata_fast",
                "/usr/share/tesseract-ocr/4.00/tessdata_fast",
                "/usr/share/tessdata_fast",
                "/usr/local/share/tessdata_fast",
            ],
            ModelType::Best => vec![
                "/usr/share/tesseract-ocr/5/tessdata_best",
                "/usr/share/tesseract-ocr/4.00/tessdata_best",
                "/usr/share/tessdata_best",
                "/usr/local/share/tessdata_best",
            ],
        };

        for path in possible_paths {
            if std::path::Path::new(path).exists() {
                info!("Using tessdata path: {}", path);
                return Some(path.to_string());
            }
        }

        info!(
            "No specific tessdata path found for model type {:?}, using default",
            model_type
        );
        None
    }

    /// Get the number of cached instances
    pub fn instance_count(&self) -> usize {
        let instances = self
            .instances
            .lock()
            .expect("Failed to acquire instances lock");
        instances.len()
    }
}

impl Default for OcrInstanceManager {
    fn default() -> Self {
        Self::new()
    }
}
