//! # Contest Pipeline Module
//!
//! End-to-end orchestration of the receipt validation flow: normalize the
//! uploaded photo, recognize text across the four OCR passes, extract a folio
//! candidate, locate it in the branch ledgers, and register the participation.
//! Handlers own request/response shaping; this module owns the sequencing and
//! the rejection audit side effects.

use serde::Serialize;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::extraction::FolioExtractor;
use crate::instance_manager::OcrInstanceManager;
use crate::ledger::{BranchKind, BranchLocator, LedgerMatch, SqlBranchProbe};
use crate::preprocessing::{CropRegion, ReceiptNormalizer};
use crate::recognition::recognize_receipt;
use crate::registrar::{
    check_eligibility, save_receipt_image, validate_form, RegistrationForm, RejectionReason,
};
use crate::store::{self, NewParticipation};

/// Result of running normalization + recognition + extraction on an upload
#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub numero_boleta: Option<String>,
    pub detectado: bool,
    /// Concatenated OCR text, returned for diagnostics
    pub texto: String,
    /// Average confidence over succeeded passes, 0 when none succeeded
    pub confianza: f32,
}

/// Extracted document data echoed back on a successful registration
#[derive(Debug, Clone, Serialize)]
pub struct DatosExtraidos {
    pub numero_boleta: String,
    pub monto: i64,
    pub fecha_emision: chrono::NaiveDate,
    pub tipo_documento: String,
    pub tipo_sucursal: String,
    pub nombre_sucursal: String,
    pub ocr_confianza: f32,
}

/// A successful registration
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReceipt {
    pub participacion_id: i64,
    pub datos_extraidos: DatosExtraidos,
}

/// Shared service state: the pipeline components plus the application pool
pub struct ContestPipeline {
    pub pool: PgPool,
    pub config: AppConfig,
    normalizer: ReceiptNormalizer,
    extractor: FolioExtractor,
    ocr: Arc<OcrInstanceManager>,
    locator: BranchLocator,
    probe: SqlBranchProbe,
}

impl ContestPipeline {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let breaker_config = crate::ocr_config::RecoveryConfig {
            operation_timeout_secs: config.scan.query_timeout_secs,
            circuit_breaker_threshold: config.scan.circuit_breaker_threshold,
            circuit_breaker_reset_secs: config.scan.circuit_breaker_reset_secs,
        };
        let locator = BranchLocator::new(
            config.contest.minimum_amount,
            config.contest.campaign_start,
            Duration::from_millis(config.scan.attempt_interval_ms),
            breaker_config,
        );
        let probe = SqlBranchProbe::new(
            Duration::from_secs(config.scan.connect_timeout_secs),
            Duration::from_secs(config.scan.query_timeout_secs),
        );
        Self {
            pool,
            config,
            normalizer: ReceiptNormalizer::new(),
            extractor: FolioExtractor::new(),
            ocr: Arc::new(OcrInstanceManager::new()),
            locator,
            probe,
        }
    }

    /// Number of Tesseract instances currently cached, reported by `/health`
    pub fn ocr_instance_count(&self) -> usize {
        self.ocr.instance_count()
    }

    /// Normalize, recognize and extract a folio candidate from image bytes.
    ///
    /// An upload where every OCR pass fails is an undetected outcome, not an
    /// error; only image decoding/processing failures are terminal.
    pub async fn detect(
        &self,
        image_bytes: &[u8],
        crop: Option<CropRegion>,
    ) -> AppResult<DetectionOutcome> {
        let normalized = self
            .normalizer
            .normalize(image_bytes, crop)
            .map_err(|e| AppError::ImageProcessing(e.to_string()))?;

        let outcome = recognize_receipt(&normalized.png_bytes, &self.config.ocr, &self.ocr).await?;
        let numero = self.extractor.extract(&outcome.concatenated_text);

        Ok(DetectionOutcome {
            detectado: numero.is_some(),
            numero_boleta: numero,
            texto: outcome.concatenated_text,
            confianza: outcome.average_confidence,
        })
    }

    /// Run the Branch Ledger Locator for a folio without persisting anything.
    pub async fn validate_folio(
        &self,
        folio: &str,
        kind_filter: Option<BranchKind>,
    ) -> AppResult<LedgerMatch> {
        if !folio.chars().all(|c| c.is_ascii_digit()) || folio.is_empty() {
            return Err(AppError::Validation(
                "El número de boleta debe contener solo dígitos".to_string(),
            ));
        }
        let branches = store::list_branches(&self.pool).await?;
        Ok(self
            .locator
            .locate(&branches, folio, kind_filter, &self.probe)
            .await)
    }

    /// Full registration flow for `POST /participar`.
    pub async fn register(
        &self,
        image_bytes: Vec<u8>,
        form: RegistrationForm,
    ) -> AppResult<RegistrationReceipt> {
        let start_time = std::time::Instant::now();

        // (a) required fields + email
        validate_form(&form)?;

        let normalized = self
            .normalizer
            .normalize(&image_bytes, None)
            .map_err(|e| AppError::ImageProcessing(e.to_string()))?;

        let ocr_outcome =
            recognize_receipt(&normalized.png_bytes, &self.config.ocr, &self.ocr).await?;
        let extracted = self.extractor.extract(&ocr_outcome.concatenated_text);

        // The OCR-extracted folio wins; the client-supplied number is the
        // fallback for photos the recognizer could not read.
        let numero_boleta = match extracted {
            Some(numero) => numero,
            None => match form.numero_boleta.as_deref().map(str::trim) {
                Some(numero) if !numero.is_empty() => {
                    if !numero.chars().all(|c| c.is_ascii_digit()) {
                        return Err(AppError::Validation(
                            "El número de boleta debe contener solo dígitos".to_string(),
                        ));
                    }
                    warn!(numero_boleta = %numero, "OCR detected no folio, using client-supplied number");
                    numero.to_string()
                }
                _ => {
                    return Err(AppError::Validation(
                        "No se pudo detectar el número de boleta en la imagen".to_string(),
                    ))
                }
            },
        };

        // (b) duplicate fast path; the UNIQUE constraint below remains the
        // authoritative guard for concurrent submissions
        if store::find_registration_date(&self.pool, &numero_boleta)
            .await?
            .is_some()
        {
            let reason = RejectionReason::Duplicate {
                folio: numero_boleta.clone(),
            };
            return Err(self.reject(&numero_boleta, &form.email, reason).await);
        }

        // (c)-(e) ledger existence and thresholds
        let branches = store::list_branches(&self.pool).await?;
        let ledger = self
            .locator
            .locate(&branches, &numero_boleta, None, &self.probe)
            .await;

        if let Err(reason) = check_eligibility(
            &ledger,
            &numero_boleta,
            self.config.contest.minimum_amount,
            self.config.contest.campaign_start,
        ) {
            return Err(self.reject(&numero_boleta, &form.email, reason).await);
        }

        // Preconditions hold: persist the image, then the participation row
        let imagen_path = save_receipt_image(
            &self.config.contest.upload_dir,
            &self.config.contest.upload_url_prefix,
            &numero_boleta,
            &normalized,
        )?;

        let datos = DatosExtraidos {
            numero_boleta: numero_boleta.clone(),
            monto: ledger.total_amount.unwrap_or(0),
            fecha_emision: ledger
                .issue_date
                .unwrap_or(self.config.contest.campaign_start),
            tipo_documento: ledger
                .document_kind
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| "Otro".to_string()),
            tipo_sucursal: ledger
                .branch_kind
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| "Otro".to_string()),
            nombre_sucursal: ledger.branch_name.clone().unwrap_or_default(),
            ocr_confianza: ocr_outcome.average_confidence,
        };

        let new = NewParticipation {
            nombres: form.nombres.trim().to_string(),
            apellidos: form.apellidos.trim().to_string(),
            rut: form.rut.trim().to_string(),
            email: form.email.trim().to_string(),
            telefono: form.telefono.clone(),
            direccion: form.direccion.clone(),
            numero_boleta: numero_boleta.clone(),
            monto: datos.monto,
            fecha_emision: datos.fecha_emision,
            tipo_documento: datos.tipo_documento.clone(),
            tipo_sucursal: datos.tipo_sucursal.clone(),
            nombre_sucursal: datos.nombre_sucursal.clone(),
            imagen_path: Some(imagen_path),
            ocr_texto: Some(ocr_outcome.concatenated_text.clone()),
            ocr_confianza: Some(ocr_outcome.average_confidence),
        };

        let participacion_id = match store::insert_participation(&self.pool, &new).await {
            Ok(id) => id,
            // Concurrent duplicate: the constraint fired after our pre-check
            Err(AppError::Rejection(_)) => {
                let reason = RejectionReason::Duplicate {
                    folio: numero_boleta.clone(),
                };
                return Err(self.reject(&numero_boleta, &form.email, reason).await);
            }
            Err(err) => return Err(err),
        };

        crate::observability::record_registration("accepted");
        info!(
            participacion_id = %participacion_id,
            numero_boleta = %numero_boleta,
            total_ms = start_time.elapsed().as_millis() as u64,
            "Participation registered"
        );

        Ok(RegistrationReceipt {
            participacion_id,
            datos_extraidos: datos,
        })
    }

    /// Record a business rejection in the audit log and build the error.
    async fn reject(&self, numero_boleta: &str, email: &str, reason: RejectionReason) -> AppError {
        let message = reason.message();
        crate::observability::record_registration(reason.label());

        if let Err(log_err) =
            store::insert_rejection(&self.pool, Some(numero_boleta), Some(email), &message).await
        {
            // The rejection response still stands if the audit write fails
            crate::errors::error_logging::log_database_error(
                &log_err,
                "insert_rejection",
                Some(numero_boleta),
            );
        }

        AppError::Rejection(message)
    }
}
