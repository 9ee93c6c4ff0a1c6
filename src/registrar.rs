//! # Participation Registrar Module
//!
//! Request validation, the eligibility precondition ladder, and persistence
//! of accepted receipt images. The checks run in a fixed order and the first
//! failure short-circuits; business rejections carry user-facing Spanish
//! messages and are recorded in the rejection audit log by the pipeline.

use chrono::NaiveDate;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::ledger::LedgerMatch;
use crate::preprocessing::NormalizedImage;

/// Personal and contact fields submitted with a participation
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub nombres: String,
    pub apellidos: String,
    pub rut: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    /// Client-supplied receipt number, used as fallback when OCR detects none
    pub numero_boleta: Option<String>,
}

/// Validate that required personal fields are present and the email is
/// syntactically plausible. First failure wins.
pub fn validate_form(form: &RegistrationForm) -> AppResult<()> {
    let required = [
        ("nombres", &form.nombres),
        ("apellidos", &form.apellidos),
        ("rut", &form.rut),
        ("email", &form.email),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            let err = AppError::Validation(format!("El campo {} es obligatorio", field));
            crate::errors::error_logging::log_validation_error(&err, "validate_form", field, None);
            return Err(err);
        }
    }

    if !is_valid_email(&form.email) {
        let err = AppError::Validation(format!("El email '{}' no es válido", form.email));
        crate::errors::error_logging::log_validation_error(
            &err,
            "validate_form",
            "email",
            Some(form.email.as_str()),
        );
        return Err(err);
    }

    Ok(())
}

/// Basic syntactic email check: one '@', non-empty local part, domain with a dot
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let mut parts = email.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

/// Why a registration was rejected. Ordering matches the precondition ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Receipt number already registered
    Duplicate { folio: String },
    /// No branch ledger holds the folio
    NotFound { folio: String },
    /// Document amount below the contest minimum
    BelowMinimumAmount { amount: i64, minimum: i64 },
    /// Document issued before the campaign start
    BeforeCampaignStart { date: NaiveDate, start: NaiveDate },
}

impl RejectionReason {
    /// User-facing rejection message, also stored in the audit log
    pub fn message(&self) -> String {
        match self {
            RejectionReason::Duplicate { folio } => {
                format!("La boleta {} ya está registrada en el concurso", folio)
            }
            RejectionReason::NotFound { folio } => {
                format!("La boleta {} no fue encontrada en ninguna sucursal", folio)
            }
            RejectionReason::BelowMinimumAmount { amount, minimum } => format!(
                "El monto de la boleta (${}) es menor al mínimo de ${} requerido para participar",
                amount, minimum
            ),
            RejectionReason::BeforeCampaignStart { date, start } => format!(
                "La boleta tiene fecha {}, anterior al inicio del concurso ({})",
                date, start
            ),
        }
    }

    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Duplicate { .. } => "duplicate",
            RejectionReason::NotFound { .. } => "not_found",
            RejectionReason::BelowMinimumAmount { .. } => "below_minimum_amount",
            RejectionReason::BeforeCampaignStart { .. } => "before_campaign_start",
        }
    }
}

/// Ledger-derived eligibility ladder: existence, then amount, then date.
///
/// Duplicate detection happens earlier (store pre-check plus the UNIQUE
/// constraint on insert), so it is not re-checked here.
pub fn check_eligibility(
    ledger: &LedgerMatch,
    folio: &str,
    minimum_amount: i64,
    campaign_start: NaiveDate,
) -> Result<(), RejectionReason> {
    if !ledger.exists {
        return Err(RejectionReason::NotFound {
            folio: folio.to_string(),
        });
    }

    if !ledger.meets_minimum_amount {
        return Err(RejectionReason::BelowMinimumAmount {
            amount: ledger.total_amount.unwrap_or(0),
            minimum: minimum_amount,
        });
    }

    if !ledger.meets_minimum_date {
        return Err(RejectionReason::BeforeCampaignStart {
            date: ledger.issue_date.unwrap_or(campaign_start),
            start: campaign_start,
        });
    }

    Ok(())
}

/// Persist an accepted receipt image under the campaign upload directory.
///
/// Filenames follow `boleta_<numero>_<epochMillis>.jpg`; the returned string
/// is the public path the stored image is served from.
pub fn save_receipt_image(
    upload_dir: &std::path::Path,
    url_prefix: &str,
    numero_boleta: &str,
    image: &NormalizedImage,
) -> AppResult<String> {
    std::fs::create_dir_all(upload_dir).map_err(|e| {
        crate::errors::error_logging::log_filesystem_error(
            &e,
            "create_upload_dir",
            upload_dir.to_str(),
        );
        AppError::FileSystem(format!("Failed to create upload directory: {}", e))
    })?;

    let filename = format!(
        "boleta_{}_{}.jpg",
        numero_boleta,
        chrono::Utc::now().timestamp_millis()
    );
    let path = upload_dir.join(&filename);

    let jpeg_bytes = image
        .to_jpeg_bytes()
        .map_err(|e| AppError::ImageProcessing(e.to_string()))?;

    std::fs::write(&path, jpeg_bytes).map_err(|e| {
        crate::errors::error_logging::log_filesystem_error(&e, "save_receipt_image", path.to_str());
        AppError::FileSystem(format!("Failed to store receipt image: {}", e))
    })?;

    info!(path = %path.display(), "Receipt image stored");
    Ok(format!("{}/{}", url_prefix.trim_end_matches('/'), filename))
}
