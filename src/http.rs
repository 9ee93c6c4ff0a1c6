//! # HTTP Interface Module
//!
//! axum router and handlers for the contest API. Handlers validate the
//! request envelope (multipart fields, upload format and size), delegate to
//! the pipeline, and shape JSON responses. Every failure body carries
//! `success: false` plus a message; the status code communicates the error
//! category (400 validation/rejection, 404 missing, 500 internal).

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::AppError;
use crate::ledger::BranchKind;
use crate::ocr_config::OcrConfig;
use crate::pipeline::ContestPipeline;
use crate::preprocessing::CropRegion;
use crate::registrar::RegistrationForm;
use crate::store;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(msg) | AppError::Rejection(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": msg }),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": msg }),
            ),
            other => {
                error!(error = %other, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "success": false,
                        "message": "Error interno del servidor",
                        "error": other.to_string(),
                    }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Build the application router
pub fn build_router(pipeline: Arc<ContestPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart bodies carry the image plus form fields; allow headroom over
    // the image ceiling itself
    let body_limit = (pipeline.config.ocr.max_file_size as usize) + 1024 * 1024;
    let upload_dir = pipeline.config.contest.upload_dir.clone();

    Router::new()
        .route("/health", get(health))
        .route("/participar", post(participar))
        .route("/participaciones", get(participaciones))
        .route("/estadisticas", get(estadisticas))
        .route("/verificar/:numero_boleta", get(verificar))
        .route("/participantes-sorteo", get(participantes_sorteo))
        .route("/marcar-ganador", post(marcar_ganador))
        .route("/ocr-crop", post(ocr_crop))
        .route("/validar-sin-registrar", post(validar_sin_registrar))
        .nest_service("/uploads/boletas", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// Run the HTTP server with graceful shutdown
pub async fn run_server(pipeline: Arc<ContestPipeline>) -> anyhow::Result<()> {
    let port = pipeline.config.server.http_port;
    let app = build_router(pipeline);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Contest API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    ocr_instances: usize,
}

async fn health(State(pipeline): State<Arc<ContestPipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ocr_instances: pipeline.ocr_instance_count(),
    })
}

/// Fields collected from the `/participar` multipart body
#[derive(Default)]
struct ParticiparUpload {
    image: Option<Vec<u8>>,
    form: RegistrationForm,
}

async fn read_participar_multipart(
    mut multipart: Multipart,
) -> Result<ParticiparUpload, AppError> {
    let mut upload = ParticiparUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Error al leer el formulario: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "imagen_boleta" => {
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("Error al leer la imagen: {}", e))
                })?;
                upload.image = Some(bytes.to_vec());
            }
            "numero_boleta" => upload.form.numero_boleta = Some(read_text(field).await?),
            "nombres" => upload.form.nombres = read_text(field).await?,
            "apellidos" => upload.form.apellidos = read_text(field).await?,
            "rut" => upload.form.rut = read_text(field).await?,
            "email" => upload.form.email = read_text(field).await?,
            "telefono" => upload.form.telefono = Some(read_text(field).await?),
            "direccion" => upload.form.direccion = Some(read_text(field).await?),
            _ => {}
        }
    }

    Ok(upload)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Error al leer el formulario: {}", e)))
}

/// Reject uploads that are not JPEG/PNG or exceed the size limits.
///
/// Mirrors the OCR configuration: oversized payloads are rejected before
/// format sniffing, the format is detected from the leading bytes, and the
/// detected format's own size limit applies (capped by the general ceiling).
fn validate_upload(image: &[u8], ocr: &OcrConfig) -> Result<(), AppError> {
    if image.is_empty() {
        return Err(AppError::Validation(
            "La imagen de la boleta es obligatoria".to_string(),
        ));
    }

    let size = image.len() as u64;
    if size > ocr.format_limits.min_quick_reject {
        return Err(AppError::Validation(format!(
            "La imagen supera el tamaño máximo permitido de {}MB",
            ocr.max_file_size / (1024 * 1024)
        )));
    }

    if image.len() < ocr.min_format_bytes {
        return Err(AppError::Validation(
            "El archivo no es una imagen válida".to_string(),
        ));
    }

    let head = &image[..image.len().min(ocr.buffer_size)];
    let format_limit = match image::guess_format(head) {
        Ok(image::ImageFormat::Jpeg) => ocr.format_limits.jpeg_max,
        Ok(image::ImageFormat::Png) => ocr.format_limits.png_max,
        _ => {
            return Err(AppError::Validation(
                "Formato de imagen no soportado. Use JPEG o PNG".to_string(),
            ))
        }
    };

    let limit = format_limit.min(ocr.max_file_size);
    if size > limit {
        return Err(AppError::Validation(format!(
            "La imagen supera el tamaño máximo permitido de {}MB",
            limit / (1024 * 1024)
        )));
    }

    Ok(())
}

async fn participar(
    State(pipeline): State<Arc<ContestPipeline>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = read_participar_multipart(multipart).await?;

    let image = upload.image.ok_or_else(|| {
        AppError::Validation("La imagen de la boleta es obligatoria".to_string())
    })?;
    validate_upload(&image, &pipeline.config.ocr)?;

    let receipt = pipeline.register(image, upload.form).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Participación registrada exitosamente",
            "participacion_id": receipt.participacion_id,
            "datos_extraidos": receipt.datos_extraidos,
        })),
    ))
}

async fn participaciones(
    State(pipeline): State<Arc<ContestPipeline>>,
) -> Result<impl IntoResponse, AppError> {
    let participaciones = store::list_participations(&pipeline.pool).await?;
    Ok(Json(json!({
        "success": true,
        "total": participaciones.len(),
        "participaciones": participaciones,
    })))
}

async fn estadisticas(
    State(pipeline): State<Arc<ContestPipeline>>,
) -> Result<impl IntoResponse, AppError> {
    let estadisticas = store::statistics(&pipeline.pool).await?;
    Ok(Json(json!({
        "success": true,
        "estadisticas": estadisticas,
    })))
}

async fn verificar(
    State(pipeline): State<Arc<ContestPipeline>>,
    Path(numero_boleta): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let fecha_registro = store::find_registration_date(&pipeline.pool, &numero_boleta).await?;
    Ok(Json(json!({
        "success": true,
        "existe": fecha_registro.is_some(),
        "fecha_registro": fecha_registro,
    })))
}

async fn participantes_sorteo(
    State(pipeline): State<Arc<ContestPipeline>>,
) -> Result<impl IntoResponse, AppError> {
    let participantes = store::draw_candidates(&pipeline.pool).await?;
    Ok(Json(json!({
        "success": true,
        "total": participantes.len(),
        "participantes": participantes,
    })))
}

#[derive(Debug, Deserialize)]
struct MarcarGanadorRequest {
    participante_id: i64,
    premio: String,
}

async fn marcar_ganador(
    State(pipeline): State<Arc<ContestPipeline>>,
    Json(request): Json<MarcarGanadorRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.premio.trim().is_empty() {
        return Err(AppError::Validation(
            "El campo premio es obligatorio".to_string(),
        ));
    }
    store::mark_winner(&pipeline.pool, request.participante_id, &request.premio).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Participante {} marcado como ganador",
            request.participante_id
        ),
    })))
}

/// Fields collected from the `/ocr-crop` multipart body
#[derive(Default)]
struct OcrCropUpload {
    image: Option<Vec<u8>>,
    crop_x: Option<u32>,
    crop_y: Option<u32>,
    crop_width: Option<u32>,
    crop_height: Option<u32>,
}

async fn ocr_crop(
    State(pipeline): State<Arc<ContestPipeline>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload = OcrCropUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Error al leer el formulario: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "imagen_boleta" | "imagen" => {
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("Error al leer la imagen: {}", e))
                })?;
                upload.image = Some(bytes.to_vec());
            }
            "cropX" => upload.crop_x = Some(parse_crop_value(&name, field).await?),
            "cropY" => upload.crop_y = Some(parse_crop_value(&name, field).await?),
            "cropWidth" => upload.crop_width = Some(parse_crop_value(&name, field).await?),
            "cropHeight" => upload.crop_height = Some(parse_crop_value(&name, field).await?),
            _ => {}
        }
    }

    let image = upload.image.ok_or_else(|| {
        AppError::Validation("La imagen de la boleta es obligatoria".to_string())
    })?;
    validate_upload(&image, &pipeline.config.ocr)?;

    let crop = match (
        upload.crop_x,
        upload.crop_y,
        upload.crop_width,
        upload.crop_height,
    ) {
        (Some(x), Some(y), Some(width), Some(height)) => {
            Some(CropRegion { x, y, width, height })
        }
        _ => None,
    };

    let detection = pipeline.detect(&image, crop).await?;

    Ok(Json(json!({
        "success": true,
        "numero_boleta": detection.numero_boleta,
        "detectado": detection.detectado,
        "texto": detection.texto,
        "confianza": detection.confianza,
    })))
}

async fn parse_crop_value(
    name: &str,
    field: axum::extract::multipart::Field<'_>,
) -> Result<u32, AppError> {
    let raw = field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Error al leer el formulario: {}", e)))?;
    raw.trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("El campo {} debe ser un número entero", name)))
}

#[derive(Debug, Deserialize)]
struct ValidarRequest {
    numero_boleta: String,
    tipo_sucursal: Option<String>,
}

async fn validar_sin_registrar(
    State(pipeline): State<Arc<ContestPipeline>>,
    Json(request): Json<ValidarRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind_filter = request
        .tipo_sucursal
        .as_deref()
        .map(BranchKind::parse)
        .filter(|kind| *kind != BranchKind::Otro);

    let ledger = pipeline
        .validate_folio(request.numero_boleta.trim(), kind_filter)
        .await?;

    Ok(Json(json!({
        "success": true,
        "existe": ledger.exists,
        "monto": ledger.total_amount,
        "fecha_emision": ledger.issue_date,
        "tipo_documento": ledger.document_kind.map(|k| k.as_str()),
        "sucursal": ledger.branch_name,
        "tipo_sucursal": ledger.branch_kind.map(|k| k.as_str()),
        "cumple_monto_minimo": ledger.meets_minimum_amount,
        "cumple_fecha_minima": ledger.meets_minimum_date,
    })))
}
