//! # Contest Store Module
//!
//! Persistence for participations, rejection audit entries and the branch
//! registry, over the application PostgreSQL pool. Receipt-number uniqueness
//! is enforced by a database UNIQUE constraint; the insert fails closed and
//! the violation is mapped to the duplicate rejection.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::ledger::{BranchDescriptor, BranchKind};

/// A registered contest participation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participation {
    pub id: i64,
    pub nombres: String,
    pub apellidos: String,
    pub rut: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub numero_boleta: String,
    pub monto: i64,
    pub fecha_emision: NaiveDate,
    pub tipo_documento: String,
    pub tipo_sucursal: String,
    pub nombre_sucursal: String,
    pub imagen_path: Option<String>,
    pub ocr_texto: Option<String>,
    pub ocr_confianza: Option<f32>,
    pub boleta_valida: bool,
    pub estado: String,
    pub es_ganador: Option<bool>,
    pub premio: Option<String>,
    pub creado_en: DateTime<Utc>,
    pub sorteado_en: Option<DateTime<Utc>>,
}

/// Fields required to insert a new participation
#[derive(Debug, Clone)]
pub struct NewParticipation {
    pub nombres: String,
    pub apellidos: String,
    pub rut: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub numero_boleta: String,
    pub monto: i64,
    pub fecha_emision: NaiveDate,
    pub tipo_documento: String,
    pub tipo_sucursal: String,
    pub nombre_sucursal: String,
    pub imagen_path: Option<String>,
    pub ocr_texto: Option<String>,
    pub ocr_confianza: Option<f32>,
}

/// Aggregate statistics over participations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContestStatistics {
    pub total_participaciones: i64,
    pub participaciones_activas: i64,
    pub boletas_validas: i64,
    pub ganadores: i64,
    pub monto_total: i64,
    pub monto_promedio: f64,
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS participaciones (
            id BIGSERIAL PRIMARY KEY,
            nombres VARCHAR(100) NOT NULL,
            apellidos VARCHAR(100) NOT NULL,
            rut VARCHAR(20) NOT NULL,
            email VARCHAR(255) NOT NULL,
            telefono VARCHAR(30),
            direccion TEXT,
            numero_boleta VARCHAR(40) UNIQUE NOT NULL,
            monto BIGINT NOT NULL,
            fecha_emision DATE NOT NULL,
            tipo_documento VARCHAR(30) NOT NULL,
            tipo_sucursal VARCHAR(30) NOT NULL,
            nombre_sucursal VARCHAR(100) NOT NULL,
            imagen_path TEXT,
            ocr_texto TEXT,
            ocr_confianza REAL,
            boleta_valida BOOLEAN NOT NULL DEFAULT TRUE,
            estado VARCHAR(20) NOT NULL DEFAULT 'active',
            es_ganador BOOLEAN,
            premio VARCHAR(100),
            creado_en TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            sorteado_en TIMESTAMPTZ
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create participaciones table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rechazos (
            id BIGSERIAL PRIMARY KEY,
            numero_boleta VARCHAR(40),
            email VARCHAR(255),
            motivo TEXT NOT NULL,
            creado_en TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create rechazos table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sucursales (
            id BIGSERIAL PRIMARY KEY,
            nombre VARCHAR(100) NOT NULL,
            tipo VARCHAR(30) NOT NULL,
            db_url TEXT,
            activa BOOLEAN NOT NULL DEFAULT TRUE
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create sucursales table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS participaciones_estado_idx ON participaciones(estado)",
    )
    .execute(pool)
    .await
    .context("Failed to create estado index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS rechazos_numero_boleta_idx ON rechazos(numero_boleta)")
        .execute(pool)
        .await
        .context("Failed to create rechazos index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

const PARTICIPATION_COLUMNS: &str = "id, nombres, apellidos, rut, email, telefono, direccion, \
     numero_boleta, monto, fecha_emision, tipo_documento, tipo_sucursal, nombre_sucursal, \
     imagen_path, ocr_texto, ocr_confianza, boleta_valida, estado, es_ganador, premio, \
     creado_en, sorteado_en";

fn participation_from_row(row: &sqlx::postgres::PgRow) -> Participation {
    Participation {
        id: row.get(0),
        nombres: row.get(1),
        apellidos: row.get(2),
        rut: row.get(3),
        email: row.get(4),
        telefono: row.get(5),
        direccion: row.get(6),
        numero_boleta: row.get(7),
        monto: row.get(8),
        fecha_emision: row.get(9),
        tipo_documento: row.get(10),
        tipo_sucursal: row.get(11),
        nombre_sucursal: row.get(12),
        imagen_path: row.get(13),
        ocr_texto: row.get(14),
        ocr_confianza: row.get(15),
        boleta_valida: row.get(16),
        estado: row.get(17),
        es_ganador: row.get(18),
        premio: row.get(19),
        creado_en: row.get(20),
        sorteado_en: row.get(21),
    }
}

/// Insert a new participation, failing closed on a duplicate receipt number
///
/// The UNIQUE constraint on numero_boleta is the authoritative duplicate
/// guard: a violation maps to a business rejection, not an internal error.
pub async fn insert_participation(pool: &PgPool, new: &NewParticipation) -> AppResult<i64> {
    debug!(numero_boleta = %new.numero_boleta, "Inserting participation");

    let result = sqlx::query(
        "INSERT INTO participaciones \
         (nombres, apellidos, rut, email, telefono, direccion, numero_boleta, monto, \
          fecha_emision, tipo_documento, tipo_sucursal, nombre_sucursal, imagen_path, \
          ocr_texto, ocr_confianza) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING id",
    )
    .bind(&new.nombres)
    .bind(&new.apellidos)
    .bind(&new.rut)
    .bind(&new.email)
    .bind(&new.telefono)
    .bind(&new.direccion)
    .bind(&new.numero_boleta)
    .bind(new.monto)
    .bind(new.fecha_emision)
    .bind(&new.tipo_documento)
    .bind(&new.tipo_sucursal)
    .bind(&new.nombre_sucursal)
    .bind(&new.imagen_path)
    .bind(&new.ocr_texto)
    .bind(new.ocr_confianza)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => {
            let id: i64 = row.get(0);
            info!(participation_id = %id, numero_boleta = %new.numero_boleta, "Participation created");
            Ok(id)
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(AppError::Rejection(format!(
                "La boleta {} ya está registrada en el concurso",
                new.numero_boleta
            )))
        }
        Err(err) => Err(AppError::Database(format!(
            "Failed to insert participation: {}",
            err
        ))),
    }
}

/// Check whether a receipt number is already registered; returns the
/// registration timestamp when it is.
pub async fn find_registration_date(
    pool: &PgPool,
    numero_boleta: &str,
) -> Result<Option<DateTime<Utc>>> {
    let row = sqlx::query("SELECT creado_en FROM participaciones WHERE numero_boleta = $1")
        .bind(numero_boleta)
        .fetch_optional(pool)
        .await
        .context("Failed to check receipt number")?;

    Ok(row.map(|row| row.get(0)))
}

/// Append a rejection audit entry
pub async fn insert_rejection(
    pool: &PgPool,
    numero_boleta: Option<&str>,
    email: Option<&str>,
    motivo: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO rechazos (numero_boleta, email, motivo) VALUES ($1, $2, $3)")
        .bind(numero_boleta)
        .bind(email)
        .bind(motivo)
        .execute(pool)
        .await
        .context("Failed to insert rejection entry")?;

    debug!(numero_boleta = ?numero_boleta, motivo = %motivo, "Rejection logged");
    Ok(())
}

/// List all participations, newest first (admin view)
pub async fn list_participations(pool: &PgPool) -> Result<Vec<Participation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM participaciones ORDER BY creado_en DESC",
        PARTICIPATION_COLUMNS
    ))
    .fetch_all(pool)
    .await
    .context("Failed to list participations")?;

    Ok(rows.iter().map(participation_from_row).collect())
}

/// Compute aggregate statistics over active participations
pub async fn statistics(pool: &PgPool) -> Result<ContestStatistics> {
    let row = sqlx::query(
        "SELECT \
             COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE estado = 'active') AS activas, \
             COUNT(*) FILTER (WHERE estado = 'active' AND boleta_valida) AS validas, \
             COUNT(*) FILTER (WHERE es_ganador IS TRUE) AS ganadores, \
             COALESCE(SUM(monto) FILTER (WHERE estado = 'active'), 0)::BIGINT AS monto_total, \
             COALESCE(AVG(monto) FILTER (WHERE estado = 'active'), 0)::FLOAT8 AS monto_promedio \
         FROM participaciones",
    )
    .fetch_one(pool)
    .await
    .context("Failed to compute statistics")?;

    Ok(ContestStatistics {
        total_participaciones: row.get(0),
        participaciones_activas: row.get(1),
        boletas_validas: row.get(2),
        ganadores: row.get(3),
        monto_total: row.get(4),
        monto_promedio: row.get(5),
    })
}

/// List draw candidates: active, valid receipt, not yet a winner, ordered by
/// submission time
pub async fn draw_candidates(pool: &PgPool) -> Result<Vec<Participation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM participaciones \
         WHERE estado = 'active' AND boleta_valida AND es_ganador IS NOT TRUE \
         ORDER BY creado_en ASC",
        PARTICIPATION_COLUMNS
    ))
    .fetch_all(pool)
    .await
    .context("Failed to list draw candidates")?;

    Ok(rows.iter().map(participation_from_row).collect())
}

/// Mark a participant as a draw winner
///
/// Only active participants can win: a disqualified participant is rejected
/// rather than silently updated.
pub async fn mark_winner(pool: &PgPool, participation_id: i64, premio: &str) -> AppResult<()> {
    let row = sqlx::query("SELECT estado FROM participaciones WHERE id = $1")
        .bind(participation_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load participant: {}", e)))?;

    let estado: String = match row {
        Some(row) => row.get(0),
        None => {
            return Err(AppError::NotFound(format!(
                "Participante {} no existe",
                participation_id
            )))
        }
    };

    if estado != "active" {
        return Err(AppError::Rejection(format!(
            "El participante {} está descalificado y no puede ser ganador",
            participation_id
        )));
    }

    sqlx::query(
        "UPDATE participaciones \
         SET es_ganador = TRUE, premio = $1, sorteado_en = CURRENT_TIMESTAMP \
         WHERE id = $2 AND estado = 'active'",
    )
    .bind(premio)
    .bind(participation_id)
    .execute(pool)
    .await
    .map_err(|e| AppError::Database(format!("Failed to mark winner: {}", e)))?;

    info!(participation_id = %participation_id, premio = %premio, "Winner marked");
    Ok(())
}

/// List branches with a configured ledger database, in registry order
pub async fn list_branches(pool: &PgPool) -> Result<Vec<BranchDescriptor>> {
    let rows = sqlx::query(
        "SELECT id, nombre, tipo, db_url FROM sucursales \
         WHERE activa AND db_url IS NOT NULL \
         ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list branches")?;

    let branches = rows
        .into_iter()
        .map(|row| BranchDescriptor {
            id: row.get(0),
            name: row.get(1),
            kind: BranchKind::parse(&row.get::<String, _>(2)),
            db_url: row.get(3),
        })
        .collect();

    Ok(branches)
}
