use anyhow::{Context, Result};
use beach_market_contest::errors::AppError;
use beach_market_contest::store::*;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::env;

/// Helper macro to skip tests when database is not available
macro_rules! skip_if_no_db {
    ($test_fn:expr) => {
        match setup_test_db().await {
            Ok(pool) => $test_fn(&pool).await,
            Err(_) => {
                eprintln!("Skipping test: Database not available");
                Ok(())
            }
        }
    };
}

async fn setup_test_db() -> Result<PgPool> {
    // Skip tests if no DATABASE_URL is provided
    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping database tests: DATABASE_URL not set");
            return Err(anyhow::anyhow!("Test database not configured"));
        }
    };

    let pool = PgPool::connect(&database_url)
        .await
        .context("Failed to connect to test database")?;

    // Clean up any existing test data
    sqlx::query("DROP TABLE IF EXISTS participaciones CASCADE")
        .execute(&pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS rechazos CASCADE")
        .execute(&pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS sucursales CASCADE")
        .execute(&pool)
        .await?;

    // Initialize schema
    init_database_schema(&pool).await?;

    Ok(pool)
}

fn new_participation(numero_boleta: &str) -> NewParticipation {
    NewParticipation {
        nombres: "Ana".to_string(),
        apellidos: "Rojas".to_string(),
        rut: "12.345.678-9".to_string(),
        email: "ana.rojas@example.com".to_string(),
        telefono: Some("+56911111111".to_string()),
        direccion: Some("Av. Costanera 1234".to_string()),
        numero_boleta: numero_boleta.to_string(),
        monto: 12000,
        fecha_emision: NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
        tipo_documento: "Boleta".to_string(),
        tipo_sucursal: "Supermercado".to_string(),
        nombre_sucursal: "Sucursal Centro".to_string(),
        imagen_path: Some("/uploads/boletas/boleta_887654_1.jpg".to_string()),
        ocr_texto: Some("N° 887654".to_string()),
        ocr_confianza: Some(84.5),
    }
}

#[tokio::test]
async fn test_duplicate_receipt_fails_closed() -> Result<()> {
    skip_if_no_db!(test_duplicate_receipt_fails_closed_impl)
}

async fn test_duplicate_receipt_fails_closed_impl(pool: &PgPool) -> Result<()> {
    let first_id = insert_participation(pool, &new_participation("887654"))
        .await
        .expect("first insert succeeds");
    assert!(first_id > 0);

    // The UNIQUE constraint maps the second insert to a business rejection
    let second = insert_participation(pool, &new_participation("887654")).await;
    match second {
        Err(AppError::Rejection(message)) => assert!(message.contains("887654")),
        other => panic!("expected duplicate rejection, got {:?}", other),
    }

    // The first registration is unaffected
    let registered = find_registration_date(pool, "887654").await?;
    assert!(registered.is_some());

    Ok(())
}

#[tokio::test]
async fn test_rejection_log_is_append_only_audit() -> Result<()> {
    skip_if_no_db!(test_rejection_log_impl)
}

async fn test_rejection_log_impl(pool: &PgPool) -> Result<()> {
    insert_rejection(
        pool,
        Some("445566"),
        Some("ana.rojas@example.com"),
        "La boleta 445566 ya está registrada en el concurso",
    )
    .await?;
    insert_rejection(pool, Some("445566"), None, "monto insuficiente").await?;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rechazos WHERE numero_boleta = '445566'")
            .fetch_one(pool)
            .await?;
    assert_eq!(count, 2);

    Ok(())
}

#[tokio::test]
async fn test_winner_flow_and_draw_candidates() -> Result<()> {
    skip_if_no_db!(test_winner_flow_impl)
}

async fn test_winner_flow_impl(pool: &PgPool) -> Result<()> {
    let first = insert_participation(pool, &new_participation("100001"))
        .await
        .expect("insert succeeds");
    let second = insert_participation(pool, &new_participation("100002"))
        .await
        .expect("insert succeeds");

    // Both start as draw candidates, ordered by submission time
    let candidates = draw_candidates(pool).await?;
    assert_eq!(
        candidates.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![first, second]
    );

    // Marking a winner removes them from the candidate list
    mark_winner(pool, first, "Gift card $100.000")
        .await
        .expect("winner marked");
    let candidates = draw_candidates(pool).await?;
    assert_eq!(candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second]);

    // A disqualified participant cannot win
    sqlx::query("UPDATE participaciones SET estado = 'disqualified' WHERE id = $1")
        .bind(second)
        .execute(pool)
        .await?;
    match mark_winner(pool, second, "Premio").await {
        Err(AppError::Rejection(message)) => assert!(message.contains("descalificado")),
        other => panic!("expected rejection for disqualified participant, got {:?}", other),
    }

    // An unknown participant id is a not-found error
    assert!(matches!(
        mark_winner(pool, 999_999, "Premio").await,
        Err(AppError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_statistics_cover_active_participations() -> Result<()> {
    skip_if_no_db!(test_statistics_impl)
}

async fn test_statistics_impl(pool: &PgPool) -> Result<()> {
    let mut cheap = new_participation("200001");
    cheap.monto = 6000;
    insert_participation(pool, &cheap).await.expect("insert");
    let mut dear = new_participation("200002");
    dear.monto = 14000;
    insert_participation(pool, &dear).await.expect("insert");

    let stats = statistics(pool).await?;
    assert_eq!(stats.total_participaciones, 2);
    assert_eq!(stats.participaciones_activas, 2);
    assert_eq!(stats.boletas_validas, 2);
    assert_eq!(stats.ganadores, 0);
    assert_eq!(stats.monto_total, 20000);
    assert!((stats.monto_promedio - 10000.0).abs() < f64::EPSILON);

    Ok(())
}

#[tokio::test]
async fn test_branch_registry_lists_configured_branches() -> Result<()> {
    skip_if_no_db!(test_branch_registry_impl)
}

async fn test_branch_registry_impl(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "INSERT INTO sucursales (nombre, tipo, db_url, activa) VALUES \
         ('Centro', 'Supermercado', 'postgres://contest@centro/ventas', TRUE), \
         ('Norte', 'Ferreteria', 'postgres://contest@norte/ventas', TRUE), \
         ('Bodega', 'Multitienda', NULL, TRUE), \
         ('Cerrada', 'Supermercado', 'postgres://contest@cerrada/ventas', FALSE)",
    )
    .execute(pool)
    .await?;

    let branches = list_branches(pool).await?;
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();

    // Branches without a configured database and inactive branches are excluded
    assert_eq!(names, vec!["Centro", "Norte"]);

    Ok(())
}
