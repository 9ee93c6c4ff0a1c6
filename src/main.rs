use anyhow::Result;
use beach_market_contest::config::AppConfig;
use beach_market_contest::http;
use beach_market_contest::observability;
use beach_market_contest::pipeline::ContestPipeline;
use beach_market_contest::store;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    // Load and validate configuration before touching any external system
    let config = AppConfig::from_env()?;
    config.validate()?;

    observability::init_observability(&config)?;
    info!("{}", config.summary());

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    // Initialize database schema
    store::init_database_schema(&pool).await?;

    // The upload directory must exist before the first accepted registration
    std::fs::create_dir_all(&config.contest.upload_dir)?;
    info!(
        upload_dir = %config.contest.upload_dir.display(),
        "Receipt image storage ready"
    );

    let pipeline = Arc::new(ContestPipeline::new(pool, config));

    http::run_server(pipeline).await
}
