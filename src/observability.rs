//! # Observability Module
//!
//! Structured logging and metrics for the contest service. Logging goes
//! through `tracing` with an env-filter (optionally JSON-formatted for log
//! shippers); metrics are recorded with the `metrics` facade and exported by
//! the Prometheus HTTP exporter on its own port.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

/// Initialize tracing and (optionally) the Prometheus metrics exporter.
///
/// Must run inside the tokio runtime: the exporter spawns its HTTP listener
/// on the configured metrics port.
pub fn init_observability(config: &AppConfig) -> AppResult<()> {
    init_tracing(config.observability.log_json);

    if config.observability.enable_metrics_export {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| {
                AppError::Config(format!("Failed to install Prometheus exporter: {}", e))
            })?;
        info!("Prometheus metrics exporter listening on {}", addr);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Record the outcome of one OCR pass
pub fn record_ocr_pass(pass: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("contest_ocr_pass_total", "pass" => pass, "outcome" => outcome).increment(1);
}

/// Record a completed multi-pass recognition run
pub fn record_recognition_run(succeeded_attempts: usize, duration: std::time::Duration) {
    counter!("contest_ocr_runs_total").increment(1);
    histogram!("contest_ocr_run_duration_seconds").record(duration.as_secs_f64());
    histogram!("contest_ocr_run_attempts").record(succeeded_attempts as f64);
}

/// Record one branch probe outcome during a ledger scan
pub fn record_branch_probe(branch_kind: &'static str, outcome: &'static str) {
    counter!("contest_branch_probe_total", "branch_kind" => branch_kind, "outcome" => outcome)
        .increment(1);
}

/// Record a registration attempt outcome ("accepted" or a rejection label)
pub fn record_registration(outcome: &'static str) {
    counter!("contest_registrations_total", "outcome" => outcome).increment(1);
}
