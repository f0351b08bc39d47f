//! Aura daemon -- loads configuration, assembles the Intervention
//! Orchestrator's dependency graph, and serves a health/metrics surface
//! while the Workflow Runtime processes admitted jobs in-process.

use anyhow::{Context, Result};
use aura_core::config::Config;
use aura_daemon::{app::App, environment};
use axum::{routing::get, Router};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    environment::configure_app();
    aura_telemetry::logging::init_logging("aura-daemon", "info");

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "aura daemon starting");

    let config = load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let app = App::build(config).await;
    info!(
        worker_count = app.config.workflow.worker_count,
        max_inflight_global = app.config.gatekeeper.max_inflight_global,
        "dependency graph assembled"
    );

    let bind_host = "127.0.0.1";
    let listener = tokio::net::TcpListener::bind(format!("{bind_host}:0"))
        .await
        .context("failed to bind health/metrics listener")?;
    let bound_port = listener.local_addr()?.port();
    info!(port = bound_port, "health/metrics listener bound");

    let health_router = build_health_router(app.workflow.clone());

    axum::serve(listener, health_router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("daemon server exited with an error")?;

    info!("aura daemon stopped");
    Ok(())
}

fn build_health_router(workflow: std::sync::Arc<aura_workflow::runtime::WorkflowRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let workflow = workflow.clone();
                async move {
                    let body = aura_telemetry::metrics::global_metrics().export_prometheus();
                    format!(
                        "{body}aura_active_jobs {}\n",
                        workflow.active_job_count()
                    )
                }
            }),
        )
        .layer(axum::middleware::from_fn(aura_telemetry::middleware::metrics_middleware))
}

fn load_config() -> Result<Config> {
    let path = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".aura")
        .join("config.toml");
    if path.exists() {
        let display = path.display().to_string();
        Config::load_from(path).with_context(|| format!("failed to parse {display}"))
    } else {
        info!(path = %path.display(), "no config file found, using defaults");
        Ok(Config::default())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, shutting down");
}
