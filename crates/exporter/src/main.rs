//! Kube Summary Exporter
//!
//! Serves the kubelet `/stats/summary` filesystem usage of cluster nodes
//! as Prometheus gauges, one node per `/node/{node}` request or all nodes
//! per `/nodes` request.

use anyhow::Result;
use clap::Parser;
use exporter_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    Aggregator, ExporterMetrics, Fetcher, KubeClusterClient,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::ExporterConfig::load(&cli)?;
    info!(
        listen_address = %config.listen_address,
        max_concurrent_scrapes = config.max_concurrent_scrapes,
        include_pod_uid = config.include_pod_uid,
        strict_timeout_header = config.strict_timeout_header,
        "Exporter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::KUBE_API).await;

    let metrics = ExporterMetrics::new();

    let cluster = KubeClusterClient::connect(config.kubeconfig.as_deref()).await?;
    let fetcher = Fetcher::new(Arc::new(cluster), metrics.clone());
    let aggregator = Aggregator::new(
        fetcher,
        config.label_policy(),
        config.max_concurrent_scrapes,
    );

    let app_state = Arc::new(AppState::new(
        aggregator,
        health_registry.clone(),
        metrics,
        config.timeout_policy(),
    ));

    // Ready as soon as the kube client exists
    health_registry.set_ready(true).await;

    info!(
        event = "exporter_started",
        version = EXPORTER_VERSION,
        listen_address = %config.listen_address,
        "Starting kube-summary-exporter"
    );

    api::serve(config.listen_address, app_state, shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    };

    info!(event = "exporter_shutdown", reason, "Shutting down");
}
