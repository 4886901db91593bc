use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use receipt_ledger::{app_state::AppState, config::AppConfig, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing receipt-ledger server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("receipt_batches_total", "Total receipt batches submitted");
    metrics::describe_counter!("receipt_jobs_total", "Total receipt jobs started");
    metrics::describe_counter!(
        "receipt_jobs_succeeded",
        "Total receipt jobs saved to their destination"
    );
    metrics::describe_counter!(
        "receipt_jobs_failed",
        "Total receipt jobs that failed, labelled by stage"
    );
    metrics::describe_histogram!(
        "receipt_job_seconds",
        "Time to take one receipt through all stages"
    );

    tracing::info!(
        ocr_model = %config.ocr_model,
        structuring_model = %config.structuring_model,
        "Initializing Cloudflare Workers AI client"
    );
    let state = AppState::from_config(&config);

    let app = routes::router(state, Some(prometheus_handle));

    tracing::info!("Starting receipt-ledger on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
