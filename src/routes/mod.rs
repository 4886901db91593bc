pub mod health;
pub mod metrics;
pub mod receipts;

use axum::extract::DefaultBodyLimit;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

const LANDING_PAGE: &str = "<!doctype html><title>receipt-ledger</title>\
<p>POST receipt images to <code>/api/v1/receipts</code>.</p>";

/// Build the application router. The metrics route is only mounted when a recorder handle
/// is supplied.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let body_limit = state.limits.max_upload_bytes;

    let mut app = Router::new()
        .route("/", get(|| async { Html(LANDING_PAGE) }))
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/receipts",
            get(receipts::get_receipts).post(receipts::submit_receipts),
        )
        .route("/api/v1/receipts/{id}", get(receipts::get_receipt))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
