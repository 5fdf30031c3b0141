//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use patchrule_controller::{ReconcileMetrics, render_prometheus};

pub fn router(metrics: Arc<ReconcileMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(metrics)
}

async fn prometheus_metrics(State(metrics): State<Arc<ReconcileMetrics>>) -> impl IntoResponse {
    let body = render_prometheus(&metrics.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
