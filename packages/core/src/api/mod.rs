//! HTTP surface.
//!
//! Route map:
//! - `GET  /health`                       — liveness probe
//! - `GET  /alerts`                       — active alerts, filterable
//! - `POST /alerts/:id/resolve`           — resolve one alert
//! - `GET  /alerts/summary`               — counts by priority (cached)
//! - `POST /procedures/:id/verify`        — on-demand verification run
//! - `GET  /procedures/:id/finalization`  — finalization readiness
//! - `GET  /metrics`                      — Prometheus exposition

pub mod alerts;
pub mod health;
pub mod procedures;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::cache::SummaryCache;
use crate::metrics::AppMetrics;
use crate::reconcile::{CoreError, VerificationService};

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<VerificationService>,
    pub metrics: Arc<AppMetrics>,
    pub summary_cache: Arc<Mutex<SummaryCache>>,
}

/// Build the full application router. Used by both `main.rs` and the
/// integration tests.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/alerts", get(alerts::list_active))
        .route("/alerts/summary", get(alerts::summary))
        .route("/alerts/:id/resolve", post(alerts::resolve))
        .route("/procedures/:id/verify", post(procedures::verify))
        .route("/procedures/:id/finalization", get(procedures::finalization))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a core error onto an HTTP status plus a JSON error body.
///
/// Transient storage failures surface as 503 so callers and load
/// balancers know a retry is reasonable.
pub(crate) fn error_response(err: CoreError) -> (StatusCode, Json<serde_json::Value>) {
    let (status, kind) = match &err {
        CoreError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        CoreError::AlreadyResolved { .. } => (StatusCode::CONFLICT, "already_resolved"),
        CoreError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        CoreError::Storage { .. } => (StatusCode::SERVICE_UNAVAILABLE, "storage"),
    };

    (
        status,
        Json(serde_json::json!({
            "error": { "kind": kind, "message": err.to_string() }
        })),
    )
}

async fn render_metrics(State(state): State<ApiState>) -> Response {
    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(err) => {
            tracing::error!(error = %err, "failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("metrics error"))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
    }
}

/// Request-level metrics middleware. Records the count and latency of
/// every request, labelled by method, route template and status. The
/// matched route keeps label cardinality bounded — `/alerts/:id/resolve`
/// is one series, not one per alert id.
async fn track_request(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let started = Instant::now();

    let response = next.run(req).await;

    state
        .metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), &path, response.status().as_str()])
        .inc();

    response
}
