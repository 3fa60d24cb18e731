//! Alert endpoints: list, resolve, summary.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{error_response, ApiState};
use crate::reconcile::types::{Alert, AlertFilter, AlertPriority, AlertSummary, AlertType};

#[derive(Debug, Default, Deserialize)]
pub struct ListAlertsQuery {
    /// Lowest priority to include, e.g. `HIGH` returns HIGH and CRITICAL.
    pub min_priority: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub procedure_id: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /alerts` — ACTIVE alerts, most urgent first.
pub async fn list_active(
    State(state): State<ApiState>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Json<Vec<Alert>>, (StatusCode, Json<serde_json::Value>)> {
    let min_priority = match query.min_priority.as_deref() {
        Some(raw) => Some(AlertPriority::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": {
                        "kind": "validation",
                        "message": format!("Unknown priority '{}'", raw),
                    }
                })),
            )
        })?),
        None => None,
    };

    let alert_type = match query.alert_type.as_deref() {
        Some(raw) => Some(AlertType::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": {
                        "kind": "validation",
                        "message": format!("Unknown alert type '{}'", raw),
                    }
                })),
            )
        })?),
        None => None,
    };

    let filter = AlertFilter {
        alert_type,
        min_priority,
        procedure_id: query.procedure_id,
        created_before: None,
        limit: query.limit,
    };

    let alerts = state
        .service
        .engine()
        .list_active(&filter)
        .await
        .map_err(error_response)?;

    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolver_id: i64,
    pub note: Option<String>,
}

/// `POST /alerts/:id/resolve` — close out an ACTIVE alert.
pub async fn resolve(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Alert>, (StatusCode, Json<serde_json::Value>)> {
    let resolved = state
        .service
        .engine()
        .resolve(id, body.resolver_id, body.note)
        .await
        .map_err(error_response)?;

    // The counts just changed; make the next summary read fresh.
    state.summary_cache.lock().await.invalidate();

    Ok(Json(resolved))
}

/// `GET /alerts/summary` — ACTIVE counts by priority, served from a
/// short TTL cache.
pub async fn summary(
    State(state): State<ApiState>,
) -> Result<Json<AlertSummary>, (StatusCode, Json<serde_json::Value>)> {
    let mut cache = state.summary_cache.lock().await;

    if let Some(cached) = cache.get() {
        return Ok(Json(cached));
    }

    let summary = state
        .service
        .engine()
        .summary()
        .await
        .map_err(error_response)?;

    state.metrics.record_summary(&summary);
    cache.put(summary);

    Ok(Json(summary))
}
