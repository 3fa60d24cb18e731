//! Procedure endpoints: on-demand verification and finalization checks.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::{error_response, ApiState};
use crate::reconcile::types::{FinalizationStatus, VerificationReport};

/// `POST /procedures/:id/verify` — classify the procedure's counts now
/// and raise alerts for anything found. Idempotent while discrepancies
/// persist thanks to the active-alert dedup rule.
pub async fn verify(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<VerificationReport>, (StatusCode, Json<serde_json::Value>)> {
    let report = state.service.verify_now(id).await.map_err(error_response)?;

    if report.alerts_created > 0 {
        state.summary_cache.lock().await.invalidate();
    }

    Ok(Json(report))
}

/// `GET /procedures/:id/finalization` — can this procedure be closed?
pub async fn finalization(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<FinalizationStatus>, (StatusCode, Json<serde_json::Value>)> {
    let status = state
        .service
        .finalization_ready(id)
        .await
        .map_err(error_response)?;

    Ok(Json(status))
}
