//! Integration tests for all API endpoints.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) using
//! `tower::ServiceExt::oneshot` — no live server needed.
//!
//! `build_test_app()` wires together:
//! - An in-memory SQLite pool with the schema applied
//! - A `SqliteRepository` shared by the service and the seed helpers
//! - A `VerificationService` with default thresholds
//! - Prometheus `AppMetrics` and an empty summary cache
//! - The complete `Router<()>` returned ready for `oneshot`

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::ServiceExt;

use count_sentinel::{
    api::{self, ApiState},
    cache::SummaryCache,
    db,
    metrics::AppMetrics,
    reconcile::{
        types::{CountPhase, ProcedureState},
        ReconcileConfig, VerificationService,
    },
    repository::SqliteRepository,
};

// ---- Helpers ----------------------------------------------------------------

/// Build the complete test router plus the repository used to seed data.
async fn build_test_app() -> (Router, Arc<SqliteRepository>) {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(SqliteRepository::new(pool));

    let service = Arc::new(VerificationService::new(
        repository.clone(),
        ReconcileConfig::default(),
    ));
    let metrics = Arc::new(AppMetrics::new().unwrap());

    let state = ApiState {
        service,
        metrics,
        summary_cache: Arc::new(Mutex::new(SummaryCache::new(StdDuration::from_secs(5)))),
    };

    (api::build_router(state), repository)
}

/// Seed a procedure whose FINAL count disagrees with the INITIAL count.
async fn seed_mismatched_procedure(repo: &SqliteRepository, procedure_id: i64) {
    let now = Utc::now();
    repo.insert_procedure(
        procedure_id,
        "appendectomy",
        ProcedureState::FinalCount,
        now - ChronoDuration::hours(1),
    )
    .await
    .unwrap();
    repo.insert_instrument(10, "forceps", now + ChronoDuration::days(90), 4)
        .await
        .unwrap();

    repo.insert_observation(procedure_id, 10, CountPhase::Initial, 4, 4, 7, now)
        .await
        .unwrap();
    repo.insert_observation(procedure_id, 10, CountPhase::Final, 3, 4, 7, now)
        .await
        .unwrap();
}

/// Seed a procedure whose counts agree in both phases.
async fn seed_clean_procedure(repo: &SqliteRepository, procedure_id: i64) {
    let now = Utc::now();
    repo.insert_procedure(
        procedure_id,
        "cholecystectomy",
        ProcedureState::FinalCount,
        now - ChronoDuration::hours(1),
    )
    .await
    .unwrap();
    repo.insert_instrument(20, "retractor", now + ChronoDuration::days(90), 2)
        .await
        .unwrap();

    repo.insert_observation(procedure_id, 20, CountPhase::Initial, 2, 2, 7, now)
        .await
        .unwrap();
    repo.insert_observation(procedure_id, 20, CountPhase::Final, 2, 2, 7, now)
        .await
        .unwrap();
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Convenience: collect body bytes and parse as JSON.
async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_ok_body() {
    let (app, _repo) = build_test_app().await;
    let resp = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

// ---- POST /procedures/:id/verify --------------------------------------------

#[tokio::test]
async fn verify_reports_discrepancy_and_creates_alert() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    let resp = app.oneshot(post_empty("/procedures/1/verify")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["procedure_id"], 1);
    assert_eq!(json["discrepancies"].as_array().unwrap().len(), 1);
    assert_eq!(json["discrepancies"][0]["kind"], "QUANTITY_MISMATCH");
    assert_eq!(json["alerts_created"], 1);
    assert_eq!(json["alerts_deduplicated"], 0);
}

#[tokio::test]
async fn second_verify_deduplicates_instead_of_duplicating() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    let first = app
        .clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(post_empty("/procedures/1/verify")).await.unwrap();
    let json = json_body(second.into_body()).await;
    assert_eq!(json["alerts_created"], 0);
    assert_eq!(json["alerts_deduplicated"], 1);
}

#[tokio::test]
async fn verify_unknown_procedure_returns_404() {
    let (app, _repo) = build_test_app().await;

    let resp = app
        .oneshot(post_empty("/procedures/999/verify"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["error"]["kind"], "not_found");
}

#[tokio::test]
async fn verify_procedure_without_counts_returns_400() {
    let (app, repo) = build_test_app().await;
    repo.insert_procedure(3, "laparotomy", ProcedureState::InitialCount, Utc::now())
        .await
        .unwrap();

    let resp = app.oneshot(post_empty("/procedures/3/verify")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["error"]["kind"], "validation");
}

// ---- GET /alerts ------------------------------------------------------------

#[tokio::test]
async fn list_alerts_returns_active_alerts_after_verify() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();

    let resp = app.oneshot(get("/alerts")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    let alerts = json.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alert_type"], "QUANTITY_MISMATCH");
    assert_eq!(alerts[0]["priority"], "HIGH");
    assert_eq!(alerts[0]["state"], "ACTIVE");
    assert_eq!(alerts[0]["entity"]["procedure_id"], 1);
    assert_eq!(alerts[0]["entity"]["instrument_id"], 10);
}

#[tokio::test]
async fn list_alerts_min_priority_filters_out_lower() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();

    // QUANTITY_MISMATCH is HIGH, so a CRITICAL floor excludes it.
    let resp = app
        .oneshot(get("/alerts?min_priority=CRITICAL"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_alerts_rejects_unknown_priority() {
    let (app, _repo) = build_test_app().await;

    let resp = app.oneshot(get("/alerts?min_priority=URGENT")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["error"]["kind"], "validation");
}

#[tokio::test]
async fn list_alerts_rejects_unknown_type() {
    let (app, _repo) = build_test_app().await;

    let resp = app.oneshot(get("/alerts?type=MYSTERY")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- POST /alerts/:id/resolve -----------------------------------------------

#[tokio::test]
async fn resolve_closes_alert_and_removes_it_from_active_list() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();

    let listed = app.clone().oneshot(get("/alerts")).await.unwrap();
    let alerts = json_body(listed.into_body()).await;
    let id = alerts[0]["id"].as_i64().unwrap();

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/alerts/{}/resolve", id),
            r#"{"resolver_id": 42, "note": "recount confirmed"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["state"], "RESOLVED");
    assert_eq!(json["resolved_by"], 42);
    assert_eq!(json["resolution_note"], "recount confirmed");

    let after = app.oneshot(get("/alerts")).await.unwrap();
    let remaining = json_body(after.into_body()).await;
    assert!(remaining.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn resolving_twice_returns_409() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();
    let listed = app.clone().oneshot(get("/alerts")).await.unwrap();
    let alerts = json_body(listed.into_body()).await;
    let id = alerts[0]["id"].as_i64().unwrap();

    let uri = format!("/alerts/{}/resolve", id);
    let body = r#"{"resolver_id": 42}"#;
    let first = app.clone().oneshot(post_json(&uri, body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(post_json(&uri, body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = json_body(second.into_body()).await;
    assert_eq!(json["error"]["kind"], "already_resolved");
}

#[tokio::test]
async fn resolving_unknown_alert_returns_404() {
    let (app, _repo) = build_test_app().await;

    let resp = app
        .oneshot(post_json("/alerts/999/resolve", r#"{"resolver_id": 1}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---- GET /alerts/summary ----------------------------------------------------

#[tokio::test]
async fn summary_counts_active_alerts_by_priority() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();

    let resp = app.oneshot(get("/alerts/summary")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["high"], 1);
    assert_eq!(json["critical"], 0);
    assert_eq!(json["medium"], 0);
    assert_eq!(json["low"], 0);
}

#[tokio::test]
async fn summary_reflects_resolution_despite_cache() {
    let (app, repo) = build_test_app().await;
    seed_mismatched_procedure(&repo, 1).await;

    app.clone()
        .oneshot(post_empty("/procedures/1/verify"))
        .await
        .unwrap();

    // Prime the cache.
    let warm = app.clone().oneshot(get("/alerts/summary")).await.unwrap();
    assert_eq!(json_body(warm.into_body()).await["high"], 1);

    let listed = app.clone().oneshot(get("/alerts")).await.unwrap();
    let alerts = json_body(listed.into_body()).await;
    let id = alerts[0]["id"].as_i64().unwrap();
    app.clone()
        .oneshot(post_json(
            &format!("/alerts/{}/resolve", id),
            r#"{"resolver_id": 42}"#,
        ))
        .await
        .unwrap();

    // Resolution invalidates the cache, so this read is fresh.
    let resp = app.oneshot(get("/alerts/summary")).await.unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["high"], 0);
}

// ---- GET /procedures/:id/finalization ---------------------------------------

#[tokio::test]
async fn finalization_blocked_by_missing_final_count() {
    let (app, repo) = build_test_app().await;
    let now = Utc::now();
    repo.insert_procedure(1, "appendectomy", ProcedureState::FinalCount, now)
        .await
        .unwrap();
    repo.insert_instrument(10, "forceps", now + ChronoDuration::days(90), 4)
        .await
        .unwrap();
    repo.insert_observation(1, 10, CountPhase::Initial, 4, 4, 7, now)
        .await
        .unwrap();

    let resp = app.oneshot(get("/procedures/1/finalization")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["ready"], false);
    assert_eq!(json["instruments_missing_final"][0], 10);
}

#[tokio::test]
async fn finalization_ready_when_counts_agree() {
    let (app, repo) = build_test_app().await;
    seed_clean_procedure(&repo, 1).await;

    let resp = app.oneshot(get("/procedures/1/finalization")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["ready"], true);
    assert!(json["instruments_missing_final"]
        .as_array()
        .unwrap()
        .is_empty());
    assert_eq!(json["open_critical_alerts"], 0);
}

#[tokio::test]
async fn finalization_unknown_procedure_returns_404() {
    let (app, _repo) = build_test_app().await;

    let resp = app
        .oneshot(get("/procedures/999/finalization"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (app, _repo) = build_test_app().await;

    // Generate at least one sample before scraping.
    app.clone().oneshot(get("/health")).await.unwrap();

    let resp = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn request_metrics_use_route_templates_not_raw_paths() {
    let (app, _repo) = build_test_app().await;

    // Two distinct ids must collapse into one labelled series.
    for id in [111, 222] {
        app.clone()
            .oneshot(post_json(
                &format!("/alerts/{}/resolve", id),
                r#"{"resolver_id": 1}"#,
            ))
            .await
            .unwrap();
    }

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("/alerts/:id/resolve"));
    assert!(!text.contains("/alerts/111/resolve"));
    assert!(!text.contains("/alerts/222/resolve"));
}
