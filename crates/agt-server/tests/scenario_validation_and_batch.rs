//! Validation edge cases and the batch endpoint's per-item accounting.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use agt_config::TelemetryConfig;
use agt_server::{routes, state::AppState};

async fn make_state() -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().to_string_lossy().into_owned();
    let cfg = TelemetryConfig::from_lookup(|k| match k {
        "TELEMETRY_BASE_DIR" => Some(base.clone()),
        _ => None,
    })
    .expect("config");

    let opts = agt_db::DbOptions::new(&cfg.db_path);
    let write = agt_db::open_write_pool(&opts).await.expect("write pool");
    agt_db::migrate(&write).await.expect("migrate");
    let read = agt_db::open_read_pool(&opts, 4).await.expect("read pool");

    (dir, Arc::new(AppState::new(cfg, write, read)))
}

async fn call(st: &Arc<AppState>, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = routes::build_router(Arc::clone(st))
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn post_json(uri: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn valid_item(run_id: &str) -> Value {
    json!({
        "event_id": uuid::Uuid::new_v4().to_string(),
        "run_id": run_id,
        "agent_name": "A",
        "job_type": "J",
        "start_time": "2026-01-05T18:40:27Z"
    })
}

// ---------------------------------------------------------------------------
// Single insert validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negative_counter_is_422_with_field_location() {
    let (_dir, st) = make_state().await;
    let mut body = valid_item("r1");
    body["items_failed"] = json!(-1);

    let (status, resp) = call(&st, post_json("/api/v1/runs", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let detail = resp["detail"].as_array().unwrap();
    assert_eq!(detail[0]["loc"], json!(["body", "items_failed"]));
}

#[tokio::test]
async fn missing_required_fields_all_reported() {
    let (_dir, st) = make_state().await;
    let (status, resp) = call(&st, post_json("/api/v1/runs", json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let fields: Vec<String> = resp["detail"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["loc"][1].as_str().unwrap().to_string())
        .collect();
    for required in ["event_id", "run_id", "agent_name", "job_type", "start_time"] {
        assert!(fields.contains(&required.to_string()), "missing {required}");
    }
}

#[tokio::test]
async fn malformed_timestamp_is_422() {
    let (_dir, st) = make_state().await;
    let mut body = valid_item("r1");
    body["start_time"] = json!("not-a-time");
    let (status, _) = call(&st, post_json("/api/v1/runs", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn null_duration_normalizes_to_zero() {
    let (_dir, st) = make_state().await;
    let mut body = valid_item("r1");
    let event_id = body["event_id"].as_str().unwrap().to_string();
    body["duration_ms"] = Value::Null;

    let (status, _) = call(&st, post_json("/api/v1/runs", body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let req = Request::builder()
        .method("GET")
        .uri(format!("/api/v1/runs/{event_id}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let (_, row) = call(&st, req).await;
    assert_eq!(row["duration_ms"], 0);
}

#[tokio::test]
async fn empty_patch_is_400() {
    let (_dir, st) = make_state().await;
    call(&st, post_json("/api/v1/runs", valid_item("r1"))).await;

    let req = Request::builder()
        .method("PATCH")
        .uri("/api/v1/runs/whatever")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let (status, body) = call(&st, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("at least one"));
}

#[tokio::test]
async fn malformed_json_body_is_422() {
    let (_dir, st) = make_state().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, _) = call(&st, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn bad_limit_filter_is_400() {
    let (_dir, st) = make_state().await;
    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/runs?limit=0")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(&st, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_counts_inserted_duplicates_and_errors() {
    let (_dir, st) = make_state().await;

    let dup = valid_item("dup");
    let mut broken = valid_item("broken");
    broken["items_failed"] = json!(-5);

    let batch = json!([valid_item("a"), dup.clone(), dup, broken]);
    let (status, body) = call(&st, post_json("/api/v1/runs/batch", batch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);
    assert_eq!(body["inserted"], 2);
    assert_eq!(body["duplicates"], 1);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["index"], 3);
    assert_eq!(errors[0]["errors"][0]["loc"], json!(["body", "items_failed"]));
}

#[tokio::test]
async fn batch_of_fresh_items_inserts_all() {
    let (_dir, st) = make_state().await;
    let batch: Vec<Value> = (0..5).map(|i| valid_item(&format!("r{i}"))).collect();
    let (status, body) = call(&st, post_json("/api/v1/runs/batch", json!(batch))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 5);
    assert_eq!(body["duplicates"], 0);
    assert!(body["errors"].as_array().unwrap().is_empty());
}
