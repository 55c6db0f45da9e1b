//! In-process API tests driving the router with `oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pomotune_core::{CsvHistoryStore, OptimizationSession, SurrogateOptimizer};
use pomotune_server::{router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

fn app(dir: &tempfile::TempDir) -> axum::Router {
    let session =
        OptimizationSession::new(CsvHistoryStore::new(dir.path()), SurrogateOptimizer::new());
    router(Arc::new(AppState::new(session)))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_root_and_health() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(&dir)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = get(app(&dir), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_round_optimizer_returns_bounded_times() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/round_optimizer/u1?focus_score=6.0").await;
    assert_eq!(status, StatusCode::OK);

    let work = body["work_time"].as_f64().unwrap();
    let brk = body["break_time"].as_f64().unwrap();
    assert!((15.0..=60.0).contains(&work));
    assert!((3.0..=20.0).contains(&brk));

    let (status, rows) = get(app(&dir), "/history/round/u1").await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["outcome"]["score"].as_f64(), Some(6.0));
    assert_eq!(rows[1]["parameters"][0].as_f64(), Some(work));
    assert_eq!(rows[1]["outcome"]["status"], "pending");
}

#[tokio::test]
async fn test_session_optimizer_returns_integer_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/session_optimizer/u1?average_focus_score=7.5").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["number_of_round"].is_u64());
    assert!(body["session_break_time"].as_f64().is_some());
}

#[tokio::test]
async fn test_unknown_target_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/history/foo/u1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("foo"));
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_user_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/round_optimizer/bad.user?focus_score=5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_missing_history_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/history/session/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn test_corrupted_history_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("round_csv");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("u1.csv"), "a,b\n1,2\n").unwrap();

    let (status, body) = get(app(&dir), "/round_optimizer/u1?focus_score=5").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_missing_score_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/round_optimizer/u1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("focus_score"));
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_unparsable_score_is_rejected_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/session_optimizer/u1?average_focus_score=high").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(body["request_id"].is_string());
    assert!(!dir.path().join("session_csv").exists());
}
