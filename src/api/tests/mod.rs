use crate::api::stage_router;
use crate::config::Config;
use crate::pipeline::ContentPipeline;
use crate::queue::MemoryQueue;
use crate::types::Stage;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    pipeline: Arc<ContentPipeline>,
    _dirs: (TempDir, tempfile::NamedTempFile),
}

async fn harness() -> Harness {
    let storage_dir = TempDir::new().unwrap();
    let db_file = tempfile::NamedTempFile::new().unwrap();

    let mut config = Config::default();
    config.storage.base_path = storage_dir.path().to_path_buf();
    config.state.path = db_file.path().to_path_buf();

    let pipeline = Arc::new(
        ContentPipeline::with_queue(config, Arc::new(MemoryQueue::new()))
            .await
            .unwrap(),
    );

    Harness {
        pipeline,
        _dirs: (storage_dir, db_file),
    }
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(
    router: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn download_health_reports_prerequisites() {
    let h = harness().await;
    let router = stage_router(h.pipeline.clone(), Stage::Download);

    let (status, body) = get(router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "download");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["details"]["queue"], true);
    assert_eq!(body["details"]["state"], true);
    assert_eq!(body["details"]["storage"], true);
    assert!(body["details"].get("feed").is_none(), "only discovery checks the feed");
}

#[tokio::test]
async fn status_includes_worker_flag_queue_stats_and_config() {
    let h = harness().await;
    let router = stage_router(h.pipeline.clone(), Stage::Download);

    let (status, body) = get(router, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "download");
    assert_eq!(body["worker_running"], false);
    assert_eq!(body["stats"]["processed"], 0);
    assert_eq!(body["queue_stats"]["lengths"]["download_tasks"], 0);
    assert_eq!(body["config"]["download"]["max_retries"], 3);
}

#[tokio::test]
async fn queue_stats_endpoint_returns_all_queues() {
    let h = harness().await;
    let router = stage_router(h.pipeline.clone(), Stage::Discovery);

    let (status, body) = get(router, "/queue-stats").await;
    assert_eq!(status, StatusCode::OK);
    for queue in ["download_tasks", "parse_tasks", "storage_tasks", "failed_tasks"] {
        assert!(body["lengths"].get(queue).is_some(), "missing queue {queue}");
    }
}

#[tokio::test]
async fn worker_control_is_idempotent() {
    let h = harness().await;

    let router = stage_router(h.pipeline.clone(), Stage::Parse);
    let (status, body) = post_json(router, "/start-worker", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Worker started");

    let router = stage_router(h.pipeline.clone(), Stage::Parse);
    let (_, body) = post_json(router, "/start-worker", serde_json::json!({})).await;
    assert_eq!(body["message"], "Worker already running");

    let router = stage_router(h.pipeline.clone(), Stage::Parse);
    let (_, body) = post_json(router, "/stop-worker", serde_json::json!({})).await;
    assert_eq!(body["message"], "Worker stopped");

    let router = stage_router(h.pipeline.clone(), Stage::Parse);
    let (_, body) = post_json(router, "/stop-worker", serde_json::json!({})).await;
    assert_eq!(body["message"], "Worker not running");

    h.pipeline.supervisor().shutdown().await;
}

#[tokio::test]
async fn extract_batch_runs_synchronously() {
    let h = harness().await;
    let router = stage_router(h.pipeline.clone(), Stage::Parse);

    let (status, body) =
        post_json(router, "/extract-batch", serde_json::json!({ "max_tasks": 2 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0, "empty queue and storage process nothing");
}

#[tokio::test]
async fn cleanup_validates_the_day_range() {
    let h = harness().await;

    let router = stage_router(h.pipeline.clone(), Stage::Download);
    let (status, body) = post_json(router, "/cleanup", serde_json::json!({ "days": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let router = stage_router(h.pipeline.clone(), Stage::Download);
    let (status, body) = post_json(router, "/cleanup", serde_json::json!({ "days": 30 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed_files"], 0);
}

#[tokio::test]
async fn discover_validates_the_window() {
    let h = harness().await;

    let router = stage_router(h.pipeline.clone(), Stage::Discovery);
    let (status, body) =
        post_json(router, "/discover", serde_json::json!({ "hours": 999 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn openapi_spec_is_served() {
    let h = harness().await;
    let router = stage_router(h.pipeline.clone(), Stage::Discovery);

    let (status, body) = get(router, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/health").is_some());
    assert!(body["paths"].get("/cleanup").is_some());
}
