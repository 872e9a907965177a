use super::*;
use crate::config::{DownloadConfig, StorageConfig};
use crate::db::{ArticleUpsert, StateStore};
use crate::queue::MemoryQueue;
use crate::types::{ArticleId, StageStatus, TaskSource};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    engine: DownloadEngine,
    queue: Arc<MemoryQueue>,
    store: Arc<StateStore>,
    storage: StorageConfig,
    _dirs: (TempDir, tempfile::NamedTempFile),
}

async fn harness() -> Harness {
    let storage_dir = TempDir::new().unwrap();
    let db_file = tempfile::NamedTempFile::new().unwrap();

    let storage = StorageConfig {
        base_path: storage_dir.path().to_path_buf(),
    };
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(StateStore::new(db_file.path()).await.unwrap());
    let (event_tx, _) = broadcast::channel(64);

    let config = DownloadConfig {
        timeout: Duration::from_secs(5),
        image_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let engine = DownloadEngine::new(
        queue.clone(),
        store.clone(),
        storage.clone(),
        config,
        event_tx,
    )
    .unwrap();

    Harness {
        engine,
        queue,
        store,
        storage,
        _dirs: (storage_dir, db_file),
    }
}

async fn seed_row(h: &Harness, id: &str, url: &str) {
    h.store
        .upsert(&ArticleUpsert {
            id: ArticleId::from(id),
            url: url.to_string(),
            title: format!("Title {id}"),
            mp_name: "Publisher".to_string(),
            mp_id: "mp-1".to_string(),
            publish_time: Some(1_700_000_000),
            discovery_status: StageStatus::Completed,
        })
        .await
        .unwrap();
}

fn download_task(id: &str, url: &str) -> TaskEnvelope {
    TaskEnvelope::download_task(
        ArticleId::from(id),
        url,
        format!("Title {id}"),
        "Publisher",
        "mp-1",
        Some(1_700_000_000),
        0,
    )
}

async fn enqueue(h: &Harness, task: &TaskEnvelope) {
    h.queue
        .push(QueueName::DownloadTasks, task, task_score(now_secs(), task.priority))
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_path_writes_all_artifacts_and_emits_parse_task() {
    let server = MockServer::start().await;

    let article_html = format!(
        r#"<html><body>
            <p>Article body text.</p>
            <img src="{0}/img/one.png" alt="first">
            <img src="{0}/img/two" alt="no extension">
        </body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/articles/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_html))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/one.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/two"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 32]))
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/a1", server.uri());
    seed_row(&h, "a1", &url).await;
    enqueue(&h, &download_task("a1", &url)).await;

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);

    // HTML artifact
    let html = std::fs::read_to_string(h.storage.html_path("a1")).unwrap();
    assert!(html.contains("Article body text"));

    // Images: numbered by match position, extension inferred or defaulted
    assert_eq!(
        std::fs::read(h.storage.images_path("a1").join("image_00.png")).unwrap().len(),
        64
    );
    assert_eq!(
        std::fs::read(h.storage.images_path("a1").join("image_01.jpg")).unwrap().len(),
        32
    );

    // Metadata manifest follows the documented schema
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.storage.metadata_path("a1")).unwrap())
            .unwrap();
    assert_eq!(manifest["article_id"], "a1");
    assert_eq!(manifest["url"], url);
    assert_eq!(manifest["download_info"]["image_count"], 2);
    assert_eq!(manifest["download_info"]["images_failed"], 0);
    assert_eq!(manifest["download_info"]["html_encoding"], "UTF-8");
    assert_eq!(manifest["images"].as_array().unwrap().len(), 2);
    assert_eq!(manifest["images"][0]["filename"], "image_00.png");
    assert_eq!(manifest["images"][0]["size"], 64);

    // State row advanced with paths and metrics
    let row = h.store.get(&ArticleId::from("a1")).await.unwrap().unwrap();
    assert_eq!(row.status(Stage::Download), StageStatus::Completed);
    assert!(row.downloaded_at.is_some());
    assert!(row.html_file_path.unwrap().ends_with("a1.html"));
    assert_eq!(row.image_count, 2);
    assert!(row.content_length.unwrap() > 0);

    // Exactly one parse task was emitted, carrying the HTML path
    assert_eq!(h.queue.size(QueueName::ParseTasks).await.unwrap(), 1);
    let parse = h
        .queue
        .pop_min(QueueName::ParseTasks, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parse.id.as_str(), "a1");
    assert_eq!(parse.source, TaskSource::Download);
    assert!(parse.html_file_path.unwrap().ends_with("a1.html"));

    // Processing-status cache reflects the hand-off
    let status = h.queue.get_status(&ArticleId::from("a1")).await.unwrap().unwrap();
    assert_eq!(status.status, "queued_for_parse");
}

#[tokio::test]
async fn transient_server_errors_requeue_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/flaky", server.uri());
    seed_row(&h, "flaky", &url).await;
    enqueue(&h, &download_task("flaky", &url)).await;

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.failed, 1);

    // The task went back to the download queue with a future score
    assert_eq!(h.queue.size(QueueName::DownloadTasks).await.unwrap(), 1);
    assert_eq!(h.queue.size(QueueName::FailedTasks).await.unwrap(), 0);

    let queued = h.queue.sample(QueueName::DownloadTasks, 1).await.unwrap();
    assert_eq!(queued[0].retry_count, 1);

    // Not eligible yet: the backoff pushed it at least 60s into the future
    let popped = h
        .queue
        .pop_min(QueueName::DownloadTasks, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(popped.is_none());

    // The row carries the retry bookkeeping
    let row = h.store.get(&ArticleId::from("flaky")).await.unwrap().unwrap();
    assert_eq!(row.retry_count, 1);
    assert!(row.error_message.unwrap().contains("503"));
}

#[tokio::test]
async fn permanent_404_deadletters_once_the_single_retry_is_spent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/gone", server.uri());
    seed_row(&h, "gone", &url).await;

    // The single 4xx retry has already been used
    let mut task = download_task("gone", &url);
    task.retry_count = 1;
    enqueue(&h, &task).await;

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.failed, 1);

    assert_eq!(h.queue.size(QueueName::DownloadTasks).await.unwrap(), 0);
    assert_eq!(h.queue.size(QueueName::FailedTasks).await.unwrap(), 1);

    let dead = h.queue.sample(QueueName::FailedTasks, 1).await.unwrap();
    assert!(dead[0].error_message.as_deref().unwrap().contains("404"));

    let row = h.store.get(&ArticleId::from("gone")).await.unwrap().unwrap();
    assert_eq!(row.status(Stage::Download), StageStatus::Failed);
    assert!(row.error_message.unwrap().contains("404"));
}

#[tokio::test]
async fn tasks_without_a_url_are_fatal() {
    let h = harness().await;
    let task = download_task("empty", "");
    enqueue(&h, &task).await;

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.queue.size(QueueName::DownloadTasks).await.unwrap(), 0);
    assert_eq!(h.queue.size(QueueName::FailedTasks).await.unwrap(), 1);
}

#[tokio::test]
async fn declared_iso_8859_1_is_read_as_utf8() {
    let server = MockServer::start().await;
    let body = "<html><body><p>中文内容测试</p></body></html>";
    Mock::given(method("GET"))
        .and(path("/articles/cjk"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=iso-8859-1")
                .set_body_bytes(body.as_bytes().to_vec()),
        )
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/cjk", server.uri());
    seed_row(&h, "cjk", &url).await;
    enqueue(&h, &download_task("cjk", &url)).await;

    h.engine.run_batch(10).await.unwrap();

    let html = std::fs::read_to_string(h.storage.html_path("cjk")).unwrap();
    assert!(html.contains("中文内容测试"), "iso-8859-1 must be forced to utf-8");
}

#[tokio::test]
async fn image_failures_are_recorded_but_not_fatal() {
    let server = MockServer::start().await;
    let article_html = format!(
        r#"<html><body>
            <p>Body.</p>
            <img src="{0}/img/ok.jpg">
            <img src="{0}/img/broken.jpg">
            <img src="/root-relative.jpg">
            <img src="data:image/png;base64,AAAA">
        </body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/articles/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_html))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/ok.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/broken.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/a1", server.uri());
    seed_row(&h, "a1", &url).await;
    enqueue(&h, &download_task("a1", &url)).await;

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.successful, 1, "image failures never fail the task");

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.storage.metadata_path("a1")).unwrap())
            .unwrap();
    assert_eq!(manifest["download_info"]["image_count"], 1);
    assert_eq!(manifest["download_info"]["images_failed"], 1);
    assert!(manifest["failed_images"][0]["error"].as_str().unwrap().contains("404"));
    // Root-relative and data: sources are skipped entirely
    assert_eq!(manifest["images"].as_array().unwrap().len(), 1);
    assert_eq!(manifest["failed_images"].as_array().unwrap().len(), 1);

    let row = h.store.get(&ArticleId::from("a1")).await.unwrap().unwrap();
    assert_eq!(row.image_count, 1);
}

#[tokio::test]
async fn reprocessing_overwrites_artifacts_without_temp_leftovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/a1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>version one</p></body></html>"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/articles/a1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>version two</p></body></html>"),
        )
        .mount(&server)
        .await;

    let h = harness().await;
    let url = format!("{}/articles/a1", server.uri());
    seed_row(&h, "a1", &url).await;

    enqueue(&h, &download_task("a1", &url)).await;
    h.engine.run_batch(10).await.unwrap();
    assert!(std::fs::read_to_string(h.storage.html_path("a1")).unwrap().contains("version one"));

    enqueue(&h, &download_task("a1", &url)).await;
    h.engine.run_batch(10).await.unwrap();
    assert!(std::fs::read_to_string(h.storage.html_path("a1")).unwrap().contains("version two"));

    // No orphan temp files anywhere under the storage root
    let mut stack = vec![h.storage.base_path.clone()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else {
                assert_ne!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("tmp"),
                    "orphan temp file: {p:?}"
                );
            }
        }
    }
}
