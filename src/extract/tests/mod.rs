use super::*;
use crate::config::{ExtractionConfig, StorageConfig};
use crate::db::{ArticleUpsert, StateStore};
use crate::queue::{MemoryQueue, QueueName, QueueSubstrate, now_secs, task_score};
use crate::types::{ArticleId, Stage, StageStatus, TaskEnvelope};
use tempfile::TempDir;

const ARTICLE_HTML: &str = r#"<html><body>
  <nav><p>Home | About | Contact | Archive | Subscribe | Sitemap</p></nav>
  <div id="content">
    <p>Opening paragraph with a reasonable amount of article text so the
       container scoring clears its minimum threshold comfortably.</p>
    <p>Closing paragraph continuing the story with further detail to keep
       the text mass well above the scoring threshold too.</p>
  </div>
</body></html>"#;

struct Harness {
    engine: ExtractionEngine,
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

    let engine = ExtractionEngine::new(
        queue.clone(),
        store.clone(),
        storage.clone(),
        ExtractionConfig::default(),
        event_tx,
    );

    Harness {
        engine,
        queue,
        store,
        storage,
        _dirs: (storage_dir, db_file),
    }
}

async fn seed_article(h: &Harness, id: &str, html: &str) {
    crate::utils::write_atomic(&h.storage.html_path(id), html.as_bytes())
        .await
        .unwrap();
    h.store
        .upsert(&ArticleUpsert {
            id: ArticleId::from(id),
            url: format!("http://h/{id}"),
            title: format!("Title {id}"),
            mp_name: "Publisher".to_string(),
            mp_id: "mp-1".to_string(),
            publish_time: None,
            discovery_status: StageStatus::Completed,
        })
        .await
        .unwrap();
}

fn parse_task_for(h: &Harness, id: &str) -> TaskEnvelope {
    let download = TaskEnvelope::download_task(
        ArticleId::from(id),
        format!("http://h/{id}"),
        "Title",
        "Publisher",
        "mp-1",
        None,
        0,
    );
    TaskEnvelope::parse_task(&download, h.storage.html_path(id))
}

#[tokio::test]
async fn queued_task_produces_text_artifact_and_completes_the_stage() {
    let h = harness().await;
    seed_article(&h, "a1", ARTICLE_HTML).await;

    h.queue
        .push(QueueName::ParseTasks, &parse_task_for(&h, "a1"), task_score(now_secs(), 0))
        .await
        .unwrap();

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);

    let text = std::fs::read_to_string(h.storage.text_path("a1")).unwrap();
    assert!(text.contains("Opening paragraph"));
    assert!(!text.contains("Home | About"), "boilerplate must not leak");

    let row = h.store.get(&ArticleId::from("a1")).await.unwrap().unwrap();
    assert_eq!(row.status(Stage::Parse), StageStatus::Completed);
    assert!(row.parsed_at.is_some());
    assert_eq!(
        row.content_file_path.as_deref(),
        Some(h.storage.text_path("a1").to_string_lossy().as_ref())
    );
    assert!(row.word_count.unwrap() > 10);
}

#[tokio::test]
async fn empty_queue_falls_back_to_file_discovery() {
    let h = harness().await;

    for id in ["a1", "a2", "a3"] {
        seed_article(&h, id, ARTICLE_HTML).await;
    }
    // a2 is already extracted; the scan must skip it
    crate::utils::write_atomic(&h.storage.text_path("a2"), b"already done")
        .await
        .unwrap();

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.processed, 2, "only the unextracted articles are picked up");
    assert_eq!(report.successful, 2);

    assert!(h.storage.text_path("a1").exists());
    assert!(h.storage.text_path("a3").exists());
    assert_eq!(
        std::fs::read_to_string(h.storage.text_path("a2")).unwrap(),
        "already done",
        "existing artifacts are left alone"
    );
}

#[tokio::test]
async fn missing_html_is_fatal_and_deadletters_immediately() {
    let h = harness().await;
    h.store
        .upsert(&ArticleUpsert {
            id: ArticleId::from("ghost"),
            url: "http://h/ghost".to_string(),
            title: String::new(),
            mp_name: String::new(),
            mp_id: String::new(),
            publish_time: None,
            discovery_status: StageStatus::Completed,
        })
        .await
        .unwrap();

    h.queue
        .push(
            QueueName::ParseTasks,
            &parse_task_for(&h, "ghost"),
            task_score(now_secs(), 0),
        )
        .await
        .unwrap();

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.failed, 1);

    // No retry: invalid tasks go straight to the deadletter
    assert_eq!(h.queue.size(QueueName::ParseTasks).await.unwrap(), 0);
    assert_eq!(h.queue.size(QueueName::FailedTasks).await.unwrap(), 1);

    let entries = h.queue.sample(QueueName::FailedTasks, 1).await.unwrap();
    assert!(entries[0].error_message.as_deref().unwrap().contains("HTML file not found"));

    let row = h.store.get(&ArticleId::from("ghost")).await.unwrap().unwrap();
    assert_eq!(row.status(Stage::Parse), StageStatus::Failed);
}

#[tokio::test]
async fn text_free_html_is_fatal() {
    let h = harness().await;
    seed_article(&h, "blank", "<html><body><script>x()</script></body></html>").await;

    h.queue
        .push(
            QueueName::ParseTasks,
            &parse_task_for(&h, "blank"),
            task_score(now_secs(), 0),
        )
        .await
        .unwrap();

    let report = h.engine.run_batch(10).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.queue.size(QueueName::FailedTasks).await.unwrap(), 1);
    assert!(!h.storage.text_path("blank").exists());

    let row = h.store.get(&ArticleId::from("blank")).await.unwrap().unwrap();
    assert_eq!(row.status(Stage::Parse), StageStatus::Failed);
    assert!(row.error_message.unwrap().contains("no text extracted"));
}

#[tokio::test]
async fn reprocessing_the_same_html_is_byte_identical() {
    let h = harness().await;
    seed_article(&h, "a1", ARTICLE_HTML).await;

    h.queue
        .push(QueueName::ParseTasks, &parse_task_for(&h, "a1"), task_score(now_secs(), 0))
        .await
        .unwrap();
    h.engine.run_batch(10).await.unwrap();
    let first = std::fs::read(h.storage.text_path("a1")).unwrap();

    // Second pass over the identical HTML (duplicate parse tasks are legal)
    h.queue
        .push(QueueName::ParseTasks, &parse_task_for(&h, "a1"), task_score(now_secs(), 0))
        .await
        .unwrap();
    h.engine.run_batch(10).await.unwrap();
    let second = std::fs::read(h.storage.text_path("a1")).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn metadata_manifest_gains_extraction_details() {
    let h = harness().await;
    seed_article(&h, "a1", ARTICLE_HTML).await;

    let manifest = serde_json::json!({
        "article_id": "a1",
        "title": "Title a1",
        "download_info": { "html_size": 1234 },
    });
    crate::utils::write_atomic(
        &h.storage.metadata_path("a1"),
        serde_json::to_vec_pretty(&manifest).unwrap().as_slice(),
    )
    .await
    .unwrap();

    h.queue
        .push(QueueName::ParseTasks, &parse_task_for(&h, "a1"), task_score(now_secs(), 0))
        .await
        .unwrap();
    h.engine.run_batch(10).await.unwrap();

    let updated: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.storage.metadata_path("a1")).unwrap())
            .unwrap();
    assert_eq!(updated["article_id"], "a1");
    assert_eq!(updated["download_info"]["html_size"], 1234);
    assert!(updated["text_extraction"]["text_length"].as_u64().unwrap() > 0);
    assert!(
        updated["text_extraction"]["output_file"]
            .as_str()
            .unwrap()
            .ends_with("a1.txt")
    );
}

#[tokio::test]
async fn totals_accumulate_across_batches() {
    let h = harness().await;
    seed_article(&h, "a1", ARTICLE_HTML).await;

    h.engine.run_batch(10).await.unwrap();

    seed_article(&h, "a2", ARTICLE_HTML).await;
    h.engine.run_batch(10).await.unwrap();

    let totals = h.engine.totals().await;
    assert_eq!(totals.processed, 2);
    assert_eq!(totals.successful, 2);
    assert_eq!(totals.last_run.unwrap().processed, 1);
}
