//! Text extraction stage
//!
//! Consumes parse tasks, reads the downloaded HTML from disk, extracts the
//! main article text, and writes the text artifact. When the parse queue
//! runs dry the worker falls back to **file-discovery mode**: it scans the
//! HTML directory for articles without a text artifact and synthesizes
//! tasks for them, reconciling any parse-task losses.
//!
//! Writing the text file is a full overwrite, so re-running a task is
//! always safe.

pub mod content;

use crate::config::{ExtractionConfig, StorageConfig};
use crate::db::StateStore;
use crate::error::{Error, ExtractError, Result, RetryDisposition};
use crate::queue::{CounterAction, QueueName, QueueSubstrate, now_secs};
use crate::retry::retry_score;
use crate::types::{
    ArticleId, BatchReport, Event, Stage, StageStatus, TaskEnvelope, TaskSource, WorkerTotals,
};
use crate::utils::write_atomic;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// How long one pop waits before the worker tries file discovery
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Text extraction worker
pub struct ExtractionEngine {
    queue: Arc<dyn QueueSubstrate>,
    store: Arc<StateStore>,
    storage: StorageConfig,
    config: ExtractionConfig,
    event_tx: broadcast::Sender<Event>,
    totals: Mutex<WorkerTotals>,
}

impl ExtractionEngine {
    /// Create the extraction engine
    pub fn new(
        queue: Arc<dyn QueueSubstrate>,
        store: Arc<StateStore>,
        storage: StorageConfig,
        config: ExtractionConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            queue,
            store,
            storage,
            config,
            event_tx,
            totals: Mutex::new(WorkerTotals::default()),
        }
    }

    /// Cumulative worker counters
    pub async fn totals(&self) -> WorkerTotals {
        self.totals.lock().await.clone()
    }

    /// Process up to `max` parse tasks
    ///
    /// Per-task failures are absorbed into the report; only a down
    /// dependency aborts the batch early.
    pub async fn run_batch(&self, max: usize) -> Result<BatchReport> {
        let start = Instant::now();
        let mut report = BatchReport::default();
        let mut claimed: HashSet<String> = HashSet::new();

        let _ = self.event_tx.send(Event::BatchStarted { stage: Stage::Parse });
        info!(max_tasks = max, "Starting extraction batch");

        for _ in 0..max {
            let task = match self.queue.pop_min(QueueName::ParseTasks, POP_TIMEOUT).await {
                Ok(Some(task)) => task,
                Ok(None) => match self.task_from_disk(&claimed).await? {
                    Some(task) => task,
                    None => {
                        debug!("No more extraction tasks available");
                        break;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Parse queue unavailable, aborting batch");
                    return Err(e);
                }
            };

            claimed.insert(task.id.to_string());
            report.processed += 1;

            match self.process_task(&task).await {
                Ok(word_count) => {
                    report.successful += 1;
                    let _ = self.event_tx.send(Event::TaskDone {
                        stage: Stage::Parse,
                        id: task.id.clone(),
                    });
                    debug!(article_id = %task.id, word_count = word_count, "Text extracted");
                }
                Err(e) if e.is_dependency_down() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    let _ = self.event_tx.send(Event::TaskFailed {
                        stage: Stage::Parse,
                        id: task.id.clone(),
                        error: e.to_string(),
                    });
                    self.handle_failure(&task, &e).await;
                }
            }
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        self.totals.lock().await.absorb(&report);

        if report.successful > 0 {
            let delta = crate::db::StatsDelta {
                parsed: report.successful as i64,
                ..Default::default()
            };
            if let Err(e) = self
                .store
                .update_daily_stats(&crate::utils::today_utc(), &delta)
                .await
            {
                warn!(error = %e, "Failed to update daily stats");
            }
        }

        info!(
            processed = report.processed,
            successful = report.successful,
            failed = report.failed,
            duration_secs = report.duration_secs,
            "Extraction batch completed"
        );
        let _ = self.event_tx.send(Event::BatchEnded {
            stage: Stage::Parse,
            report: report.clone(),
        });

        Ok(report)
    }

    /// Extract one article; returns the word count of the text artifact
    async fn process_task(&self, task: &TaskEnvelope) -> Result<usize> {
        let id = &task.id;
        let html_path = task
            .html_file_path
            .clone()
            .unwrap_or_else(|| self.storage.html_path(id.as_str()));

        if !html_path.exists() {
            return Err(Error::Extract(ExtractError::HtmlMissing { path: html_path }));
        }

        let html = tokio::fs::read_to_string(&html_path).await?;

        let text = content::extract_text(&html)?.ok_or_else(|| {
            Error::Extract(ExtractError::NoTextExtracted {
                id: id.to_string(),
            })
        })?;

        let text_path = self.storage.text_path(id.as_str());
        write_atomic(&text_path, text.as_bytes()).await?;

        let word_count = text.split_whitespace().count();

        self.store
            .set_stage_status(id, Stage::Parse, StageStatus::Completed, None)
            .await?;
        self.store
            .set_extraction_result(id, &text_path.to_string_lossy(), word_count as i64)
            .await?;

        self.update_metadata(id, &text, &text_path).await;

        Ok(word_count)
    }

    /// Fold the extraction result into the article's metadata manifest
    ///
    /// Best-effort: a missing or unreadable manifest is logged, never fatal.
    async fn update_metadata(&self, id: &ArticleId, text: &str, text_path: &std::path::Path) {
        let metadata_path = self.storage.metadata_path(id.as_str());
        let Ok(raw) = tokio::fs::read_to_string(&metadata_path).await else {
            return;
        };

        let mut manifest: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(article_id = %id, error = %e, "Metadata manifest unreadable, skipping update");
                return;
            }
        };

        manifest["text_extraction"] = serde_json::json!({
            "text_length": text.chars().count(),
            "extracted_at": Utc::now().to_rfc3339(),
            "output_file": text_path.to_string_lossy(),
        });

        if let Ok(bytes) = serde_json::to_vec_pretty(&manifest) {
            if let Err(e) = write_atomic(&metadata_path, &bytes).await {
                warn!(article_id = %id, error = %e, "Failed to update metadata manifest");
            }
        }
    }

    /// Synthesize a task from an HTML artifact that has no text artifact
    ///
    /// Scans the HTML directory and returns the first id that is neither
    /// already extracted nor claimed earlier in this batch.
    async fn task_from_disk(&self, claimed: &HashSet<String>) -> Result<Option<TaskEnvelope>> {
        let html_dir = self.storage.html_dir();
        let mut entries = match tokio::fs::read_dir(&html_dir).await {
            Ok(entries) => entries,
            // No downloads yet
            Err(_) => return Ok(None),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if claimed.contains(id) {
                continue;
            }
            if self.storage.text_path(id).exists() {
                continue;
            }

            debug!(article_id = id, "Synthesized extraction task from disk");
            return Ok(Some(TaskEnvelope {
                id: ArticleId::from(id),
                url: String::new(),
                title: String::new(),
                mp_name: String::new(),
                mp_id: String::new(),
                publish_time: None,
                priority: 0,
                retry_count: 0,
                created_at: Utc::now(),
                source: TaskSource::FileDiscovery,
                html_file_path: Some(path),
                error_message: None,
                failed_at: None,
            }));
        }

        Ok(None)
    }

    /// Apply the retry discipline to a failed task
    async fn handle_failure(&self, task: &TaskEnvelope, error: &Error) {
        let message = error.to_string();
        let retry_budget = match error.disposition() {
            RetryDisposition::Fatal => 0,
            RetryDisposition::OneRetry => self.config.max_retries.min(1),
            RetryDisposition::Backoff => self.config.max_retries,
        };

        if task.retry_count < retry_budget {
            let mut retried = task.clone();
            retried.retry_count += 1;

            let score = retry_score(now_secs(), task.retry_count);
            if let Err(e) = self.queue.push(QueueName::ParseTasks, &retried, score).await {
                warn!(article_id = %task.id, error = %e, "Failed to requeue parse task");
            } else {
                info!(
                    article_id = %task.id,
                    retry = retried.retry_count,
                    max_retries = retry_budget,
                    error = %message,
                    "Parse task requeued with backoff"
                );
            }

            if let Err(e) = self
                .store
                .set_stage_status(&task.id, Stage::Parse, StageStatus::Processing, Some(&message))
                .await
            {
                warn!(article_id = %task.id, error = %e, "Failed to record retry state");
            }
            return;
        }

        // Retries exhausted: deadletter and mark the stage failed
        if let Err(e) = self.queue.push_failed(task, &message).await {
            warn!(article_id = %task.id, error = %e, "Failed to deadletter parse task");
        }
        if let Err(e) = self
            .queue
            .incr_counter(QueueName::ParseTasks, CounterAction::Failed)
            .await
        {
            warn!(article_id = %task.id, error = %e, "Failed to update failure counter");
        }
        if let Err(e) = self
            .store
            .set_stage_status(&task.id, Stage::Parse, StageStatus::Failed, Some(&message))
            .await
        {
            warn!(article_id = %task.id, error = %e, "Failed to record failed state");
        }

        tracing::error!(article_id = %task.id, error = %message, "Extraction permanently failed");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
