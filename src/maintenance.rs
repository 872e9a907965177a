//! Maintenance jobs: queue janitor, file reconciliation, artifact ageing
//!
//! The pipeline self-heals in two directions. The queue janitor removes
//! download tasks whose HTML artifact already exists on disk (work that
//! finished but whose envelope survived a crash) and prunes deadletter
//! entries past their retention. The file-consistency pass goes the other
//! way: it finds HTML artifacts without a text artifact and feeds them back
//! through the extraction engine.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::extract::ExtractionEngine;
use crate::queue::{QueueName, QueueSubstrate};
use crate::types::Stage;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long deadletter entries are kept before pruning
pub const DEADLETTER_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// How many queue members one janitor pass inspects at most
const JANITOR_SCAN_LIMIT: usize = 10_000;

/// How many missing text artifacts one repair pass re-extracts at most
const REPAIR_BATCH_LIMIT: usize = 50;

/// Outcome of one janitor pass
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CleanupReport {
    /// Download tasks removed because their HTML artifact already exists
    pub queue_removed: u64,
    /// Deadletter entries removed by the retention cutoff
    pub deadletter_removed: u64,
}

/// Outcome of a filesystem consistency check
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsistencyReport {
    /// Number of HTML artifacts on disk
    pub html_count: u64,
    /// Number of text artifacts on disk
    pub text_count: u64,
    /// Article ids with HTML but no text
    pub missing_text: Vec<String>,
    /// Article ids with text but no HTML
    pub orphaned_text: Vec<String>,
}

impl ConsistencyReport {
    /// Whether every HTML artifact has its text counterpart
    pub fn consistent(&self) -> bool {
        self.missing_text.is_empty()
    }
}

/// Maintenance job runner shared by the cleanup loop and the status surface
pub struct Maintenance {
    queue: Arc<dyn QueueSubstrate>,
    storage: StorageConfig,
    extraction: Arc<ExtractionEngine>,
}

impl Maintenance {
    /// Create the maintenance runner
    pub fn new(
        queue: Arc<dyn QueueSubstrate>,
        storage: StorageConfig,
        extraction: Arc<ExtractionEngine>,
    ) -> Self {
        Self {
            queue,
            storage,
            extraction,
        }
    }

    /// One janitor pass: queue reconciliation plus deadletter pruning
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let queue_removed = self.reconcile_download_queue().await?;
        let deadletter_removed = self.prune_deadletter().await?;

        let report = CleanupReport {
            queue_removed,
            deadletter_removed,
        };
        info!(
            queue_removed = report.queue_removed,
            deadletter_removed = report.deadletter_removed,
            "Queue cleanup completed"
        );
        Ok(report)
    }

    /// Remove download tasks whose HTML artifact already exists
    pub async fn reconcile_download_queue(&self) -> Result<u64> {
        let downloaded = self.downloaded_ids().await?;
        if downloaded.is_empty() {
            return Ok(0);
        }

        let tasks = self
            .queue
            .sample(QueueName::DownloadTasks, JANITOR_SCAN_LIMIT)
            .await?;

        let mut removed = 0u64;
        for task in tasks {
            if downloaded.contains(task.id.as_str())
                && self.queue.remove(QueueName::DownloadTasks, &task).await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed = removed, "Removed already-downloaded tasks from the queue");
        }
        Ok(removed)
    }

    /// Drop deadletter entries older than the retention window
    pub async fn prune_deadletter(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(DEADLETTER_RETENTION)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        self.queue.prune_failed(cutoff).await
    }

    /// Compare HTML and text artifacts on disk
    pub async fn check_file_consistency(&self) -> Result<ConsistencyReport> {
        let html_ids = list_stems(&self.storage.html_dir(), "html").await?;
        let text_ids = list_stems(&self.storage.text_dir(), "txt").await?;

        let mut missing_text: Vec<String> =
            html_ids.difference(&text_ids).cloned().collect();
        let mut orphaned_text: Vec<String> =
            text_ids.difference(&html_ids).cloned().collect();
        missing_text.sort();
        orphaned_text.sort();

        Ok(ConsistencyReport {
            html_count: html_ids.len() as u64,
            text_count: text_ids.len() as u64,
            missing_text,
            orphaned_text,
        })
    }

    /// Re-extract a bounded number of articles missing their text artifact
    ///
    /// Delegates to the extraction engine, whose file-discovery mode finds
    /// exactly these articles.
    pub async fn fix_missing_text(&self) -> Result<u64> {
        let consistency = self.check_file_consistency().await?;
        if consistency.missing_text.is_empty() {
            info!("No missing text artifacts");
            return Ok(0);
        }

        let batch = consistency.missing_text.len().min(REPAIR_BATCH_LIMIT);
        let report = self.extraction.run_batch(batch).await?;
        info!(
            repaired = report.successful,
            missing = consistency.missing_text.len(),
            "Repaired missing text artifacts"
        );
        Ok(report.successful)
    }

    /// Remove a stage's artifacts older than `days`
    ///
    /// The download stage ages HTML, images, and metadata; the parse stage
    /// ages text artifacts. Other stages own no files.
    pub async fn cleanup_old_files(&self, stage: Stage, days: u32) -> Result<u64> {
        let cutoff = std::time::SystemTime::now() - Duration::from_secs(days as u64 * 24 * 3600);

        let dirs = match stage {
            Stage::Download => vec![
                self.storage.html_dir(),
                self.storage.images_dir(),
                self.storage.metadata_dir(),
            ],
            Stage::Parse => vec![self.storage.text_dir()],
            Stage::Discovery | Stage::Storage => Vec::new(),
        };

        let mut removed = 0u64;
        for dir in dirs {
            removed += remove_older_than(&dir, cutoff).await?;
        }

        info!(stage = %stage, days = days, removed = removed, "Old artifacts removed");
        Ok(removed)
    }

    /// Ids that already have an HTML artifact
    async fn downloaded_ids(&self) -> Result<HashSet<String>> {
        list_stems(&self.storage.html_dir(), "html").await
    }
}

/// File stems (article ids) with the given extension in a directory
async fn list_stems(dir: &Path, extension: &str) -> Result<HashSet<String>> {
    let mut stems = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        // Directory not created yet means no artifacts
        Err(_) => return Ok(stems),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.insert(stem.to_string());
        }
    }

    Ok(stems)
}

/// Recursively remove regular files modified before `cutoff`
async fn remove_older_than(dir: &Path, cutoff: std::time::SystemTime) -> Result<u64> {
    let mut removed = 0u64;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old file"),
                }
            }
        }
    }

    Ok(removed)
}
