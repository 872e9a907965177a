//! Queue substrate: durable priority queues, dedup set, counters, status cache
//!
//! The pipeline's stages are connected by sorted-set queues ordered by a
//! numeric score (lower dispatches earlier). New tasks score
//! `now - priority * 1000`, so higher priorities sort earlier; retried tasks
//! score `now + backoff`, so they only become eligible in the future. A
//! plain list serves as the deadletter for tasks that exhausted their
//! retries.
//!
//! The substrate is a trait with two implementations:
//! - [`RedisQueue`](redis::RedisQueue) — production backend over Redis
//!   sorted sets, sets, and counters
//! - [`MemoryQueue`](memory::MemoryQueue) — in-process backend for tests
//!   and embedded single-process deployments
//!
//! All counters are advisory: batch operations (push + counter increment)
//! are not atomic, and nothing consults counters for correctness.

use crate::error::Result;
use crate::types::{ArticleId, QueueStats, TaskEnvelope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Named queues managed by the substrate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Tasks waiting for the download stage
    DownloadTasks,
    /// Tasks waiting for the extraction stage
    ParseTasks,
    /// Reserved for a future storage stage; declared but never produced
    StorageTasks,
    /// Deadletter list of tasks that exhausted their retries
    FailedTasks,
}

impl QueueName {
    /// Key name of this queue in the substrate
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::DownloadTasks => "download_tasks",
            QueueName::ParseTasks => "parse_tasks",
            QueueName::StorageTasks => "storage_tasks",
            QueueName::FailedTasks => "failed_tasks",
        }
    }

    /// The sorted-set queues, in reporting order
    pub const SORTED: [QueueName; 3] = [
        QueueName::DownloadTasks,
        QueueName::ParseTasks,
        QueueName::StorageTasks,
    ];

    /// All queues, in reporting order
    pub const ALL: [QueueName; 4] = [
        QueueName::DownloadTasks,
        QueueName::ParseTasks,
        QueueName::StorageTasks,
        QueueName::FailedTasks,
    ];
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter actions tracked per queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterAction {
    /// A task was pushed
    Added,
    /// A task was popped for processing
    Processed,
    /// A task was deadlettered
    Failed,
}

impl CounterAction {
    /// Key fragment of this action
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterAction::Added => "added",
            CounterAction::Processed => "processed",
            CounterAction::Failed => "failed",
        }
    }
}

/// Key prefix of per-article processing-status records
pub const PROCESSING_STATUS_PREFIX: &str = "processing_status";

/// Key of the dedup set
pub const DUPLICATE_CHECK_KEY: &str = "duplicate_check";

/// Key prefix of advisory counters
pub const STATS_PREFIX: &str = "stats:";

/// Lifetime of dedup set membership (30 days)
pub const DEDUP_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Lifetime of a processing-status record (24 hours)
pub const STATUS_TTL: Duration = Duration::from_secs(24 * 3600);

/// Lifetime of an advisory counter (7 days)
pub const STATS_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Current time as Unix seconds in the substrate's score domain
pub fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Score for a newly enqueued task: higher priority sorts earlier
pub fn task_score(now: f64, priority: i64) -> f64 {
    now - (priority as f64) * 1000.0
}

/// Dedup key for an article: hex digest over `id:url`
pub fn dedup_key(id: &ArticleId, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cached per-article processing status with a short TTL
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    /// Short status label, e.g. `queued_for_download`
    pub status: String,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
    /// Free-form structured details
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Priority-queue substrate shared by all pipeline stages
///
/// Implementations must make `push`, `pop_min`, and `dedup_check_and_add`
/// individually atomic; correctness of the pipeline relies only on that and
/// on idempotent state writes. `pop_min` returns only envelopes whose score
/// is due (`score <= now`); tasks scheduled for the future stay queued
/// until eligible.
#[async_trait]
pub trait QueueSubstrate: Send + Sync {
    /// Check that the substrate is reachable
    async fn health_check(&self) -> bool;

    /// Push a task onto a sorted-set queue with an explicit score
    async fn push(&self, queue: QueueName, task: &TaskEnvelope, score: f64) -> Result<()>;

    /// Pop the eligible task with the lowest score, waiting up to `timeout`
    ///
    /// Returns `None` when no eligible task appears within the timeout.
    /// Members that fail to decode are dropped with a warning.
    async fn pop_min(&self, queue: QueueName, timeout: Duration) -> Result<Option<TaskEnvelope>>;

    /// Remove a specific task from a queue; returns whether it was present
    async fn remove(&self, queue: QueueName, task: &TaskEnvelope) -> Result<bool>;

    /// Current queue length
    async fn size(&self, queue: QueueName) -> Result<u64>;

    /// Peek at up to `n` members in dispatch order without removing them
    async fn sample(&self, queue: QueueName, n: usize) -> Result<Vec<TaskEnvelope>>;

    /// Append a task to the deadletter, stamping the error and failure time
    async fn push_failed(&self, task: &TaskEnvelope, error: &str) -> Result<()>;

    /// Drop deadletter entries that failed before `cutoff`; returns the count
    async fn prune_failed(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Atomically test-and-add a dedup key
    ///
    /// Returns `true` when the key was newly added (first sighting) and
    /// `false` when it was already present. Membership expires after
    /// [`DEDUP_TTL`].
    async fn dedup_check_and_add(&self, key: &str) -> Result<bool>;

    /// Write a processing-status record for an article ([`STATUS_TTL`])
    async fn set_status(
        &self,
        id: &ArticleId,
        status: &str,
        details: serde_json::Value,
    ) -> Result<()>;

    /// Read the processing-status record for an article, if still live
    async fn get_status(&self, id: &ArticleId) -> Result<Option<ProcessingStatus>>;

    /// Bump an advisory counter ([`STATS_TTL`])
    async fn incr_counter(&self, queue: QueueName, action: CounterAction) -> Result<()>;

    /// Aggregate lengths, counters, and live processing-status count
    async fn stats(&self) -> Result<QueueStats>;
}
