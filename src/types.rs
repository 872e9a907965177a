//! Core types for genesis-connector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Unique identifier for an article
///
/// Article ids come from the upstream feed (entry id or guid) or are
/// synthesized from the article link. Every task envelope, state row, and
/// on-disk artifact is keyed by this id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ArticleId(pub String);

impl ArticleId {
    /// Create a new ArticleId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ArticleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ArticleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ArticleId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ArticleId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ArticleId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Pipeline stage an article moves through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Feed discovery
    Discovery,
    /// HTML and image download
    Download,
    /// Text extraction
    Parse,
    /// Long-term storage (reserved)
    Storage,
}

impl Stage {
    /// Column name of this stage's status field in the state store
    pub fn status_column(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery_status",
            Stage::Download => "download_status",
            Stage::Parse => "parse_status",
            Stage::Storage => "storage_status",
        }
    }

    /// Column name of the timestamp stamped when this stage completes
    pub fn timestamp_column(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovered_at",
            Stage::Download => "downloaded_at",
            Stage::Parse => "parsed_at",
            Stage::Storage => "stored_at",
        }
    }

    /// Short stage name used in logs and the status surface
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Download => "download",
            Stage::Parse => "parse",
            Stage::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage processing status of an article
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not yet picked up by the stage
    #[default]
    Pending,
    /// Currently owned by a worker of the stage
    Processing,
    /// Stage finished successfully
    Completed,
    /// Stage exhausted its retries
    Failed,
}

impl StageStatus {
    /// Stable string form stored in the state store
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Parse the stored string form; unknown values read as Pending
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "processing" => StageStatus::Processing,
            "completed" => StageStatus::Completed,
            "failed" => StageStatus::Failed,
            _ => StageStatus::Pending,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a task envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Emitted by the discovery engine into the download queue
    Discovery,
    /// Emitted by the download engine into the parse queue
    Download,
    /// Synthesized by the extraction engine's filesystem scan
    FileDiscovery,
}

impl TaskSource {
    /// Short form used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Discovery => "discovery",
            TaskSource::Download => "download",
            TaskSource::FileDiscovery => "file_discovery",
        }
    }
}

/// Serialized work item placed in a queue
///
/// The envelope carries everything a downstream stage needs; stages never
/// pass live objects across boundaries, only ids and paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskEnvelope {
    /// Article id the task refers to
    pub id: ArticleId,
    /// Article URL (empty for parse tasks synthesized from disk)
    #[serde(default)]
    pub url: String,
    /// Article title
    #[serde(default)]
    pub title: String,
    /// Publisher display name
    #[serde(default)]
    pub mp_name: String,
    /// Publisher id
    #[serde(default)]
    pub mp_id: String,
    /// Publish time as Unix seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<i64>,
    /// Dispatch priority (higher sorts earlier)
    #[serde(default)]
    pub priority: i64,
    /// Number of times this task has been retried
    #[serde(default)]
    pub retry_count: u32,
    /// Creation time of the envelope
    pub created_at: DateTime<Utc>,
    /// Which component produced the envelope
    pub source: TaskSource,
    /// HTML artifact path, carried by downstream (parse) tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_file_path: Option<PathBuf>,
    /// Last error recorded for this task, set on deadletter entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the task was moved to the deadletter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    /// Build a fresh download task for a newly discovered article
    pub fn download_task(
        id: ArticleId,
        url: impl Into<String>,
        title: impl Into<String>,
        mp_name: impl Into<String>,
        mp_id: impl Into<String>,
        publish_time: Option<i64>,
        priority: i64,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            title: title.into(),
            mp_name: mp_name.into(),
            mp_id: mp_id.into(),
            publish_time,
            priority,
            retry_count: 0,
            created_at: Utc::now(),
            source: TaskSource::Discovery,
            html_file_path: None,
            error_message: None,
            failed_at: None,
        }
    }

    /// Build a parse task from a completed download
    pub fn parse_task(download: &TaskEnvelope, html_file_path: PathBuf) -> Self {
        Self {
            id: download.id.clone(),
            url: download.url.clone(),
            title: download.title.clone(),
            mp_name: download.mp_name.clone(),
            mp_id: download.mp_id.clone(),
            publish_time: download.publish_time,
            priority: download.priority,
            retry_count: 0,
            created_at: Utc::now(),
            source: TaskSource::Download,
            html_file_path: Some(html_file_path),
            error_message: None,
            failed_at: None,
        }
    }
}

/// Result counts for one discovery run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DiscoveryReport {
    /// Articles returned by the feed service
    pub discovered: u64,
    /// Articles seen for the first time and queued for download
    pub new_articles: u64,
    /// Articles suppressed by the dedup set or an existing state row
    pub duplicates: u64,
    /// Articles that failed validation or queueing
    pub errors: u64,
    /// Wall-clock duration of the run in seconds
    pub duration_secs: f64,
}

/// Result counts for one worker batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchReport {
    /// Tasks popped from the queue (or synthesized from disk)
    pub processed: u64,
    /// Tasks that completed their stage
    pub successful: u64,
    /// Tasks that failed (retried or deadlettered)
    pub failed: u64,
    /// Tasks skipped (artifact already present)
    pub skipped: u64,
    /// Wall-clock duration of the batch in seconds
    pub duration_secs: f64,
}

/// Cumulative worker counters plus the most recent batch outcome
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkerTotals {
    /// Tasks processed since startup
    pub processed: u64,
    /// Tasks completed since startup
    pub successful: u64,
    /// Tasks failed since startup
    pub failed: u64,
    /// Tasks skipped since startup
    pub skipped: u64,
    /// Outcome of the most recent batch
    pub last_run: Option<BatchReport>,
}

impl WorkerTotals {
    /// Fold one batch outcome into the running totals
    pub fn absorb(&mut self, report: &BatchReport) {
        self.processed += report.processed;
        self.successful += report.successful;
        self.failed += report.failed;
        self.skipped += report.skipped;
        self.last_run = Some(report.clone());
    }
}

/// Aggregate queue statistics from the substrate
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Current length per queue
    pub lengths: BTreeMap<String, u64>,
    /// Advisory counters keyed `{queue}:{action}`
    pub counters: BTreeMap<String, u64>,
    /// Number of articles with a live processing-status record
    pub current_processing: u64,
}

/// Event emitted by worker loops
///
/// Supervised stages publish their lifecycle on a broadcast channel so
/// external observers can follow progress without inverting control.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker started a batch
    BatchStarted {
        /// Stage the batch belongs to
        stage: Stage,
    },

    /// A task finished its stage successfully
    TaskDone {
        /// Stage the task belongs to
        stage: Stage,
        /// Article id
        id: ArticleId,
    },

    /// A task failed (it may have been requeued or deadlettered)
    TaskFailed {
        /// Stage the task belongs to
        stage: Stage,
        /// Article id
        id: ArticleId,
        /// Error message recorded for the task
        error: String,
    },

    /// A worker finished a batch
    BatchEnded {
        /// Stage the batch belongs to
        stage: Stage,
        /// Outcome counts for the batch
        report: BatchReport,
    },

    /// The pipeline is shutting down
    Shutdown,
}
