//! State store for genesis-connector
//!
//! Handles SQLite persistence for the per-article lifecycle row, daily
//! processing statistics, and the publisher registry.
//!
//! ## Submodules
//!
//! Methods on [`StateStore`] are organized by domain:
//! - [`migrations`] — store lifecycle, schema migrations
//! - [`articles`] — article row CRUD and stage-status transitions
//! - [`stats`] — daily processing statistics
//! - [`publishers`] — publisher registry

use crate::types::{Stage, StageStatus};
use sqlx::{FromRow, sqlite::SqlitePool};

mod articles;
mod migrations;
mod publishers;
mod stats;

pub use articles::{ArticleUpsert, DownloadArtifacts};
pub use stats::StatsDelta;

/// Article lifecycle row
///
/// One row per article, created at discovery and mutated only by the stage
/// that currently owns it. Stage statuses are stored as their string forms
/// (`pending`/`processing`/`completed`/`failed`); timestamps are Unix
/// seconds.
#[derive(Debug, Clone, FromRow)]
pub struct ArticleRow {
    /// Article id (primary key)
    pub id: String,
    /// Article URL
    pub url: String,
    /// Article title
    pub title: Option<String>,
    /// Publisher display name
    pub mp_name: Option<String>,
    /// Publisher id
    pub mp_id: Option<String>,
    /// Publish time as Unix seconds
    pub publish_time: Option<i64>,
    /// Discovery stage status
    pub discovery_status: String,
    /// Download stage status
    pub download_status: String,
    /// Parse stage status
    pub parse_status: String,
    /// Storage stage status (reserved)
    pub storage_status: String,
    /// HTML artifact path
    pub html_file_path: Option<String>,
    /// Extracted-text artifact path
    pub content_file_path: Option<String>,
    /// Metadata manifest path
    pub metadata_file_path: Option<String>,
    /// Per-article image directory
    pub images_dir_path: Option<String>,
    /// Size of the downloaded HTML in characters
    pub content_length: Option<i64>,
    /// Word count of the extracted text
    pub word_count: Option<i64>,
    /// Number of images downloaded
    pub image_count: i64,
    /// Last error message recorded for this article
    pub error_message: Option<String>,
    /// Structured error details as JSON
    pub error_details: Option<String>,
    /// Cumulative retry count across stages
    pub retry_count: i64,
    /// Unix timestamp of the last retry
    pub last_retry_at: Option<i64>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Unix timestamp when discovery completed
    pub discovered_at: Option<i64>,
    /// Unix timestamp when download completed
    pub downloaded_at: Option<i64>,
    /// Unix timestamp when extraction completed
    pub parsed_at: Option<i64>,
    /// Unix timestamp when storage completed
    pub stored_at: Option<i64>,
}

impl ArticleRow {
    /// Parsed status of one stage
    pub fn status(&self, stage: Stage) -> StageStatus {
        let raw = match stage {
            Stage::Discovery => &self.discovery_status,
            Stage::Download => &self.download_status,
            Stage::Parse => &self.parse_status,
            Stage::Storage => &self.storage_status,
        };
        StageStatus::from_str_lossy(raw)
    }
}

/// Daily processing statistics row, keyed by `YYYY-MM-DD`
#[derive(Debug, Clone, FromRow)]
pub struct DailyStatsRow {
    /// Date in `YYYY-MM-DD` form (primary key)
    pub date: String,
    /// Articles newly discovered on this day
    pub discovered_count: i64,
    /// Articles downloaded on this day
    pub downloaded_count: i64,
    /// Articles parsed on this day
    pub parsed_count: i64,
    /// Articles stored on this day (reserved)
    pub stored_count: i64,
    /// Tasks deadlettered on this day
    pub failed_count: i64,
    /// Total bytes of HTML downloaded
    pub total_content_size: i64,
    /// Total words extracted
    pub total_word_count: i64,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// Publisher registry row
#[derive(Debug, Clone, FromRow)]
pub struct PublisherRow {
    /// Publisher id (primary key)
    pub mp_id: String,
    /// Publisher display name
    pub mp_name: String,
    /// Publisher nickname
    pub nickname: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Total articles seen from this publisher
    pub total_articles: i64,
    /// Articles fully processed from this publisher
    pub processed_articles: i64,
    /// Publish time of the newest article seen, Unix seconds
    pub last_article_time: Option<i64>,
    /// Whether the publisher is active (0 = inactive, 1 = active)
    pub is_active: i64,
    /// Default dispatch priority for this publisher's articles
    pub priority: i64,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// Fields for creating or refreshing a publisher row
#[derive(Debug, Clone, Default)]
pub struct PublisherRecord {
    /// Publisher id
    pub mp_id: String,
    /// Publisher display name
    pub mp_name: String,
    /// Publisher nickname
    pub nickname: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Publish time of the newest article seen, Unix seconds
    pub last_article_time: Option<i64>,
}

/// State store handle
pub struct StateStore {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
