//! Daily processing statistics.

use crate::error::StateError;
use crate::{Error, Result};

use super::{DailyStatsRow, StateStore};

/// Additive deltas applied to one day's statistics row
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsDelta {
    /// Newly discovered articles
    pub discovered: i64,
    /// Downloaded articles
    pub downloaded: i64,
    /// Parsed articles
    pub parsed: i64,
    /// Stored articles (reserved)
    pub stored: i64,
    /// Deadlettered tasks
    pub failed: i64,
    /// Bytes of HTML downloaded
    pub content_size: i64,
    /// Words extracted
    pub word_count: i64,
}

impl StateStore {
    /// Apply additive deltas to the statistics row for `date` (`YYYY-MM-DD`)
    pub async fn update_daily_stats(&self, date: &str, delta: &StatsDelta) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO processing_stats (
                date, discovered_count, downloaded_count, parsed_count,
                stored_count, failed_count, total_content_size, total_word_count,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                discovered_count = discovered_count + excluded.discovered_count,
                downloaded_count = downloaded_count + excluded.downloaded_count,
                parsed_count = parsed_count + excluded.parsed_count,
                stored_count = stored_count + excluded.stored_count,
                failed_count = failed_count + excluded.failed_count,
                total_content_size = total_content_size + excluded.total_content_size,
                total_word_count = total_word_count + excluded.total_word_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(date)
        .bind(delta.discovered)
        .bind(delta.downloaded)
        .bind(delta.parsed)
        .bind(delta.stored)
        .bind(delta.failed)
        .bind(delta.content_size)
        .bind(delta.word_count)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to update daily stats: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get the statistics row for `date`, if any
    pub async fn get_daily_stats(&self, date: &str) -> Result<Option<DailyStatsRow>> {
        let row = sqlx::query_as::<_, DailyStatsRow>(
            r#"
            SELECT date, discovered_count, downloaded_count, parsed_count,
                   stored_count, failed_count, total_content_size, total_word_count,
                   created_at, updated_at
            FROM processing_stats WHERE date = ?
            "#,
        )
        .bind(date)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            Error::State(StateError::QueryFailed(format!(
                "Failed to get daily stats: {}",
                e
            )))
        })?;

        Ok(row)
    }
}
