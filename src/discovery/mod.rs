//! Feed discovery stage
//!
//! Polls the upstream feed service for recent articles, filters out
//! everything already seen (dedup set first, then the state store), creates
//! the article's lifecycle row, and emits a download task. Articles enter
//! the pipeline here and nowhere else.
//!
//! An id colliding with an existing row under a different URL counts as a
//! duplicate: the id wins, and operators resolve the conflict manually.

use crate::config::DiscoveryConfig;
use crate::db::{ArticleUpsert, PublisherRecord, StateStore};
use crate::error::{Error, Result};
use crate::feed::{FeedClient, NormalizedArticle, parse_publish_time};
use crate::queue::{QueueName, QueueSubstrate, dedup_key, now_secs, task_score};
use crate::types::{BatchReport, DiscoveryReport, Event, Stage, StageStatus, TaskEnvelope};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Upper bound on the force-discovery article fetch
const FORCE_DISCOVERY_LIMIT: u32 = 2000;

/// Outcome of processing one raw article
enum ArticleOutcome {
    New,
    Duplicate,
}

/// Cumulative discovery counters plus the most recent run
#[derive(Clone, Debug, Default, Serialize)]
pub struct DiscoveryTotals {
    /// Articles returned by the feed service since startup
    pub discovered: u64,
    /// Articles newly queued since startup
    pub new_articles: u64,
    /// Articles suppressed as duplicates since startup
    pub duplicates: u64,
    /// Articles that failed validation or queueing since startup
    pub errors: u64,
    /// Outcome of the most recent run
    pub last_run: Option<DiscoveryReport>,
}

/// Content discovery worker
pub struct DiscoveryEngine {
    feed: Arc<FeedClient>,
    queue: Arc<dyn QueueSubstrate>,
    store: Arc<StateStore>,
    config: DiscoveryConfig,
    event_tx: broadcast::Sender<Event>,
    totals: Mutex<DiscoveryTotals>,
}

impl DiscoveryEngine {
    /// Create the discovery engine
    pub fn new(
        feed: Arc<FeedClient>,
        queue: Arc<dyn QueueSubstrate>,
        store: Arc<StateStore>,
        config: DiscoveryConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            feed,
            queue,
            store,
            config,
            event_tx,
            totals: Mutex::new(DiscoveryTotals::default()),
        }
    }

    /// Cumulative discovery counters
    pub async fn totals(&self) -> DiscoveryTotals {
        self.totals.lock().await.clone()
    }

    /// Health of every dependency the discovery run needs
    pub async fn health(&self) -> DiscoveryHealth {
        DiscoveryHealth {
            feed: self.feed.health_check().await,
            queue: self.queue.health_check().await,
            state: self.store.health().await,
        }
    }

    /// One scheduled discovery run
    ///
    /// Aborts with [`Error::HealthDegraded`] when a dependency is down;
    /// otherwise per-article failures are counted, never fatal.
    pub async fn run_once(&self) -> Result<DiscoveryReport> {
        let start = Instant::now();
        info!("Starting content discovery");

        let health = self.health().await;
        if !health.all_up() {
            return Err(Error::HealthDegraded(health.describe()));
        }

        let _ = self.event_tx.send(Event::BatchStarted {
            stage: Stage::Discovery,
        });

        let articles = self.fetch_articles().await?;
        let report = self
            .process_articles(&articles, start)
            .await;

        if report.new_articles > 0 {
            let delta = crate::db::StatsDelta {
                discovered: report.new_articles as i64,
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
            discovered = report.discovered,
            new_articles = report.new_articles,
            duplicates = report.duplicates,
            errors = report.errors,
            duration_secs = report.duration_secs,
            "Discovery completed"
        );
        let _ = self.event_tx.send(Event::BatchEnded {
            stage: Stage::Discovery,
            report: BatchReport {
                processed: report.discovered,
                successful: report.new_articles,
                failed: report.errors,
                skipped: report.duplicates,
                duration_secs: report.duration_secs,
            },
        });

        self.record_run(&report).await;
        Ok(report)
    }

    /// Re-run discovery over a caller-chosen window
    ///
    /// Uses the same per-article pipeline with a raised article limit and
    /// no full-listing fallback.
    pub async fn force_discovery(&self, hours: u32) -> Result<DiscoveryReport> {
        let start = Instant::now();
        info!(hours = hours, "Force discovery requested");

        let articles = self
            .feed
            .recent_articles(hours, FORCE_DISCOVERY_LIMIT)
            .await?;
        let report = self.process_articles(&articles, start).await;

        info!(
            discovered = report.discovered,
            new_articles = report.new_articles,
            "Force discovery completed"
        );
        self.record_run(&report).await;
        Ok(report)
    }

    /// Fetch recent articles, falling back to the filtered full listing
    async fn fetch_articles(&self) -> Result<Vec<serde_json::Value>> {
        let recent = self
            .feed
            .recent_articles(self.config.window_hours, self.config.limit)
            .await?;
        if !recent.is_empty() {
            return Ok(recent);
        }

        info!("Recent-articles endpoint yielded nothing, falling back to full listing");
        let all = self.feed.all_articles(self.config.limit).await?;

        let cutoff = Utc::now().timestamp() - (self.config.window_hours as i64) * 3600;
        let filtered: Vec<serde_json::Value> = all
            .into_iter()
            .filter(|article| parse_publish_time(article) > cutoff)
            .collect();

        info!(count = filtered.len(), "Filtered full listing to the discovery window");
        Ok(filtered)
    }

    /// Run the per-article pipeline over a raw batch
    async fn process_articles(
        &self,
        articles: &[serde_json::Value],
        start: Instant,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport {
            discovered: articles.len() as u64,
            ..Default::default()
        };

        for raw in articles {
            match self.process_article(raw).await {
                Ok(ArticleOutcome::New) => report.new_articles += 1,
                Ok(ArticleOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(error = %e, "Failed to process article");
                    report.errors += 1;
                }
            }
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        report
    }

    /// Validate, dedup, persist, and enqueue one raw article
    async fn process_article(&self, raw: &serde_json::Value) -> Result<ArticleOutcome> {
        let article = self.feed.normalize(raw)?;

        if !self
            .queue
            .dedup_check_and_add(&dedup_key(&article.id, &article.url))
            .await?
        {
            debug!(article_id = %article.id, "Duplicate article (dedup set)");
            return Ok(ArticleOutcome::Duplicate);
        }

        if self.store.get(&article.id).await?.is_some() {
            debug!(article_id = %article.id, "Duplicate article (state row exists)");
            return Ok(ArticleOutcome::Duplicate);
        }

        self.store
            .upsert(&ArticleUpsert {
                id: article.id.clone(),
                url: article.url.clone(),
                title: article.title.clone(),
                mp_name: article.mp_name.clone(),
                mp_id: article.mp_id.clone(),
                publish_time: Some(article.publish_time),
                discovery_status: StageStatus::Processing,
            })
            .await?;

        if !article.mp_id.is_empty() {
            if let Err(e) = self
                .store
                .upsert_publisher(&PublisherRecord {
                    mp_id: article.mp_id.clone(),
                    mp_name: article.mp_name.clone(),
                    last_article_time: Some(article.publish_time),
                    ..Default::default()
                })
                .await
            {
                warn!(mp_id = %article.mp_id, error = %e, "Failed to upsert publisher");
            }
        }

        match self.enqueue_download(&article).await {
            Ok(()) => {
                self.store
                    .set_stage_status(&article.id, Stage::Discovery, StageStatus::Completed, None)
                    .await?;

                if let Err(e) = self
                    .queue
                    .set_status(
                        &article.id,
                        "queued_for_download",
                        serde_json::json!({ "discovered_at": Utc::now().to_rfc3339() }),
                    )
                    .await
                {
                    warn!(article_id = %article.id, error = %e, "Failed to set processing status");
                }

                let _ = self.event_tx.send(Event::TaskDone {
                    stage: Stage::Discovery,
                    id: article.id.clone(),
                });
                debug!(article_id = %article.id, "New article queued for download");
                Ok(ArticleOutcome::New)
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .set_stage_status(
                        &article.id,
                        Stage::Discovery,
                        StageStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                let _ = self.event_tx.send(Event::TaskFailed {
                    stage: Stage::Discovery,
                    id: article.id.clone(),
                    error: message,
                });
                Err(e)
            }
        }
    }

    async fn enqueue_download(&self, article: &NormalizedArticle) -> Result<()> {
        let task = TaskEnvelope::download_task(
            article.id.clone(),
            article.url.clone(),
            article.title.clone(),
            article.mp_name.clone(),
            article.mp_id.clone(),
            Some(article.publish_time),
            article.priority,
        );

        self.queue
            .push(
                QueueName::DownloadTasks,
                &task,
                task_score(now_secs(), task.priority),
            )
            .await
    }

    async fn record_run(&self, report: &DiscoveryReport) {
        let mut totals = self.totals.lock().await;
        totals.discovered += report.discovered;
        totals.new_articles += report.new_articles;
        totals.duplicates += report.duplicates;
        totals.errors += report.errors;
        totals.last_run = Some(report.clone());
    }
}

/// Per-dependency health of the discovery stage
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DiscoveryHealth {
    /// Upstream feed service reachable
    pub feed: bool,
    /// Queue substrate reachable
    pub queue: bool,
    /// State store reachable
    pub state: bool,
}

impl DiscoveryHealth {
    /// Whether every dependency answered
    pub fn all_up(&self) -> bool {
        self.feed && self.queue && self.state
    }

    /// Names of the dependencies that failed their checks
    pub fn describe(&self) -> String {
        let mut down = Vec::new();
        if !self.feed {
            down.push("feed");
        }
        if !self.queue {
            down.push("queue");
        }
        if !self.state {
            down.push("state");
        }
        down.join(", ")
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
