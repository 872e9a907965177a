//! HTML download stage
//!
//! Consumes download tasks, fetches the article HTML with browser-like
//! request headers, pulls up to a bounded number of inline images, writes
//! all artifacts under the storage root, records paths and metrics in the
//! state store, and emits a parse task for the extraction stage.
//!
//! Artifact writes are write-temp-then-rename, so reprocessing an id
//! atomically overwrites HTML, images, and metadata. Parse-task pushes are
//! not deduplicated here; the extraction stage tolerates duplicates.
//!
//! Inline images are found with a tolerant regex rather than a DOM parse.
//! That matches upstream markup well enough in practice but can miss or
//! mangle exotic attribute quoting; a DOM-aware pass is a known possible
//! enhancement.

use crate::config::{DownloadConfig, StorageConfig};
use crate::db::{DownloadArtifacts, StateStore};
use crate::error::{DownloadError, Error, Result, RetryDisposition};
use crate::queue::{CounterAction, QueueName, QueueSubstrate, now_secs, task_score};
use crate::retry::retry_score;
use crate::types::{BatchReport, Event, Stage, StageStatus, TaskEnvelope, WorkerTotals};
use crate::utils::write_atomic;
use chrono::Utc;
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// How long one pop waits before the batch ends early
const POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Tolerant `<img src>` matcher; see the module notes on its limits
const IMG_SRC_PATTERN: &str = r#"(?i)<img[^>]+src=["']([^"']+)["']"#;

/// One successfully downloaded inline image
#[derive(Clone, Debug, Serialize)]
pub struct ImageRecord {
    /// Source URL of the image
    pub url: String,
    /// Where the image was written
    pub file_path: PathBuf,
    /// File name within the article's image directory
    pub filename: String,
    /// Size in bytes
    pub size: u64,
}

/// One inline image that could not be downloaded
#[derive(Clone, Debug, Serialize)]
pub struct FailedImage {
    /// Source URL of the image
    pub url: String,
    /// Why the download failed
    pub error: String,
}

struct HtmlFetch {
    content: String,
    encoding: &'static str,
    byte_size: usize,
}

struct ImagesOutcome {
    images_dir: PathBuf,
    downloaded: Vec<ImageRecord>,
    failed: Vec<FailedImage>,
}

/// Article download worker
pub struct DownloadEngine {
    queue: Arc<dyn QueueSubstrate>,
    store: Arc<StateStore>,
    storage: StorageConfig,
    config: DownloadConfig,
    http_client: reqwest::Client,
    img_src: Regex,
    event_tx: broadcast::Sender<Event>,
    totals: Mutex<WorkerTotals>,
}

impl DownloadEngine {
    /// Create the download engine
    pub fn new(
        queue: Arc<dyn QueueSubstrate>,
        store: Arc<StateStore>,
        storage: StorageConfig,
        config: DownloadConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self> {
        use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let http_client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
            )
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let img_src = Regex::new(IMG_SRC_PATTERN)
            .map_err(|e| Error::Other(format!("Invalid image pattern: {}", e)))?;

        Ok(Self {
            queue,
            store,
            storage,
            config,
            http_client,
            img_src,
            event_tx,
            totals: Mutex::new(WorkerTotals::default()),
        })
    }

    /// Cumulative worker counters
    pub async fn totals(&self) -> WorkerTotals {
        self.totals.lock().await.clone()
    }

    /// Process up to `max` download tasks
    ///
    /// Ends early when the queue yields nothing within the pop timeout.
    /// Per-task failures are absorbed into the report; only a down
    /// dependency aborts the batch.
    pub async fn run_batch(&self, max: usize) -> Result<BatchReport> {
        let start = Instant::now();
        let mut report = BatchReport::default();
        let mut bytes_downloaded: i64 = 0;

        let _ = self.event_tx.send(Event::BatchStarted {
            stage: Stage::Download,
        });
        info!(max_tasks = max, "Starting download batch");

        for _ in 0..max {
            let task = match self.queue.pop_min(QueueName::DownloadTasks, POP_TIMEOUT).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    debug!("No more download tasks available");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Download queue unavailable, aborting batch");
                    return Err(e);
                }
            };

            report.processed += 1;

            match self.process_task(&task).await {
                Ok(html_size) => {
                    report.successful += 1;
                    bytes_downloaded += html_size as i64;
                    let _ = self.event_tx.send(Event::TaskDone {
                        stage: Stage::Download,
                        id: task.id.clone(),
                    });
                }
                Err(e) if e.is_dependency_down() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    let _ = self.event_tx.send(Event::TaskFailed {
                        stage: Stage::Download,
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
                downloaded: report.successful as i64,
                content_size: bytes_downloaded,
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
            "Download batch completed"
        );
        let _ = self.event_tx.send(Event::BatchEnded {
            stage: Stage::Download,
            report: report.clone(),
        });

        Ok(report)
    }

    /// Download one article; returns the HTML size in bytes
    async fn process_task(&self, task: &TaskEnvelope) -> Result<usize> {
        let id = &task.id;
        if task.url.is_empty() {
            return Err(Error::Download(DownloadError::InvalidTask(
                "task has no url".into(),
            )));
        }

        info!(article_id = %id, url = %task.url, "Downloading article");

        let fetch = self.fetch_html(&task.url).await?;
        let html_path = self.storage.html_path(id.as_str());
        write_atomic(&html_path, fetch.content.as_bytes()).await?;

        let images = self.download_images(&fetch.content, id.as_str()).await;

        let metadata_path = self.storage.metadata_path(id.as_str());
        let manifest = self.build_manifest(task, &fetch, &html_path, &images);
        write_atomic(&metadata_path, &serde_json::to_vec_pretty(&manifest)?).await?;

        self.store
            .set_paths(
                id,
                &DownloadArtifacts {
                    html_file_path: Some(html_path.to_string_lossy().into_owned()),
                    images_dir_path: Some(images.images_dir.to_string_lossy().into_owned()),
                    metadata_file_path: Some(metadata_path.to_string_lossy().into_owned()),
                    content_length: Some(fetch.content.chars().count() as i64),
                    image_count: Some(images.downloaded.len() as i64),
                },
            )
            .await?;
        self.store
            .set_stage_status(id, Stage::Download, StageStatus::Completed, None)
            .await?;

        let parse_task = TaskEnvelope::parse_task(task, html_path);
        self.queue
            .push(
                QueueName::ParseTasks,
                &parse_task,
                task_score(now_secs(), parse_task.priority),
            )
            .await?;

        if let Err(e) = self
            .queue
            .set_status(
                id,
                "queued_for_parse",
                serde_json::json!({ "downloaded_at": Utc::now().to_rfc3339() }),
            )
            .await
        {
            warn!(article_id = %id, error = %e, "Failed to set processing status");
        }

        debug!(
            article_id = %id,
            html_bytes = fetch.byte_size,
            images = images.downloaded.len(),
            "Article downloaded"
        );
        Ok(fetch.byte_size)
    }

    /// Fetch and decode the article HTML
    async fn fetch_html(&self, url: &str) -> Result<HtmlFetch> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(Error::Download(DownloadError::HttpStatus {
                status,
                url: url.to_string(),
            }));
        }

        let declared = charset_of(&response);
        let bytes = response.bytes().await?;

        // Servers that omit a charset default to iso-8859-1, which is almost
        // always wrong for this corpus; treat it as utf-8.
        let encoding = match declared.as_deref() {
            None => UTF_8,
            Some(label) if label.eq_ignore_ascii_case("iso-8859-1") => UTF_8,
            Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8),
        };

        let (content, actual, had_errors) = encoding.decode(&bytes);
        if had_errors {
            debug!(url = %url, encoding = actual.name(), "HTML decoded with replacement characters");
        }

        Ok(HtmlFetch {
            content: content.into_owned(),
            encoding: actual.name(),
            byte_size: bytes.len(),
        })
    }

    /// Extract `<img src>` URLs and download a bounded number of them
    ///
    /// Per-image failures are recorded and never fail the task. Root-relative
    /// and schemeless sources are skipped (there is no base URL to resolve
    /// against); protocol-relative sources are promoted to https.
    async fn download_images(&self, html: &str, id: &str) -> ImagesOutcome {
        let images_dir = self.storage.images_path(id);
        let mut outcome = ImagesOutcome {
            images_dir,
            downloaded: Vec::new(),
            failed: Vec::new(),
        };

        let sources: Vec<String> = self
            .img_src
            .captures_iter(html)
            .take(self.config.max_images)
            .map(|c| c[1].to_string())
            .collect();

        for (index, source) in sources.into_iter().enumerate() {
            let img_url = if let Some(rest) = source.strip_prefix("//") {
                format!("https://{rest}")
            } else if source.starts_with('/') {
                // Root-relative; no base URL to resolve against
                continue;
            } else if source.starts_with("http://") || source.starts_with("https://") {
                source
            } else {
                continue;
            };

            let extension = image_extension(&img_url);
            let filename = format!("image_{index:02}{extension}");
            let file_path = outcome.images_dir.join(&filename);

            match self.fetch_image(&img_url, &file_path).await {
                Ok(size) => {
                    debug!(article_id = id, filename = %filename, "Downloaded image");
                    outcome.downloaded.push(ImageRecord {
                        url: img_url,
                        file_path,
                        filename,
                        size,
                    });
                }
                Err(e) => {
                    warn!(article_id = id, url = %img_url, error = %e, "Failed to download image");
                    outcome.failed.push(FailedImage {
                        url: img_url,
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome
    }

    /// Fetch one image to disk; returns its size in bytes
    async fn fetch_image(&self, url: &str, path: &std::path::Path) -> Result<u64> {
        let response = self
            .http_client
            .get(url)
            .timeout(self.config.image_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(Error::Download(DownloadError::HttpStatus {
                status,
                url: url.to_string(),
            }));
        }

        let bytes = response.bytes().await?;
        write_atomic(path, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    /// Assemble the metadata manifest for an article
    fn build_manifest(
        &self,
        task: &TaskEnvelope,
        fetch: &HtmlFetch,
        html_path: &std::path::Path,
        images: &ImagesOutcome,
    ) -> serde_json::Value {
        serde_json::json!({
            "article_id": task.id,
            "title": task.title,
            "url": task.url,
            "mp_name": task.mp_name,
            "mp_id": task.mp_id,
            "publish_time": task.publish_time,
            "download_info": {
                "downloaded_at": Utc::now().to_rfc3339(),
                "html_file": html_path.to_string_lossy(),
                "html_size": fetch.byte_size,
                "html_encoding": fetch.encoding,
                "images_dir": images.images_dir.to_string_lossy(),
                "image_count": images.downloaded.len(),
                "images_failed": images.failed.len(),
            },
            "images": images.downloaded,
            "failed_images": images.failed,
        })
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
            if let Err(e) = self
                .queue
                .push(QueueName::DownloadTasks, &retried, score)
                .await
            {
                warn!(article_id = %task.id, error = %e, "Failed to requeue download task");
            } else {
                info!(
                    article_id = %task.id,
                    retry = retried.retry_count,
                    max_retries = retry_budget,
                    error = %message,
                    "Download task requeued with backoff"
                );
            }

            if let Err(e) = self
                .store
                .set_stage_status(
                    &task.id,
                    Stage::Download,
                    StageStatus::Processing,
                    Some(&message),
                )
                .await
            {
                warn!(article_id = %task.id, error = %e, "Failed to record retry state");
            }
            return;
        }

        // Retries exhausted: deadletter and mark the stage failed
        if let Err(e) = self.queue.push_failed(task, &message).await {
            warn!(article_id = %task.id, error = %e, "Failed to deadletter download task");
        }
        if let Err(e) = self
            .queue
            .incr_counter(QueueName::DownloadTasks, CounterAction::Failed)
            .await
        {
            warn!(article_id = %task.id, error = %e, "Failed to update failure counter");
        }
        if let Err(e) = self
            .store
            .set_stage_status(&task.id, Stage::Download, StageStatus::Failed, Some(&message))
            .await
        {
            warn!(article_id = %task.id, error = %e, "Failed to record failed state");
        }

        tracing::error!(article_id = %task.id, error = %message, "Download permanently failed");
    }
}

/// Charset parameter of the Content-Type header, if declared
fn charset_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_string())
}

/// File extension for an image URL: taken from the path, default `.jpg`
fn image_extension(img_url: &str) -> String {
    let path = url::Url::parse(img_url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    match std::path::Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some(ext) if !ext.is_empty() && ext.len() <= 5 => format!(".{ext}"),
        _ => ".jpg".to_string(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
