//! Worker supervision and periodic scheduling
//!
//! One supervisor owns every long-running loop of the pipeline:
//!
//! - the discovery ticker (fires immediately, then every configured
//!   interval),
//! - one batch-loop worker per queue-fed stage (download, extraction),
//! - the auto-cleanup loop (queue janitor every 30 minutes).
//!
//! Worker loops sleep their stage's interval between batches and double it
//! after an idle batch to cut idle polling. Shutdown flips the running
//! flags, cancels the shared token, and waits a bounded grace period for
//! in-flight batches; nothing is cancelled mid-task.

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::download::DownloadEngine;
use crate::extract::ExtractionEngine;
use crate::maintenance::Maintenance;
use crate::types::{Event, Stage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Interval between auto-cleanup passes
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// How long shutdown waits for in-flight batches
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Supervises all worker loops and periodic jobs
pub struct Supervisor {
    discovery: Arc<DiscoveryEngine>,
    download: Arc<DownloadEngine>,
    extraction: Arc<ExtractionEngine>,
    maintenance: Arc<Maintenance>,
    config: Config,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    discovery_running: Arc<AtomicBool>,
    download_running: Arc<AtomicBool>,
    extraction_running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor over the pipeline's engines
    pub fn new(
        discovery: Arc<DiscoveryEngine>,
        download: Arc<DownloadEngine>,
        extraction: Arc<ExtractionEngine>,
        maintenance: Arc<Maintenance>,
        config: Config,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            discovery,
            download,
            extraction,
            maintenance,
            config,
            cancel: CancellationToken::new(),
            event_tx,
            discovery_running: Arc::new(AtomicBool::new(false)),
            download_running: Arc::new(AtomicBool::new(false)),
            extraction_running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Whether a stage's worker loop is currently running
    pub fn is_running(&self, stage: Stage) -> bool {
        self.flag(stage).load(Ordering::SeqCst)
    }

    fn flag(&self, stage: Stage) -> &Arc<AtomicBool> {
        match stage {
            Stage::Discovery => &self.discovery_running,
            Stage::Download => &self.download_running,
            // The reserved storage stage has no worker; its flag aliases
            // extraction so the accessor stays total.
            Stage::Parse | Stage::Storage => &self.extraction_running,
        }
    }

    /// Start every worker loop plus the cleanup loop
    pub async fn start_all(&self) {
        self.start_worker(Stage::Discovery).await;
        self.start_worker(Stage::Download).await;
        self.start_worker(Stage::Parse).await;
        self.start_cleanup_loop().await;
    }

    /// Start a stage's worker loop; returns false when already running
    pub async fn start_worker(&self, stage: Stage) -> bool {
        let flag = self.flag(stage).clone();
        if flag.swap(true, Ordering::SeqCst) {
            warn!(stage = %stage, "Worker already running");
            return false;
        }

        let handle = match stage {
            Stage::Discovery => self.spawn_discovery_ticker(flag),
            Stage::Download => self.spawn_download_worker(flag),
            Stage::Parse | Stage::Storage => self.spawn_extraction_worker(flag),
        };
        self.handles.lock().await.push(handle);

        info!(stage = %stage, "Worker started");
        true
    }

    /// Stop a stage's worker loop after its current batch; idempotent
    pub fn stop_worker(&self, stage: Stage) -> bool {
        let was_running = self.flag(stage).swap(false, Ordering::SeqCst);
        if was_running {
            info!(stage = %stage, "Worker stopping after current batch");
        } else {
            warn!(stage = %stage, "Worker not running");
        }
        was_running
    }

    /// Start the periodic queue janitor
    pub async fn start_cleanup_loop(&self) {
        let maintenance = self.maintenance.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_secs = CLEANUP_INTERVAL.as_secs(), "Auto-cleanup loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
                }
                if let Err(e) = maintenance.run_cleanup().await {
                    error!(error = %e, "Auto-cleanup pass failed");
                }
            }
            info!("Auto-cleanup loop stopped");
        });
        self.handles.lock().await.push(handle);
    }

    /// Graceful shutdown: stop loops, wait for in-flight batches
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");

        self.discovery_running.store(false, Ordering::SeqCst);
        self.download_running.store(false, Ordering::SeqCst);
        self.extraction_running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("Worker did not finish within the shutdown grace period");
            }
        }

        let _ = self.event_tx.send(Event::Shutdown);
        info!("Supervisor stopped");
    }

    fn spawn_discovery_ticker(&self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let discovery = self.discovery.clone();
        let cancel = self.cancel.clone();
        let interval = self.config.discovery.interval;

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Discovery ticker started");

            // First run fires immediately
            loop {
                if cancel.is_cancelled() || !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = discovery.run_once().await {
                    // Dependency outages surface here; wait out the interval
                    // and try again rather than spinning.
                    error!(error = %e, "Scheduled discovery run failed");
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Discovery ticker stopped");
        })
    }

    fn spawn_download_worker(&self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let engine = self.download.clone();
        let cancel = self.cancel.clone();
        let batch_size = self.config.download.batch_size;
        let interval = self.config.download.worker_interval;

        tokio::spawn(async move {
            info!(
                batch_size = batch_size,
                interval_secs = interval.as_secs(),
                "Download worker started"
            );
            loop {
                if cancel.is_cancelled() || !running.load(Ordering::SeqCst) {
                    break;
                }

                let sleep_for = match engine.run_batch(batch_size).await {
                    // Idle batches double the sleep to cut idle polling
                    Ok(report) if report.processed == 0 => interval * 2,
                    Ok(_) => interval,
                    Err(e) => {
                        error!(error = %e, "Download batch failed");
                        interval
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            info!("Download worker stopped");
        })
    }

    fn spawn_extraction_worker(&self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let engine = self.extraction.clone();
        let cancel = self.cancel.clone();
        let batch_size = self.config.extraction.batch_size;
        let interval = self.config.extraction.worker_interval;

        tokio::spawn(async move {
            info!(
                batch_size = batch_size,
                interval_secs = interval.as_secs(),
                "Extraction worker started"
            );
            loop {
                if cancel.is_cancelled() || !running.load(Ordering::SeqCst) {
                    break;
                }

                let sleep_for = match engine.run_batch(batch_size).await {
                    Ok(report) if report.processed == 0 => interval * 2,
                    Ok(_) => interval,
                    Err(e) => {
                        error!(error = %e, "Extraction batch failed");
                        interval
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            info!("Extraction worker stopped");
        })
    }
}
