//! Pipeline facade
//!
//! [`ContentPipeline`] wires the queue substrate, state store, feed client,
//! the three stage engines, maintenance, and the supervisor into one
//! injectable object with an explicit lifecycle: construct at startup,
//! `start()` the loops, `shutdown()` on exit. There is no hidden global;
//! everything shared is passed in and reference-counted.
//!
//! Stages are coupled only through article ids: the queue substrate, the
//! state store, and the id-keyed filesystem are the only shared structures.

use crate::config::Config;
use crate::db::StateStore;
use crate::discovery::DiscoveryEngine;
use crate::download::DownloadEngine;
use crate::error::Result;
use crate::extract::ExtractionEngine;
use crate::feed::FeedClient;
use crate::maintenance::Maintenance;
use crate::queue::{QueueSubstrate, RedisQueue};
use crate::supervisor::Supervisor;
use crate::types::{Event, QueueStats, Stage};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The assembled content pipeline
pub struct ContentPipeline {
    config: Config,
    queue: Arc<dyn QueueSubstrate>,
    store: Arc<StateStore>,
    feed: Arc<FeedClient>,
    discovery: Arc<DiscoveryEngine>,
    download: Arc<DownloadEngine>,
    extraction: Arc<ExtractionEngine>,
    maintenance: Arc<Maintenance>,
    supervisor: Supervisor,
    event_tx: broadcast::Sender<Event>,
}

impl ContentPipeline {
    /// Assemble the pipeline against the configured Redis substrate
    pub async fn new(config: Config) -> Result<Self> {
        let queue: Arc<dyn QueueSubstrate> =
            Arc::new(RedisQueue::connect(&config.queue.url).await?);
        Self::with_queue(config, queue).await
    }

    /// Assemble the pipeline over a caller-provided queue substrate
    ///
    /// Used by embedded deployments and the test suite, typically with a
    /// [`MemoryQueue`](crate::queue::MemoryQueue).
    pub async fn with_queue(config: Config, queue: Arc<dyn QueueSubstrate>) -> Result<Self> {
        let store = Arc::new(StateStore::new(&config.state.path).await?);
        let feed = Arc::new(FeedClient::new(&config.feed)?);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let discovery = Arc::new(DiscoveryEngine::new(
            feed.clone(),
            queue.clone(),
            store.clone(),
            config.discovery.clone(),
            event_tx.clone(),
        ));
        let download = Arc::new(DownloadEngine::new(
            queue.clone(),
            store.clone(),
            config.storage.clone(),
            config.download.clone(),
            event_tx.clone(),
        )?);
        let extraction = Arc::new(ExtractionEngine::new(
            queue.clone(),
            store.clone(),
            config.storage.clone(),
            config.extraction.clone(),
            event_tx.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(
            queue.clone(),
            config.storage.clone(),
            extraction.clone(),
        ));
        let supervisor = Supervisor::new(
            discovery.clone(),
            download.clone(),
            extraction.clone(),
            maintenance.clone(),
            config.clone(),
            event_tx.clone(),
        );

        info!("Content pipeline assembled");

        Ok(Self {
            config,
            queue,
            store,
            feed,
            discovery,
            download,
            extraction,
            maintenance,
            supervisor,
            event_tx,
        })
    }

    /// Create the storage layout and start every supervised loop
    pub async fn start(&self) -> Result<()> {
        for dir in [
            self.config.storage.html_dir(),
            self.config.storage.images_dir(),
            self.config.storage.metadata_dir(),
            self.config.storage.text_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        self.supervisor.start_all().await;
        info!("Content pipeline started");
        Ok(())
    }

    /// Graceful shutdown: stop loops, drain batches, close the store
    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.shutdown().await;
        self.store.close().await;
        info!("Content pipeline stopped");
        Ok(())
    }

    /// Subscribe to worker lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The pipeline's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The queue substrate
    pub fn queue(&self) -> &Arc<dyn QueueSubstrate> {
        &self.queue
    }

    /// The state store
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The upstream feed client
    pub fn feed(&self) -> &Arc<FeedClient> {
        &self.feed
    }

    /// The discovery engine
    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    /// The download engine
    pub fn download(&self) -> &Arc<DownloadEngine> {
        &self.download
    }

    /// The extraction engine
    pub fn extraction(&self) -> &Arc<ExtractionEngine> {
        &self.extraction
    }

    /// The maintenance runner
    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    /// The supervisor
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Aggregate queue statistics
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Health of one stage's prerequisites
    pub async fn stage_health(&self, stage: Stage) -> StageHealth {
        let queue = self.queue.health_check().await;
        let state = self.store.health().await;
        let storage = self.config.storage.base_path.exists();
        let feed = match stage {
            Stage::Discovery => Some(self.feed.health_check().await),
            _ => None,
        };

        StageHealth {
            queue,
            state,
            storage,
            feed,
        }
    }
}

/// Health of the shared dependencies as seen by one stage
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct StageHealth {
    /// Queue substrate reachable
    pub queue: bool,
    /// State store reachable
    pub state: bool,
    /// Storage root present
    pub storage: bool,
    /// Feed service reachable (discovery stage only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<bool>,
}

impl StageHealth {
    /// Whether every checked prerequisite is up
    pub fn healthy(&self) -> bool {
        self.queue && self.state && self.storage && self.feed.unwrap_or(true)
    }
}
