//! In-process queue substrate
//!
//! Backs the substrate contract with plain collections behind a mutex.
//! Used by the test suite and by embedded single-process deployments where
//! running a separate queue server is not worth the operational cost.
//!
//! TTLs are honored lazily: expiry instants are stored alongside dedup
//! members and status records and checked on read.

use super::{
    CounterAction, DEDUP_TTL, ProcessingStatus, QueueName, QueueSubstrate, STATUS_TTL, now_secs,
};
use crate::error::Result;
use crate::types::{ArticleId, QueueStats, TaskEnvelope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sleep between eligibility scans while waiting for a task
const POP_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Inner {
    /// Scored members per sorted queue, unordered; scans find the minimum
    queues: HashMap<QueueName, Vec<(f64, String)>>,
    /// Deadletter entries, newest first
    failed: Vec<String>,
    /// Dedup members with their expiry instants
    dedup: HashMap<String, Instant>,
    /// Status records keyed by article id, with expiry instants
    status: HashMap<String, (String, Instant)>,
    /// Advisory counters keyed `{queue}:{action}`
    counters: HashMap<String, u64>,
}

/// Queue substrate held entirely in process memory
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    /// Create an empty substrate
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueSubstrate for MemoryQueue {
    async fn health_check(&self) -> bool {
        true
    }

    async fn push(&self, queue: QueueName, task: &TaskEnvelope, score: f64) -> Result<()> {
        let payload = serde_json::to_string(task)?;
        let mut inner = self.inner.lock().await;
        inner.queues.entry(queue).or_default().push((score, payload));

        debug!(queue = %queue, article_id = %task.id, score = score, "Task pushed");
        *inner
            .counters
            .entry(format!("{}:{}", queue, CounterAction::Added.as_str()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn pop_min(&self, queue: QueueName, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut inner = self.inner.lock().await;
                let now = now_secs();

                // Repeatedly take the eligible minimum; malformed members are
                // dropped so they cannot wedge the queue.
                loop {
                    let min_index = inner
                        .queues
                        .get(&queue)
                        .and_then(|members| {
                            members
                                .iter()
                                .enumerate()
                                .filter(|(_, (score, _))| *score <= now)
                                .min_by(|a, b| {
                                    a.1.0.partial_cmp(&b.1.0).unwrap_or(std::cmp::Ordering::Equal)
                                })
                                .map(|(i, _)| i)
                        });

                    let Some(index) = min_index else { break };
                    let (_, payload) = inner
                        .queues
                        .get_mut(&queue)
                        .map(|members| members.swap_remove(index))
                        .unwrap_or((0.0, String::new()));

                    match serde_json::from_str::<TaskEnvelope>(&payload) {
                        Ok(task) => {
                            debug!(queue = %queue, article_id = %task.id, "Task popped");
                            *inner
                                .counters
                                .entry(format!(
                                    "{}:{}",
                                    queue,
                                    CounterAction::Processed.as_str()
                                ))
                                .or_insert(0) += 1;
                            return Ok(Some(task));
                        }
                        Err(e) => {
                            warn!(queue = %queue, error = %e, "Dropping malformed queue member");
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL).await;
        }
    }

    async fn remove(&self, queue: QueueName, task: &TaskEnvelope) -> Result<bool> {
        let payload = serde_json::to_string(task)?;
        let mut inner = self.inner.lock().await;

        if queue == QueueName::FailedTasks {
            let before = inner.failed.len();
            inner.failed.retain(|m| *m != payload);
            return Ok(inner.failed.len() < before);
        }

        let Some(members) = inner.queues.get_mut(&queue) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|(_, m)| *m != payload);
        Ok(members.len() < before)
    }

    async fn size(&self, queue: QueueName) -> Result<u64> {
        let inner = self.inner.lock().await;
        let len = if queue == QueueName::FailedTasks {
            inner.failed.len()
        } else {
            inner.queues.get(&queue).map(Vec::len).unwrap_or(0)
        };
        Ok(len as u64)
    }

    async fn sample(&self, queue: QueueName, n: usize) -> Result<Vec<TaskEnvelope>> {
        let inner = self.inner.lock().await;

        if queue == QueueName::FailedTasks {
            return Ok(inner
                .failed
                .iter()
                .take(n)
                .filter_map(|m| serde_json::from_str(m).ok())
                .collect());
        }

        let mut members: Vec<(f64, String)> =
            inner.queues.get(&queue).cloned().unwrap_or_default();
        members.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(members
            .into_iter()
            .take(n)
            .filter_map(|(_, m)| serde_json::from_str(&m).ok())
            .collect())
    }

    async fn push_failed(&self, task: &TaskEnvelope, error: &str) -> Result<()> {
        let mut entry = task.clone();
        entry.error_message = Some(error.to_string());
        entry.failed_at = Some(Utc::now());

        let payload = serde_json::to_string(&entry)?;
        let mut inner = self.inner.lock().await;
        inner.failed.insert(0, payload);

        debug!(article_id = %task.id, error = error, "Task deadlettered");
        *inner
            .counters
            .entry(format!(
                "{}:{}",
                QueueName::FailedTasks,
                CounterAction::Added.as_str()
            ))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn prune_failed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.failed.len();

        inner.failed.retain(|member| {
            match serde_json::from_str::<TaskEnvelope>(member) {
                Ok(entry) => entry.failed_at.map(|at| at >= cutoff).unwrap_or(false),
                // Malformed deadletter entries are pruned too
                Err(_) => false,
            }
        });

        Ok((before - inner.failed.len()) as u64)
    }

    async fn dedup_check_and_add(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.dedup.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                inner.dedup.insert(key.to_string(), now + DEDUP_TTL);
                Ok(true)
            }
        }
    }

    async fn set_status(
        &self,
        id: &ArticleId,
        status: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        let record = ProcessingStatus {
            status: status.to_string(),
            updated_at: Utc::now(),
            details,
        };
        let payload = serde_json::to_string(&record)?;

        let mut inner = self.inner.lock().await;
        inner
            .status
            .insert(id.to_string(), (payload, Instant::now() + STATUS_TTL));
        Ok(())
    }

    async fn get_status(&self, id: &ArticleId) -> Result<Option<ProcessingStatus>> {
        let inner = self.inner.lock().await;
        match inner.status.get(id.as_str()) {
            Some((payload, expiry)) if *expiry > Instant::now() => {
                Ok(Some(serde_json::from_str(payload)?))
            }
            _ => Ok(None),
        }
    }

    async fn incr_counter(&self, queue: QueueName, action: CounterAction) -> Result<()> {
        let mut inner = self.inner.lock().await;
        *inner
            .counters
            .entry(format!("{}:{}", queue, action.as_str()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();

        for queue in QueueName::ALL {
            let len = if queue == QueueName::FailedTasks {
                inner.failed.len()
            } else {
                inner.queues.get(&queue).map(Vec::len).unwrap_or(0)
            };
            stats.lengths.insert(queue.as_str().to_string(), len as u64);

            for action in [
                CounterAction::Added,
                CounterAction::Processed,
                CounterAction::Failed,
            ] {
                let key = format!("{}:{}", queue, action.as_str());
                let count = inner.counters.get(&key).copied().unwrap_or(0);
                stats.counters.insert(key, count);
            }
        }

        let now = Instant::now();
        stats.current_processing = inner
            .status
            .values()
            .filter(|(_, expiry)| *expiry > now)
            .count() as u64;

        Ok(stats)
    }
}
