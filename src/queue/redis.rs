//! Redis-backed queue substrate
//!
//! Maps the substrate contract onto Redis primitives: sorted sets for the
//! stage queues (`ZADD`/`ZPOPMIN`), a plain list for the deadletter
//! (`LPUSH`/`LREM`), a set with TTL for dedup (`SADD`/`EXPIRE`), string
//! keys with TTL for processing status (`SETEX`), and counters
//! (`INCR`/`EXPIRE`).
//!
//! `pop_min` is implemented as an atomic `ZPOPMIN` in a bounded poll loop:
//! a popped member whose score lies in the future is put back and the loop
//! sleeps until the timeout expires. Two workers can never receive the same
//! member because `ZPOPMIN` itself is atomic.

use super::{
    CounterAction, DEDUP_TTL, DUPLICATE_CHECK_KEY, PROCESSING_STATUS_PREFIX, ProcessingStatus,
    QueueName, QueueSubstrate, STATS_PREFIX, STATS_TTL, STATUS_TTL, now_secs,
};
use crate::error::{Error, QueueError, Result};
use crate::types::{ArticleId, QueueStats, TaskEnvelope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{debug, warn};

/// Sleep between `ZPOPMIN` attempts while waiting for an eligible task
const POP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Queue substrate over a Redis server
#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisQueue {
    /// Connect to the substrate and verify the connection with a ping
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, "").await
    }

    /// Connect with a key prefix
    ///
    /// All keys are prefixed `{prefix}:`; used to isolate test runs and
    /// co-located deployments sharing one Redis.
    pub async fn connect_with_prefix(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Queue(QueueError::ConnectionFailed(e.to_string())))?;

        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::Queue(QueueError::ConnectionFailed(e.to_string())))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Queue(QueueError::ConnectionFailed(e.to_string())))?;

        tracing::info!(url = %url, "Queue substrate connection initialized");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.prefix, name)
        }
    }

    fn queue_key(&self, queue: QueueName) -> String {
        self.key(queue.as_str())
    }

    fn status_key(&self, id: &ArticleId) -> String {
        self.key(&format!("{PROCESSING_STATUS_PREFIX}:{id}"))
    }

    fn counter_key(&self, queue: QueueName, action: CounterAction) -> String {
        self.key(&format!("{STATS_PREFIX}{}:{}", queue, action.as_str()))
    }

    /// Bump a counter, logging instead of failing: counters are advisory
    async fn incr_counter_advisory(&self, queue: QueueName, action: CounterAction) {
        if let Err(e) = self.incr_counter(queue, action).await {
            warn!(queue = %queue, action = action.as_str(), error = %e, "Failed to update queue counter");
        }
    }
}

fn op_err(e: redis::RedisError) -> Error {
    Error::Queue(QueueError::OperationFailed(e.to_string()))
}

#[async_trait]
impl QueueSubstrate for RedisQueue {
    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Queue substrate health check failed");
                false
            }
        }
    }

    async fn push(&self, queue: QueueName, task: &TaskEnvelope, score: f64) -> Result<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();

        let _: () = conn
            .zadd(self.queue_key(queue), payload, score)
            .await
            .map_err(op_err)?;

        debug!(queue = %queue, article_id = %task.id, score = score, "Task pushed");
        self.incr_counter_advisory(queue, CounterAction::Added).await;
        Ok(())
    }

    async fn pop_min(&self, queue: QueueName, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        let key = self.queue_key(queue);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut conn = self.conn.clone();

        loop {
            let popped: Vec<(String, f64)> = conn.zpopmin(&key, 1).await.map_err(op_err)?;

            if let Some((member, score)) = popped.into_iter().next() {
                if score > now_secs() {
                    // Scheduled for the future; put it back untouched
                    let _: () = conn.zadd(&key, &member, score).await.map_err(op_err)?;
                } else {
                    match serde_json::from_str::<TaskEnvelope>(&member) {
                        Ok(task) => {
                            debug!(queue = %queue, article_id = %task.id, "Task popped");
                            self.incr_counter_advisory(queue, CounterAction::Processed)
                                .await;
                            return Ok(Some(task));
                        }
                        Err(e) => {
                            // Malformed members are dropped so they cannot wedge the queue
                            warn!(queue = %queue, error = %e, "Dropping malformed queue member");
                            continue;
                        }
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL.min(
                deadline.saturating_duration_since(tokio::time::Instant::now()),
            ))
            .await;
        }
    }

    async fn remove(&self, queue: QueueName, task: &TaskEnvelope) -> Result<bool> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();

        let removed: i64 = if queue == QueueName::FailedTasks {
            conn.lrem(self.queue_key(queue), 0, payload)
                .await
                .map_err(op_err)?
        } else {
            conn.zrem(self.queue_key(queue), payload)
                .await
                .map_err(op_err)?
        };

        Ok(removed > 0)
    }

    async fn size(&self, queue: QueueName) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = if queue == QueueName::FailedTasks {
            conn.llen(self.queue_key(queue)).await.map_err(op_err)?
        } else {
            conn.zcard(self.queue_key(queue)).await.map_err(op_err)?
        };
        Ok(len)
    }

    async fn sample(&self, queue: QueueName, n: usize) -> Result<Vec<TaskEnvelope>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let stop = (n as isize) - 1;
        let mut conn = self.conn.clone();

        let members: Vec<String> = if queue == QueueName::FailedTasks {
            conn.lrange(self.queue_key(queue), 0, stop)
                .await
                .map_err(op_err)?
        } else {
            conn.zrange(self.queue_key(queue), 0, stop)
                .await
                .map_err(op_err)?
        };

        Ok(members
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect())
    }

    async fn push_failed(&self, task: &TaskEnvelope, error: &str) -> Result<()> {
        let mut entry = task.clone();
        entry.error_message = Some(error.to_string());
        entry.failed_at = Some(Utc::now());

        let payload = serde_json::to_string(&entry)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(self.queue_key(QueueName::FailedTasks), payload)
            .await
            .map_err(op_err)?;

        debug!(article_id = %task.id, error = error, "Task deadlettered");
        self.incr_counter_advisory(QueueName::FailedTasks, CounterAction::Added)
            .await;
        Ok(())
    }

    async fn prune_failed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let key = self.queue_key(QueueName::FailedTasks);
        let mut conn = self.conn.clone();

        let members: Vec<String> = conn.lrange(&key, 0, -1).await.map_err(op_err)?;
        let mut removed = 0u64;

        for member in members {
            let stale = match serde_json::from_str::<TaskEnvelope>(&member) {
                Ok(entry) => entry.failed_at.map(|at| at < cutoff).unwrap_or(true),
                // Malformed deadletter entries are pruned too
                Err(_) => true,
            };
            if stale {
                let count: i64 = conn.lrem(&key, 1, &member).await.map_err(op_err)?;
                removed += count.max(0) as u64;
            }
        }

        Ok(removed)
    }

    async fn dedup_check_and_add(&self, key: &str) -> Result<bool> {
        let set_key = self.key(DUPLICATE_CHECK_KEY);
        let mut conn = self.conn.clone();

        let added: i64 = conn.sadd(&set_key, key).await.map_err(op_err)?;
        let _: () = conn
            .expire(&set_key, DEDUP_TTL.as_secs() as i64)
            .await
            .map_err(op_err)?;

        Ok(added == 1)
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
        let mut conn = self.conn.clone();

        let _: () = conn
            .set_ex(self.status_key(id), payload, STATUS_TTL.as_secs())
            .await
            .map_err(op_err)?;
        Ok(())
    }

    async fn get_status(&self, id: &ArticleId) -> Result<Option<ProcessingStatus>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.status_key(id)).await.map_err(op_err)?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn incr_counter(&self, queue: QueueName, action: CounterAction) -> Result<()> {
        let key = self.counter_key(queue, action);
        let mut conn = self.conn.clone();

        let _: i64 = conn.incr(&key, 1).await.map_err(op_err)?;
        let _: () = conn
            .expire(&key, STATS_TTL.as_secs() as i64)
            .await
            .map_err(op_err)?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        let mut conn = self.conn.clone();

        for queue in QueueName::ALL {
            stats
                .lengths
                .insert(queue.as_str().to_string(), self.size(queue).await?);

            for action in [
                CounterAction::Added,
                CounterAction::Processed,
                CounterAction::Failed,
            ] {
                let value: Option<String> = conn
                    .get(self.counter_key(queue, action))
                    .await
                    .map_err(op_err)?;
                let count = value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
                stats
                    .counters
                    .insert(format!("{}:{}", queue, action.as_str()), count);
            }
        }

        let pattern = self.key(&format!("{PROCESSING_STATUS_PREFIX}:*"));
        let status_keys: Vec<String> = conn.keys(pattern).await.map_err(op_err)?;
        stats.current_processing = status_keys.len() as u64;

        Ok(stats)
    }
}
