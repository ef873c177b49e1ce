use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::models::job::JobRecord;
use crate::services::retry::{retry, RetryPolicy};

const QUEUE_KEY: &str = "image_processor:jobs";
const PROCESSING_KEY: &str = "image_processor:processing";
const DEAD_LETTER_KEY: &str = "image_processor:dead_letter";

/// A dequeued job that has not been acknowledged yet.
///
/// `payload` is the exact serialized form held by the queue; implementations
/// use it to locate the in-flight entry on `ack` / `dead_letter`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: JobRecord,
    pub payload: String,
}

/// Durable job queue.
///
/// Consumed jobs stay in flight until they are acknowledged or
/// dead-lettered, so a crash mid-processing leaves them recoverable.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job record, retrying transient failures.
    async fn publish(&self, record: &JobRecord) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next job. `Ok(None)` when none arrived.
    async fn consume(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a successfully processed job from the in-flight set.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Move a failed job to the dead-letter list and out of the in-flight set.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Return jobs stranded in flight by a previous run to the pending queue.
    async fn requeue_unacked(&self) -> Result<u64, QueueError> {
        Ok(0)
    }

    /// Number of pending (not yet consumed) jobs.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue: `LPUSH` to publish, `BRPOPLPUSH` into a
/// processing list to consume, `LREM` to acknowledge.
pub struct RedisJobQueue {
    client: redis::Client,
    retry: RetryPolicy,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, retry: RetryPolicy) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client, retry })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    async fn push(&self, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn fetch(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .brpoplpush(QUEUE_KEY, PROCESSING_KEY, timeout.as_secs_f64())
            .await
            .map_err(QueueError::Redis)?;
        Ok(payload)
    }

    async fn move_to_dead_letter(&self, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lpush(DEAD_LETTER_KEY, payload)
            .ignore()
            .lrem(PROCESSING_KEY, 1, payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, record: &JobRecord) -> Result<(), QueueError> {
        let payload = serde_json::to_string(record).map_err(QueueError::Serialize)?;

        retry(&self.retry, "queue_publish", || self.push(&payload)).await?;

        tracing::info!(image_id = %record.id, task = %record.task, "Published job to queue");
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let payload = match retry(&self.retry, "queue_fetch", || self.fetch(timeout)).await? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        match serde_json::from_str::<JobRecord>(&payload) {
            Ok(record) => {
                tracing::info!(image_id = %record.id, "Consumed job from queue");
                Ok(Some(Delivery { record, payload }))
            }
            Err(e) => {
                tracing::error!(error = %e, "Unparseable job payload, moving to dead letter");
                self.move_to_dead_letter(&payload).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.move_to_dead_letter(&delivery.payload).await?;
        tracing::warn!(image_id = %delivery.record.id, reason, "Job moved to dead letter");
        Ok(())
    }

    async fn requeue_unacked(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;

        // RPOPLPUSH onto the consume end keeps stranded jobs ahead of new ones.
        loop {
            let payload: Option<String> = conn
                .rpoplpush(PROCESSING_KEY, QUEUE_KEY)
                .await
                .map_err(QueueError::Redis)?;
            match payload {
                Some(_) => moved += 1,
                None => break,
            }
        }

        if moved > 0 {
            tracing::warn!(count = moved, "Requeued unacknowledged jobs from previous run");
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
