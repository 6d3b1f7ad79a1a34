//! Job Queue (§4.H): a bounded-durability FIFO of run requests, keyed by a
//! well-known Redis list. No priority, no visibility timeout — a job that a
//! worker fails to finish must be re-enqueued explicitly by the caller.

use crate::error::QueueError;
use flow_model::Job;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

const PENDING_LIST_KEY: &str = "jobs:pending";
const PAYLOAD_TTL_SECS: u64 = 24 * 60 * 60;

fn payload_key(job_id: &str) -> String {
    format!("jobs:data:{job_id}")
}

pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Serialises `job`, stores its payload with a 24h TTL, then pushes its
    /// ID onto the head of the pending list.
    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let key = payload_key(&job.id);
        let _: () = conn.set_ex(&key, payload, PAYLOAD_TTL_SECS).await?;
        let _: () = conn.lpush(PENDING_LIST_KEY, &job.id).await?;
        Ok(())
    }

    /// Blocking pop from the tail of the pending list, with `timeout`. Reads
    /// and deletes the payload (best-effort delete — a failure here is
    /// logged, not propagated, since the job itself was already dequeued).
    /// Returns `None` on timeout with nothing to pop.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(PENDING_LIST_KEY, timeout.as_secs_f64()).await?;
        let Some((_list, job_id)) = popped else {
            return Ok(None);
        };

        let key = payload_key(&job_id);
        let payload: Option<String> = conn.get(&key).await?;
        let Some(payload) = payload else {
            return Err(QueueError::PayloadMissing(job_id));
        };
        let job: Job = serde_json::from_str(&payload)?;

        if let Err(e) = conn.del::<_, ()>(&key).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to delete dequeued job payload");
        }

        Ok(Some(job))
    }

    /// Current depth of the pending list.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(PENDING_LIST_KEY).await?;
        Ok(len)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}
