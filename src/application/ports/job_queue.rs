use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an analysis job for a worker. A job already waiting is not queued twice.
    async fn enqueue(&self, job_id: i32) -> Result<(), JobQueueError>;

    /// Get the number of jobs waiting for a worker
    async fn size(&self) -> Result<usize, JobQueueError>;

    /// Check if the queue is empty
    async fn is_empty(&self) -> Result<bool, JobQueueError>;

    /// Get queue health/statistics
    async fn health_check(&self) -> Result<QueueHealth, JobQueueError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: i32,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub queue_size: usize,
    pub in_flight: Vec<JobProgress>,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_failed: u64,
    pub is_healthy: bool,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}
