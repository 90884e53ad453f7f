use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::application::ports::job_queue::{JobProgress, JobQueue, JobQueueError, QueueHealth};

#[derive(Debug, Default)]
struct QueueState {
    waiting: HashSet<i32>,
    in_flight: BTreeMap<i32, u8>,
    total_enqueued: u64,
    total_dequeued: u64,
    total_failed: u64,
    last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

impl QueueState {
    fn touch(&mut self) {
        self.last_activity = Some(chrono::Utc::now());
    }
}

/// In-process job queue. Job ids are the only payload; workers reload the job
/// from the database.
pub struct MpscJobQueue {
    sender: mpsc::UnboundedSender<i32>,
    state: Arc<Mutex<QueueState>>,
}

impl MpscJobQueue {
    pub fn create_pair() -> (Self, MpscJobQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(QueueState::default()));

        let queue = Self {
            sender,
            state: state.clone(),
        };
        let receiver = MpscJobQueueReceiver {
            receiver: Mutex::new(receiver),
            state,
        };

        (queue, receiver)
    }
}

#[async_trait]
impl JobQueue for MpscJobQueue {
    async fn enqueue(&self, job_id: i32) -> Result<(), JobQueueError> {
        let mut state = self.state.lock().await;
        if !state.waiting.insert(job_id) {
            return Ok(());
        }

        if self.sender.send(job_id).is_err() {
            state.waiting.remove(&job_id);
            return Err(JobQueueError::ConnectionError("Channel closed".to_string()));
        }

        state.total_enqueued += 1;
        state.touch();
        Ok(())
    }

    async fn size(&self) -> Result<usize, JobQueueError> {
        Ok(self.state.lock().await.waiting.len())
    }

    async fn is_empty(&self) -> Result<bool, JobQueueError> {
        Ok(self.state.lock().await.waiting.is_empty())
    }

    async fn health_check(&self) -> Result<QueueHealth, JobQueueError> {
        let state = self.state.lock().await;

        Ok(QueueHealth {
            queue_size: state.waiting.len(),
            in_flight: state
                .in_flight
                .iter()
                .map(|(&job_id, &percent)| JobProgress { job_id, percent })
                .collect(),
            total_enqueued: state.total_enqueued,
            total_dequeued: state.total_dequeued,
            total_failed: state.total_failed,
            is_healthy: !self.sender.is_closed(),
            last_activity: state.last_activity,
        })
    }
}

/// Consumer side of the queue, shared by all workers.
pub struct MpscJobQueueReceiver {
    receiver: Mutex<mpsc::UnboundedReceiver<i32>>,
    state: Arc<Mutex<QueueState>>,
}

impl MpscJobQueueReceiver {
    /// Wait for the next job id. `None` once every sender is gone.
    pub async fn recv(&self) -> Option<i32> {
        let job_id = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        }?;

        let mut state = self.state.lock().await;
        state.waiting.remove(&job_id);
        state.total_dequeued += 1;
        state.touch();
        Some(job_id)
    }

    /// Mark a job as running. Returns false if another worker already runs it.
    pub async fn begin(&self, job_id: i32) -> bool {
        let mut state = self.state.lock().await;
        if state.in_flight.contains_key(&job_id) {
            return false;
        }
        state.in_flight.insert(job_id, 0);
        true
    }

    pub async fn report_progress(&self, job_id: i32, percent: u8) {
        let mut state = self.state.lock().await;
        if let Some(progress) = state.in_flight.get_mut(&job_id) {
            *progress = percent.min(100);
        }
    }

    pub async fn finish(&self, job_id: i32, succeeded: bool) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&job_id);
        if !succeeded {
            state.total_failed += 1;
        }
        state.touch();
    }
}
