use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::services::{AnalysisOrchestrator, AnalysisOutcome, RunSettings};
use crate::domain::repositories::AnalysisJobRepository;
use crate::infrastructure::messaging::MpscJobQueueReceiver;

/// Run settings shared by every job a worker picks up.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub default_model: String,
    pub flush_interval: Duration,
    pub cancel_poll_interval: Duration,
    pub stall_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct BackgroundProcessor {
    job_receiver: Arc<MpscJobQueueReceiver>,
    job_repository: Arc<dyn AnalysisJobRepository>,
    orchestrator: Arc<AnalysisOrchestrator>,
    settings: WorkerSettings,
    worker_count: usize,
}

impl BackgroundProcessor {
    pub fn new(
        job_receiver: Arc<MpscJobQueueReceiver>,
        job_repository: Arc<dyn AnalysisJobRepository>,
        orchestrator: Arc<AnalysisOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            job_receiver,
            job_repository,
            orchestrator,
            settings,
            worker_count: 1,
        }
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1); // At least 1 worker
        self
    }

    /// Runs the workers until `shutdown` fires or the queue is closed.
    pub async fn start(&self, shutdown: CancellationToken) {
        info!(
            "Starting background processor with {} workers",
            self.worker_count
        );

        let mut handles = Vec::new();
        for worker_id in 0..self.worker_count {
            let processor = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                processor.worker_loop(worker_id, shutdown).await;
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker {} panicked: {}", i, e);
            }
        }

        info!("Background processor stopped");
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        info!("Worker {} started", worker_id);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.job_receiver.recv() => next,
            };

            match next {
                Some(job_id) => {
                    info!("Worker {} processing analysis job {}", worker_id, job_id);
                    self.process_job(job_id, &shutdown).await;
                }
                None => {
                    info!("Worker {} queue closed", worker_id);
                    break;
                }
            }
        }

        info!("Worker {} stopped", worker_id);
    }

    async fn process_job(&self, job_id: i32, shutdown: &CancellationToken) {
        if !self.job_receiver.begin(job_id).await {
            warn!("Analysis job {} is already running, skipping", job_id);
            return;
        }
        let start_time = std::time::Instant::now();
        self.job_receiver.report_progress(job_id, 5).await;

        let job = match self.job_repository.find_by_id(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Analysis job {} no longer exists", job_id);
                self.job_receiver.finish(job_id, true).await;
                return;
            }
            Err(e) => {
                error!("Failed to load analysis job {}: {}", job_id, e);
                self.job_receiver.finish(job_id, false).await;
                return;
            }
        };

        let run_settings = RunSettings {
            model: job
                .model_name()
                .map(str::to_string)
                .unwrap_or_else(|| self.settings.default_model.clone()),
            context_size: job.context_size(),
            flush_interval: self.settings.flush_interval,
            cancel_poll_interval: self.settings.cancel_poll_interval,
            stall_timeout: self.settings.stall_timeout,
        };
        self.job_receiver.report_progress(job_id, 50).await;

        // Abandoned runs keep their stored state and are resumed on restart.
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                warn!("Shutting down while analysis job {} is running", job_id);
                self.job_receiver.finish(job_id, true).await;
                return;
            }
            result = self.orchestrator.run(job_id, &run_settings) => result,
        };

        let succeeded = match result {
            Ok(AnalysisOutcome::Completed) => {
                info!(
                    "Analysis job {} completed in {:.2}s",
                    job_id,
                    start_time.elapsed().as_secs_f64()
                );
                true
            }
            Ok(outcome) => {
                info!("Analysis job {} ended: {:?}", job_id, outcome);
                true
            }
            // The orchestrator has already recorded the failure on the job.
            Err(_) => false,
        };

        self.job_receiver.report_progress(job_id, 100).await;
        self.job_receiver.finish(job_id, succeeded).await;
    }
}
