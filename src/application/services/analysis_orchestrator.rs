use chrono::NaiveDate;
use futures::StreamExt;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::inference_provider::{
    ChatMessage, InferenceChunk, InferenceError, InferenceOptions,
};
use crate::application::ports::{
    AnalysisEvent, AnalysisEventKind, InferenceProvider, ProgressPublisher,
};
use crate::application::services::prompt_templates::{
    ANALYST_SYSTEM_PROMPT, MAP_GENERIC, MAP_WITH_STRATEGY, REDUCE_GENERIC, REDUCE_WITH_STRATEGY,
    TemplateError,
};
use crate::application::services::strategy_planner::{StrategyError, StrategyPlanner};
use crate::application::services::usage_ledger::{TokenUsage, UsageLedger};
use crate::domain::entities::{AnalysisJob, IntermediateSummary, StatusChange, UsageSource};
use crate::domain::repositories::{
    AnalysisJobRepository, JobRepositoryError, SessionRepository, TranscriptRepository,
};
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy};

/// Per-run parameters. Every inference call of a run uses the same model and
/// context size.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub context_size: Option<i32>,
    /// How long token deltas are buffered before a progress event is emitted.
    pub flush_interval: Duration,
    /// How often the stored job status is re-read while a stream is running.
    pub cancel_poll_interval: Duration,
    /// A stream that yields nothing for this long is treated as failed.
    pub stall_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed,
    Canceled,
    /// The job was already terminal when the run started.
    AlreadyFinished(AnalysisStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis job not found: {0}")]
    JobNotFound(i32),
    #[error("Job store error: {0}")]
    Repository(#[from] JobRepositoryError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Cannot move job from {from} to {to}")]
    IllegalTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },
    #[error("Advanced analysis has no strategy")]
    MissingStrategy,
    #[error("No session produced a summary")]
    NoCompletedSummaries,
    #[error("{0} summaries are still unfinished")]
    SummariesNotFinished(usize),
    #[error("Final synthesis failed: {0}")]
    ReduceFailed(String),
    #[error("Final synthesis produced no output")]
    EmptyResult,
}

enum StreamEnd {
    Finished(String),
    Failed(String),
    Canceled,
}

/// A completed summary paired with the session data the reduce step needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceInput {
    pub session_id: i32,
    pub session_name: String,
    pub session_date: Option<NaiveDate>,
    pub summary_text: String,
}

/// Chronological order: ascending date, ties by session id, unknown dates last.
pub fn order_for_reduce(inputs: &mut [ReduceInput]) {
    inputs.sort_by(|a, b| {
        let by_date = match (a.session_date, b.session_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_date.then(a.session_id.cmp(&b.session_id))
    });
}

fn format_summaries(inputs: &[ReduceInput]) -> String {
    inputs
        .iter()
        .map(|input| {
            let date = input
                .session_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown date".to_string());
            format!("### {} ({})\n{}", input.session_name, date, input.summary_text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Drives one job through strategy planning, the map phase and the reduce
/// phase. All state lives in the job store, so a run can resume from any
/// non-terminal status.
pub struct AnalysisOrchestrator {
    job_repository: Arc<dyn AnalysisJobRepository>,
    session_repository: Arc<dyn SessionRepository>,
    transcript_repository: Arc<dyn TranscriptRepository>,
    inference: Arc<dyn InferenceProvider>,
    strategy_planner: Arc<StrategyPlanner>,
    publisher: Arc<dyn ProgressPublisher>,
    usage_ledger: Arc<UsageLedger>,
}

impl AnalysisOrchestrator {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        session_repository: Arc<dyn SessionRepository>,
        transcript_repository: Arc<dyn TranscriptRepository>,
        inference: Arc<dyn InferenceProvider>,
        strategy_planner: Arc<StrategyPlanner>,
        publisher: Arc<dyn ProgressPublisher>,
        usage_ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            job_repository,
            session_repository,
            transcript_repository,
            inference,
            strategy_planner,
            publisher,
            usage_ledger,
        }
    }

    /// Run a job to a terminal state. On error the job is finalized as
    /// `canceled` if a cancel was requested, otherwise as `failed`, and the
    /// error is returned to the caller.
    pub async fn run(
        &self,
        job_id: i32,
        settings: &RunSettings,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        match self.execute(job_id, settings).await {
            Ok(outcome) => {
                info!("Analysis job {} finished: {:?}", job_id, outcome);
                Ok(outcome)
            }
            Err(e) => {
                error!("Analysis job {} failed: {}", job_id, e);
                self.finalize_after_error(job_id, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job_id: i32,
        settings: &RunSettings,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let job = self
            .job_repository
            .find_by_id(job_id)
            .await?
            .ok_or(AnalysisError::JobNotFound(job_id))?;

        let mut status = job.status();
        if status.is_terminal() {
            info!("Analysis job {} is already {}, skipping", job_id, status);
            return Ok(AnalysisOutcome::AlreadyFinished(status));
        }
        if status.is_canceling() {
            return self.finish_canceled(job_id).await;
        }

        info!(
            "Running analysis job {} from {} over {} sessions with model {}",
            job_id,
            status,
            job.session_ids().len(),
            settings.model
        );

        let mut strategy = job.strategy().cloned();
        if job.use_advanced_strategy() && strategy.is_none() {
            if status != AnalysisStatus::Pending && status != AnalysisStatus::GeneratingStrategy {
                return Err(AnalysisError::MissingStrategy);
            }
            match self.plan(&job, status, settings).await? {
                Some(planned) => strategy = Some(planned),
                None => return self.finish_canceled(job_id).await,
            }
            status = AnalysisStatus::Pending;
        } else if status == AnalysisStatus::GeneratingStrategy {
            // Crashed after the strategy was saved but before the write back to pending.
            if !self.advance(job_id, AnalysisStatus::GeneratingStrategy, AnalysisStatus::Pending).await? {
                return self.finish_canceled(job_id).await;
            }
            status = AnalysisStatus::Pending;
        }

        if status == AnalysisStatus::Pending {
            if !self.advance(job_id, status, AnalysisStatus::Mapping).await? {
                return self.finish_canceled(job_id).await;
            }
            status = AnalysisStatus::Mapping;
        }

        if status == AnalysisStatus::Mapping {
            if !self.map_phase(&job, strategy.as_ref(), settings).await? {
                return self.finish_canceled(job_id).await;
            }
            if !self.advance(job_id, status, AnalysisStatus::Reducing).await? {
                return self.finish_canceled(job_id).await;
            }
        }

        self.reduce_phase(&job, strategy.as_ref(), settings).await
    }

    /// Generate and store the strategy. `None` means a cancel was observed.
    async fn plan(
        &self,
        job: &AnalysisJob,
        status: AnalysisStatus,
        settings: &RunSettings,
    ) -> Result<Option<AnalysisStrategy>, AnalysisError> {
        let job_id = job.id();
        if status == AnalysisStatus::Pending
            && !self.advance(job_id, status, AnalysisStatus::GeneratingStrategy).await?
        {
            return Ok(None);
        }

        let strategy = self
            .strategy_planner
            .generate(job.original_prompt(), &settings.model, settings.context_size)
            .await?;

        if self.cancel_requested(job_id).await? {
            return Ok(None);
        }

        self.job_repository.save_strategy(job_id, &strategy).await?;
        if !self
            .advance(job_id, AnalysisStatus::GeneratingStrategy, AnalysisStatus::Pending)
            .await?
        {
            return Ok(None);
        }

        Ok(Some(strategy))
    }

    /// Returns `false` when a cancel stopped the phase.
    async fn map_phase(
        &self,
        job: &AnalysisJob,
        strategy: Option<&AnalysisStrategy>,
        settings: &RunSettings,
    ) -> Result<bool, AnalysisError> {
        let job_id = job.id();

        let reset = self.job_repository.reset_processing_summaries(job_id).await?;
        if reset > 0 {
            warn!("Reset {} interrupted summaries of job {}", reset, job_id);
        }

        let pending = self.job_repository.pending_summaries(job_id).await?;
        debug!("Job {} has {} sessions left to map", job_id, pending.len());

        for summary in pending {
            if self.cancel_requested(job_id).await? {
                return Ok(false);
            }
            if !self.map_session(job, &summary, strategy, settings).await? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Map one session. Problems with the session itself only fail its
    /// summary; store errors abort the job.
    async fn map_session(
        &self,
        job: &AnalysisJob,
        summary: &IntermediateSummary,
        strategy: Option<&AnalysisStrategy>,
        settings: &RunSettings,
    ) -> Result<bool, AnalysisError> {
        let job_id = job.id();
        self.job_repository.mark_summary_processing(summary.id).await?;
        self.publish(
            job_id,
            AnalysisEventKind::MapStart {
                summary_id: summary.id,
                session_id: summary.session_id,
            },
        );

        let prompt = match self.load_session(summary.session_id).await {
            Ok((name, date, transcript)) => match strategy {
                Some(strategy) => MAP_WITH_STRATEGY.render(&[
                    ("intermediate_question", &strategy.intermediate_question),
                    ("session_name", &name),
                    ("session_date", &date),
                    ("transcript", &transcript),
                ])?,
                None => MAP_GENERIC.render(&[
                    ("question", job.original_prompt()),
                    ("session_name", &name),
                    ("session_date", &date),
                    ("transcript", &transcript),
                ])?,
            },
            Err(reason) => {
                self.fail_summary(job_id, summary.id, &reason).await?;
                return Ok(true);
            }
        };

        let summary_id = summary.id;
        let end = self
            .stream_with_progress(
                job_id,
                UsageSource::AnalysisMap,
                vec![ChatMessage::system(ANALYST_SYSTEM_PROMPT), ChatMessage::user(prompt)],
                settings,
                |delta| AnalysisEventKind::MapToken { summary_id, delta },
            )
            .await?;

        match end {
            StreamEnd::Finished(text) if text.trim().is_empty() => {
                self.fail_summary(job_id, summary_id, "Model returned an empty summary")
                    .await?;
                Ok(true)
            }
            StreamEnd::Finished(text) => {
                self.job_repository
                    .complete_summary(summary_id, text.trim())
                    .await?;
                self.publish(job_id, AnalysisEventKind::MapEnd { summary_id });
                debug!(
                    "Mapped session {} of job {} ({} chars)",
                    summary.session_id,
                    job_id,
                    text.len()
                );
                Ok(true)
            }
            StreamEnd::Failed(reason) => {
                self.fail_summary(job_id, summary_id, &reason).await?;
                Ok(true)
            }
            StreamEnd::Canceled => {
                self.job_repository
                    .fail_summary(summary_id, "Analysis canceled")
                    .await?;
                Ok(false)
            }
        }
    }

    async fn load_session(&self, session_id: i32) -> Result<(String, String, String), String> {
        let session = self
            .session_repository
            .find_by_id(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session {} not found", session_id))?;

        let transcript = self
            .transcript_repository
            .get_full_text(session_id)
            .await
            .map_err(|e| e.to_string())?;
        if transcript.trim().is_empty() {
            return Err(format!("Session {} has no transcript", session_id));
        }

        Ok((
            session.display_name().to_string(),
            session.date.to_string(),
            transcript,
        ))
    }

    async fn reduce_phase(
        &self,
        job: &AnalysisJob,
        strategy: Option<&AnalysisStrategy>,
        settings: &RunSettings,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let job_id = job.id();
        let summaries = self.job_repository.summaries_for_job(job_id).await?;

        let unfinished = summaries.iter().filter(|s| !s.status.is_terminal()).count();
        if unfinished > 0 {
            return Err(AnalysisError::SummariesNotFinished(unfinished));
        }

        let mut inputs = Vec::new();
        for summary in summaries.into_iter().filter(|s| s.is_completed()) {
            let session = match self.session_repository.find_by_id(summary.session_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("Session lookup failed during reduce of job {}: {}", job_id, e);
                    None
                }
            };
            inputs.push(ReduceInput {
                session_id: summary.session_id,
                session_name: session
                    .as_ref()
                    .map(|s| s.display_name().to_string())
                    .unwrap_or_else(|| format!("Session {}", summary.session_id)),
                session_date: session.map(|s| s.date),
                summary_text: summary.summary_text.unwrap_or_default(),
            });
        }
        if inputs.is_empty() {
            return Err(AnalysisError::NoCompletedSummaries);
        }
        order_for_reduce(&mut inputs);

        let summaries_text = format_summaries(&inputs);
        let prompt = match strategy {
            Some(strategy) => REDUCE_WITH_STRATEGY.render(&[
                ("synthesis_instructions", &strategy.final_synthesis_instructions),
                ("question", job.original_prompt()),
                ("summaries", &summaries_text),
            ])?,
            None => REDUCE_GENERIC.render(&[
                ("question", job.original_prompt()),
                ("summaries", &summaries_text),
            ])?,
        };

        info!(
            "Reducing {} session summaries for job {}",
            inputs.len(),
            job_id
        );
        self.publish(job_id, AnalysisEventKind::ReduceStart);

        let end = self
            .stream_with_progress(
                job_id,
                UsageSource::AnalysisReduce,
                vec![ChatMessage::system(ANALYST_SYSTEM_PROMPT), ChatMessage::user(prompt)],
                settings,
                |delta| AnalysisEventKind::ReduceToken { delta },
            )
            .await?;

        let result = match end {
            StreamEnd::Finished(text) if text.trim().is_empty() => {
                return Err(AnalysisError::EmptyResult);
            }
            StreamEnd::Finished(text) => text.trim().to_string(),
            StreamEnd::Failed(reason) => return Err(AnalysisError::ReduceFailed(reason)),
            StreamEnd::Canceled => return self.finish_canceled(job_id).await,
        };
        self.publish(job_id, AnalysisEventKind::ReduceEnd);

        if self
            .job_repository
            .transition(job_id, StatusChange::completed(result))
            .await?
        {
            self.publish_status(job_id, AnalysisStatus::Completed, None);
            self.publisher.close(job_id);
            return Ok(AnalysisOutcome::Completed);
        }

        // The cancel path won the race against the final write.
        match self.job_repository.find_status(job_id).await? {
            Some(status) if status.is_canceling() => self.finish_canceled(job_id).await,
            Some(status) => Err(AnalysisError::IllegalTransition {
                from: status,
                to: AnalysisStatus::Completed,
            }),
            None => Err(AnalysisError::JobNotFound(job_id)),
        }
    }

    /// Stream one inference call, emitting coalesced token events and
    /// watching the job row for a cancel request. Usage is recorded whatever
    /// the outcome.
    async fn stream_with_progress<F>(
        &self,
        job_id: i32,
        source: UsageSource,
        messages: Vec<ChatMessage>,
        settings: &RunSettings,
        token_event: F,
    ) -> Result<StreamEnd, AnalysisError>
    where
        F: Fn(String) -> AnalysisEventKind,
    {
        let cancel = CancellationToken::new();
        let options = InferenceOptions {
            model: settings.model.clone(),
            context_size: settings.context_size,
            cancel: cancel.clone(),
        };

        let started = Instant::now();
        let mut usage = TokenUsage::default();
        let end = self
            .consume_stream(job_id, messages, options, settings, &token_event, &mut usage)
            .await;
        // Drops the request on every exit path.
        cancel.cancel();

        self.usage_ledger
            .record(source, &settings.model, usage, started.elapsed())
            .await;

        end
    }

    async fn consume_stream<F>(
        &self,
        job_id: i32,
        messages: Vec<ChatMessage>,
        options: InferenceOptions,
        settings: &RunSettings,
        token_event: &F,
        usage: &mut TokenUsage,
    ) -> Result<StreamEnd, AnalysisError>
    where
        F: Fn(String) -> AnalysisEventKind,
    {
        let cancel = options.cancel.clone();
        let mut stream = match self.inference.stream(messages, options).await {
            Ok(stream) => stream,
            Err(e) => return Ok(StreamEnd::Failed(e.to_string())),
        };

        let mut text = String::new();
        let mut buffered = String::new();
        let mut last_flush = Instant::now();
        let mut last_poll = Instant::now();

        loop {
            let next = match settings.stall_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.flush(job_id, &mut buffered, token_event);
                        let stalled = InferenceError::StreamError(format!(
                            "no output for {} seconds",
                            limit.as_secs_f32()
                        ));
                        return Ok(StreamEnd::Failed(stalled.to_string()));
                    }
                },
                None => stream.next().await,
            };

            let Some(chunk) = next else {
                break;
            };

            match chunk {
                Ok(InferenceChunk::Delta(delta)) => {
                    text.push_str(&delta);
                    buffered.push_str(&delta);
                }
                Ok(InferenceChunk::Usage {
                    prompt_tokens,
                    completion_tokens,
                }) => {
                    *usage = TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                    };
                }
                Err(e) => {
                    self.flush(job_id, &mut buffered, token_event);
                    return Ok(StreamEnd::Failed(e.to_string()));
                }
            }

            if last_flush.elapsed() >= settings.flush_interval {
                self.flush(job_id, &mut buffered, token_event);
                last_flush = Instant::now();
            }

            if last_poll.elapsed() >= settings.cancel_poll_interval {
                last_poll = Instant::now();
                if self.cancel_requested(job_id).await? {
                    info!("Cancel requested for job {}, aborting stream", job_id);
                    cancel.cancel();
                    self.flush(job_id, &mut buffered, token_event);
                    return Ok(StreamEnd::Canceled);
                }
            }
        }

        self.flush(job_id, &mut buffered, token_event);

        // A cancel that lands while the last chunks arrive still wins.
        if self.cancel_requested(job_id).await? {
            return Ok(StreamEnd::Canceled);
        }

        Ok(StreamEnd::Finished(text))
    }

    fn flush<F>(&self, job_id: i32, buffered: &mut String, token_event: &F)
    where
        F: Fn(String) -> AnalysisEventKind,
    {
        if !buffered.is_empty() {
            self.publish(job_id, token_event(std::mem::take(buffered)));
        }
    }

    /// A deleted job counts as canceled.
    async fn cancel_requested(&self, job_id: i32) -> Result<bool, AnalysisError> {
        let status = self.job_repository.find_status(job_id).await?;
        Ok(status.is_none_or(|s| s.is_canceling() || s.is_terminal()))
    }

    /// Write a forward transition. Returns `false` when a cancel was
    /// requested in the meantime.
    async fn advance(
        &self,
        job_id: i32,
        from: AnalysisStatus,
        to: AnalysisStatus,
    ) -> Result<bool, AnalysisError> {
        if self
            .job_repository
            .transition(job_id, StatusChange::to(to))
            .await?
        {
            self.publish_status(job_id, to, None);
            return Ok(true);
        }

        match self.job_repository.find_status(job_id).await? {
            Some(status) if status.is_canceling() || status.is_terminal() => Ok(false),
            Some(status) => {
                debug!("Job {} expected {} but is {}", job_id, from, status);
                Err(AnalysisError::IllegalTransition { from: status, to })
            }
            None => Ok(false),
        }
    }

    async fn finish_canceled(&self, job_id: i32) -> Result<AnalysisOutcome, AnalysisError> {
        match self
            .job_repository
            .transition(job_id, StatusChange::canceled())
            .await
        {
            Ok(true) => {
                info!("Analysis job {} canceled", job_id);
                self.publish_status(job_id, AnalysisStatus::Canceled, None);
            }
            Ok(false) => debug!("Job {} was already finalized", job_id),
            Err(JobRepositoryError::NotFound(_)) => debug!("Job {} was deleted", job_id),
            Err(e) => return Err(e.into()),
        }
        self.publisher.close(job_id);
        Ok(AnalysisOutcome::Canceled)
    }

    async fn finalize_after_error(&self, job_id: i32, cause: &AnalysisError) {
        let status = match self.job_repository.find_status(job_id).await {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(e) => {
                error!("Could not read job {} to record failure: {}", job_id, e);
                return;
            }
        };

        if status.is_canceling() {
            if let Err(e) = self.finish_canceled(job_id).await {
                error!("Could not finalize canceled job {}: {}", job_id, e);
            }
            return;
        }
        if status.is_terminal() {
            return;
        }

        let message = cause.to_string();
        match self
            .job_repository
            .transition(job_id, StatusChange::failed(message.clone()))
            .await
        {
            Ok(true) => {
                self.publish_status(job_id, AnalysisStatus::Failed, Some(message));
                self.publisher.close(job_id);
            }
            Ok(false) => {
                // A cancel landed between the read and the write.
                if let Err(e) = self.finish_canceled(job_id).await {
                    error!("Could not finalize canceled job {}: {}", job_id, e);
                }
            }
            Err(e) => error!("Could not mark job {} as failed: {}", job_id, e),
        }
    }

    async fn fail_summary(
        &self,
        job_id: i32,
        summary_id: i32,
        reason: &str,
    ) -> Result<(), AnalysisError> {
        warn!("Summary {} of job {} failed: {}", summary_id, job_id, reason);
        self.job_repository.fail_summary(summary_id, reason).await?;
        self.publish(
            job_id,
            AnalysisEventKind::MapError {
                summary_id,
                error: reason.to_string(),
            },
        );
        Ok(())
    }

    fn publish(&self, job_id: i32, kind: AnalysisEventKind) {
        self.publisher.publish(AnalysisEvent::new(job_id, kind));
    }

    fn publish_status(&self, job_id: i32, status: AnalysisStatus, message: Option<String>) {
        self.publisher
            .publish(AnalysisEvent::status(job_id, status, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::NewAnalysisJob;
    use crate::domain::value_objects::SummaryStatus;
    use crate::testing::{
        InMemoryAnalysisJobRepository, InMemorySessionStore, RecordingPublisher,
        RecordingUsageRepository, ScriptedInferenceProvider, ScriptedReply, session,
    };

    const STRATEGY_REPLY: &str = "```json\n{\"intermediate_question\": \"How was sleep this week?\", \
        \"final_synthesis_instructions\": \"Describe the sleep trend.\"}\n```";

    struct Harness {
        jobs: Arc<InMemoryAnalysisJobRepository>,
        sessions: Arc<InMemorySessionStore>,
        publisher: Arc<RecordingPublisher>,
        usage: Arc<RecordingUsageRepository>,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = InMemorySessionStore::default();
            // Session 1 is the later one so map order differs from date order.
            sessions.insert(
                session(1, "2025-03-10", Some(40)),
                "B: I slept badly and argued with my partner.",
            );
            sessions.insert(
                session(2, "2025-03-03", Some(40)),
                "A: Sleep was fine, work stress is high.",
            );
            sessions.insert(session(3, "2025-03-17", Some(0)), "");

            Self {
                jobs: Arc::new(InMemoryAnalysisJobRepository::default()),
                sessions: Arc::new(sessions),
                publisher: Arc::new(RecordingPublisher::default()),
                usage: Arc::new(RecordingUsageRepository::default()),
            }
        }

        async fn create_job(&self, session_ids: &[i32], advanced: bool) -> AnalysisJob {
            self.jobs
                .create(&NewAnalysisJob {
                    original_prompt: "How did the client's sleep develop?".to_string(),
                    session_ids: session_ids.to_vec(),
                    model_name: None,
                    context_size: Some(8192),
                    use_advanced_strategy: advanced,
                })
                .await
                .unwrap()
        }

        fn orchestrator(&self, provider: Arc<ScriptedInferenceProvider>) -> AnalysisOrchestrator {
            let ledger = Arc::new(UsageLedger::new(self.usage.clone()));
            AnalysisOrchestrator::new(
                self.jobs.clone(),
                self.sessions.clone(),
                self.sessions.clone(),
                provider.clone(),
                Arc::new(StrategyPlanner::new(provider, ledger.clone())),
                self.publisher.clone(),
                ledger,
            )
        }

        async fn job(&self, job_id: i32) -> AnalysisJob {
            self.jobs.find_by_id(job_id).await.unwrap().unwrap()
        }

        async fn summary_statuses(&self, job_id: i32) -> Vec<(i32, SummaryStatus)> {
            self.jobs
                .summaries_for_job(job_id)
                .await
                .unwrap()
                .into_iter()
                .map(|s| (s.session_id, s.status))
                .collect()
        }

        fn statuses(&self) -> Vec<AnalysisStatus> {
            self.publisher
                .events()
                .into_iter()
                .filter_map(|e| match e.kind {
                    AnalysisEventKind::Status { status, .. } => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            model: "test-model".to_string(),
            context_size: Some(8192),
            flush_interval: Duration::ZERO,
            cancel_poll_interval: Duration::ZERO,
            stall_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_reduce_input_is_chronological() {
        let harness = Harness::new();
        let job = harness.create_job(&[1, 2], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary B: poor sleep."),
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::text("Sleep got worse over March."),
        ]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Completed);
        let stored = harness.job(job.id()).await;
        assert_eq!(stored.status(), AnalysisStatus::Completed);
        assert_eq!(stored.final_result(), Some("Sleep got worse over March."));
        assert!(stored.completed_at().is_some());
        assert!(stored.strategy().is_none());

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        let reduce_prompt = &calls[2][1].content;
        let a = reduce_prompt.find("Summary A").unwrap();
        let b = reduce_prompt.find("Summary B").unwrap();
        assert!(a < b, "session A (earlier date) must come first");

        assert_eq!(
            harness.statuses(),
            vec![
                AnalysisStatus::Mapping,
                AnalysisStatus::Reducing,
                AnalysisStatus::Completed
            ]
        );
        let sources: Vec<UsageSource> =
            harness.usage.records().iter().map(|r| r.source).collect();
        assert_eq!(
            sources,
            vec![
                UsageSource::AnalysisMap,
                UsageSource::AnalysisMap,
                UsageSource::AnalysisReduce
            ]
        );
        assert_eq!(harness.publisher.closed(), vec![job.id()]);
    }

    #[tokio::test]
    async fn test_empty_transcript_fails_only_that_session() {
        let harness = Harness::new();
        let job = harness.create_job(&[2, 3], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::text("Only one session had content."),
        ]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Completed);
        assert_eq!(
            harness.summary_statuses(job.id()).await,
            vec![(2, SummaryStatus::Completed), (3, SummaryStatus::Failed)]
        );
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1][1].content.contains("Summary A"));
        assert!(harness.publisher.events().iter().any(|e| matches!(
            e.kind,
            AnalysisEventKind::MapError { .. }
        )));
    }

    #[tokio::test]
    async fn test_reduce_never_runs_when_every_session_failed() {
        let harness = Harness::new();
        let job = harness.create_job(&[3, 99], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![]));

        let err = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::NoCompletedSummaries));
        assert!(provider.calls().is_empty());
        let stored = harness.job(job.id()).await;
        assert_eq!(stored.status(), AnalysisStatus::Failed);
        assert!(stored.final_result().is_none());
        assert!(stored.error_message().is_some());
    }

    #[tokio::test]
    async fn test_cancel_mid_map_skips_reduce() {
        let harness = Harness::new();
        let job = harness.create_job(&[2, 1], false).await;
        let jobs = harness.jobs.clone();
        let job_id = job.id();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::text("Summary B is streaming slowly").on_delta(1, move || {
                jobs.request_cancel(job_id);
            }),
            ScriptedReply::text("never used"),
        ]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job_id, &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Canceled);
        let stored = harness.job(job_id).await;
        assert_eq!(stored.status(), AnalysisStatus::Canceled);
        assert!(stored.final_result().is_none());
        assert!(stored.error_message().is_none());
        assert_eq!(provider.calls().len(), 2);
        assert!(
            !harness
                .publisher
                .events()
                .iter()
                .any(|e| e.kind == AnalysisEventKind::ReduceStart)
        );
        assert_eq!(harness.statuses().last(), Some(&AnalysisStatus::Canceled));
        assert!(harness.usage.records().iter().all(|r| r.source == UsageSource::AnalysisMap));
    }

    #[tokio::test]
    async fn test_cancel_during_reduce_discards_result() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        let jobs = harness.jobs.clone();
        let job_id = job.id();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::text("Sleep was stable across").on_delta(2, move || {
                jobs.request_cancel(job_id);
            }),
        ]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job_id, &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Canceled);
        let stored = harness.job(job_id).await;
        assert_eq!(stored.status(), AnalysisStatus::Canceled);
        assert!(stored.final_result().is_none());
        assert!(stored.error_message().is_none());
        assert_eq!(provider.calls().len(), 2);
        let events = harness.publisher.events();
        assert!(events.iter().any(|e| e.kind == AnalysisEventKind::ReduceStart));
        assert!(!events.iter().any(|e| e.kind == AnalysisEventKind::ReduceEnd));
        assert_eq!(harness.statuses().last(), Some(&AnalysisStatus::Canceled));
        assert_eq!(harness.publisher.closed(), vec![job_id]);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_reduce_stream_error() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        let jobs = harness.jobs.clone();
        let job_id = job.id();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::broken("Sleep was", "connection reset").on_delta(1, move || {
                jobs.request_cancel(job_id);
            }),
        ]));
        // The stream fails before the next status poll would notice the cancel.
        let settings = RunSettings {
            cancel_poll_interval: Duration::from_secs(3600),
            ..settings()
        };

        let err = harness
            .orchestrator(provider)
            .run(job_id, &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::ReduceFailed(_)));
        let stored = harness.job(job_id).await;
        assert_eq!(stored.status(), AnalysisStatus::Canceled);
        assert!(stored.final_result().is_none());
        assert!(stored.error_message().is_none());
        assert!(!harness.statuses().contains(&AnalysisStatus::Failed));
        assert_eq!(harness.statuses().last(), Some(&AnalysisStatus::Canceled));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_map_stream_error() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        let jobs = harness.jobs.clone();
        let job_id = job.id();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::broken("Summary A", "connection reset").on_delta(1, move || {
                jobs.request_cancel(job_id);
            }),
            ScriptedReply::text("never used"),
        ]));
        let settings = RunSettings {
            cancel_poll_interval: Duration::from_secs(3600),
            ..settings()
        };

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job_id, &settings)
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Canceled);
        let stored = harness.job(job_id).await;
        assert_eq!(stored.status(), AnalysisStatus::Canceled);
        assert!(stored.final_result().is_none());
        assert!(stored.error_message().is_none());
        assert_eq!(provider.calls().len(), 1);
        assert_eq!(
            harness.summary_statuses(job_id).await,
            vec![(2, SummaryStatus::Failed)]
        );
        assert!(!harness.statuses().contains(&AnalysisStatus::Failed));
    }

    #[tokio::test]
    async fn test_canceling_job_is_finalized_without_work() {
        let harness = Harness::new();
        let job = harness.create_job(&[1], false).await;
        harness.jobs.request_cancel(job.id());
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Canceled);
        assert_eq!(harness.job(job.id()).await.status(), AnalysisStatus::Canceled);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let harness = Harness::new();
        let job = harness.create_job(&[1], false).await;
        harness.jobs.force_status(job.id(), AnalysisStatus::Failed);
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![]));

        let outcome = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AnalysisOutcome::AlreadyFinished(AnalysisStatus::Failed)
        );
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_advanced_strategy_drives_both_phases() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], true).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text(STRATEGY_REPLY),
            ScriptedReply::text("Summary A: good sleep."),
            ScriptedReply::text("Sleep was stable."),
        ]));

        harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        let stored = harness.job(job.id()).await;
        assert_eq!(
            stored.strategy().map(|s| s.intermediate_question.as_str()),
            Some("How was sleep this week?")
        );
        let calls = provider.calls();
        assert!(calls[1][1].content.starts_with("How was sleep this week?"));
        assert!(calls[2][1].content.starts_with("Describe the sleep trend."));
        assert_eq!(
            harness.statuses(),
            vec![
                AnalysisStatus::GeneratingStrategy,
                AnalysisStatus::Pending,
                AnalysisStatus::Mapping,
                AnalysisStatus::Reducing,
                AnalysisStatus::Completed
            ]
        );
        assert_eq!(
            harness.usage.records()[0].source,
            UsageSource::AnalysisStrategy
        );
    }

    #[tokio::test]
    async fn test_invalid_strategy_fails_job() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], true).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![ScriptedReply::text(
            "I think you should look at sleep.",
        )]));

        let err = harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Strategy(_)));
        assert_eq!(provider.calls().len(), 1);
        let stored = harness.job(job.id()).await;
        assert_eq!(stored.status(), AnalysisStatus::Failed);
        assert!(stored.strategy().is_none());
    }

    #[tokio::test]
    async fn test_stored_strategy_skips_planning() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], true).await;
        harness
            .jobs
            .save_strategy(
                job.id(),
                &AnalysisStrategy {
                    intermediate_question: "Stored question".to_string(),
                    final_synthesis_instructions: "Stored instructions".to_string(),
                },
            )
            .await
            .unwrap();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A"),
            ScriptedReply::text("Done"),
        ]));

        harness
            .orchestrator(provider.clone())
            .run(job.id(), &settings())
            .await
            .unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0][1].content.starts_with("Stored question"));
    }

    #[tokio::test]
    async fn test_empty_reduce_output_fails_job() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A"),
            ScriptedReply::text("   "),
        ]));

        let err = harness
            .orchestrator(provider)
            .run(job.id(), &settings())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::EmptyResult));
        let stored = harness.job(job.id()).await;
        assert_eq!(stored.status(), AnalysisStatus::Failed);
        assert!(stored.final_result().is_none());
    }

    #[tokio::test]
    async fn test_backend_error_fails_only_that_session() {
        let harness = Harness::new();
        let job = harness.create_job(&[1, 2], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::error("connection reset"),
            ScriptedReply::text("Summary A"),
            ScriptedReply::text("Final"),
        ]));

        let outcome = harness
            .orchestrator(provider)
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Completed);
        assert_eq!(
            harness.summary_statuses(job.id()).await,
            vec![(1, SummaryStatus::Failed), (2, SummaryStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn test_stalled_stream_fails_the_session() {
        let harness = Harness::new();
        let job = harness.create_job(&[1, 2], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::stalled(),
            ScriptedReply::text("Summary A"),
            ScriptedReply::text("Final"),
        ]));
        let settings = RunSettings {
            stall_timeout: Some(Duration::from_millis(20)),
            ..settings()
        };

        let outcome = harness
            .orchestrator(provider)
            .run(job.id(), &settings)
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Completed);
        assert_eq!(
            harness.summary_statuses(job.id()).await[0],
            (1, SummaryStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_tokens_are_coalesced_between_flushes() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("one two three four"),
            ScriptedReply::text("Final"),
        ]));
        let settings = RunSettings {
            flush_interval: Duration::from_secs(3600),
            ..settings()
        };

        harness
            .orchestrator(provider)
            .run(job.id(), &settings)
            .await
            .unwrap();

        let map_tokens: Vec<String> = harness
            .publisher
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                AnalysisEventKind::MapToken { delta, .. } => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(map_tokens, vec!["one two three four".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_resets_interrupted_summaries() {
        let harness = Harness::new();
        let job = harness.create_job(&[2], false).await;
        harness
            .jobs
            .transition(job.id(), StatusChange::to(AnalysisStatus::Mapping))
            .await
            .unwrap();
        let summary = &harness.jobs.summaries_for_job(job.id()).await.unwrap()[0];
        harness.jobs.mark_summary_processing(summary.id).await.unwrap();
        let provider = Arc::new(ScriptedInferenceProvider::new(vec![
            ScriptedReply::text("Summary A"),
            ScriptedReply::text("Final"),
        ]));

        let outcome = harness
            .orchestrator(provider)
            .run(job.id(), &settings())
            .await
            .unwrap();

        assert_eq!(outcome, AnalysisOutcome::Completed);
        assert_eq!(
            harness.summary_statuses(job.id()).await,
            vec![(2, SummaryStatus::Completed)]
        );
    }

    #[test]
    fn test_order_for_reduce_puts_unknown_dates_last() {
        let date = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
        let input = |id: i32, d: Option<NaiveDate>| ReduceInput {
            session_id: id,
            session_name: format!("S{id}"),
            session_date: d,
            summary_text: String::new(),
        };
        let mut inputs = vec![
            input(4, None),
            input(3, date("2025-02-01")),
            input(2, date("2025-01-01")),
            input(1, date("2025-02-01")),
        ];

        order_for_reduce(&mut inputs);

        let ids: Vec<i32> = inputs.iter().map(|i| i.session_id).collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);
    }
}
