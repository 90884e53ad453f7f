//! In-memory doubles for the ports, shared by the unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::application::ports::inference_provider::{
    ChatMessage, InferenceChunk, InferenceError, InferenceOptions, InferenceStream,
};
use crate::application::ports::job_queue::{JobQueueError, QueueHealth};
use crate::application::ports::{
    AnalysisEvent, InferenceProvider, JobQueue, ProgressPublisher, TokenCounter,
};
use crate::domain::entities::{
    AnalysisJob, IntermediateSummary, NewAnalysisJob, SessionInfo, StatusChange, UsageRecord,
};
use crate::domain::repositories::{
    AnalysisJobRepository, JobRepositoryError, SessionRepository, SessionRepositoryError,
    TranscriptRepository, UsageRepository, UsageRepositoryError,
};
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy, SummaryStatus};

pub fn session(id: i32, date: &str, transcript_token_count: Option<i32>) -> SessionInfo {
    SessionInfo {
        id,
        session_name: format!("Session {id}"),
        file_name: format!("session_{id}.wav"),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("test dates are YYYY-MM-DD"),
        transcript_token_count,
    }
}

#[derive(Default)]
struct JobState {
    jobs: BTreeMap<i32, AnalysisJob>,
    summaries: Vec<IntermediateSummary>,
    next_job_id: i32,
    next_summary_id: i32,
}

/// Job store with the same transition rules as the database implementation.
#[derive(Default)]
pub struct InMemoryAnalysisJobRepository {
    state: Mutex<JobState>,
}

impl InMemoryAnalysisJobRepository {
    /// What the cancel endpoint does, callable from synchronous test hooks.
    pub fn request_cancel(&self, job_id: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.apply(&StatusChange::to(AnalysisStatus::Canceling)).unwrap();
        }
    }

    /// Overwrite the status without checking the transition table.
    pub fn force_status(&self, job_id: i32, status: AnalysisStatus) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).expect("job exists");
        *job = AnalysisJob::from_database(
            job.id(),
            job.original_prompt().to_string(),
            job.short_prompt().map(str::to_string),
            job.session_ids().to_vec(),
            job.model_name().map(str::to_string),
            job.context_size(),
            job.use_advanced_strategy(),
            job.strategy().cloned(),
            status,
            job.final_result().map(str::to_string),
            job.error_message().map(str::to_string),
            job.created_at(),
            status.is_terminal().then(Utc::now),
        );
    }

    fn update_summary<F>(&self, summary_id: i32, update: F) -> Result<(), JobRepositoryError>
    where
        F: FnOnce(&mut IntermediateSummary),
    {
        let mut state = self.state.lock().unwrap();
        let summary = state
            .summaries
            .iter_mut()
            .find(|s| s.id == summary_id)
            .ok_or(JobRepositoryError::SummaryNotFound(summary_id))?;
        update(summary);
        Ok(())
    }
}

#[async_trait]
impl AnalysisJobRepository for InMemoryAnalysisJobRepository {
    async fn create(&self, job: &NewAnalysisJob) -> Result<AnalysisJob, JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.next_job_id += 1;
        let job_id = state.next_job_id;

        for &session_id in &job.session_ids {
            state.next_summary_id += 1;
            let summary_id = state.next_summary_id;
            state
                .summaries
                .push(IntermediateSummary::pending(summary_id, job_id, session_id));
        }

        let created = AnalysisJob::from_new(job_id, job.clone(), Utc::now());
        state.jobs.insert(job_id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, job_id: i32) -> Result<Option<AnalysisJob>, JobRepositoryError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn list(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError> {
        Ok(self.state.lock().unwrap().jobs.values().rev().cloned().collect())
    }

    async fn find_status(&self, job_id: i32) -> Result<Option<AnalysisStatus>, JobRepositoryError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).map(|j| j.status()))
    }

    async fn find_unfinished(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| !j.status().is_terminal())
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        job_id: i32,
        change: StatusChange,
    ) -> Result<bool, JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobRepositoryError::NotFound(job_id))?;
        job.apply(&change).map_err(JobRepositoryError::ValidationError)
    }

    async fn save_strategy(
        &self,
        job_id: i32,
        strategy: &AnalysisStrategy,
    ) -> Result<(), JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobRepositoryError::NotFound(job_id))?;
        job.set_strategy(strategy.clone())
            .map_err(JobRepositoryError::ValidationError)
    }

    async fn set_short_prompt(
        &self,
        job_id: i32,
        short_prompt: &str,
    ) -> Result<(), JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobRepositoryError::NotFound(job_id))?;
        job.set_short_prompt(short_prompt.to_string());
        Ok(())
    }

    async fn delete(&self, job_id: i32) -> Result<bool, JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        let removed = state.jobs.remove(&job_id).is_some();
        state.summaries.retain(|s| s.analysis_job_id != job_id);
        Ok(removed)
    }

    async fn summaries_for_job(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .summaries
            .iter()
            .filter(|s| s.analysis_job_id == job_id)
            .cloned()
            .collect())
    }

    async fn pending_summaries(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError> {
        Ok(self
            .summaries_for_job(job_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SummaryStatus::Pending)
            .collect())
    }

    async fn reset_processing_summaries(&self, job_id: i32) -> Result<usize, JobRepositoryError> {
        let mut state = self.state.lock().unwrap();
        let mut reset = 0;
        for summary in state
            .summaries
            .iter_mut()
            .filter(|s| s.analysis_job_id == job_id && s.status == SummaryStatus::Processing)
        {
            summary.status = SummaryStatus::Pending;
            reset += 1;
        }
        Ok(reset)
    }

    async fn mark_summary_processing(&self, summary_id: i32) -> Result<(), JobRepositoryError> {
        self.update_summary(summary_id, |s| s.status = SummaryStatus::Processing)
    }

    async fn complete_summary(
        &self,
        summary_id: i32,
        summary_text: &str,
    ) -> Result<(), JobRepositoryError> {
        self.update_summary(summary_id, |s| {
            s.status = SummaryStatus::Completed;
            s.summary_text = Some(summary_text.to_string());
            s.error_message = None;
        })
    }

    async fn fail_summary(
        &self,
        summary_id: i32,
        error_message: &str,
    ) -> Result<(), JobRepositoryError> {
        self.update_summary(summary_id, |s| {
            s.status = SummaryStatus::Failed;
            s.error_message = Some(error_message.to_string());
        })
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<i32, (SessionInfo, String)>>,
}

impl InMemorySessionStore {
    pub fn insert(&self, session: SessionInfo, transcript: &str) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, (session, transcript.to_string()));
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionStore {
    async fn find_by_id(
        &self,
        session_id: i32,
    ) -> Result<Option<SessionInfo>, SessionRepositoryError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(s, _)| s.clone()))
    }
}

#[async_trait]
impl TranscriptRepository for InMemorySessionStore {
    async fn get_full_text(&self, session_id: i32) -> Result<String, SessionRepositoryError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(_, t)| t.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingUsageRepository {
    records: Mutex<Vec<UsageRecord>>,
    fail: bool,
}

impl RecordingUsageRepository {
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageRepository for RecordingUsageRepository {
    async fn record(&self, record: &UsageRecord) -> Result<(), UsageRepositoryError> {
        if self.fail {
            return Err(UsageRepositoryError::DatabaseError(
                "usage table unavailable".to_string(),
            ));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<AnalysisEvent>>,
    closed: Mutex<Vec<i32>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AnalysisEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<i32> {
        self.closed.lock().unwrap().clone()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, event: AnalysisEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn close(&self, job_id: i32) {
        self.closed.lock().unwrap().push(job_id);
    }
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    enqueued: Mutex<Vec<i32>>,
    closed: bool,
}

impl InMemoryJobQueue {
    /// A queue whose workers are gone; every enqueue fails.
    pub fn closed() -> Self {
        Self {
            enqueued: Mutex::new(Vec::new()),
            closed: true,
        }
    }

    pub fn enqueued(&self) -> Vec<i32> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: i32) -> Result<(), JobQueueError> {
        if self.closed {
            return Err(JobQueueError::ConnectionError("queue closed".to_string()));
        }
        let mut enqueued = self.enqueued.lock().unwrap();
        if !enqueued.contains(&job_id) {
            enqueued.push(job_id);
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize, JobQueueError> {
        Ok(self.enqueued.lock().unwrap().len())
    }

    async fn is_empty(&self) -> Result<bool, JobQueueError> {
        Ok(self.enqueued.lock().unwrap().is_empty())
    }

    async fn health_check(&self) -> Result<QueueHealth, JobQueueError> {
        let size = self.enqueued.lock().unwrap().len();
        Ok(QueueHealth {
            queue_size: size,
            in_flight: Vec::new(),
            total_enqueued: size as u64,
            total_dequeued: 0,
            total_failed: 0,
            is_healthy: true,
            last_activity: None,
        })
    }
}

pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

enum ReplyKind {
    Text(String),
    Error(String),
    Broken { text: String, message: String },
    Stalled,
}

/// One canned backend response.
pub struct ScriptedReply {
    kind: ReplyKind,
    hook: Option<(usize, Hook)>,
}

impl ScriptedReply {
    /// Streamed word by word, followed by a usage chunk.
    pub fn text(text: &str) -> Self {
        Self {
            kind: ReplyKind::Text(text.to_string()),
            hook: None,
        }
    }

    /// The request itself fails.
    pub fn error(message: &str) -> Self {
        Self {
            kind: ReplyKind::Error(message.to_string()),
            hook: None,
        }
    }

    /// Streams `text`, then fails instead of reporting usage.
    pub fn broken(text: &str, message: &str) -> Self {
        Self {
            kind: ReplyKind::Broken {
                text: text.to_string(),
                message: message.to_string(),
            },
            hook: None,
        }
    }

    /// A stream that never yields.
    pub fn stalled() -> Self {
        Self {
            kind: ReplyKind::Stalled,
            hook: None,
        }
    }

    /// Run `hook` just before the `n`th delta is handed out.
    pub fn on_delta(mut self, n: usize, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some((n, Arc::new(hook)));
        self
    }
}

/// Replays scripted replies in order and records every request.
pub struct ScriptedInferenceProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    context_sizes: Mutex<Vec<Option<i32>>>,
}

impl ScriptedInferenceProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            context_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// The context size sent with each call, in call order.
    pub fn context_sizes(&self) -> Vec<Option<i32>> {
        self.context_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedInferenceProvider {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: InferenceOptions,
    ) -> Result<InferenceStream, InferenceError> {
        self.calls.lock().unwrap().push(messages);
        self.context_sizes.lock().unwrap().push(options.context_size);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InferenceError::ApiError("no scripted reply left".to_string()))?;

        let (text, failure) = match reply.kind {
            ReplyKind::Text(text) => (text, None),
            ReplyKind::Broken { text, message } => (text, Some(message)),
            ReplyKind::Error(message) => return Err(InferenceError::NetworkError(message)),
            ReplyKind::Stalled => {
                return Ok(futures::stream::pending::<Result<InferenceChunk, InferenceError>>().boxed());
            }
        };

        let mut chunks: Vec<Result<InferenceChunk, InferenceError>> = text
            .split_inclusive(' ')
            .map(|delta| Ok(InferenceChunk::Delta(delta.to_string())))
            .collect();
        chunks.push(match failure {
            Some(message) => Err(InferenceError::StreamError(message)),
            None => Ok(InferenceChunk::Usage {
                prompt_tokens: Some(100),
                completion_tokens: Some(text.split_whitespace().count() as i32),
            }),
        });

        let stream = futures::stream::unfold(
            (chunks.into_iter(), 0usize, reply.hook, options.cancel),
            |(mut chunks, mut emitted, hook, cancel)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let chunk = chunks.next()?;
                if matches!(chunk, Ok(InferenceChunk::Delta(_))) {
                    emitted += 1;
                    if let Some((n, hook)) = &hook {
                        if *n == emitted {
                            hook();
                        }
                    }
                }
                Some((chunk, (chunks, emitted, hook, cancel)))
            },
        );
        Ok(stream.boxed())
    }
}
