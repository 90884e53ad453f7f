use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    id: i32,
    original_prompt: String,
    short_prompt: Option<String>,
    session_ids: Vec<i32>,
    model_name: Option<String>,
    context_size: Option<i32>,
    use_advanced_strategy: bool,
    strategy: Option<AnalysisStrategy>,
    status: AnalysisStatus,
    final_result: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

/// Input for a job that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysisJob {
    pub original_prompt: String,
    pub session_ids: Vec<i32>,
    pub model_name: Option<String>,
    pub context_size: Option<i32>,
    pub use_advanced_strategy: bool,
}

/// A requested status write. `final_result` is only carried into `completed`
/// and `error_message` only into `failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: AnalysisStatus,
    pub final_result: Option<String>,
    pub error_message: Option<String>,
}

impl StatusChange {
    pub fn to(status: AnalysisStatus) -> Self {
        Self {
            status,
            final_result: None,
            error_message: None,
        }
    }

    pub fn completed(final_result: String) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            final_result: Some(final_result),
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            final_result: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn canceled() -> Self {
        Self::to(AnalysisStatus::Canceled)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.status {
            AnalysisStatus::Completed => {
                if self.final_result.as_deref().is_none_or(|r| r.trim().is_empty()) {
                    return Err("A completed job requires a non-empty final result".to_string());
                }
            }
            _ if self.final_result.is_some() => {
                return Err(format!("Only completed jobs carry a final result, got {}", self.status));
            }
            _ => {}
        }

        match self.status {
            AnalysisStatus::Failed if self.error_message.is_none() => {
                Err("A failed job requires an error message".to_string())
            }
            AnalysisStatus::Failed => Ok(()),
            _ if self.error_message.is_some() => {
                Err(format!("Only failed jobs carry an error message, got {}", self.status))
            }
            _ => Ok(()),
        }
    }
}

impl AnalysisJob {
    /// Create an AnalysisJob from database values (for repository reconstruction)
    #[allow(clippy::too_many_arguments)]
    pub fn from_database(
        id: i32,
        original_prompt: String,
        short_prompt: Option<String>,
        session_ids: Vec<i32>,
        model_name: Option<String>,
        context_size: Option<i32>,
        use_advanced_strategy: bool,
        strategy: Option<AnalysisStrategy>,
        status: AnalysisStatus,
        final_result: Option<String>,
        error_message: Option<String>,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            original_prompt,
            short_prompt,
            session_ids,
            model_name,
            context_size,
            use_advanced_strategy,
            strategy,
            status,
            final_result,
            error_message,
            created_at,
            completed_at,
        }
    }

    /// A freshly created job as the store would return it.
    pub fn from_new(id: i32, new_job: NewAnalysisJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            original_prompt: new_job.original_prompt,
            short_prompt: None,
            session_ids: new_job.session_ids,
            model_name: new_job.model_name,
            context_size: new_job.context_size,
            use_advanced_strategy: new_job.use_advanced_strategy,
            strategy: None,
            status: AnalysisStatus::Pending,
            final_result: None,
            error_message: None,
            created_at,
            completed_at: None,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    pub fn short_prompt(&self) -> Option<&str> {
        self.short_prompt.as_deref()
    }

    pub fn session_ids(&self) -> &[i32] {
        &self.session_ids
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn context_size(&self) -> Option<i32> {
        self.context_size
    }

    pub fn use_advanced_strategy(&self) -> bool {
        self.use_advanced_strategy
    }

    pub fn strategy(&self) -> Option<&AnalysisStrategy> {
        self.strategy.as_ref()
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn final_result(&self) -> Option<&str> {
        self.final_result.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn set_short_prompt(&mut self, short_prompt: String) {
        self.short_prompt = Some(short_prompt);
    }

    pub fn set_strategy(&mut self, strategy: AnalysisStrategy) -> Result<(), String> {
        if !self.use_advanced_strategy {
            return Err("Strategies are only stored for advanced analyses".to_string());
        }

        self.strategy = Some(strategy);
        Ok(())
    }

    /// Apply a status write if the transition is legal. Returns `Ok(false)` when
    /// the current status does not allow it, leaving the job untouched.
    pub fn apply(&mut self, change: &StatusChange) -> Result<bool, String> {
        change.validate()?;

        if !self.status.can_transition_to(change.status) {
            return Ok(false);
        }

        self.status = change.status;
        self.final_result = change.final_result.clone();
        self.error_message = change.error_message.clone();
        if change.status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.created_at)
    }
}
