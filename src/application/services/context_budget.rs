use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::application::ports::TokenCounter;
use crate::application::services::prompt_templates::{
    ANALYST_SYSTEM_PROMPT, MAP_GENERIC, TemplateError,
};
use crate::domain::repositories::{SessionRepository, TranscriptRepository};

#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "Context budget exceeded for model '{model}': prompt ({prompt_tokens}) + largest session \
         ({transcript_tokens}) + answer reserve ({answer_reserve}) = {total} tokens, limit is {model_limit}"
    )]
    Exceeded {
        model: String,
        prompt_tokens: usize,
        transcript_tokens: usize,
        answer_reserve: usize,
        total: usize,
        model_limit: usize,
    },
    #[error("Session not found: {0}")]
    SessionNotFound(i32),
    #[error("Failed to read session data: {0}")]
    RepositoryError(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Token footprint of the largest single map call of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// The question plus the system prompt and map template around it.
    pub prompt_tokens: usize,
    /// Largest session transcript, including its name and date header.
    pub max_transcript_tokens: usize,
    pub answer_reserve: usize,
    pub model_limit: usize,
}

impl ContextBudget {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.max_transcript_tokens + self.answer_reserve
    }

    pub fn fits(&self) -> bool {
        self.total() <= self.model_limit
    }
}

/// Known models and their context windows.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    pub default_model: String,
    pub default_context_limit: usize,
    pub context_limits: HashMap<String, usize>,
}

impl ModelCatalog {
    /// The requested model, or the default one when none was given.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string()
    }

    pub fn context_limit(&self, model: &str) -> usize {
        self.context_limits
            .get(model)
            .copied()
            .unwrap_or(self.default_context_limit)
    }
}

pub struct ContextBudgetCalculator {
    session_repository: Arc<dyn SessionRepository>,
    transcript_repository: Arc<dyn TranscriptRepository>,
    token_counter: Arc<dyn TokenCounter>,
    answer_reserve: usize,
}

impl ContextBudgetCalculator {
    pub fn new(
        session_repository: Arc<dyn SessionRepository>,
        transcript_repository: Arc<dyn TranscriptRepository>,
        token_counter: Arc<dyn TokenCounter>,
        answer_reserve: usize,
    ) -> Self {
        Self {
            session_repository,
            transcript_repository,
            token_counter,
            answer_reserve,
        }
    }

    pub fn answer_reserve(&self) -> usize {
        self.answer_reserve
    }

    /// Only one transcript is resident per map call, so the budget uses the
    /// largest transcript rather than the sum.
    pub async fn check(
        &self,
        prompt: &str,
        model: &str,
        model_limit: usize,
        session_ids: &[i32],
    ) -> Result<ContextBudget, BudgetError> {
        let prompt_tokens = self.framed_prompt_tokens(prompt)?;

        let mut max_transcript_tokens = 0;
        for &session_id in session_ids {
            let tokens = self.transcript_tokens(session_id).await?;
            max_transcript_tokens = max_transcript_tokens.max(tokens);
        }

        let budget = ContextBudget {
            prompt_tokens,
            max_transcript_tokens,
            answer_reserve: self.answer_reserve,
            model_limit,
        };

        debug!(
            "Context budget for model {}: {} of {} tokens",
            model,
            budget.total(),
            model_limit
        );

        if !budget.fits() {
            return Err(BudgetError::Exceeded {
                model: model.to_string(),
                prompt_tokens,
                transcript_tokens: max_transcript_tokens,
                answer_reserve: self.answer_reserve,
                total: budget.total(),
                model_limit,
            });
        }

        Ok(budget)
    }

    /// Session slots are left empty here and counted per session.
    fn framed_prompt_tokens(&self, prompt: &str) -> Result<usize, BudgetError> {
        let framed = MAP_GENERIC.render(&[
            ("question", prompt),
            ("session_name", ""),
            ("session_date", ""),
            ("transcript", ""),
        ])?;
        Ok(self.token_counter.count(ANALYST_SYSTEM_PROMPT) + self.token_counter.count(&framed))
    }

    async fn transcript_tokens(&self, session_id: i32) -> Result<usize, BudgetError> {
        let session = self
            .session_repository
            .find_by_id(session_id)
            .await
            .map_err(|e| BudgetError::RepositoryError(e.to_string()))?
            .ok_or(BudgetError::SessionNotFound(session_id))?;

        let header = self.token_counter.count(session.display_name())
            + self.token_counter.count(&session.date.to_string());

        if let Some(count) = session.transcript_token_count.filter(|c| *c >= 0) {
            return Ok(header + count as usize);
        }

        let text = self
            .transcript_repository
            .get_full_text(session_id)
            .await
            .map_err(|e| BudgetError::RepositoryError(e.to_string()))?;
        Ok(header + self.token_counter.count(&text))
    }
}
