use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::InferenceProvider;
use crate::application::ports::inference_provider::{ChatMessage, InferenceError, InferenceOptions};
use crate::application::services::completion::collect_completion;
use crate::application::services::prompt_templates::{
    ANALYST_SYSTEM_PROMPT, STRATEGY_PLANNER, TemplateError,
};
use crate::application::services::usage_ledger::{TokenUsage, UsageLedger};
use crate::domain::entities::UsageSource;
use crate::domain::value_objects::AnalysisStrategy;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is a valid regex")
});

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Strategy generation failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Strategy response is not a valid plan: {0}")]
    InvalidPlan(String),
    #[error("Strategy field '{0}' is empty")]
    EmptyField(&'static str),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Deserialize)]
struct PlannedStrategy {
    intermediate_question: String,
    final_synthesis_instructions: String,
}

/// Parse the planner's reply. A fenced code block, when present, is the only
/// part that is read.
pub fn parse_strategy(raw: &str) -> Result<AnalysisStrategy, StrategyError> {
    let payload = FENCED_BLOCK
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim();

    let planned: PlannedStrategy =
        serde_json::from_str(payload).map_err(|e| StrategyError::InvalidPlan(e.to_string()))?;

    let intermediate_question = planned.intermediate_question.trim().to_string();
    if intermediate_question.is_empty() {
        return Err(StrategyError::EmptyField("intermediate_question"));
    }

    let final_synthesis_instructions = planned.final_synthesis_instructions.trim().to_string();
    if final_synthesis_instructions.is_empty() {
        return Err(StrategyError::EmptyField("final_synthesis_instructions"));
    }

    Ok(AnalysisStrategy {
        intermediate_question,
        final_synthesis_instructions,
    })
}

pub struct StrategyPlanner {
    inference: Arc<dyn InferenceProvider>,
    usage_ledger: Arc<UsageLedger>,
}

impl StrategyPlanner {
    pub fn new(inference: Arc<dyn InferenceProvider>, usage_ledger: Arc<UsageLedger>) -> Self {
        Self {
            inference,
            usage_ledger,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        model: &str,
        context_size: Option<i32>,
    ) -> Result<AnalysisStrategy, StrategyError> {
        let prompt = STRATEGY_PLANNER.render(&[("question", question)])?;
        let messages = vec![
            ChatMessage::system(ANALYST_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let options = InferenceOptions {
            model: model.to_string(),
            context_size,
            cancel: CancellationToken::new(),
        };

        let started = Instant::now();
        let result = collect_completion(self.inference.as_ref(), messages, options).await;
        let usage = result
            .as_ref()
            .map(|(_, usage)| *usage)
            .unwrap_or(TokenUsage::default());
        self.usage_ledger
            .record(UsageSource::AnalysisStrategy, model, usage, started.elapsed())
            .await;

        let (raw, _) = result?;
        debug!("Strategy planner replied with {} characters", raw.len());

        let strategy = parse_strategy(&raw)?;
        info!("Generated analysis strategy with model {}", model);
        Ok(strategy)
    }
}
