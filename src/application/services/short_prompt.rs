use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::ports::InferenceProvider;
use crate::application::ports::inference_provider::{ChatMessage, InferenceOptions};
use crate::application::services::completion::collect_completion;
use crate::application::services::prompt_templates::SHORT_PROMPT;
use crate::application::services::usage_ledger::{TokenUsage, UsageLedger};
use crate::domain::entities::UsageSource;
use crate::domain::repositories::AnalysisJobRepository;

const MAX_TITLE_WORDS: usize = 8;

/// Reduce a model reply to a single-line title of at most eight words.
pub fn normalize_title(raw: &str) -> Option<String> {
    let first_line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let unquoted = first_line
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '“' | '”'))
        .trim();

    let title = unquoted
        .split_whitespace()
        .take(MAX_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    let title = title.trim_end_matches(['.', ':', ';', ',']).to_string();

    if title.is_empty() { None } else { Some(title) }
}

/// Labels jobs with a short human-readable title. Runs detached from job
/// creation; a failure only leaves the label empty.
pub struct ShortPromptGenerator {
    job_repository: Arc<dyn AnalysisJobRepository>,
    inference: Arc<dyn InferenceProvider>,
    usage_ledger: Arc<UsageLedger>,
}

impl ShortPromptGenerator {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        inference: Arc<dyn InferenceProvider>,
        usage_ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            job_repository,
            inference,
            usage_ledger,
        }
    }

    pub async fn label(&self, job_id: i32, question: &str, model: &str) -> Option<String> {
        let prompt = match SHORT_PROMPT.render(&[("question", question)]) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("Failed to build short prompt for job {}: {}", job_id, e);
                return None;
            }
        };
        let options = InferenceOptions {
            model: model.to_string(),
            context_size: None,
            cancel: CancellationToken::new(),
        };

        let started = Instant::now();
        let result =
            collect_completion(self.inference.as_ref(), vec![ChatMessage::user(prompt)], options)
                .await;
        let usage = result
            .as_ref()
            .map(|(_, usage)| *usage)
            .unwrap_or(TokenUsage::default());
        self.usage_ledger
            .record(UsageSource::AnalysisShortPrompt, model, usage, started.elapsed())
            .await;

        let raw = match result {
            Ok((raw, _)) => raw,
            Err(e) => {
                warn!("Short prompt generation failed for job {}: {}", job_id, e);
                return None;
            }
        };

        let title = normalize_title(&raw)?;
        if let Err(e) = self.job_repository.set_short_prompt(job_id, &title).await {
            warn!("Failed to store short prompt for job {}: {}", job_id, e);
            return None;
        }

        info!("Labelled analysis job {} as '{}'", job_id, title);
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::NewAnalysisJob;
    use crate::testing::{
        InMemoryAnalysisJobRepository, RecordingUsageRepository, ScriptedInferenceProvider,
        ScriptedReply,
    };

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("\"Sleep changes across spring sessions.\"\n"),
            Some("Sleep changes across spring sessions".to_string())
        );
        assert_eq!(
            normalize_title("Title: one two three four five six seven eight nine ten"),
            Some("one two three four five six seven eight".to_string())
        );
        assert_eq!(normalize_title("  \n  "), None);
    }

    #[tokio::test]
    async fn test_label_stores_title() {
        let jobs = Arc::new(InMemoryAnalysisJobRepository::default());
        let job = jobs
            .create(&NewAnalysisJob {
                original_prompt: "How did the client's sleep change?".to_string(),
                session_ids: vec![1],
                model_name: None,
                context_size: None,
                use_advanced_strategy: false,
            })
            .await
            .unwrap();
        let usage = Arc::new(RecordingUsageRepository::default());
        let generator = ShortPromptGenerator::new(
            jobs.clone(),
            Arc::new(ScriptedInferenceProvider::new(vec![ScriptedReply::text(
                "Client sleep over time",
            )])),
            Arc::new(UsageLedger::new(usage.clone())),
        );

        let title = generator
            .label(job.id(), job.original_prompt(), "llama3")
            .await;

        assert_eq!(title.as_deref(), Some("Client sleep over time"));
        let stored = jobs.find_by_id(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.short_prompt(), Some("Client sleep over time"));
        assert_eq!(usage.records()[0].source, UsageSource::AnalysisShortPrompt);
    }

    #[tokio::test]
    async fn test_label_failure_leaves_job_untouched() {
        let jobs = Arc::new(InMemoryAnalysisJobRepository::default());
        let job = jobs
            .create(&NewAnalysisJob {
                original_prompt: "q".to_string(),
                session_ids: vec![1],
                model_name: None,
                context_size: None,
                use_advanced_strategy: false,
            })
            .await
            .unwrap();
        let generator = ShortPromptGenerator::new(
            jobs.clone(),
            Arc::new(ScriptedInferenceProvider::new(vec![ScriptedReply::error(
                "backend down",
            )])),
            Arc::new(UsageLedger::new(Arc::new(RecordingUsageRepository::default()))),
        );

        assert!(generator.label(job.id(), "q", "llama3").await.is_none());
        let stored = jobs.find_by_id(job.id()).await.unwrap().unwrap();
        assert!(stored.short_prompt().is_none());
    }
}
