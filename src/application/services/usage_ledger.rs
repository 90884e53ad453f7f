use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::entities::{UsageRecord, UsageSource};
use crate::domain::repositories::UsageRepository;

/// Token counts reported by the backend at the end of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
}

/// Writes one ledger row per inference call. Cost accounting is auxiliary, so
/// write failures are logged and dropped.
pub struct UsageLedger {
    usage_repository: Arc<dyn UsageRepository>,
}

impl UsageLedger {
    pub fn new(usage_repository: Arc<dyn UsageRepository>) -> Self {
        Self { usage_repository }
    }

    pub async fn record(
        &self,
        source: UsageSource,
        model: &str,
        usage: TokenUsage,
        duration: Duration,
    ) {
        let record = UsageRecord {
            call_type: UsageRecord::LLM_CALL.to_string(),
            source,
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            duration_ms: duration.as_millis().min(i64::MAX as u128) as i64,
        };

        match self.usage_repository.record(&record).await {
            Ok(()) => debug!(
                "Recorded {} usage for model {} ({} ms)",
                source.as_str(),
                model,
                record.duration_ms
            ),
            Err(e) => warn!("Failed to record {} usage: {}", source.as_str(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingUsageRepository;

    #[tokio::test]
    async fn test_records_usage() {
        let repository = Arc::new(RecordingUsageRepository::default());
        let ledger = UsageLedger::new(repository.clone());

        ledger
            .record(
                UsageSource::AnalysisMap,
                "llama3",
                TokenUsage {
                    prompt_tokens: Some(120),
                    completion_tokens: Some(30),
                },
                Duration::from_millis(1500),
            )
            .await;

        let records = repository.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, UsageSource::AnalysisMap);
        assert_eq!(records[0].call_type, "llm");
        assert_eq!(records[0].prompt_tokens, Some(120));
        assert_eq!(records[0].duration_ms, 1500);
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let repository = Arc::new(RecordingUsageRepository::failing());
        let ledger = UsageLedger::new(repository.clone());

        ledger
            .record(
                UsageSource::AnalysisReduce,
                "llama3",
                TokenUsage::default(),
                Duration::from_millis(10),
            )
            .await;

        assert!(repository.records().is_empty());
    }
}
