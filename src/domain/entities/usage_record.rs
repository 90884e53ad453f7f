use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    AnalysisStrategy,
    AnalysisMap,
    AnalysisReduce,
    AnalysisShortPrompt,
}

impl UsageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageSource::AnalysisStrategy => "analysis_strategy",
            UsageSource::AnalysisMap => "analysis_map",
            UsageSource::AnalysisReduce => "analysis_reduce",
            UsageSource::AnalysisShortPrompt => "analysis_short_prompt",
        }
    }
}

/// One inference call, for cost accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub call_type: String,
    pub source: UsageSource,
    pub model: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub duration_ms: i64,
}

impl UsageRecord {
    pub const LLM_CALL: &'static str = "llm";
}
