use serde::{Deserialize, Serialize};

use crate::application::use_cases::cancel_analysis_job::CancelAnalysisJobResponse;
use crate::application::use_cases::create_analysis_job::CreateAnalysisJobResponse;
use crate::application::use_cases::get_analysis_job::{AnalysisJobDetails, SummaryDetails};
use crate::domain::entities::AnalysisJob;
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy, SummaryStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisJobRequestDto {
    pub prompt: String,
    pub session_ids: Vec<i32>,
    pub model_name: Option<String>,
    #[serde(default)]
    pub use_advanced_strategy: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBudgetDto {
    pub prompt_tokens: usize,
    pub max_transcript_tokens: usize,
    pub answer_reserve: usize,
    pub total_tokens: usize,
    pub model_limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisJobResponseDto {
    pub job_id: i32,
    pub status: AnalysisStatus,
    pub budget: ContextBudgetDto,
}

impl From<CreateAnalysisJobResponse> for CreateAnalysisJobResponseDto {
    fn from(response: CreateAnalysisJobResponse) -> Self {
        let budget = response.budget;
        Self {
            job_id: response.job.id(),
            status: response.job.status(),
            budget: ContextBudgetDto {
                prompt_tokens: budget.prompt_tokens,
                max_transcript_tokens: budget.max_transcript_tokens,
                answer_reserve: budget.answer_reserve,
                total_tokens: budget.total(),
                model_limit: budget.model_limit,
            },
        }
    }
}

/// One row of the job list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJobListItemDto {
    pub id: i32,
    pub original_prompt: String,
    pub short_prompt: Option<String>,
    pub status: AnalysisStatus,
    pub model_name: Option<String>,
    pub use_advanced_strategy: bool,
    pub session_ids: Vec<i32>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<&AnalysisJob> for AnalysisJobListItemDto {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            id: job.id(),
            original_prompt: job.original_prompt().to_string(),
            short_prompt: job.short_prompt().map(str::to_string),
            status: job.status(),
            model_name: job.model_name().map(str::to_string),
            use_advanced_strategy: job.use_advanced_strategy(),
            session_ids: job.session_ids().to_vec(),
            created_at: job.created_at().to_rfc3339(),
            completed_at: job.completed_at().map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateSummaryDto {
    pub id: i32,
    pub session_id: i32,
    pub session_name: Option<String>,
    pub session_date: Option<String>,
    pub status: SummaryStatus,
    pub summary_text: Option<String>,
    pub error_message: Option<String>,
}

impl From<SummaryDetails> for IntermediateSummaryDto {
    fn from(details: SummaryDetails) -> Self {
        let summary = details.summary;
        Self {
            id: summary.id,
            session_id: summary.session_id,
            session_name: details.session_name,
            session_date: details.session_date.map(|d| d.format("%Y-%m-%d").to_string()),
            status: summary.status,
            summary_text: summary.summary_text,
            error_message: summary.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJobDto {
    pub id: i32,
    pub original_prompt: String,
    pub short_prompt: Option<String>,
    pub status: AnalysisStatus,
    pub model_name: Option<String>,
    pub context_size: Option<i32>,
    pub use_advanced_strategy: bool,
    pub strategy: Option<AnalysisStrategy>,
    pub final_result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub is_terminal: bool,
    pub summaries: Vec<IntermediateSummaryDto>,
}

impl From<AnalysisJobDetails> for AnalysisJobDto {
    fn from(details: AnalysisJobDetails) -> Self {
        let job = details.job;
        Self {
            id: job.id(),
            original_prompt: job.original_prompt().to_string(),
            short_prompt: job.short_prompt().map(str::to_string),
            status: job.status(),
            model_name: job.model_name().map(str::to_string),
            context_size: job.context_size(),
            use_advanced_strategy: job.use_advanced_strategy(),
            strategy: job.strategy().cloned(),
            final_result: job.final_result().map(str::to_string),
            error_message: job.error_message().map(str::to_string),
            created_at: job.created_at().to_rfc3339(),
            completed_at: job.completed_at().map(|t| t.to_rfc3339()),
            duration_ms: job.duration().map(|d| d.num_milliseconds()),
            is_terminal: job.status().is_terminal(),
            summaries: details
                .summaries
                .into_iter()
                .map(IntermediateSummaryDto::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAnalysisJobResponseDto {
    pub job_id: i32,
    pub status: AnalysisStatus,
    pub message: String,
}

impl From<CancelAnalysisJobResponse> for CancelAnalysisJobResponseDto {
    fn from(response: CancelAnalysisJobResponse) -> Self {
        Self {
            job_id: response.job_id,
            status: response.status,
            message: response.message,
        }
    }
}
