use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::value_objects::AnalysisStatus;

/// Progress of a running analysis. Token variants carry only the new text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AnalysisEventKind {
    Status {
        status: AnalysisStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MapStart {
        summary_id: i32,
        session_id: i32,
    },
    MapToken {
        summary_id: i32,
        delta: String,
    },
    MapEnd {
        summary_id: i32,
    },
    MapError {
        summary_id: i32,
        error: String,
    },
    ReduceStart,
    ReduceToken {
        delta: String,
    },
    ReduceEnd,
}

impl AnalysisEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEventKind::Status { .. } => "status",
            AnalysisEventKind::MapStart { .. } => "map_start",
            AnalysisEventKind::MapToken { .. } => "map_token",
            AnalysisEventKind::MapEnd { .. } => "map_end",
            AnalysisEventKind::MapError { .. } => "map_error",
            AnalysisEventKind::ReduceStart => "reduce_start",
            AnalysisEventKind::ReduceToken { .. } => "reduce_token",
            AnalysisEventKind::ReduceEnd => "reduce_end",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEvent {
    pub job_id: i32,
    #[serde(flatten)]
    pub kind: AnalysisEventKind,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisEvent {
    pub fn new(job_id: i32, kind: AnalysisEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn status(job_id: i32, status: AnalysisStatus, message: Option<String>) -> Self {
        Self::new(job_id, AnalysisEventKind::Status { status, message })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(&self.kind, AnalysisEventKind::Status { status, .. } if status.is_terminal())
    }
}

/// Best-effort fan-out of job progress. Implementations must never block the
/// caller or fail when nobody is listening.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: AnalysisEvent);

    /// No further events will be published for `job_id`.
    fn close(&self, job_id: i32);
}
