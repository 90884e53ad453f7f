use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    GeneratingStrategy,
    Mapping,
    Reducing,
    Completed,
    Failed,
    Canceling,
    Canceled,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 8] = [
        AnalysisStatus::Pending,
        AnalysisStatus::GeneratingStrategy,
        AnalysisStatus::Mapping,
        AnalysisStatus::Reducing,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
        AnalysisStatus::Canceling,
        AnalysisStatus::Canceled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Failed | AnalysisStatus::Canceled
        )
    }

    pub fn is_canceling(&self) -> bool {
        matches!(self, AnalysisStatus::Canceling)
    }

    /// Statuses a worker picks back up after a restart.
    pub fn is_resumable(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;

        match (self, next) {
            (Pending, GeneratingStrategy | Mapping | Canceling | Failed) => true,
            (GeneratingStrategy, Pending | Canceling | Failed) => true,
            (Mapping, Reducing | Canceling | Failed) => true,
            (Reducing, Completed | Canceling | Failed) => true,
            (Canceling, Canceled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::GeneratingStrategy => "generating_strategy",
            AnalysisStatus::Mapping => "mapping",
            AnalysisStatus::Reducing => "reducing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::Canceling => "canceling",
            AnalysisStatus::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AnalysisStatus::Pending),
            "generating_strategy" => Ok(AnalysisStatus::GeneratingStrategy),
            "mapping" => Ok(AnalysisStatus::Mapping),
            "reducing" => Ok(AnalysisStatus::Reducing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            "canceling" => Ok(AnalysisStatus::Canceling),
            "canceled" => Ok(AnalysisStatus::Canceled),
            _ => Err(format!("Invalid analysis status: {}", s)),
        }
    }
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        AnalysisStatus::Pending
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
