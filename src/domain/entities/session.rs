use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Read-only view of a therapy session owned by the session CRUD subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: i32,
    pub session_name: String,
    pub file_name: String,
    pub date: NaiveDate,
    pub transcript_token_count: Option<i32>,
}

impl SessionInfo {
    pub fn display_name(&self) -> &str {
        if self.session_name.trim().is_empty() {
            &self.file_name
        } else {
            &self.session_name
        }
    }
}
