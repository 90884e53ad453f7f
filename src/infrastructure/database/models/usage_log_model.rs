use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::entities::UsageRecord;
use crate::infrastructure::database::schema::usage_logs;

#[derive(Debug, Insertable)]
#[diesel(table_name = usage_logs)]
pub struct NewUsageLogModel {
    pub call_type: String,
    pub source: String,
    pub model: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&UsageRecord> for NewUsageLogModel {
    fn from(record: &UsageRecord) -> Self {
        Self {
            call_type: record.call_type.clone(),
            source: record.source.as_str().to_string(),
            model: record.model.clone(),
            prompt_tokens: record.prompt_tokens,
            completion_tokens: record.completion_tokens,
            duration_ms: record.duration_ms,
            created_at: Utc::now(),
        }
    }
}
