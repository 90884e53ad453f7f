use async_trait::async_trait;

use crate::domain::entities::UsageRecord;

#[derive(Debug, thiserror::Error)]
pub enum UsageRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> Result<(), UsageRepositoryError>;
}
