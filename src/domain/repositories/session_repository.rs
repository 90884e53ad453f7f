use async_trait::async_trait;

use crate::domain::entities::SessionInfo;

#[derive(Debug, thiserror::Error)]
pub enum SessionRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, session_id: i32)
    -> Result<Option<SessionInfo>, SessionRepositoryError>;
}

#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    /// Full transcript text of a session, empty when nothing was transcribed.
    async fn get_full_text(&self, session_id: i32) -> Result<String, SessionRepositoryError>;
}
