use async_trait::async_trait;
use diesel::prelude::*;

use crate::domain::entities::SessionInfo;
use crate::domain::repositories::{SessionRepository, SessionRepositoryError, TranscriptRepository};
use crate::infrastructure::database::connection::DbPool;
use crate::infrastructure::database::models::SessionModel;
use crate::infrastructure::database::schema::{sessions, transcript_paragraphs};

/// Read-only access to the session and transcript tables of the session
/// management service.
pub struct PostgresSessionRepository {
    pool: DbPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, query: F) -> Result<T, SessionRepositoryError>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self.pool.get().map_err(|e| {
            SessionRepositoryError::DatabaseError(format!("Failed to get database connection: {}", e))
        })?;

        tokio::task::spawn_blocking(move || query(&mut conn))
            .await
            .map_err(|e| SessionRepositoryError::DatabaseError(format!("Task join error: {}", e)))?
            .map_err(|e| SessionRepositoryError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn find_by_id(
        &self,
        session_id: i32,
    ) -> Result<Option<SessionInfo>, SessionRepositoryError> {
        let model = self
            .run(move |conn| {
                sessions::table
                    .find(session_id)
                    .select(SessionModel::as_select())
                    .first::<SessionModel>(conn)
                    .optional()
            })
            .await?;

        Ok(model.map(SessionInfo::from))
    }
}

#[async_trait]
impl TranscriptRepository for PostgresSessionRepository {
    async fn get_full_text(&self, session_id: i32) -> Result<String, SessionRepositoryError> {
        let paragraphs = self
            .run(move |conn| {
                transcript_paragraphs::table
                    .filter(transcript_paragraphs::session_id.eq(session_id))
                    .order(transcript_paragraphs::paragraph_index.asc())
                    .select(transcript_paragraphs::text)
                    .load::<String>(conn)
            })
            .await?;

        Ok(paragraphs.join("\n"))
    }
}
