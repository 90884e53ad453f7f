use async_trait::async_trait;
use diesel::prelude::*;

use crate::domain::entities::UsageRecord;
use crate::domain::repositories::{UsageRepository, UsageRepositoryError};
use crate::infrastructure::database::connection::DbPool;
use crate::infrastructure::database::models::NewUsageLogModel;
use crate::infrastructure::database::schema::usage_logs;

pub struct PostgresUsageRepository {
    pool: DbPool,
}

impl PostgresUsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    async fn record(&self, record: &UsageRecord) -> Result<(), UsageRepositoryError> {
        let new_log = NewUsageLogModel::from(record);
        let mut conn = self.pool.get().map_err(|e| {
            UsageRepositoryError::DatabaseError(format!("Failed to get database connection: {}", e))
        })?;

        tokio::task::spawn_blocking(move || {
            diesel::insert_into(usage_logs::table)
                .values(&new_log)
                .execute(&mut conn)
                .map_err(|e| {
                    UsageRepositoryError::DatabaseError(format!("Failed to save usage log: {}", e))
                })
        })
        .await
        .map_err(|e| UsageRepositoryError::DatabaseError(format!("Task join error: {}", e)))??;

        Ok(())
    }
}
