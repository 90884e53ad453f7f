use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use std::collections::HashMap;

use crate::domain::entities::{AnalysisJob, IntermediateSummary, NewAnalysisJob, StatusChange};
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError};
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy, SummaryStatus};
use crate::infrastructure::database::connection::DbPool;
use crate::infrastructure::database::models::{
    AnalysisJobModel, JobSessionModel, NewAnalysisJobModel, NewSummaryModel, StatusChangeModel,
    SummaryModel, UpdateSummaryModel,
};
use crate::infrastructure::database::schema::{
    analysis_job_sessions, analysis_jobs, intermediate_summaries,
};

impl From<diesel::result::Error> for JobRepositoryError {
    fn from(error: diesel::result::Error) -> Self {
        JobRepositoryError::DatabaseError(error.to_string())
    }
}

const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "canceled"];

pub struct PostgresAnalysisJobRepository {
    pool: DbPool,
}

impl PostgresAnalysisJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run `query` on a pooled connection off the async runtime.
    async fn run<T, F>(&self, query: F) -> Result<T, JobRepositoryError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, JobRepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self.pool.get().map_err(|e| {
            JobRepositoryError::DatabaseError(format!("Failed to get database connection: {}", e))
        })?;

        tokio::task::spawn_blocking(move || query(&mut conn))
            .await
            .map_err(|e| JobRepositoryError::DatabaseError(format!("Task join error: {}", e)))?
    }
}

fn load_session_ids(
    conn: &mut PgConnection,
    job_ids: &[i32],
) -> Result<HashMap<i32, Vec<i32>>, JobRepositoryError> {
    let links = analysis_job_sessions::table
        .filter(analysis_job_sessions::analysis_job_id.eq_any(job_ids))
        .order((
            analysis_job_sessions::analysis_job_id.asc(),
            analysis_job_sessions::position.asc(),
        ))
        .select(JobSessionModel::as_select())
        .load::<JobSessionModel>(conn)?;

    let mut by_job: HashMap<i32, Vec<i32>> = HashMap::new();
    for link in links {
        by_job
            .entry(link.analysis_job_id)
            .or_default()
            .push(link.session_id);
    }
    Ok(by_job)
}

fn into_jobs(
    conn: &mut PgConnection,
    models: Vec<AnalysisJobModel>,
) -> Result<Vec<AnalysisJob>, JobRepositoryError> {
    let job_ids: Vec<i32> = models.iter().map(|m| m.id).collect();
    let mut session_ids = load_session_ids(conn, &job_ids)?;

    models
        .into_iter()
        .map(|model| {
            let ids = session_ids.remove(&model.id).unwrap_or_default();
            model.into_domain(ids).map_err(|e| {
                JobRepositoryError::DatabaseError(format!("Failed to convert job model: {}", e))
            })
        })
        .collect()
}

fn into_summaries(
    models: Vec<SummaryModel>,
) -> Result<Vec<IntermediateSummary>, JobRepositoryError> {
    models
        .into_iter()
        .map(|model| {
            IntermediateSummary::try_from(model).map_err(|e| {
                JobRepositoryError::DatabaseError(format!("Failed to convert summary model: {}", e))
            })
        })
        .collect()
}

fn update_summary(
    conn: &mut PgConnection,
    summary_id: i32,
    changes: UpdateSummaryModel,
) -> Result<(), JobRepositoryError> {
    let updated = diesel::update(intermediate_summaries::table.find(summary_id))
        .set(&changes)
        .execute(conn)?;
    if updated == 0 {
        return Err(JobRepositoryError::SummaryNotFound(summary_id));
    }
    Ok(())
}

#[async_trait]
impl AnalysisJobRepository for PostgresAnalysisJobRepository {
    async fn create(&self, job: &NewAnalysisJob) -> Result<AnalysisJob, JobRepositoryError> {
        let new_job = NewAnalysisJobModel::from(job);
        let session_ids = job.session_ids.clone();

        self.run(move |conn| {
            conn.transaction::<_, JobRepositoryError, _>(|conn| {
                let model = diesel::insert_into(analysis_jobs::table)
                    .values(&new_job)
                    .returning(AnalysisJobModel::as_returning())
                    .get_result::<AnalysisJobModel>(conn)?;

                let links: Vec<JobSessionModel> = session_ids
                    .iter()
                    .enumerate()
                    .map(|(position, &session_id)| JobSessionModel {
                        analysis_job_id: model.id,
                        session_id,
                        position: position as i32,
                    })
                    .collect();
                diesel::insert_into(analysis_job_sessions::table)
                    .values(&links)
                    .execute(conn)?;

                let summaries: Vec<NewSummaryModel> = session_ids
                    .iter()
                    .map(|&session_id| NewSummaryModel::pending(model.id, session_id))
                    .collect();
                diesel::insert_into(intermediate_summaries::table)
                    .values(&summaries)
                    .execute(conn)?;

                model.into_domain(session_ids).map_err(|e| {
                    JobRepositoryError::DatabaseError(format!("Failed to convert job model: {}", e))
                })
            })
        })
        .await
    }

    async fn find_by_id(&self, job_id: i32) -> Result<Option<AnalysisJob>, JobRepositoryError> {
        self.run(move |conn| {
            let model = analysis_jobs::table
                .find(job_id)
                .select(AnalysisJobModel::as_select())
                .first::<AnalysisJobModel>(conn)
                .optional()?;

            match model {
                Some(model) => Ok(into_jobs(conn, vec![model])?.pop()),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError> {
        self.run(|conn| {
            let models = analysis_jobs::table
                .order((analysis_jobs::created_at.desc(), analysis_jobs::id.desc()))
                .select(AnalysisJobModel::as_select())
                .load::<AnalysisJobModel>(conn)?;
            into_jobs(conn, models)
        })
        .await
    }

    async fn find_status(&self, job_id: i32) -> Result<Option<AnalysisStatus>, JobRepositoryError> {
        self.run(move |conn| {
            let status = analysis_jobs::table
                .find(job_id)
                .select(analysis_jobs::status)
                .first::<String>(conn)
                .optional()?;

            status
                .map(|s| AnalysisStatus::from_string(&s).map_err(JobRepositoryError::DatabaseError))
                .transpose()
        })
        .await
    }

    async fn find_unfinished(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError> {
        self.run(|conn| {
            let models = analysis_jobs::table
                .filter(analysis_jobs::status.ne_all(TERMINAL_STATUSES))
                .order(analysis_jobs::created_at.asc())
                .select(AnalysisJobModel::as_select())
                .load::<AnalysisJobModel>(conn)?;
            into_jobs(conn, models)
        })
        .await
    }

    async fn transition(
        &self,
        job_id: i32,
        change: StatusChange,
    ) -> Result<bool, JobRepositoryError> {
        change
            .validate()
            .map_err(JobRepositoryError::ValidationError)?;

        self.run(move |conn| {
            conn.transaction::<_, JobRepositoryError, _>(|conn| {
                // The row lock serializes the cancel path against the worker.
                let current = analysis_jobs::table
                    .find(job_id)
                    .select(analysis_jobs::status)
                    .for_update()
                    .first::<String>(conn)
                    .optional()?
                    .ok_or(JobRepositoryError::NotFound(job_id))?;
                let current = AnalysisStatus::from_string(&current)
                    .map_err(JobRepositoryError::DatabaseError)?;

                if !current.can_transition_to(change.status) {
                    return Ok(false);
                }

                diesel::update(analysis_jobs::table.find(job_id))
                    .set(&StatusChangeModel::from(&change))
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    async fn save_strategy(
        &self,
        job_id: i32,
        strategy: &AnalysisStrategy,
    ) -> Result<(), JobRepositoryError> {
        let strategy_json = strategy.to_json();

        self.run(move |conn| {
            let updated = diesel::update(
                analysis_jobs::table
                    .find(job_id)
                    .filter(analysis_jobs::use_advanced_strategy.eq(true)),
            )
            .set(analysis_jobs::strategy_json.eq(Some(strategy_json)))
            .execute(conn)?;

            if updated > 0 {
                return Ok(());
            }

            let exists = diesel::select(diesel::dsl::exists(analysis_jobs::table.find(job_id)))
                .get_result::<bool>(conn)?;
            if exists {
                Err(JobRepositoryError::ValidationError(
                    "Strategies are only stored for advanced analyses".to_string(),
                ))
            } else {
                Err(JobRepositoryError::NotFound(job_id))
            }
        })
        .await
    }

    async fn set_short_prompt(
        &self,
        job_id: i32,
        short_prompt: &str,
    ) -> Result<(), JobRepositoryError> {
        let short_prompt = short_prompt.to_string();

        self.run(move |conn| {
            let updated = diesel::update(analysis_jobs::table.find(job_id))
                .set(analysis_jobs::short_prompt.eq(Some(short_prompt)))
                .execute(conn)?;
            if updated == 0 {
                return Err(JobRepositoryError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, job_id: i32) -> Result<bool, JobRepositoryError> {
        // Session links and summaries go with the job through ON DELETE CASCADE.
        self.run(move |conn| {
            let deleted = diesel::delete(analysis_jobs::table.find(job_id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn summaries_for_job(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError> {
        self.run(move |conn| {
            let models = intermediate_summaries::table
                .filter(intermediate_summaries::analysis_job_id.eq(job_id))
                .order(intermediate_summaries::id.asc())
                .select(SummaryModel::as_select())
                .load::<SummaryModel>(conn)?;
            into_summaries(models)
        })
        .await
    }

    async fn pending_summaries(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError> {
        self.run(move |conn| {
            let models = intermediate_summaries::table
                .filter(intermediate_summaries::analysis_job_id.eq(job_id))
                .filter(intermediate_summaries::status.eq(SummaryStatus::Pending.as_str()))
                .order(intermediate_summaries::id.asc())
                .select(SummaryModel::as_select())
                .load::<SummaryModel>(conn)?;
            into_summaries(models)
        })
        .await
    }

    async fn reset_processing_summaries(&self, job_id: i32) -> Result<usize, JobRepositoryError> {
        self.run(move |conn| {
            let reset = diesel::update(
                intermediate_summaries::table
                    .filter(intermediate_summaries::analysis_job_id.eq(job_id))
                    .filter(intermediate_summaries::status.eq(SummaryStatus::Processing.as_str())),
            )
            .set((
                intermediate_summaries::status.eq(SummaryStatus::Pending.as_str()),
                intermediate_summaries::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
            Ok(reset)
        })
        .await
    }

    async fn mark_summary_processing(&self, summary_id: i32) -> Result<(), JobRepositoryError> {
        self.run(move |conn| {
            update_summary(
                conn,
                summary_id,
                UpdateSummaryModel::status(SummaryStatus::Processing),
            )
        })
        .await
    }

    async fn complete_summary(
        &self,
        summary_id: i32,
        summary_text: &str,
    ) -> Result<(), JobRepositoryError> {
        let changes = UpdateSummaryModel::completed(summary_text);
        self.run(move |conn| update_summary(conn, summary_id, changes))
            .await
    }

    async fn fail_summary(
        &self,
        summary_id: i32,
        error_message: &str,
    ) -> Result<(), JobRepositoryError> {
        let changes = UpdateSummaryModel::failed(error_message);
        self.run(move |conn| update_summary(conn, summary_id, changes))
            .await
    }
}
