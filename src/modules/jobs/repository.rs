use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::model::{Job, JobFilter, JobRow, JobStatus, NewJob, Outcome};
use crate::infrastructure::db::pool::DbPool;

pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Persistence and status tracking for render jobs.
///
/// `claim_next` is the only synchronization point between workers: it must flip
/// exactly one `pending` job to `processing` in a single atomic step.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> StoreResult<Job>;

    async fn claim_next(&self) -> StoreResult<Option<Job>>;

    /// Write a terminal status. Only a job currently in `processing` may be finalized.
    async fn finalize(&self, id: Uuid, outcome: Outcome) -> StoreResult<Job>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Job>>;

    async fn list(&self, filter: JobFilter) -> StoreResult<Vec<Job>>;

    /// Fail jobs stuck in `processing` whose last write is older than `older_than`.
    async fn fail_stale(&self, older_than: Duration, reason: &str) -> StoreResult<Vec<Job>>;

    /// Refresh `updated_at` on a job still in `processing`. Returns false when the
    /// claim is gone (finalized or swept).
    async fn touch(&self, id: Uuid) -> StoreResult<bool>;
}

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn transition_error(&self, id: Uuid, to: JobStatus) -> StoreError {
        match self.get(id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                id,
                from: job.status,
                to,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, title, description, input_assets, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.input_assets)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(job.id)
            }
            other => StoreError::from(other),
        })?;

        Job::try_from(row)
    }

    #[instrument(skip(self))]
    async fn claim_next(&self) -> StoreResult<Option<Job>> {
        // SKIP LOCKED keeps concurrent claimers off the row another transaction is flipping.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self, outcome), fields(job_id = %id, status = %outcome.status()))]
    async fn finalize(&self, id: Uuid, outcome: Outcome) -> StoreResult<Job> {
        let target = outcome.status();

        let row = match outcome {
            Outcome::Completed(artifacts) => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    UPDATE jobs
                    SET status = 'completed',
                        audio_url = $2,
                        video_url = $3,
                        thumbnail_url = $4,
                        error_message = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'processing'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&artifacts.audio_url)
                .bind(&artifacts.video_url)
                .bind(&artifacts.thumbnail_url)
                .fetch_optional(&self.pool)
                .await?
            }
            Outcome::Failed {
                error,
                audio_asset,
                video_asset,
            } => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    UPDATE jobs
                    SET status = 'failed',
                        error_message = $2,
                        audio_url = COALESCE($3, audio_url),
                        video_url = COALESCE($4, video_url),
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'processing'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&error)
                .bind(&audio_asset)
                .bind(&video_asset)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.transition_error(id, target).await),
        }
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: JobFilter) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self, reason))]
    async fn fail_stale(&self, older_than: Duration, reason: &str) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = $1, updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < NOW() - make_interval(secs => $2)
            RETURNING *
            "#,
        )
        .bind(reason)
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn touch(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET updated_at = NOW() WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
