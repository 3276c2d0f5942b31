// SQLite JobStore Implementation
// Every transition is a single conditional UPDATE; SQLite's write lock makes
// claim, finalize and reclaim mutually atomic across connections and processes.

use async_trait::async_trait;
use kiln_core::domain::{Job, JobError, JobId, JobOutput, JobStatus, NewJob, Outcome};
use kiln_core::error::{AppError, Result};
use kiln_core::port::job_store::duration_millis;
use kiln_core::port::{IdProvider, JobStore, QueueStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" => AppError::Database(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" | "517" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl SqliteJobStore {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            pool,
            time_provider,
            id_provider,
        }
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(JobRow::into_job)
            .transpose()
    }

    /// Explain why a conditional UPDATE matched no row by replaying the
    /// transition on the stored job
    async fn diagnose<F>(&self, id: &str, replay: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<bool>,
    {
        let mut job = self
            .fetch_row(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
        let stored = job.clone();
        match replay(&mut job)? {
            // The transition was already applied by this owner
            false => Ok(stored),
            true => Err(AppError::InvalidState(format!(
                "job {} changed concurrently, retry",
                id
            ))),
        }
    }
}

fn held_statuses(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Completed(_) => "('PROCESSING')",
        Outcome::Failed(_) => "('CLAIMED', 'PROCESSING')",
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        let job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            new_job,
        )?;
        let input = serde_json::to_string(&job.input)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, workflow, status, input, callback_target, created_at, attempts)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&job.id)
        .bind(&job.workflow)
        .bind(job.status.as_str())
        .bind(&input)
        .bind(&job.callback_target)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %job.id, workflow = %job.workflow, "Job created");
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        self.fetch_row(id).await
    }

    async fn claim(&self, candidate_workflows: Option<&[String]>) -> Result<Option<Job>> {
        let token = self.id_provider.generate_id();
        let now = self.time_provider.now_millis();
        let filter = candidate_workflows.map(serde_json::to_string).transpose()?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'CLAIMED',
                owner_token = ?,
                claimed_at = MAX(?, created_at),
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                  AND (? IS NULL OR workflow IN (SELECT value FROM json_each(?)))
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(&token)
        .bind(now)
        .bind(&filter)
        .bind(&filter)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn mark_processing(&self, id: &str, owner_token: &str) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING',
                started_at = MAX(?, COALESCE(claimed_at, created_at))
            WHERE id = ? AND owner_token = ? AND status = 'CLAIMED'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(owner_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job(),
            None => {
                self.diagnose(id, |job| {
                    job.start(owner_token, now)?;
                    Ok(true)
                })
                .await
            }
        }
    }

    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET heartbeat_at = MAX(?, COALESCE(heartbeat_at, started_at, claimed_at, created_at))
            WHERE id = ? AND owner_token = ? AND status IN ('CLAIMED', 'PROCESSING')
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(owner_token)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.diagnose(id, |job| {
                job.heartbeat(owner_token, now)?;
                Ok(true)
            })
            .await?;
        }
        Ok(())
    }

    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let (output, error) = match &outcome {
            Outcome::Completed(output) => (Some(serde_json::to_string(output)?), None),
            Outcome::Failed(error) => (None, Some(serde_json::to_string(error)?)),
        };

        let sql = format!(
            r#"
            UPDATE jobs
            SET status = ?,
                output = ?,
                error = ?,
                finished_at = MAX(?, COALESCE(heartbeat_at, started_at, claimed_at, created_at)),
                finalized_by = owner_token,
                owner_token = NULL
            WHERE id = ? AND owner_token = ? AND status IN {}
            RETURNING *
            "#,
            held_statuses(&outcome)
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(outcome.status().as_str())
            .bind(&output)
            .bind(&error)
            .bind(now)
            .bind(id)
            .bind(owner_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job(),
            None => {
                let job = self
                    .diagnose(id, |job| Ok(job.finish(owner_token, outcome, now)?))
                    .await?;
                debug!(job_id = %id, "Finalize repeated by same owner, ignoring");
                Ok(job)
            }
        }
    }

    async fn reclaim_expired(&self, lease: Duration) -> Result<Vec<JobId>> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(lease));

        let mut ids: Vec<JobId> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'PENDING',
                owner_token = NULL,
                claimed_at = NULL,
                started_at = NULL,
                heartbeat_at = NULL
            WHERE status IN ('CLAIMED', 'PROCESSING')
              AND COALESCE(heartbeat_at, started_at, claimed_at) < ?
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        ids.sort();

        for id in &ids {
            info!(job_id = %id, "Lease expired, job returned to PENDING");
        }
        Ok(ids)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let status = JobStatus::parse(&status)
                .ok_or_else(|| AppError::Database(format!("unknown job status '{}'", status)))?;
            stats.add(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(older_than));

        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('COMPLETED', 'FAILED') AND finished_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    workflow: String,
    status: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    callback_target: Option<String>,
    created_at: i64,
    claimed_at: Option<i64>,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    heartbeat_at: Option<i64>,
    owner_token: Option<String>,
    finalized_by: Option<String>,
    attempts: i32,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            AppError::Database(format!("job {} has unknown status '{}'", self.id, self.status))
        })?;
        let output: Option<JobOutput> = self.output.as_deref().map(serde_json::from_str).transpose()?;
        let error: Option<JobError> = self.error.as_deref().map(serde_json::from_str).transpose()?;

        Ok(Job {
            id: self.id,
            workflow: self.workflow,
            status,
            input: serde_json::from_str(&self.input)?,
            output,
            error,
            callback_target: self.callback_target,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            heartbeat_at: self.heartbeat_at,
            owner_token: self.owner_token,
            finalized_by: self.finalized_by,
            attempts: self.attempts,
        })
    }
}
