//! Task step repository (the step store).

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{StepDbModel, StepName, StepStatus};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Task step repository trait.
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Create the records for every download step of a job.
    /// Existing records are left untouched.
    async fn init_steps(&self, job_ref: &str) -> Result<()>;
    /// Create the record for one step if it does not exist yet.
    async fn ensure_step(&self, job_ref: &str, step: StepName) -> Result<()>;
    async fn get_step(&self, job_ref: &str, step_name: &str) -> Result<StepDbModel>;
    /// All records of a job, in chain order.
    async fn list_steps_for_job(&self, job_ref: &str) -> Result<Vec<StepDbModel>>;
    /// Pending records marked for retry, restricted to `step_names`.
    async fn list_retryable_steps(&self, step_names: &[&str]) -> Result<Vec<StepDbModel>>;
    async fn update_step_status(
        &self,
        job_ref: &str,
        step_name: &str,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<()>;
    async fn update_step_result(
        &self,
        job_ref: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<()>;
    /// Reset a step to pending, clear its error and mark it for retry.
    /// Creates the record when it is missing.
    async fn reset_step(&self, job_ref: &str, step: StepName) -> Result<()>;
    /// Reset every running record of `step_name` to pending and mark it for retry.
    async fn reset_running_steps(&self, step_name: &str) -> Result<u64>;
    /// Drop the retry mark from every record of a job.
    async fn clear_retry_requests(&self, job_ref: &str) -> Result<u64>;
}

/// SQLx implementation of StepRepository.
pub struct SqlxStepRepository {
    pool: SqlitePool,
}

impl SqlxStepRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_if_missing(&self, step: &StepDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_step (id, job_ref, step_name, step_order, status, retry_requested, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT (job_ref, step_name) DO NOTHING
            "#,
        )
        .bind(&step.id)
        .bind(&step.job_ref)
        .bind(&step.step_name)
        .bind(step.step_order)
        .bind(&step.status)
        .bind(step.created_at)
        .bind(step.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StepRepository for SqlxStepRepository {
    async fn init_steps(&self, job_ref: &str) -> Result<()> {
        retry_on_sqlite_busy("init_steps", || async {
            let mut tx = self.pool.begin().await?;
            for step in StepName::ALL {
                let record = StepDbModel::new(job_ref, step);
                sqlx::query(
                    r#"
                    INSERT INTO task_step (id, job_ref, step_name, step_order, status, retry_requested, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, 0, ?, ?)
                    ON CONFLICT (job_ref, step_name) DO NOTHING
                    "#,
                )
                .bind(&record.id)
                .bind(&record.job_ref)
                .bind(&record.step_name)
                .bind(record.step_order)
                .bind(&record.status)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn ensure_step(&self, job_ref: &str, step: StepName) -> Result<()> {
        let record = StepDbModel::new(job_ref, step);
        retry_on_sqlite_busy("ensure_step", || self.insert_if_missing(&record)).await
    }

    async fn get_step(&self, job_ref: &str, step_name: &str) -> Result<StepDbModel> {
        sqlx::query_as::<_, StepDbModel>(
            "SELECT * FROM task_step WHERE job_ref = ? AND step_name = ?",
        )
        .bind(job_ref)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("TaskStep", format!("{job_ref}/{step_name}")))
    }

    async fn list_steps_for_job(&self, job_ref: &str) -> Result<Vec<StepDbModel>> {
        let steps = sqlx::query_as::<_, StepDbModel>(
            "SELECT * FROM task_step WHERE job_ref = ? ORDER BY step_order",
        )
        .bind(job_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }

    async fn list_retryable_steps(&self, step_names: &[&str]) -> Result<Vec<StepDbModel>> {
        if step_names.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; step_names.len()].join(", ");
        let sql = format!(
            r#"
            SELECT * FROM task_step
            WHERE status = ? AND retry_requested = 1 AND step_name IN ({placeholders})
            ORDER BY job_ref, step_order, updated_at
            "#
        );

        let mut query = sqlx::query_as::<_, StepDbModel>(&sql).bind(StepStatus::Pending.as_str());
        for name in step_names {
            query = query.bind(*name);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn update_step_status(
        &self,
        job_ref: &str,
        step_name: &str,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let now = now_ms();
        let started_at = (status == StepStatus::Running).then_some(now);
        let finished_at = status.is_finished().then_some(now);
        // Any transition other than back to pending consumes the retry mark.
        let retry_requested = (status != StepStatus::Pending).then_some(false);
        // A new run drops the outcome of the previous one.
        let starting = status == StepStatus::Running;

        let result = retry_on_sqlite_busy("update_step_status", || async {
            let done = sqlx::query(
                r#"
                UPDATE task_step SET
                    status = ?,
                    error_message = ?,
                    started_at = COALESCE(?, started_at),
                    finished_at = CASE WHEN ? THEN NULL ELSE COALESCE(?, finished_at) END,
                    result = CASE WHEN ? THEN NULL ELSE result END,
                    retry_requested = COALESCE(?, retry_requested),
                    updated_at = ?
                WHERE job_ref = ? AND step_name = ?
                "#,
            )
            .bind(status.as_str())
            .bind(message)
            .bind(started_at)
            .bind(starting)
            .bind(finished_at)
            .bind(starting)
            .bind(retry_requested)
            .bind(now)
            .bind(job_ref)
            .bind(step_name)
            .execute(&self.pool)
            .await?;
            Ok(done)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(
                "TaskStep",
                format!("{job_ref}/{step_name}"),
            ));
        }
        Ok(())
    }

    async fn update_step_result(
        &self,
        job_ref: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let done = retry_on_sqlite_busy("update_step_result", || async {
            let done = sqlx::query(
                "UPDATE task_step SET result = ?, updated_at = ? WHERE job_ref = ? AND step_name = ?",
            )
            .bind(&payload)
            .bind(now_ms())
            .bind(job_ref)
            .bind(step_name)
            .execute(&self.pool)
            .await?;
            Ok(done)
        })
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::not_found(
                "TaskStep",
                format!("{job_ref}/{step_name}"),
            ));
        }
        Ok(())
    }

    async fn reset_step(&self, job_ref: &str, step: StepName) -> Result<()> {
        let record = StepDbModel::new(job_ref, step);
        retry_on_sqlite_busy("reset_step", || async {
            sqlx::query(
                r#"
                INSERT INTO task_step (id, job_ref, step_name, step_order, status, retry_requested, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'pending', 1, ?, ?)
                ON CONFLICT (job_ref, step_name) DO UPDATE SET
                    status = 'pending',
                    error_message = NULL,
                    result = NULL,
                    retry_requested = 1,
                    started_at = NULL,
                    finished_at = NULL,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.id)
            .bind(&record.job_ref)
            .bind(&record.step_name)
            .bind(record.step_order)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn reset_running_steps(&self, step_name: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE task_step SET
                status = 'pending',
                error_message = NULL,
                retry_requested = 1,
                updated_at = ?
            WHERE status = 'running' AND step_name = ?
            "#,
        )
        .bind(now_ms())
        .bind(step_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_retry_requests(&self, job_ref: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE task_step SET retry_requested = 0, updated_at = ? WHERE job_ref = ? AND retry_requested = 1",
        )
        .bind(now_ms())
        .bind(job_ref)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
