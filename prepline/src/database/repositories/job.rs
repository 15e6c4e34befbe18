//! Video job repository (the job source).

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobDbModel, JobStatus};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &JobDbModel) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<JobDbModel>;
    async fn get_job_by_external_ref(&self, external_ref: &str) -> Result<JobDbModel>;
    /// Queued jobs, oldest first, at most `limit`.
    async fn list_queued_jobs(&self, limit: i64) -> Result<Vec<JobDbModel>>;
    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()>;
    /// Move every in-progress job back to queued and return the affected jobs.
    async fn requeue_in_progress_jobs(&self) -> Result<Vec<JobDbModel>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &JobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO video_job (id, external_ref, url, title, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.external_ref)
        .bind(&job.url)
        .bind(&job.title)
        .bind(&job.status)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM video_job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("VideoJob", id))
    }

    async fn get_job_by_external_ref(&self, external_ref: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM video_job WHERE external_ref = ?")
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("VideoJob", external_ref))
    }

    async fn list_queued_jobs(&self, limit: i64) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM video_job WHERE status = ? ORDER BY created_at, rowid LIMIT ?",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query("UPDATE video_job SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("VideoJob", id));
        }
        Ok(())
    }

    async fn requeue_in_progress_jobs(&self) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            r#"
            UPDATE video_job SET status = ?, updated_at = ?
            WHERE status = ?
            RETURNING *
            "#,
        )
        .bind(JobStatus::Queued.as_str())
        .bind(now_ms())
        .bind(JobStatus::InProgress.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool_with_size, run_migrations};

    async fn setup_repo() -> SqlxJobRepository {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxJobRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let repo = setup_repo().await;
        let job = JobDbModel::new("vid-1", "https://example.com/watch?v=vid-1", "first");
        repo.create_job(&job).await.unwrap();

        let by_id = repo.get_job(&job.id).await.unwrap();
        assert_eq!(by_id.external_ref, "vid-1");

        let by_ref = repo.get_job_by_external_ref("vid-1").await.unwrap();
        assert_eq!(by_ref.id, job.id);

        assert!(repo.get_job_by_external_ref("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_queued_jobs_is_ordered_and_bounded() {
        let repo = setup_repo().await;
        for i in 0..5 {
            let mut job = JobDbModel::new(format!("vid-{i}"), "u", "t");
            job.created_at = 1_000 + (5 - i);
            repo.create_job(&job).await.unwrap();
        }
        let mut done = JobDbModel::new("vid-done", "u", "t");
        done.status = JobStatus::ReadyForNextStage.as_str().to_string();
        done.created_at = 1;
        repo.create_job(&done).await.unwrap();

        let queued = repo.list_queued_jobs(3).await.unwrap();
        let refs: Vec<&str> = queued.iter().map(|j| j.external_ref.as_str()).collect();
        assert_eq!(refs, vec!["vid-4", "vid-3", "vid-2"]);
    }

    #[tokio::test]
    async fn test_update_job_status() {
        let repo = setup_repo().await;
        let job = JobDbModel::new("vid-1", "u", "t");
        repo.create_job(&job).await.unwrap();

        repo.update_job_status(&job.id, JobStatus::InProgress)
            .await
            .unwrap();
        let job = repo.get_job(&job.id).await.unwrap();
        assert_eq!(job.status, "002");

        let err = repo
            .update_job_status("no-such-id", JobStatus::Failed)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_requeue_in_progress_jobs() {
        let repo = setup_repo().await;
        let running = JobDbModel::new("vid-running", "u", "t");
        let failed = JobDbModel::new("vid-failed", "u", "t");
        repo.create_job(&running).await.unwrap();
        repo.create_job(&failed).await.unwrap();
        repo.update_job_status(&running.id, JobStatus::InProgress)
            .await
            .unwrap();
        repo.update_job_status(&failed.id, JobStatus::Failed)
            .await
            .unwrap();

        let requeued = repo.requeue_in_progress_jobs().await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].external_ref, "vid-running");
        assert_eq!(requeued[0].status, "001");

        let failed = repo.get_job(&failed.id).await.unwrap();
        assert_eq!(failed.status, "999");
    }
}
