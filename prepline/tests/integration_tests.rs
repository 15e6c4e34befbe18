//! Integration tests for the prepline database layer.
//!
//! These tests use a real SQLite database file to verify the schema and
//! repository operations behave as the scheduler expects.

mod common;

use common::setup_db;
use prepline::database::models::{JobDbModel, JobStatus, StepName};
use prepline::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxStepRepository, StepRepository,
};

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let (_dir, pool) = setup_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"video_job"), "video_job table missing");
        assert!(table_names.contains(&"task_step"), "task_step table missing");
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let (_dir, pool) = setup_db().await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");
        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_one_record_per_job_and_step() {
        let (_dir, pool) = setup_db().await;
        let steps = SqlxStepRepository::new(pool.clone());
        steps.init_steps("vid-1").await.unwrap();

        let duplicate = sqlx::query(
            "INSERT INTO task_step (id, job_ref, step_name, step_order, created_at, updated_at) VALUES ('x', 'vid-1', 'fetch-media', 1, 0, 0)",
        )
        .execute(&pool)
        .await;
        assert!(duplicate.is_err(), "unique (job_ref, step_name) not enforced");
    }
}

mod job_tests {
    use super::*;

    #[tokio::test]
    async fn test_status_codes_are_stored_verbatim() {
        let (_dir, pool) = setup_db().await;
        let jobs = SqlxJobRepository::new(pool.clone());
        let job = JobDbModel::new("abc", "https://youtu.be/abc", "abc");
        jobs.create_job(&job).await.unwrap();

        for status in [
            JobStatus::InProgress,
            JobStatus::ReadyForNextStage,
            JobStatus::Failed,
            JobStatus::Queued,
        ] {
            jobs.update_job_status(&job.id, status).await.unwrap();
            let raw: (String,) = sqlx::query_as("SELECT status FROM video_job WHERE id = ?")
                .bind(&job.id)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(raw.0, status.as_str());
        }
    }

    #[tokio::test]
    async fn test_duplicate_external_ref_is_rejected() {
        let (_dir, pool) = setup_db().await;
        let jobs = SqlxJobRepository::new(pool);
        jobs.create_job(&JobDbModel::new("abc", "u", "t"))
            .await
            .unwrap();
        assert!(
            jobs.create_job(&JobDbModel::new("abc", "u", "t"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_step_records_survive_reconnect() {
        let (dir, pool) = setup_db().await;
        let steps = SqlxStepRepository::new(pool.clone());
        steps.init_steps("vid-1").await.unwrap();
        steps
            .reset_step("vid-1", StepName::TranslateCaptions)
            .await
            .unwrap();
        pool.close().await;

        let url = format!("sqlite:{}?mode=rwc", dir.path().join("prepline.db").display());
        let pool = prepline::database::init_pool(&url).await.unwrap();
        let steps = SqlxStepRepository::new(pool);
        let retryable = steps
            .list_retryable_steps(&StepName::names())
            .await
            .unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].step_name, "translate-captions");
    }
}
