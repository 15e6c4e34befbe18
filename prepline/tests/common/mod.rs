//! Shared helpers for scheduler integration tests.
//!
//! Every harness owns a fresh SQLite file in a temporary directory and a
//! scripted task factory whose tasks record what they saw instead of running
//! external tools.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::Notify;

use prepline::database::models::{JobDbModel, StepDbModel, StepName, StepStatus};
use prepline::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxStepRepository, StepRepository,
};
use prepline::database::{DbPool, init_pool, run_migrations};
use prepline::pipeline::{ExecutionContext, StateDirectory, Task, TaskFactory};
use prepline::scheduler::{ChainScheduler, SchedulerConfig};
use prepline::{Error, Result};

/// How a scripted task behaves when executed.
#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    /// Panic inside the task, unwinding the whole tick.
    Panic(&'static str),
    /// Signal `started`, wait for `release`, then succeed.
    Block {
        started: Arc<Notify>,
        release: Arc<Notify>,
    },
}

/// One recorded task execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub job_ref: String,
    pub step: StepName,
    /// Context entries visible when the task started.
    pub seen: Map<String, Value>,
    pub work_dir: PathBuf,
}

struct ScriptedTask {
    step: StepName,
    job_ref: String,
    work_dir: PathBuf,
    behavior: Behavior,
    executions: Arc<Mutex<Vec<Execution>>>,
}

#[async_trait]
impl Task for ScriptedTask {
    fn name(&self) -> &str {
        self.step.as_str()
    }

    async fn insert_task(&self) -> Result<()> {
        Ok(())
    }

    async fn update_status(&self, _status: StepStatus, _message: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> bool {
        self.executions.lock().push(Execution {
            job_ref: self.job_ref.clone(),
            step: self.step,
            seen: ctx.snapshot(),
            work_dir: self.work_dir.clone(),
        });

        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(message) => {
                ctx.set_error(*message);
                return false;
            }
            Behavior::Panic(message) => panic!("{message}"),
            Behavior::Block { started, release } => {
                started.notify_one();
                release.notified().await;
            }
        }

        ctx.insert(self.step.as_str(), format!("{}/{}", self.job_ref, self.step));
        true
    }
}

/// Task factory driven by per-(job, step) scripts. Unscripted steps succeed.
#[derive(Default)]
pub struct ScriptedFactory {
    behaviors: Mutex<HashMap<(String, StepName), Behavior>>,
    construction_errors: Mutex<HashSet<StepName>>,
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl ScriptedFactory {
    pub fn set(&self, job_ref: &str, step: StepName, behavior: Behavior) {
        self.behaviors
            .lock()
            .insert((job_ref.to_string(), step), behavior);
    }

    /// Make construction of `step` fail with a configuration error.
    pub fn fail_construction(&self, step: StepName) {
        self.construction_errors.lock().insert(step);
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().clone()
    }

    /// Steps executed for `job_ref`, in order.
    pub fn executed_steps(&self, job_ref: &str) -> Vec<StepName> {
        self.executions
            .lock()
            .iter()
            .filter(|e| e.job_ref == job_ref)
            .map(|e| e.step)
            .collect()
    }
}

impl TaskFactory for ScriptedFactory {
    fn create(
        &self,
        step: StepName,
        job: &JobDbModel,
        state: &StateDirectory,
    ) -> Result<Box<dyn Task>> {
        if self.construction_errors.lock().contains(&step) {
            return Err(Error::config(format!("{step} is misconfigured")));
        }

        let behavior = self
            .behaviors
            .lock()
            .get(&(job.external_ref.clone(), step))
            .cloned()
            .unwrap_or(Behavior::Succeed);

        Ok(Box::new(ScriptedTask {
            step,
            job_ref: job.external_ref.clone(),
            work_dir: state.work_dir(),
            behavior,
            executions: self.executions.clone(),
        }))
    }
}

pub struct Harness {
    _dir: TempDir,
    pub pool: DbPool,
    pub jobs: Arc<dyn JobRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub factory: Arc<ScriptedFactory>,
    pub scheduler: Arc<ChainScheduler>,
    pub file_root: PathBuf,
}

/// Create a file-backed test database with migrations applied.
pub async fn setup_db() -> (TempDir, DbPool) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("prepline.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (dir, pool)
}

pub async fn harness() -> Harness {
    harness_with(|config| config).await
}

pub async fn harness_with(configure: impl FnOnce(SchedulerConfig) -> SchedulerConfig) -> Harness {
    let (dir, pool) = setup_db().await;
    let file_root = dir.path().join("files");

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
    let steps: Arc<dyn StepRepository> = Arc::new(SqlxStepRepository::new(pool.clone()));
    let factory = Arc::new(ScriptedFactory::default());

    let config = configure(
        SchedulerConfig::default()
            .with_file_root(&file_root)
            .with_tick_interval(Duration::from_millis(20)),
    );
    let scheduler = Arc::new(ChainScheduler::new(
        config,
        jobs.clone(),
        steps.clone(),
        factory.clone(),
    ));

    Harness {
        _dir: dir,
        pool,
        jobs,
        steps,
        factory,
        scheduler,
        file_root,
    }
}

impl Harness {
    pub async fn add_job(&self, external_ref: &str) -> JobDbModel {
        let job = JobDbModel::new(
            external_ref,
            format!("https://www.youtube.com/watch?v={external_ref}"),
            format!("Video {external_ref}"),
        );
        self.jobs.create_job(&job).await.expect("Failed to create job");
        job
    }

    /// Create a job with an explicit creation time (epoch ms).
    pub async fn add_job_at(&self, external_ref: &str, created_at: i64) -> JobDbModel {
        let mut job = JobDbModel::new(external_ref, "https://example.com/v", "v");
        job.created_at = created_at;
        job.updated_at = created_at;
        self.jobs.create_job(&job).await.expect("Failed to create job");
        job
    }

    pub async fn job_status(&self, external_ref: &str) -> String {
        self.jobs
            .get_job_by_external_ref(external_ref)
            .await
            .expect("job exists")
            .status
    }

    pub async fn step(&self, external_ref: &str, step: StepName) -> StepDbModel {
        self.steps
            .get_step(external_ref, step.as_str())
            .await
            .expect("step exists")
    }

    pub async fn step_status(&self, external_ref: &str, step: StepName) -> String {
        self.step(external_ref, step).await.status
    }

    /// Parsed result snapshot of a step.
    pub async fn step_result(&self, external_ref: &str, step: StepName) -> Option<Value> {
        self.step(external_ref, step)
            .await
            .result
            .map(|raw| serde_json::from_str(&raw).expect("valid result json"))
    }

    /// Poll until the job reaches `status` or the timeout elapses.
    pub async fn wait_for_job_status(&self, external_ref: &str, status: &str) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.job_status(external_ref).await == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
