//! Chain scheduler service.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::database::models::{JobDbModel, JobStatus, StepName, StepStatus};
use crate::database::repositories::{JobRepository, StepRepository};
use crate::pipeline::{
    ExecutionContext, StateDirectory, StepTrackingTask, TaskChain, TaskFactory, record_outcome,
};
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Root of the per-job working directories.
    pub file_root: PathBuf,
    pub tick_interval: Duration,
    /// Queued jobs fetched per intake query.
    pub batch_size: u32,
    pub requeue_interrupted_jobs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("data"),
            tick_interval: Duration::from_secs(5),
            batch_size: 10,
            requeue_interrupted_jobs: true,
        }
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            file_root: config.file_root.clone(),
            tick_interval: config.tick_interval(),
            batch_size: config.batch_size,
            requeue_interrupted_jobs: config.requeue_interrupted_jobs,
        }
    }
}

impl SchedulerConfig {
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_requeue_interrupted_jobs(mut self, enabled: bool) -> Self {
        self.requeue_interrupted_jobs = enabled;
        self
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick still holds the guard.
    Skipped,
    /// Nothing to retry and no queued job.
    Idle,
    /// Pending step resets were re-run.
    Retried { attempted: usize, failed: usize },
    /// A queued job ran through the full chain.
    Processed { job_id: String, success: bool },
    /// The tick gave up before running anything.
    Aborted(String),
}

/// Sets the in-flight flag for as long as it lives.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodic single-flight scheduler for download chains.
pub struct ChainScheduler {
    pub(super) config: SchedulerConfig,
    pub(super) jobs: Arc<dyn JobRepository>,
    pub(super) steps: Arc<dyn StepRepository>,
    factory: Arc<dyn TaskFactory>,
    guard: Mutex<()>,
    running: AtomicBool,
}

impl ChainScheduler {
    pub fn new(
        config: SchedulerConfig,
        jobs: Arc<dyn JobRepository>,
        steps: Arc<dyn StepRepository>,
        factory: Arc<dyn TaskFactory>,
    ) -> Self {
        Self {
            config,
            jobs,
            steps,
            factory,
            guard: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether a chain or retry batch is executing right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one scheduling round.
    ///
    /// Pending step resets always go first; a new job is only taken when
    /// there is nothing to retry.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("Previous run still in progress, skipping tick");
            return TickOutcome::Skipped;
        };

        match self.steps.list_retryable_steps(&StepName::names()).await {
            Ok(pending) if !pending.is_empty() => {
                let _in_flight = InFlight::enter(&self.running);
                let attempted = pending.len();
                let mut failed = 0;

                info!(count = attempted, "Retrying pending steps");
                for step in pending {
                    if let Err(e) = self.run_single_step(&step.job_ref, &step.step_name).await {
                        failed += 1;
                        warn!(
                            video_id = %step.job_ref,
                            step = %step.step_name,
                            error = %e,
                            "Step retry failed"
                        );
                    }
                }
                return TickOutcome::Retried { attempted, failed };
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to list retryable steps");
            }
        }

        let queued = match self
            .jobs
            .list_queued_jobs(i64::from(self.config.batch_size))
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list queued jobs");
                return TickOutcome::Aborted(e.to_string());
            }
        };

        let Some(job) = queued.into_iter().next() else {
            return TickOutcome::Idle;
        };

        if let Err(e) = self
            .jobs
            .update_job_status(&job.id, JobStatus::InProgress)
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to claim job");
            return TickOutcome::Aborted(e.to_string());
        }

        let _in_flight = InFlight::enter(&self.running);
        let success = self.run_job_chain(&job).await;
        TickOutcome::Processed {
            job_id: job.id,
            success,
        }
    }

    /// Run all six steps of `job` and record the final job status.
    ///
    /// Returns whether every step succeeded.
    pub async fn run_job_chain(&self, job: &JobDbModel) -> bool {
        let state = match StateDirectory::new(job, &self.config.file_root) {
            Ok(state) => state,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to resolve job directory");
                self.set_job_status(job, JobStatus::Failed).await;
                return false;
            }
        };

        if let Err(e) = self.steps.init_steps(&job.external_ref).await {
            warn!(video_id = %job.external_ref, error = %e, "Failed to initialize steps");
        }

        let mut chain = TaskChain::new();
        for step in StepName::ALL {
            match self.factory.create(step, job, &state) {
                Ok(task) => chain.add_task(StepTrackingTask::boxed(
                    task,
                    job.external_ref.as_str(),
                    self.steps.clone(),
                )),
                Err(e) => {
                    error!(
                        job_id = %job.id,
                        step = %step,
                        error = %e,
                        "Failed to build task, failing job"
                    );
                    self.mark_step_failed(&job.external_ref, step, &e.to_string())
                        .await;
                    self.set_job_status(job, JobStatus::Failed).await;
                    return false;
                }
            }
        }

        info!(
            job_id = %job.id,
            video_id = %job.external_ref,
            work_dir = %state.work_dir().display(),
            steps = ?chain.task_names(),
            "Starting download chain"
        );

        let ctx = chain.run(true).await;
        let success = !ctx.has_error();

        if success {
            info!(job_id = %job.id, "Download chain completed");
            self.set_job_status(job, JobStatus::ReadyForNextStage).await;
        } else {
            warn!(job_id = %job.id, error = %ctx.error_message(), "Download chain failed");
            self.set_job_status(job, JobStatus::Failed).await;
        }
        success
    }

    /// Re-run one step of one job in isolation.
    ///
    /// The task starts from the results of the job's completed earlier steps.
    /// The job status is left untouched.
    pub async fn run_single_step(&self, external_ref: &str, step_name: &str) -> Result<()> {
        let step = parse_step(step_name)?;

        let job = match self.jobs.get_job_by_external_ref(external_ref).await {
            Ok(job) => job,
            Err(e) => {
                self.mark_step_failed(external_ref, step, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        let state = match StateDirectory::new(&job, &self.config.file_root) {
            Ok(state) => state,
            Err(e) => {
                self.mark_step_failed(external_ref, step, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        let task = match self.factory.create(step, &job, &state) {
            Ok(task) => task,
            Err(e) => {
                error!(video_id = %external_ref, step = %step, error = %e, "Failed to build task");
                self.mark_step_failed(external_ref, step, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.steps.reset_step(external_ref, step).await {
            warn!(video_id = %external_ref, step = %step, error = %e, "Failed to reset step");
        }
        if let Err(e) = self
            .steps
            .update_step_status(external_ref, step.as_str(), StepStatus::Running, None)
            .await
        {
            error!(video_id = %external_ref, step = %step, error = %e, "Failed to mark step running");
        }

        info!(video_id = %external_ref, step = %step, "Running single step");

        let seed = self.resume_context(external_ref, step).await;
        let mut chain = TaskChain::new();
        chain.add_task(task);
        let ctx = chain.run_with_context(seed, false).await;

        let success = !ctx.has_error();
        record_outcome(
            self.steps.as_ref(),
            external_ref,
            step.as_str(),
            success,
            &ctx,
        )
        .await;

        if success {
            info!(video_id = %external_ref, step = %step, "Step retry completed");
            Ok(())
        } else {
            Err(Error::task(step.as_str(), ctx.error_message()))
        }
    }

    /// Ask for `step_name` of `external_ref` to be re-run on a later tick.
    pub async fn request_retry(&self, external_ref: &str, step_name: &str) -> Result<()> {
        let step = parse_step(step_name)?;
        self.steps.reset_step(external_ref, step).await?;
        info!(video_id = %external_ref, step = %step, "Step retry requested");
        Ok(())
    }

    /// Start the periodic loop.
    ///
    /// Every tick runs as its own task so a slow chain never delays the
    /// timer; overlapping ticks observe the guard and skip. Cancelling the
    /// token stops new ticks and the returned handle completes once the
    /// in-flight tick has finished.
    pub fn start(self: Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight = JoinSet::new();

            info!(
                interval_secs = self.config.tick_interval.as_secs_f64(),
                batch_size = self.config.batch_size,
                "Chain scheduler started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Chain scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        while let Some(res) = in_flight.try_join_next() {
                            if let Err(e) = res {
                                error!(error = %e, "Scheduler tick panicked");
                            }
                        }

                        let scheduler = self.clone();
                        in_flight.spawn(async move {
                            log_outcome(&scheduler.tick().await);
                        });
                    }
                }
            }

            while let Some(res) = in_flight.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "Scheduler tick panicked");
                }
            }
            info!("Chain scheduler stopped");
        })
    }

    /// Context for a single-step run, seeded from completed earlier steps.
    async fn resume_context(&self, external_ref: &str, step: StepName) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        let records = match self.steps.list_steps_for_job(external_ref).await {
            Ok(records) => records,
            Err(e) => {
                warn!(video_id = %external_ref, error = %e, "Failed to load earlier step results");
                return ctx;
            }
        };

        for record in records {
            let earlier = record
                .step()
                .is_some_and(|s| s.order() < step.order());
            if !earlier || record.status() != Some(StepStatus::Completed) {
                continue;
            }
            let snapshot: Map<String, Value> = json::parse_optional_or_default(
                record.result.as_deref(),
                JsonContext::StepField {
                    job_ref: external_ref,
                    step_name: &record.step_name,
                    field: "result",
                },
                "Ignoring unreadable step result",
            );
            ctx.merge(&snapshot);
        }
        ctx
    }

    async fn mark_step_failed(&self, external_ref: &str, step: StepName, message: &str) {
        if let Err(e) = self
            .steps
            .update_step_status(external_ref, step.as_str(), StepStatus::Failed, Some(message))
            .await
        {
            error!(video_id = %external_ref, step = %step, error = %e, "Failed to mark step failed");
        }
    }

    async fn set_job_status(&self, job: &JobDbModel, status: JobStatus) {
        if let Err(e) = self.jobs.update_job_status(&job.id, status).await {
            error!(
                job_id = %job.id,
                status = %status.as_str(),
                error = %e,
                "Failed to update job status"
            );
        }
    }
}

fn parse_step(step_name: &str) -> Result<StepName> {
    StepName::parse(step_name)
        .ok_or_else(|| Error::validation(format!("unknown step name '{step_name}'")))
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Skipped | TickOutcome::Idle => debug!(?outcome, "Tick finished"),
        TickOutcome::Retried { attempted, failed } => {
            info!(attempted, failed, "Retry batch finished")
        }
        TickOutcome::Processed { job_id, success } => {
            info!(job_id = %job_id, success, "Job processed")
        }
        TickOutcome::Aborted(reason) => warn!(reason = %reason, "Tick aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig::default()
            .with_file_root("/srv/prepline")
            .with_tick_interval_secs(2)
            .with_batch_size(4)
            .with_requeue_interrupted_jobs(false);
        let config = SchedulerConfig::from(&app);
        assert_eq!(config.file_root, PathBuf::from("/srv/prepline"));
        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert_eq!(config.batch_size, 4);
        assert!(!config.requeue_interrupted_jobs);
    }

    #[test]
    fn test_parse_step_rejects_unknown_names() {
        assert_eq!(parse_step("fetch-media").unwrap(), StepName::FetchMedia);
        assert!(matches!(parse_step("upload"), Err(Error::Validation(_))));
        assert!(matches!(parse_step("Fetch-Media"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_in_flight_flag_resets_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _in_flight = InFlight::enter(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
