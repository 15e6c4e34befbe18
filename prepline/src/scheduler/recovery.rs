//! Startup recovery sweep.

use tracing::{error, info, warn};

use super::ChainScheduler;
use crate::database::models::StepName;

/// Summary of one recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Running steps reset to pending and marked for retry.
    pub steps_reset: u64,
    /// Step names whose sweep failed; the others were still processed.
    pub failed_steps: Vec<StepName>,
    /// Jobs moved from in progress back to queued.
    pub jobs_requeued: usize,
}

impl ChainScheduler {
    /// Reclaim work left in flight by an unclean shutdown.
    ///
    /// Must run before [`start`](Self::start). Every `running` step record is
    /// reset so the next tick retries it. When requeueing is enabled, jobs
    /// still in progress go back to the queue instead, and their steps lose
    /// the retry mark because the full chain will run them again.
    pub async fn recover_on_startup(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for step in StepName::ALL {
            match self.steps.reset_running_steps(step.as_str()).await {
                Ok(0) => {}
                Ok(count) => {
                    info!(step = %step, count, "Reset interrupted steps for retry");
                    report.steps_reset += count;
                }
                Err(e) => {
                    error!(step = %step, error = %e, "Failed to reset interrupted steps");
                    report.failed_steps.push(step);
                }
            }
        }

        if self.config.requeue_interrupted_jobs {
            match self.jobs.requeue_in_progress_jobs().await {
                Ok(jobs) => {
                    for job in &jobs {
                        if let Err(e) = self.steps.clear_retry_requests(&job.external_ref).await {
                            warn!(
                                job_id = %job.id,
                                video_id = %job.external_ref,
                                error = %e,
                                "Failed to clear retry marks of requeued job"
                            );
                        }
                    }
                    if !jobs.is_empty() {
                        info!(count = jobs.len(), "Requeued interrupted jobs");
                    }
                    report.jobs_requeued = jobs.len();
                }
                Err(e) => {
                    error!(error = %e, "Failed to requeue interrupted jobs");
                }
            }
        }

        info!(
            steps_reset = report.steps_reset,
            jobs_requeued = report.jobs_requeued,
            "Startup recovery finished"
        );
        report
    }
}
