//! Step-tracking decorator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use super::context::ExecutionContext;
use super::task::Task;
use crate::Result;
use crate::database::models::StepStatus;
use crate::database::repositories::StepRepository;

/// Wraps a task and mirrors its outcome into the step store.
///
/// Marks the step `running` before delegating, then `completed` (plus the
/// context snapshot) or `failed` (plus the context error). Store failures are
/// logged and never change the wrapped task's result.
pub struct StepTrackingTask {
    inner: Box<dyn Task>,
    job_ref: String,
    steps: Arc<dyn StepRepository>,
}

impl StepTrackingTask {
    pub fn new(
        inner: Box<dyn Task>,
        job_ref: impl Into<String>,
        steps: Arc<dyn StepRepository>,
    ) -> Self {
        Self {
            inner,
            job_ref: job_ref.into(),
            steps,
        }
    }

    /// Convenience for building a chain entry.
    pub fn boxed(
        inner: Box<dyn Task>,
        job_ref: impl Into<String>,
        steps: Arc<dyn StepRepository>,
    ) -> Box<dyn Task> {
        Box::new(Self::new(inner, job_ref, steps))
    }
}

/// Persist the end state of a step run the same way for every caller.
pub(crate) async fn record_outcome(
    steps: &dyn StepRepository,
    job_ref: &str,
    step_name: &str,
    success: bool,
    ctx: &ExecutionContext,
) {
    if success {
        if let Err(e) = steps
            .update_step_status(job_ref, step_name, StepStatus::Completed, None)
            .await
        {
            error!(video_id = %job_ref, step = %step_name, error = %e, "Failed to mark step completed");
        }

        let snapshot = Value::Object(ctx.snapshot());
        if let Err(e) = steps.update_step_result(job_ref, step_name, &snapshot).await {
            error!(video_id = %job_ref, step = %step_name, error = %e, "Failed to store step result");
        }
    } else {
        let message = ctx.error_message();
        if let Err(e) = steps
            .update_step_status(job_ref, step_name, StepStatus::Failed, Some(&message))
            .await
        {
            error!(video_id = %job_ref, step = %step_name, error = %e, "Failed to mark step failed");
        }
    }
}

#[async_trait]
impl Task for StepTrackingTask {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn insert_task(&self) -> Result<()> {
        self.inner.insert_task().await
    }

    async fn update_status(&self, status: StepStatus, message: Option<&str>) -> Result<()> {
        self.inner.update_status(status, message).await
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> bool {
        let step_name = self.inner.name().to_string();

        if let Err(e) = self
            .steps
            .update_step_status(&self.job_ref, &step_name, StepStatus::Running, None)
            .await
        {
            error!(video_id = %self.job_ref, step = %step_name, error = %e, "Failed to mark step running");
        }

        let success = self.inner.execute(ctx).await;

        record_outcome(self.steps.as_ref(), &self.job_ref, &step_name, success, ctx).await;

        success
    }
}
