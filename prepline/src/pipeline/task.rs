//! Task trait: the unit of work run by a chain.

use async_trait::async_trait;

use super::context::ExecutionContext;
use crate::Result;
use crate::database::models::StepStatus;

/// A named, stateful operation over a shared execution context.
///
/// Concrete tasks (media fetch, audio extraction, transcription, ...) are
/// constructed per chain run by a [`TaskFactory`](super::TaskFactory).
#[async_trait]
pub trait Task: Send + Sync {
    /// Step name, used as the step store key. Must be one of
    /// [`StepName::ALL`](crate::database::models::StepName::ALL).
    fn name(&self) -> &str;

    /// Register the task before any execution.
    ///
    /// Called once per chain construction; must tolerate an existing record.
    async fn insert_task(&self) -> Result<()>;

    /// Generic status setter a task may use internally.
    async fn update_status(&self, status: StepStatus, message: Option<&str>) -> Result<()>;

    /// Perform the work, reading and writing the shared context.
    ///
    /// Returns whether the task succeeded. On failure the task should record
    /// a human readable cause with [`ExecutionContext::set_error`] first.
    async fn execute(&mut self, ctx: &mut ExecutionContext) -> bool;
}
