//! Download pipeline building blocks.
//!
//! A job is processed by a [`TaskChain`] of six tasks, one per [`StepName`],
//! sharing one [`ExecutionContext`]. Each task is wrapped in a
//! [`StepTrackingTask`] so its status and results land in the step store.
//! Tasks are produced by a [`TaskFactory`] and operate inside the job's
//! [`StateDirectory`].

mod chain;
mod command;
mod context;
mod factory;
mod state;
mod task;
mod tracking;

pub use chain::TaskChain;
pub use command::{CommandOutput, CommandTask, TemplateVars, render_template, run_command_with_logs};
pub use context::{ERROR_KEY, ExecutionContext};
pub use factory::{CommandTaskFactory, TaskFactory};
pub use state::StateDirectory;
pub use task::Task;
pub use tracking::StepTrackingTask;

pub(crate) use tracking::record_outcome;

pub use crate::database::models::{StepName, StepStatus};
