//! Task construction.

use std::collections::HashMap;
use std::sync::Arc;

use super::command::CommandTask;
use super::state::StateDirectory;
use super::task::Task;
use crate::config::{AppConfig, StepCommand, WhisperConfig};
use crate::database::models::{JobDbModel, StepName};
use crate::database::repositories::StepRepository;
use crate::{Error, Result};

/// Builds the task for one step of one job.
///
/// Called for every chain run, so tasks never carry state between runs.
/// Returning [`Error::Configuration`] means the step cannot run with the
/// current settings.
pub trait TaskFactory: Send + Sync {
    fn create(
        &self,
        step: StepName,
        job: &JobDbModel,
        state: &StateDirectory,
    ) -> Result<Box<dyn Task>>;
}

/// Default factory producing a [`CommandTask`] per step.
pub struct CommandTaskFactory {
    commands: HashMap<StepName, StepCommand>,
    whisper: WhisperConfig,
    steps: Arc<dyn StepRepository>,
}

impl CommandTaskFactory {
    pub fn new(
        commands: HashMap<StepName, StepCommand>,
        whisper: WhisperConfig,
        steps: Arc<dyn StepRepository>,
    ) -> Self {
        Self {
            commands,
            whisper,
            steps,
        }
    }

    pub fn from_config(config: &AppConfig, steps: Arc<dyn StepRepository>) -> Self {
        Self::new(config.steps.clone(), config.whisper.clone(), steps)
    }

    /// Command that will back `step`.
    pub fn command_for(&self, step: StepName) -> Result<StepCommand> {
        if step == StepName::TranscribeOrCaption && self.whisper.enabled {
            self.whisper.validate()?;
            return Ok(self.whisper.command());
        }

        let command = self
            .commands
            .get(&step)
            .ok_or_else(|| Error::config(format!("no command configured for step '{step}'")))?;
        if command.program.trim().is_empty() {
            return Err(Error::config(format!(
                "command for step '{step}' has an empty program"
            )));
        }
        Ok(command.clone())
    }
}

impl TaskFactory for CommandTaskFactory {
    fn create(
        &self,
        step: StepName,
        job: &JobDbModel,
        state: &StateDirectory,
    ) -> Result<Box<dyn Task>> {
        let command = self.command_for(step)?;
        Ok(Box::new(CommandTask::new(
            step,
            job,
            state,
            command,
            self.steps.clone(),
        )))
    }
}
