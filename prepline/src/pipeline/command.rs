//! Configuration-driven task running one external program per step.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::state::StateDirectory;
use super::task::Task;
use crate::config::StepCommand;
use crate::database::models::{JobDbModel, StepName, StepStatus};
use crate::database::repositories::StepRepository;
use crate::utils::fs;
use crate::{Error, Result};

/// Values substituted into command templates.
///
/// Placeholders: `{url}`, `{title}`, `{video_id}`, `{job_id}`, `{work_dir}`
/// and `{ctx:<key>}` for a value written by an earlier step. Unknown
/// placeholders are left as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub url: String,
    pub title: String,
    pub video_id: String,
    pub job_id: String,
    pub work_dir: PathBuf,
}

impl TemplateVars {
    pub fn new(job: &JobDbModel, state: &StateDirectory) -> Self {
        Self {
            url: job.url.clone(),
            title: job.title.clone(),
            video_id: job.external_ref.clone(),
            job_id: job.id.clone(),
            work_dir: state.work_dir(),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "url" => Some(self.url.clone()),
            "title" => Some(self.title.clone()),
            "video_id" => Some(self.video_id.clone()),
            "job_id" => Some(self.job_id.clone()),
            "work_dir" => Some(self.work_dir.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

/// Expand placeholders in `template`.
///
/// Fails when a `{ctx:<key>}` placeholder names a value that is not in the
/// context.
pub fn render_template(
    template: &str,
    vars: &TemplateVars,
    ctx: &ExecutionContext,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = &after[..end];
        if let Some(ctx_key) = key.strip_prefix("ctx:") {
            match ctx.get(ctx_key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) | None => {
                    return Err(format!("missing context value '{ctx_key}'"));
                }
                Some(other) => out.push_str(&other.to_string()),
            }
        } else if let Some(value) = vars.lookup(key) {
            out.push_str(&value);
        } else {
            out.push('{');
            out.push_str(key);
            out.push('}');
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Outcome of a finished child process.
pub struct CommandOutput {
    pub status: ExitStatus,
    pub duration: f64,
    /// Last non-empty stderr line, used as the failure cause.
    pub last_stderr: Option<String>,
}

impl CommandOutput {
    /// Short failure description: exit code plus the last stderr line.
    pub fn failure_message(&self) -> String {
        let code = match self.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        match &self.last_stderr {
            Some(line) => format!("{code}: {line}"),
            None => code,
        }
    }
}

/// Run a command, forwarding its stdout/stderr lines to tracing.
pub async fn run_command_with_logs(command: &mut Command, step: &str) -> Result<CommandOutput> {
    let start = Instant::now();

    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command
        .spawn()
        .map_err(|e| Error::Other(format!("Failed to spawn '{program}': {e}")))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        let step = step.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(step = %step, "stdout: {}", line);
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        let step = step.to_string();
        tokio::spawn(async move {
            let mut last = None;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // Media tools print progress to stderr; only lines that look
                // like errors are raised to warn.
                if line.to_lowercase().contains("error") {
                    warn!(step = %step, "stderr: {}", line);
                } else {
                    debug!(step = %step, "stderr: {}", line);
                }
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Other(format!("Failed to wait for '{program}': {e}")))?;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let last_stderr = match stderr_task {
        Some(task) => task.await.ok().flatten(),
        None => None,
    };

    Ok(CommandOutput {
        status,
        duration: start.elapsed().as_secs_f64(),
        last_stderr,
    })
}

/// Task backed by a configured external command.
///
/// Runs inside the job's working directory. On success every configured
/// output is rendered and written into the context for later steps.
pub struct CommandTask {
    step: StepName,
    job_ref: String,
    vars: TemplateVars,
    command: StepCommand,
    steps: Arc<dyn StepRepository>,
}

impl CommandTask {
    pub fn new(
        step: StepName,
        job: &JobDbModel,
        state: &StateDirectory,
        command: StepCommand,
        steps: Arc<dyn StepRepository>,
    ) -> Self {
        Self {
            step,
            job_ref: job.external_ref.clone(),
            vars: TemplateVars::new(job, state),
            command,
            steps,
        }
    }

    pub fn step(&self) -> StepName {
        self.step
    }

    pub fn command(&self) -> &StepCommand {
        &self.command
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> std::result::Result<(), String> {
        let inputs: &ExecutionContext = ctx;
        let args = self
            .command
            .args
            .iter()
            .map(|arg| render_template(arg, &self.vars, inputs))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        fs::ensure_dir_all_with_op("creating job work dir", &self.vars.work_dir)
            .await
            .map_err(|e| e.to_string())?;

        debug!(
            video_id = %self.job_ref,
            step = %self.step,
            program = %self.command.program,
            ?args,
            "Running step command"
        );

        let mut command = Command::new(&self.command.program);
        command
            .args(&args)
            .current_dir(&self.vars.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = run_command_with_logs(&mut command, self.step.as_str())
            .await
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(output.failure_message());
        }

        for (key, template) in &self.command.outputs {
            let value = render_template(template, &self.vars, ctx)?;
            ctx.insert(key.clone(), value);
        }

        info!(
            video_id = %self.job_ref,
            step = %self.step,
            duration_secs = output.duration,
            "Step command finished"
        );
        Ok(())
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        self.step.as_str()
    }

    async fn insert_task(&self) -> Result<()> {
        self.steps.ensure_step(&self.job_ref, self.step).await
    }

    async fn update_status(&self, status: StepStatus, message: Option<&str>) -> Result<()> {
        self.steps
            .update_step_status(&self.job_ref, self.step.as_str(), status, message)
            .await
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> bool {
        match self.run(ctx).await {
            Ok(()) => true,
            Err(message) => {
                ctx.set_error(message);
                false
            }
        }
    }
}
