//! Sequential task chain.

use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::task::Task;

/// Ordered list of tasks executed over one shared context.
///
/// The chain never touches persistent storage itself; step bookkeeping is
/// done by the tasks (see [`StepTrackingTask`](super::StepTrackingTask)).
#[derive(Default)]
pub struct TaskChain {
    tasks: Vec<Box<dyn Task>>,
}

impl TaskChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Order is significant; no deduplication.
    pub fn add_task(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Run every task over a fresh context.
    ///
    /// Callers inspect [`ExecutionContext::has_error`] on the returned context
    /// to tell success from failure.
    pub async fn run(&mut self, stop_on_error: bool) -> ExecutionContext {
        self.run_with_context(ExecutionContext::new(), stop_on_error)
            .await
    }

    /// Run every task over `ctx`.
    ///
    /// With `stop_on_error` the first failing task halts the chain and the
    /// remaining tasks are neither registered nor executed.
    pub async fn run_with_context(
        &mut self,
        mut ctx: ExecutionContext,
        stop_on_error: bool,
    ) -> ExecutionContext {
        for task in self.tasks.iter_mut() {
            let name = task.name().to_string();

            if let Err(e) = task.insert_task().await {
                warn!(step = %name, error = %e, "Failed to register task, continuing");
            }

            debug!(step = %name, "Executing task");
            if task.execute(&mut ctx).await {
                continue;
            }

            if !ctx.has_error() {
                ctx.set_error(format!("step '{name}' failed"));
            }
            warn!(step = %name, error = %ctx.error_message(), "Task failed");

            if stop_on_error {
                break;
            }
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::database::models::StepStatus;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;

    struct RecordingTask {
        name: &'static str,
        succeed: bool,
        message: Option<&'static str>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingTask {
        fn boxed(
            name: &'static str,
            succeed: bool,
            message: Option<&'static str>,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn Task> {
            Box::new(Self {
                name,
                succeed,
                message,
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl Task for RecordingTask {
        fn name(&self) -> &str {
            self.name
        }

        async fn insert_task(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("insert:{}", self.name));
            Ok(())
        }

        async fn update_status(&self, _status: StepStatus, _message: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn execute(&mut self, ctx: &mut ExecutionContext) -> bool {
            self.log.lock().unwrap().push(format!("exec:{}", self.name));
            if self.succeed {
                ctx.insert(self.name, true);
            } else if let Some(msg) = self.message {
                ctx.set_error(msg);
            }
            self.succeed
        }
    }

    #[tokio::test]
    async fn test_runs_in_order_and_shares_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = TaskChain::new();
        chain.add_task(RecordingTask::boxed("a", true, None, &log));
        chain.add_task(RecordingTask::boxed("b", true, None, &log));

        assert_eq!(chain.task_names(), vec!["a", "b"]);
        let ctx = chain.run(true).await;

        assert!(!ctx.has_error());
        assert_eq!(ctx.len(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["insert:a", "exec:a", "insert:b", "exec:b"]
        );
    }

    #[tokio::test]
    async fn test_stop_on_error_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = TaskChain::new();
        chain.add_task(RecordingTask::boxed("a", true, None, &log));
        chain.add_task(RecordingTask::boxed("b", false, Some("network timeout"), &log));
        chain.add_task(RecordingTask::boxed("c", true, None, &log));

        let ctx = chain.run(true).await;

        assert_eq!(ctx.error_message(), "network timeout");
        let log = log.lock().unwrap();
        assert!(!log.iter().any(|e| e.ends_with(":c")));
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_remaining_tasks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = TaskChain::new();
        chain.add_task(RecordingTask::boxed("a", false, None, &log));
        chain.add_task(RecordingTask::boxed("b", true, None, &log));

        let ctx = chain.run(false).await;

        // A failing task without its own message gets a generic one.
        assert_eq!(ctx.error_message(), "step 'a' failed");
        assert!(ctx.contains_key("b"));
        assert!(log.lock().unwrap().contains(&"exec:b".to_string()));
    }

    #[tokio::test]
    async fn test_empty_chain_returns_empty_context() {
        let mut chain = TaskChain::new();
        assert!(chain.is_empty());
        let ctx = chain.run(true).await;
        assert!(ctx.is_empty());
    }
}
