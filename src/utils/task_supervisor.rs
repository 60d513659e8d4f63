use tokio::task::JoinHandle;
use std::collections::HashMap;
use std::time::Duration;
use crate::error::{Error, Result};
use tracing::{info, error, warn};

/// Owns the long-lived background tasks of the service (HTTP server, retention sweeper)
/// and reports the ones that exit while they are still expected to run.
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!(task = %name, "Spawned background task");
        if let Some(previous) = self.tasks.insert(name.clone(), handle) {
            warn!(task = %name, "Replacing task with the same name");
            previous.abort();
        }
        self
    }

    /// Fails with the names of tasks that have already finished; those are dropped from tracking.
    pub fn check_health(&mut self) -> Result<()> {
        let mut finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if finished.is_empty() {
            return Ok(());
        }

        finished.sort();
        for name in &finished {
            self.tasks.remove(name);
        }
        let message = format!("tasks terminated unexpectedly: {}", finished.join(", "));
        error!("{}", message);
        Err(Error::TaskFailed(message))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits up to `grace` for each task to finish on its own, then aborts it.
    pub async fn shutdown_all(&mut self, grace: Duration) {
        info!(tasks = self.tasks.len(), "Shutting down background tasks");

        for (name, mut handle) in self.tasks.drain() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => info!(task = %name, "Task finished"),
                Ok(Err(e)) => error!(task = %name, "Task failed: {}", e),
                Err(_) => {
                    warn!(task = %name, "Task did not stop in time; aborting");
                    handle.abort();
                }
            }
        }
    }

    pub async fn wait_for_task(&mut self, name: &str) -> Result<()> {
        let handle = self
            .tasks
            .remove(name)
            .ok_or_else(|| Error::TaskFailed(format!("task {} not found", name)))?;
        handle
            .await
            .map_err(|e| Error::TaskFailed(format!("task {} failed: {}", name, e)))?;
        info!(task = %name, "Task completed");
        Ok(())
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
