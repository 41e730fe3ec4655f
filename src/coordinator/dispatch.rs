//! Task execution and the lease-renewal loop around it.
//!
//! Execution is behind the `Executor` trait so tests can substitute a
//! scripted executor. The production executor hands the command to the
//! system shell.

use crate::coordinator::lease::LeaseManager;
use crate::db::{Database, now_ms};
use crate::error::{QueueError, QueueResult};
use crate::types::{Task, TaskState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Executes a task's command payload.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task) -> QueueResult<()>;
}

/// Runs the command via `sh -c`.
pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, task: &Task) -> QueueResult<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(&task.command)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                QueueError::TaskFailed(task.id.clone(), format!("failed to spawn: {e}"))
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(QueueError::TaskFailed(
                task.id.clone(),
                format!("exit code {}", status.code().unwrap_or(-1)),
            ))
        }
    }
}

/// Drives one claimed task through `Picked -> Running -> terminal`,
/// renewing the lease while execution is in flight.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    lease: LeaseManager,
    executor: Arc<dyn Executor>,
    renew_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        lease: LeaseManager,
        executor: Arc<dyn Executor>,
        renew_interval: Duration,
    ) -> Self {
        Self {
            db,
            lease,
            executor,
            renew_interval,
        }
    }

    /// Execute a task this coordinator has already claimed.
    ///
    /// Losing the lease at any point aborts execution without touching
    /// the task row: whoever reclaimed it owns the outcome now.
    pub async fn run(&self, task: Task) {
        if let Err(e) = self.run_inner(task).await {
            error!(error = %e, "Dispatch failed");
        }
    }

    async fn run_inner(&self, task: Task) -> anyhow::Result<()> {
        if !self
            .db
            .transition(&task.id, TaskState::Picked, TaskState::Running, now_ms())?
        {
            // Reclaimed between claim and start; nothing to do.
            warn!(task_id = %task.id, "Task no longer picked, skipping dispatch");
            return Ok(());
        }

        info!(task_id = %task.id, command = %task.command, "Task started");

        let mut renew_timer = tokio::time::interval(self.renew_interval);
        renew_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        renew_timer.tick().await; // first tick fires immediately

        let execution = self.executor.execute(&task);
        tokio::pin!(execution);

        let outcome = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = renew_timer.tick() => {
                    if !self.lease.renew(&task.id)? {
                        // Dropping the execution future kills the child.
                        warn!(task_id = %task.id, "Aborting execution: lease lost");
                        return Ok(());
                    }
                }
            }
        };

        let (to, detail) = match &outcome {
            Ok(()) => (TaskState::Completed, None),
            Err(e) => (TaskState::Failed, Some(e.to_string())),
        };

        let recorded = self
            .db
            .transition(&task.id, TaskState::Running, to, now_ms())?;

        if !recorded {
            warn!(task_id = %task.id, "Outcome not recorded: task was reclaimed");
            return Ok(());
        }

        match detail {
            None => info!(task_id = %task.id, "Task completed"),
            Some(reason) => warn!(task_id = %task.id, %reason, "Task failed"),
        }

        Ok(())
    }
}
