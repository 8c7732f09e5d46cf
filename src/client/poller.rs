//! Task poller: resolves an asynchronous task handle into an outcome.
//!
//! The control plane answers side-effecting operations with a task URL; the
//! poller turns that into a synchronous result by polling at a fixed
//! interval until the task leaves its running state or the deadline elapses.
//! The interval is a lower bound on network usage, not a precision timer.

use crate::client::remote::{TaskHandle, TaskStatus};
use crate::client::session::SessionGuard;
use crate::models::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Resolved outcome of an asynchronous remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Succeeded,
    /// Terminal failure; the message is the remote diagnostic, verbatim
    Failed(String),
    /// The deadline elapsed while the task was still running. The remote
    /// state is indeterminate; the caller decides whether that is fatal.
    TimedOut,
}

/// Polls task status through the session guard.
#[derive(Clone)]
pub struct TaskPoller {
    guard: Arc<SessionGuard>,
}

impl TaskPoller {
    pub fn new(guard: Arc<SessionGuard>) -> Self {
        Self { guard }
    }

    /// Block until the task resolves or `timeout` elapses.
    ///
    /// Transport failures while polling propagate as errors; they say
    /// nothing about the task itself.
    pub async fn wait(
        &self,
        handle: &TaskHandle,
        timeout: Duration,
        interval: Duration,
    ) -> Result<TaskResult> {
        let deadline = Instant::now() + timeout;
        debug!(
            operation = %handle.operation,
            timeout_secs = timeout.as_secs(),
            "Waiting for remote task"
        );

        loop {
            match self.guard.task_status(handle).await? {
                TaskStatus::Succeeded => {
                    info!(operation = %handle.operation, "Remote task succeeded");
                    return Ok(TaskResult::Succeeded);
                }
                TaskStatus::Failed(message) => {
                    return Ok(TaskResult::Failed(message));
                }
                TaskStatus::Running => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(TaskResult::TimedOut);
                    }
                    let sleep_for = interval.min(deadline - now);
                    tokio::time::sleep(sleep_for).await;
                }
            }
        }
    }
}
