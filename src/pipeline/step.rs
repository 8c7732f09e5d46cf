//! Step model for the linear migration plan.
//!
//! A step is an immutable descriptor: a unique name, a human description,
//! an async action, and an optional compensating action that semantically
//! undoes it. Actions receive a shared [`StepContext`] and return what
//! happened; the executor owns checkpointing and task resolution around
//! them.

use crate::checkpoint::CheckpointStore;
use crate::client::{RemoteOutcome, SessionGuard, TaskHandle, TaskPoller};
use crate::models::{Config, CutoverError, Result};
use crate::pool::BatchRunner;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Task timing knobs steps and the executor share.
#[derive(Debug, Clone, Copy)]
pub struct TaskSettings {
    /// Default deadline for a remote task
    pub timeout: Duration,
    /// Interval between status polls
    pub poll_interval: Duration,
    /// Deadline for workload relocation tasks
    pub relocation_timeout: Duration,
}

impl TaskSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.tasks.timeout(),
            poll_interval: config.tasks.poll_interval(),
            relocation_timeout: config.tasks.relocation_timeout(),
        }
    }
}

/// Shared collaborators handed to every step action.
pub struct StepContext {
    pub remote: Arc<SessionGuard>,
    pub store: Arc<CheckpointStore>,
    pub poller: TaskPoller,
    pub batch: BatchRunner,
    pub tasks: TaskSettings,
}

/// What a step action observed.
#[derive(Debug)]
pub enum ActionOutput {
    /// The operation finished; the value (possibly null) lands in the
    /// step outcome
    Completed(Value),
    /// The operation runs as a remote task; the executor resolves it
    Async(TaskHandle),
    /// The goal state already holds, nothing was done
    AlreadyDone(String),
}

impl From<RemoteOutcome> for ActionOutput {
    fn from(outcome: RemoteOutcome) -> Self {
        match outcome {
            RemoteOutcome::Completed(value) => ActionOutput::Completed(value),
            RemoteOutcome::Accepted(handle) => ActionOutput::Async(handle),
        }
    }
}

/// Outcome of running one step.
#[derive(Debug)]
pub enum StepOutcome {
    Success(Value),
    /// The step did not need to run: either its goal state already held, or
    /// the checkpoint shows it completed in a previous run
    Skipped(String),
    Failed(CutoverError),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Boxed async step action.
pub type StepAction =
    Arc<dyn Fn(Arc<StepContext>) -> BoxFuture<'static, Result<ActionOutput>> + Send + Sync>;

/// One named unit of the migration plan.
pub struct Step {
    pub name: String,
    pub description: String,
    pub action: StepAction,
    pub compensation: Option<StepAction>,
    /// Overrides the default task deadline for this step's remote tasks
    pub task_timeout: Option<Duration>,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, action: F) -> Self
    where
        F: Fn(Arc<StepContext>) -> BoxFuture<'static, Result<ActionOutput>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            action: Arc::new(action),
            compensation: None,
            task_timeout: None,
        }
    }

    pub fn with_compensation<F>(mut self, compensation: F) -> Self
    where
        F: Fn(Arc<StepContext>) -> BoxFuture<'static, Result<ActionOutput>>
            + Send
            + Sync
            + 'static,
    {
        self.compensation = Some(Arc::new(compensation));
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_compensation", &self.compensation.is_some())
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}
