//! Step executor: runs one step and records its outcome.
//!
//! Ordering contract: the completion marker is written strictly after the
//! step's remote task (if any) resolves. A crash between remote completion
//! and the checkpoint write is the one tolerated inconsistency window, which
//! is why compensations are required to be idempotent.

use crate::models::{CutoverError, Result};
use crate::pipeline::step::{ActionOutput, Step, StepContext, StepOutcome};
use crate::client::TaskResult;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs steps and compensations against the shared context.
#[derive(Clone)]
pub struct StepExecutor {
    ctx: Arc<StepContext>,
}

impl StepExecutor {
    pub fn new(ctx: Arc<StepContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<StepContext> {
        &self.ctx
    }

    /// Run a step.
    ///
    /// Action and task failures fold into `StepOutcome::Failed`; only
    /// checkpoint-store failures escape as `Err`, because with an
    /// untrustworthy store neither progress nor rollback can be recorded.
    pub async fn run(&self, step: &Step) -> Result<StepOutcome> {
        if self.ctx.store.is_step_completed(&step.name) {
            debug!(step = %step.name, "Step completed in a previous run, skipping");
            return Ok(StepOutcome::Skipped(
                "completed in a previous run".to_string(),
            ));
        }

        info!(step = %step.name, "Starting {}", step.description);
        let outcome = match (step.action)(Arc::clone(&self.ctx)).await {
            Ok(output) => self.resolve(step, output).await,
            Err(e) if e.is_store_fatal() => return Err(e),
            Err(e) => StepOutcome::Failed(e),
        };

        match &outcome {
            StepOutcome::Success(_) | StepOutcome::Skipped(_) => {
                self.ctx.store.record_step_completion(&step.name)?;
                info!(step = %step.name, "Finished {}", step.description);
            }
            StepOutcome::Failed(e) => {
                error!(step = %step.name, error = %e, "Failed during {}", step.description);
            }
        }

        Ok(outcome)
    }

    /// Run a step's compensation, if it has one.
    ///
    /// No checkpoint skip and no completion record here; the rollback
    /// controller owns marker bookkeeping.
    pub async fn run_compensation(&self, step: &Step) -> Result<StepOutcome> {
        let Some(compensation) = &step.compensation else {
            return Ok(StepOutcome::Skipped(
                "no compensation registered".to_string(),
            ));
        };

        let outcome = match compensation(Arc::clone(&self.ctx)).await {
            Ok(output) => self.resolve(step, output).await,
            Err(e) if e.is_store_fatal() => return Err(e),
            Err(e) => StepOutcome::Failed(e),
        };
        Ok(outcome)
    }

    /// Resolve an action output, waiting out any remote task it spawned.
    async fn resolve(&self, step: &Step, output: ActionOutput) -> StepOutcome {
        match output {
            ActionOutput::Completed(value) => StepOutcome::Success(value),
            ActionOutput::AlreadyDone(reason) => {
                debug!(step = %step.name, reason = %reason, "Goal state already holds");
                StepOutcome::Skipped(reason)
            }
            ActionOutput::Async(handle) => {
                let timeout = step.task_timeout.unwrap_or(self.ctx.tasks.timeout);
                let wait = self
                    .ctx
                    .poller
                    .wait(&handle, timeout, self.ctx.tasks.poll_interval)
                    .await;
                match wait {
                    Ok(TaskResult::Succeeded) => StepOutcome::Success(Value::Null),
                    Ok(TaskResult::Failed(message)) => {
                        StepOutcome::Failed(CutoverError::RemoteOperation(message))
                    }
                    Ok(TaskResult::TimedOut) => {
                        StepOutcome::Failed(CutoverError::RemoteTimeout(timeout))
                    }
                    Err(e) => StepOutcome::Failed(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testkit::{context_with_api, null_context, ScriptedApi};
    use crate::client::{TaskHandle, TaskStatus};
    use serde_json::json;

    fn plain_step(name: &str) -> Step {
        Step::new(name, format!("execution of {name}"), |_ctx| {
            Box::pin(async { Ok(ActionOutput::Completed(json!({"done": true}))) })
        })
    }

    #[tokio::test]
    async fn completion_is_recorded_after_success() {
        let ctx = null_context().await;
        let step = plain_step("create-gateways");

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();

        assert!(matches!(outcome, StepOutcome::Success(_)));
        assert!(ctx.store.is_step_completed("create-gateways"));
        assert_eq!(
            ctx.store.last_completed_step().as_deref(),
            Some("create-gateways")
        );
    }

    #[tokio::test]
    async fn checkpointed_steps_are_skipped_without_running() {
        let ctx = null_context().await;
        ctx.store.record_step_completion("create-gateways").unwrap();

        let step = Step::new("create-gateways", "creation of gateways", |_ctx| {
            Box::pin(async { panic!("action must not run for a checkpointed step") })
        });

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn already_done_counts_as_completed() {
        let ctx = null_context().await;
        let step = Step::new("reconnect-gateway", "reconnection of gateway", |_ctx| {
            Box::pin(async {
                Ok(ActionOutput::AlreadyDone(
                    "gateway already connected".to_string(),
                ))
            })
        });

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
        assert!(ctx.store.is_step_completed("reconnect-gateway"));
    }

    #[tokio::test(start_paused = true)]
    async fn async_output_is_resolved_through_the_poller() {
        let api = ScriptedApi::with_statuses(vec![
            Ok(TaskStatus::Running),
            Ok(TaskStatus::Succeeded),
        ]);
        let ctx = context_with_api(api).await;

        let step = Step::new("create-networks", "creation of networks", |_ctx| {
            Box::pin(async {
                Ok(ActionOutput::Async(TaskHandle {
                    operation: "createNetwork".to_string(),
                    url: "https://vcd/api/task/7".to_string(),
                }))
            })
        });

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Success(_)));
        assert!(ctx.store.is_step_completed("create-networks"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_does_not_checkpoint_and_keeps_the_diagnostic() {
        let api = ScriptedApi::with_statuses(vec![Ok(TaskStatus::Failed(
            "Network backing unavailable".to_string(),
        ))]);
        let ctx = context_with_api(api).await;

        let step = Step::new("create-networks", "creation of networks", |_ctx| {
            Box::pin(async {
                Ok(ActionOutput::Async(TaskHandle {
                    operation: "createNetwork".to_string(),
                    url: "https://vcd/api/task/7".to_string(),
                }))
            })
        });

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();
        match outcome {
            StepOutcome::Failed(CutoverError::RemoteOperation(message)) => {
                assert_eq!(message, "Network backing unavailable");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!ctx.store.is_step_completed("create-networks"));
    }

    #[tokio::test]
    async fn action_errors_fold_into_failed() {
        let ctx = null_context().await;
        let step = Step::new("disconnect-networks", "disconnection of networks", |_ctx| {
            Box::pin(async {
                Err(CutoverError::RemoteOperation(
                    "Network in use by vApp".to_string(),
                ))
            })
        });

        let executor = StepExecutor::new(Arc::clone(&ctx));
        let outcome = executor.run(&step).await.unwrap();
        assert!(outcome.is_failure());
        assert!(!ctx.store.is_step_completed("disconnect-networks"));
    }

    #[tokio::test]
    async fn store_failures_escape_as_errors() {
        let ctx = null_context().await;
        let step = Step::new("probe", "probing", |_ctx| {
            Box::pin(async {
                Err(CutoverError::CorruptCheckpoint("bad state".to_string()))
            })
        });

        let executor = StepExecutor::new(ctx);
        let err = executor.run(&step).await.unwrap_err();
        assert!(err.is_store_fatal());
    }

    #[tokio::test]
    async fn missing_compensation_is_neutral() {
        let ctx = null_context().await;
        let step = plain_step("fetch-portgroups");
        let executor = StepExecutor::new(ctx);
        let outcome = executor.run_compensation(&step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }
}
