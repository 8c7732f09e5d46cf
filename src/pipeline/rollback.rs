//! Rollback controller: best-effort compensation in reverse order.
//!
//! Every compensation runs even when an earlier one fails; a rollback that
//! stops at the first failure would strand everything behind it. Failures
//! are collected and reported together, and each step's checkpoint marker is
//! cleared only after its compensation resolved, so an interrupted rollback
//! can itself be resumed.

use crate::models::{CompensationFailure, CutoverError, Result};
use crate::pipeline::executor::StepExecutor;
use crate::pipeline::step::{Step, StepOutcome};
use tracing::{error, info, warn};

/// What a rollback pass accomplished.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Steps whose compensation resolved, newest first
    pub reverted: Vec<String>,
    pub failures: Vec<CompensationFailure>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into a single aggregate error if any compensation failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failures.is_empty() {
            Ok(self.reverted)
        } else {
            Err(CutoverError::RollbackPartialFailure {
                failures: self.failures,
            })
        }
    }
}

/// Walks completed steps backwards and runs their compensations.
pub struct RollbackController {
    executor: StepExecutor,
}

impl RollbackController {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    /// Compensate `completed` in reverse order.
    ///
    /// `completed` is in execution order; the newest step is unwound first.
    /// Compensation failures are recorded and the walk continues. Only a
    /// checkpoint-store failure aborts, since without the store the rollback
    /// cannot track what it has already undone.
    pub async fn compensate(&self, completed: &[&Step]) -> Result<RollbackReport> {
        let mut report = RollbackReport::default();
        if completed.is_empty() {
            return Ok(report);
        }
        warn!(steps = completed.len(), "Rolling back completed steps");

        for step in completed.iter().rev() {
            match self.executor.run_compensation(step).await? {
                StepOutcome::Success(_) | StepOutcome::Skipped(_) => {
                    self.executor
                        .context()
                        .store
                        .clear_step_completion(&step.name)?;
                    info!(step = %step.name, "Reverted");
                    report.reverted.push(step.name.clone());
                }
                StepOutcome::Failed(e) => {
                    error!(step = %step.name, error = %e, "Compensation failed, continuing rollback");
                    report.failures.push(CompensationFailure {
                        step: step.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::{ActionOutput, StepContext};
    use crate::pipeline::testkit::null_context;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn recorded_step(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Step {
        let step_name = name.to_string();
        let log = Arc::clone(log);
        Step::new(name, format!("execution of {name}"), |_ctx| {
            Box::pin(async { Ok(ActionOutput::Completed(Value::Null)) })
        })
        .with_compensation(move |_ctx: Arc<StepContext>| {
            let log = Arc::clone(&log);
            let step_name = step_name.clone();
            Box::pin(async move {
                log.lock().push(step_name.clone());
                if fail {
                    Err(crate::models::CutoverError::RemoteOperation(format!(
                        "{step_name} undo rejected"
                    )))
                } else {
                    Ok(ActionOutput::Completed(json!(null)))
                }
            })
        })
    }

    #[tokio::test]
    async fn compensations_run_newest_first_and_clear_markers() {
        let ctx = null_context().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            recorded_step("one", &log, false),
            recorded_step("two", &log, false),
            recorded_step("three", &log, false),
        ];
        for step in &steps {
            ctx.store.record_step_completion(&step.name).unwrap();
        }

        let controller = RollbackController::new(StepExecutor::new(Arc::clone(&ctx)));
        let refs: Vec<&Step> = steps.iter().collect();
        let report = controller.compensate(&refs).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(*log.lock(), vec!["three", "two", "one"]);
        for step in &steps {
            assert!(!ctx.store.is_step_completed(&step.name));
        }
    }

    #[tokio::test]
    async fn a_failing_compensation_does_not_stop_the_walk() {
        let ctx = null_context().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            recorded_step("one", &log, false),
            recorded_step("two", &log, true),
            recorded_step("three", &log, false),
        ];
        for step in &steps {
            ctx.store.record_step_completion(&step.name).unwrap();
        }

        let controller = RollbackController::new(StepExecutor::new(Arc::clone(&ctx)));
        let refs: Vec<&Step> = steps.iter().collect();
        let report = controller.compensate(&refs).await.unwrap();

        assert_eq!(*log.lock(), vec!["three", "two", "one"]);
        assert_eq!(report.reverted, vec!["three", "one"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "two");
        // The failed step keeps its marker so a later pass retries it.
        assert!(ctx.store.is_step_completed("two"));
        assert!(!ctx.store.is_step_completed("one"));
        assert!(!ctx.store.is_step_completed("three"));

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("two undo rejected"));
    }

    #[tokio::test]
    async fn steps_without_compensation_are_skipped_and_cleared() {
        let ctx = null_context().await;
        let step = Step::new("fetch-inventory", "inventory fetch", |_ctx| {
            Box::pin(async { Ok(ActionOutput::Completed(Value::Null)) })
        });
        ctx.store.record_step_completion("fetch-inventory").unwrap();

        let controller = RollbackController::new(StepExecutor::new(Arc::clone(&ctx)));
        let report = controller.compensate(&[&step]).await.unwrap();

        assert!(report.is_complete());
        assert!(!ctx.store.is_step_completed("fetch-inventory"));
    }

    #[tokio::test]
    async fn empty_rollback_is_a_no_op() {
        let ctx = null_context().await;
        let controller = RollbackController::new(StepExecutor::new(ctx));
        let report = controller.compensate(&[]).await.unwrap();
        assert!(report.is_complete());
        assert!(report.reverted.is_empty());
    }
}
