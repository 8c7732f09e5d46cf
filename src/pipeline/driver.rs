//! Workflow driver: runs the migration plan front to back.
//!
//! The driver owns the run loop, the checkpoint-resume behavior and the
//! rollback decision. A step failure triggers rollback of the steps this run
//! completed; steps checkpointed by earlier runs stay in place and are only
//! unwound by an explicit rollback request. The checkpoint survives a fully
//! successful run, which is what makes a re-run a no-op.

use crate::models::{CutoverError, Result};
use crate::pipeline::executor::StepExecutor;
use crate::pipeline::rollback::{RollbackController, RollbackReport};
use crate::pipeline::step::{Step, StepContext, StepOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Terminal state of one driver run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every step succeeded or was already done
    Completed { executed: usize, skipped: usize },
    /// A step failed and every compensation resolved
    RolledBack {
        failed_step: String,
        error: CutoverError,
        report: RollbackReport,
    },
    /// A step failed and at least one compensation failed too; the remote
    /// environment needs manual attention
    RollbackIncomplete {
        failed_step: String,
        error: CutoverError,
        report: RollbackReport,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::RolledBack { .. } => 2,
            Self::RollbackIncomplete { .. } => 3,
        }
    }
}

/// Drives an ordered plan of steps to completion.
pub struct WorkflowDriver {
    steps: Vec<Step>,
    executor: StepExecutor,
    rollback: RollbackController,
}

impl WorkflowDriver {
    /// Build a driver over `steps`. Step names must be unique; they key the
    /// checkpoint.
    pub fn new(ctx: Arc<StepContext>, steps: Vec<Step>) -> Result<Self> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(CutoverError::Internal(format!(
                    "Duplicate step name in plan: {}",
                    step.name
                )));
            }
        }
        let executor = StepExecutor::new(ctx);
        let rollback = RollbackController::new(executor.clone());
        Ok(Self {
            steps,
            executor,
            rollback,
        })
    }

    pub fn context(&self) -> &Arc<StepContext> {
        self.executor.context()
    }

    /// Run the plan front to back.
    ///
    /// Returns `Err` only for failures that make further bookkeeping unsafe
    /// (an unusable checkpoint store); everything else resolves to a
    /// [`RunOutcome`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let pb = ProgressBar::new(self.steps.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("##-"),
        );

        let mut executed = 0usize;
        let mut skipped = 0usize;
        // Steps completed by this run, in execution order. Rollback on
        // failure covers exactly these.
        let mut fresh: Vec<usize> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            pb.set_message(step.name.clone());
            let was_checkpointed = self.executor.context().store.is_step_completed(&step.name);

            match self.executor.run(step).await? {
                StepOutcome::Success(_) => {
                    executed += 1;
                    fresh.push(index);
                }
                StepOutcome::Skipped(_) if was_checkpointed => {
                    skipped += 1;
                }
                StepOutcome::Skipped(_) => {
                    // Goal state already held, but the completion was
                    // recorded by this run, so it is ours to unwind.
                    skipped += 1;
                    fresh.push(index);
                }
                StepOutcome::Failed(error) => {
                    pb.abandon_with_message(format!("failed at {}", step.name));
                    return self.unwind(step, error, &fresh).await;
                }
            }
            pb.inc(1);
        }

        pb.finish_with_message("done");
        info!(executed, skipped, "Migration plan completed");
        Ok(RunOutcome::Completed { executed, skipped })
    }

    /// Unwind everything this run completed after `failed` broke the plan.
    async fn unwind(
        &self,
        failed: &Step,
        error: CutoverError,
        fresh: &[usize],
    ) -> Result<RunOutcome> {
        error!(step = %failed.name, error = %error, "Step failed, rolling back this run's progress");
        let completed: Vec<&Step> = fresh.iter().map(|&i| &self.steps[i]).collect();
        let report = self.rollback.compensate(&completed).await?;

        if report.is_complete() {
            info!(reverted = report.reverted.len(), "Rollback complete");
            Ok(RunOutcome::RolledBack {
                failed_step: failed.name.clone(),
                error,
                report,
            })
        } else {
            error!(
                failures = report.failures.len(),
                "Rollback incomplete, manual intervention required"
            );
            Ok(RunOutcome::RollbackIncomplete {
                failed_step: failed.name.clone(),
                error,
                report,
            })
        }
    }

    /// Compensate every step the checkpoint records as completed, across all
    /// runs. Used by the explicit rollback command.
    pub async fn roll_back_completed(&self) -> Result<RollbackReport> {
        let completed = self.executor.context().store.completed_steps();
        let steps: Vec<&Step> = completed
            .iter()
            .filter_map(|name| self.steps.iter().find(|s| &s.name == name))
            .collect();
        self.rollback.compensate(&steps).await
    }
}
