//! Workflow orchestration: the step model, the executor, rollback and the
//! driver that ties them together, plus the built-in migration plan.

mod driver;
mod executor;
mod plan;
mod rollback;
mod step;

#[cfg(test)]
pub(crate) mod testkit;

pub use driver::{RunOutcome, WorkflowDriver};
pub use executor::StepExecutor;
pub use plan::migration_plan;
pub use rollback::{RollbackController, RollbackReport};
pub use step::{ActionOutput, Step, StepAction, StepContext, StepOutcome, TaskSettings};
