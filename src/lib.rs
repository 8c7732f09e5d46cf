//! cutover - Checkpointed, resumable migration orchestration for
//! asynchronous infrastructure control planes.
//!
//! ## Architecture
//!
//! - **Checkpoint Store**: Durable step markers and key/value state; every
//!   mutation hits disk before the next step starts
//! - **Session Guard**: Transparent re-authentication when the control
//!   plane expires a session mid-run
//! - **Task Poller**: Resolves `202 Accepted` task handles into outcomes
//! - **Step Executor / Rollback Controller**: Runs plan steps forward and,
//!   on failure, compensates completed ones in reverse order
//! - **Batch Runner**: Bounded-parallelism fan-out for independent
//!   sub-operations such as vApp relocation
//! - **Workflow Driver**: Ties it all together into a resumable run
//!
//! A failed run rolls back what it did; an interrupted run resumes from its
//! checkpoint; a re-run after success is a no-op.

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use checkpoint::{CheckpointState, CheckpointStore, FileBackend};
pub use client::{HttpApi, SessionGuard, TaskPoller};
pub use models::{Config, CutoverError, Result};
pub use pipeline::{migration_plan, RunOutcome, StepContext, WorkflowDriver};
pub use pool::BatchRunner;
