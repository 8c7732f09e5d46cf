//! Bounded-parallelism execution of independent sub-operations.

mod batch;

pub use batch::{BatchItem, BatchRunner, BatchSummary};
