//! Durable checkpoint state for resumable migrations.

mod state;
mod store;

pub use state::CheckpointState;
pub use store::{CheckpointStore, FileBackend, PersistenceBackend};
