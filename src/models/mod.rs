//! Shared data models: configuration and the error taxonomy.

mod config;
mod error;

pub use config::{
    ApiConfig, BatchConfig, CheckpointConfig, Config, ConfigError, MigrationConfig, TaskConfig,
};
pub use error::{CompensationFailure, CutoverError, ItemFailure, Result};
