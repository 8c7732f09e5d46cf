//! Configuration models for cutover.
//!
//! All tunable parameters are explicit here and loaded from a TOML file;
//! credentials resolve from the environment so they never land on disk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for cutover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control plane endpoint and credentials
    pub api: ApiConfig,

    /// Remote task polling behavior
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Concurrent batch execution
    #[serde(default)]
    pub batch: BatchConfig,

    /// Checkpoint persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Migration source and naming
    pub migration: MigrationConfig,
}

/// Control plane API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the control plane (e.g. "https://vcd.example.com")
    pub base_url: String,

    /// Organization to authenticate against
    pub org: String,

    /// Username for session login
    pub username: String,

    /// Password (prefer the env var over putting this in the file)
    #[serde(default)]
    pub password: Option<String>,

    /// Environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_password_env() -> String {
    "CUTOVER_API_PASSWORD".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// Remote task polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Default deadline for a remote task, in seconds
    #[serde(default = "default_task_timeout")]
    pub timeout_secs: u64,

    /// Interval between task status polls, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Deadline for workload relocation tasks, which move entire vApps and
    /// routinely run far longer than control plane reconfigurations
    #[serde(default = "default_relocation_timeout")]
    pub relocation_timeout_secs: u64,
}

fn default_task_timeout() -> u64 {
    360
}

fn default_poll_interval() -> u64 {
    10
}

fn default_relocation_timeout() -> u64 {
    3600
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_task_timeout(),
            poll_interval_secs: default_poll_interval(),
            relocation_timeout_secs: default_relocation_timeout(),
        }
    }
}

impl TaskConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn relocation_timeout(&self) -> Duration {
        Duration::from_secs(self.relocation_timeout_secs)
    }
}

/// Concurrent batch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of batch items in flight at once
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

fn default_max_parallelism() -> usize {
    8
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
        }
    }
}

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding the checkpoint file
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

/// Migration source and target naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Name of the source virtual datacenter to migrate
    pub source_vdc: String,

    /// Suffix appended to the source name while the target is being built;
    /// stripped again by the final rename steps
    #[serde(default = "default_target_suffix")]
    pub target_suffix: String,
}

fn default_target_suffix() -> String {
    "-t".to_string()
}

impl MigrationConfig {
    /// Working name of the target virtual datacenter.
    pub fn target_vdc(&self) -> String {
        format!("{}{}", self.source_vdc, self.target_suffix)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the API password from config or environment.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        if let Some(password) = &self.api.password {
            return Ok(password.clone());
        }

        std::env::var(&self.api.password_env).map_err(|_| ConfigError::MissingCredential {
            env_var: self.api.password_env.clone(),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API password: set {env_var} env var or api.password in config")]
    MissingCredential { env_var: String },
}
