//! Error types for cutover.
//!
//! The taxonomy separates three classes of failure:
//! - Remote failures carrying the control plane's own diagnostic, which must
//!   reach the operator verbatim
//! - Checkpoint failures, which are fatal because persisted state can no
//!   longer be trusted
//! - Aggregate failures collected from batch items or compensations

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for cutover.
#[derive(Debug, Error)]
pub enum CutoverError {
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    /// The control plane rejected the session token. Handled inside the
    /// session guard by a single re-login; surfaces only if renewal itself
    /// is immediately rejected again.
    #[error("Session expired")]
    SessionExpired,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A remote operation reported a terminal failure. The message is the
    /// remote diagnostic, unmodified.
    #[error("Remote operation failed: {0}")]
    RemoteOperation(String),

    /// A remote task was still running when its deadline elapsed. Distinct
    /// from [`CutoverError::RemoteOperation`]: the remote state is
    /// indeterminate, not known-bad.
    #[error("Remote task did not complete within {0:?}")]
    RemoteTimeout(Duration),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Checkpoint store unavailable: {context}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("{} batch item(s) failed: {}", failures.len(), format_item_failures(failures))]
    BatchPartialFailure { failures: Vec<ItemFailure> },

    #[error("{} compensation(s) failed, manual cleanup required: {}", failures.len(), format_compensation_failures(failures))]
    RollbackPartialFailure { failures: Vec<CompensationFailure> },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of one item inside a concurrent batch.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub item_id: String,
    pub message: String,
}

/// Failure of one compensating action during rollback.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    pub step: String,
    pub message: String,
}

fn format_item_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.item_id, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_compensation_failures(failures: &[CompensationFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.step, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CutoverError {
    /// Create a store error with context.
    pub fn store(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source,
        }
    }

    /// Whether this error means the session must be re-established.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Whether this error makes the checkpoint store untrustworthy.
    ///
    /// Such errors abort the run without attempting rollback: compensations
    /// driven by bad state would do more damage than they repair.
    pub fn is_store_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::CorruptCheckpoint(_)
        )
    }
}

/// Result type alias for cutover.
pub type Result<T> = std::result::Result<T, CutoverError>;
