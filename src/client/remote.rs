//! Boundary interfaces to the remote control plane.
//!
//! The orchestration core consumes, never defines, the remote protocol. A
//! [`RemoteApi`] implementation answers each request with either an immediate
//! result or a handle to an asynchronous task; an [`AuthProvider`] knows how
//! to establish a session. Everything above these traits is transport
//! agnostic, which is also what makes the core testable with scripted fakes.

use crate::models::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// HTTP-like method for a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Description of one remote operation.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    /// Short operation name, used for logging and task handles
    pub operation: String,
    pub method: Method,
    /// Path relative to the API base URL
    pub path: String,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn get(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(operation, Method::Get, path)
    }

    pub fn post(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(operation, Method::Post, path)
    }

    pub fn put(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(operation, Method::Put, path)
    }

    pub fn delete(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(operation, Method::Delete, path)
    }

    fn new(operation: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Handle to an in-flight asynchronous remote task.
///
/// Meaningless once the poller resolves it; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Operation that spawned the task
    pub operation: String,
    /// Polling URL reported by the control plane
    pub url: String,
}

/// Immediate result of a remote request.
#[derive(Debug, Clone)]
pub enum RemoteOutcome {
    /// The operation finished synchronously
    Completed(Value),
    /// The operation was accepted and runs as an asynchronous task
    Accepted(TaskHandle),
}

/// Observed state of an asynchronous remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    /// Terminal failure with the remote diagnostic, verbatim
    Failed(String),
}

/// Credential material for one session window.
///
/// Replaced wholesale on renewal, never mutated in place.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub secret: String,
    pub issued_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Capability to perform remote operations.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Perform a remote operation.
    ///
    /// Implementations signal session expiry with
    /// [`CutoverError::SessionExpired`](crate::models::CutoverError::SessionExpired)
    /// so the session guard can renew; permission and not-found failures must
    /// map to other variants.
    async fn execute(&self, token: &SessionToken, request: &RemoteRequest)
        -> Result<RemoteOutcome>;

    /// Report the current status of an asynchronous task.
    async fn task_status(&self, token: &SessionToken, handle: &TaskHandle) -> Result<TaskStatus>;
}

/// Capability to establish a session with the control plane.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self) -> Result<SessionToken>;
}
