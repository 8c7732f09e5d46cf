//! Shared fakes for pipeline tests: an in-memory checkpoint backend and a
//! scriptable remote API.

use crate::checkpoint::{CheckpointStore, PersistenceBackend};
use crate::client::{
    AuthProvider, RemoteApi, RemoteOutcome, RemoteRequest, SessionGuard, SessionToken, TaskHandle,
    TaskPoller, TaskStatus,
};
use crate::models::Result;
use crate::pipeline::step::{StepContext, TaskSettings};
use crate::pool::BatchRunner;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Checkpoint backend that persists to a mutex-guarded buffer.
#[derive(Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl PersistenceBackend for MemoryBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().clone())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.bytes.lock() = None;
        Ok(())
    }
}

pub struct StaticAuth;

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn login(&self) -> Result<SessionToken> {
        Ok(SessionToken::new("token"))
    }
}

/// Replays scripted responses; answers `Completed(null)` and `Running` once
/// a script runs out.
#[derive(Default)]
pub struct ScriptedApi {
    pub executions: Mutex<VecDeque<Result<RemoteOutcome>>>,
    pub statuses: Mutex<VecDeque<Result<TaskStatus>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedApi {
    pub fn with_statuses(statuses: Vec<Result<TaskStatus>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_executions(executions: Vec<Result<RemoteOutcome>>) -> Self {
        Self {
            executions: Mutex::new(executions.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Handle onto the operations `execute` has seen, in call order. Clone
    /// it before the API moves into a context.
    pub fn operation_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn execute(
        &self,
        _token: &SessionToken,
        request: &RemoteRequest,
    ) -> Result<RemoteOutcome> {
        self.log.lock().push(request.operation.clone());
        self.executions
            .lock()
            .pop_front()
            .unwrap_or(Ok(RemoteOutcome::Completed(Value::Null)))
    }

    async fn task_status(
        &self,
        _token: &SessionToken,
        _handle: &TaskHandle,
    ) -> Result<TaskStatus> {
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or(Ok(TaskStatus::Running))
    }
}

pub fn memory_store() -> Arc<CheckpointStore> {
    let backend = Box::new(MemoryBackend::default());
    Arc::new(CheckpointStore::open(backend, "migrate").unwrap())
}

pub async fn context_with_api(api: ScriptedApi) -> Arc<StepContext> {
    context_with(api, memory_store()).await
}

pub async fn context_with(api: ScriptedApi, store: Arc<CheckpointStore>) -> Arc<StepContext> {
    let guard = Arc::new(
        SessionGuard::establish(Arc::new(api), Arc::new(StaticAuth))
            .await
            .unwrap(),
    );
    Arc::new(StepContext {
        remote: Arc::clone(&guard),
        store,
        poller: TaskPoller::new(guard),
        batch: BatchRunner::new(4),
        tasks: TaskSettings {
            timeout: Duration::from_secs(360),
            poll_interval: Duration::from_secs(10),
            relocation_timeout: Duration::from_secs(3600),
        },
    })
}

pub async fn null_context() -> Arc<StepContext> {
    context_with_api(ScriptedApi::default()).await
}
