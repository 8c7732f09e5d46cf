//! Durable checkpoint storage.
//!
//! Every mutation serializes the full state and writes it through the
//! backend before returning, so a restart at any point observes the latest
//! completed step. Writes go through backup-then-rename so a crash mid-write
//! leaves a readable file behind.

use crate::checkpoint::CheckpointState;
use crate::models::{CutoverError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Backing medium for checkpoint bytes.
///
/// The store is agnostic to what sits behind this: a file, a database row,
/// an object-store key.
pub trait PersistenceBackend: Send + Sync {
    /// Read the full persisted state, or `None` if nothing was ever written.
    fn read_all(&self) -> Result<Option<Vec<u8>>>;

    /// Durably replace the persisted state.
    fn write_all(&self, bytes: &[u8]) -> Result<()>;

    /// Remove the persisted state entirely.
    fn clear(&self) -> Result<()>;
}

/// File-backed persistence: write to a temp file, then rename over the
/// checkpoint, keeping a backup of the previous generation.
#[derive(Debug)]
pub struct FileBackend {
    checkpoint_path: PathBuf,
    backup_path: PathBuf,
    temp_path: PathBuf,
}

impl FileBackend {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| CutoverError::store("creating checkpoint dir", e))?;
        Ok(Self {
            checkpoint_path: dir.join("checkpoint.json"),
            backup_path: dir.join("checkpoint.backup.json"),
            temp_path: dir.join("checkpoint.tmp.json"),
        })
    }
}

impl PersistenceBackend for FileBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>> {
        if !self.checkpoint_path.exists() {
            return Ok(None);
        }
        fs::read(&self.checkpoint_path)
            .map(Some)
            .map_err(|e| CutoverError::store("reading checkpoint", e))
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| CutoverError::store("backing up checkpoint", e))?;
        }
        fs::write(&self.temp_path, bytes)
            .map_err(|e| CutoverError::store("writing temp checkpoint", e))?;
        fs::rename(&self.temp_path, &self.checkpoint_path)
            .map_err(|e| CutoverError::store("renaming checkpoint", e))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for path in [&self.checkpoint_path, &self.backup_path, &self.temp_path] {
            if path.exists() {
                fs::remove_file(path)
                    .map_err(|e| CutoverError::store("removing checkpoint", e))?;
            }
        }
        Ok(())
    }
}

/// Durable key/value progress store shared by the driver, the executor and
/// concurrent batch workers. Writes are serialized under a mutex; volume is
/// low enough that contention is a non-issue.
pub struct CheckpointStore {
    backend: Box<dyn PersistenceBackend>,
    state: Mutex<CheckpointState>,
}

impl CheckpointStore {
    /// Load the persisted state, or start a fresh one for `workflow`.
    ///
    /// An unreadable medium surfaces as `StoreUnavailable`, unparseable
    /// content as `CorruptCheckpoint`. Both are fatal: the caller must not
    /// guess at progress.
    pub fn open(backend: Box<dyn PersistenceBackend>, workflow: &str) -> Result<Self> {
        let state = match Self::peek(backend.as_ref())? {
            Some(state) => {
                info!(
                    workflow = %state.workflow,
                    last_completed = state.last_completed_step.as_deref().unwrap_or("<none>"),
                    completed = state.completed_steps.len(),
                    "Resuming from checkpoint"
                );
                state
            }
            None => {
                let state = CheckpointState::new(workflow);
                info!(workflow = workflow, run_id = %state.run_id, "Created new checkpoint");
                state
            }
        };

        let store = Self {
            backend,
            state: Mutex::new(state),
        };
        store.persist()?;
        Ok(store)
    }

    /// Read persisted state without constructing a store.
    pub fn peek(backend: &dyn PersistenceBackend) -> Result<Option<CheckpointState>> {
        let Some(bytes) = backend.read_all()? else {
            return Ok(None);
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| CutoverError::CorruptCheckpoint(e.to_string()))?;
        Ok(Some(state))
    }

    /// Store a value and durably write before returning.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        state.set(key, value);
        self.persist_locked(&state)
    }

    /// Append a value to the array under `key` and durably write before
    /// returning. Safe to call from concurrent batch workers; the state
    /// mutex serializes the read-modify-write.
    pub fn append_value(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        state.append(key, value);
        self.persist_locked(&state)
    }

    /// Remove a value and durably write before returning.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.remove(key);
        self.persist_locked(&state)
    }

    /// Look up a value.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    /// Mark a step completed and durably write before returning.
    pub fn record_step_completion(&self, step: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record_completion(step);
        debug!(step = step, "Checkpointed step completion");
        self.persist_locked(&state)
    }

    /// Remove a step's completion marker after its compensation resolved.
    pub fn clear_step_completion(&self, step: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.clear_completion(step);
        debug!(step = step, "Cleared step completion marker");
        self.persist_locked(&state)
    }

    /// Whether a step completed in this or a previous run.
    pub fn is_step_completed(&self, step: &str) -> bool {
        self.state.lock().is_completed(step)
    }

    /// Name of the most recently completed step.
    pub fn last_completed_step(&self) -> Option<String> {
        self.state.lock().last_completed_step.clone()
    }

    /// All completed steps in completion order.
    pub fn completed_steps(&self) -> Vec<String> {
        self.state.lock().completed_steps.clone()
    }

    fn persist(&self) -> Result<()> {
        let state = self.state.lock();
        self.persist_locked(&state)
    }

    fn persist_locked(&self, state: &CheckpointState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CutoverError::Internal(format!("Serializing checkpoint: {e}")))?;
        self.backend.write_all(&bytes)
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
