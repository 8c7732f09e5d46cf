//! Checkpoint state for a migration run.
//!
//! The state is the single record of progress that survives a process
//! restart. `last_completed_step` only ever names a step whose action has
//! been confirmed done; it is written after the corresponding remote task
//! resolves, never before.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Persisted progress of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Workflow name this checkpoint belongs to
    pub workflow: String,
    /// Identifier of the run that created the checkpoint
    pub run_id: String,
    /// Name of the most recently completed step
    pub last_completed_step: Option<String>,
    /// All completed steps, in completion order
    pub completed_steps: Vec<String>,
    /// Values steps hand forward to later steps and compensations
    /// (created resource ids, disconnected network lists, and so on)
    #[serde(default)]
    pub values: HashMap<String, Value>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    /// Create a fresh state for a workflow.
    pub fn new(workflow: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow: workflow.to_string(),
            run_id: Uuid::new_v4().to_string(),
            last_completed_step: None,
            completed_steps: Vec::new(),
            values: HashMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether a step has already been completed.
    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Record a step as completed. Idempotent.
    pub fn record_completion(&mut self, step: &str) {
        if !self.is_completed(step) {
            self.completed_steps.push(step.to_string());
        }
        self.last_completed_step = Some(step.to_string());
        self.updated_at = Utc::now();
    }

    /// Remove a step's completion marker after its compensation resolved.
    ///
    /// `last_completed_step` falls back to the latest remaining marker so
    /// a rollback interrupted mid-walk resumes from the right place.
    pub fn clear_completion(&mut self, step: &str) {
        self.completed_steps.retain(|s| s != step);
        self.last_completed_step = self.completed_steps.last().cloned();
        self.updated_at = Utc::now();
    }

    /// Store a value under a key.
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.updated_at = Utc::now();
    }

    /// Append a value to the array under `key`, creating it if absent.
    /// Duplicates are dropped so replayed appends stay idempotent.
    pub fn append(&mut self, key: &str, value: Value) {
        let entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.updated_at = Utc::now();
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_order_is_preserved() {
        let mut state = CheckpointState::new("migrate");
        state.record_completion("one");
        state.record_completion("two");
        state.record_completion("three");
        assert_eq!(state.completed_steps, vec!["one", "two", "three"]);
        assert_eq!(state.last_completed_step.as_deref(), Some("three"));
    }

    #[test]
    fn recording_twice_keeps_a_single_marker() {
        let mut state = CheckpointState::new("migrate");
        state.record_completion("one");
        state.record_completion("one");
        assert_eq!(state.completed_steps, vec!["one"]);
    }

    #[test]
    fn clearing_rewinds_last_completed_step() {
        let mut state = CheckpointState::new("migrate");
        state.record_completion("one");
        state.record_completion("two");
        state.clear_completion("two");
        assert_eq!(state.last_completed_step.as_deref(), Some("one"));
        state.clear_completion("one");
        assert_eq!(state.last_completed_step, None);
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn append_builds_an_array_and_ignores_duplicates() {
        let mut state = CheckpointState::new("migrate");
        state.append("moved", json!("vapp-1"));
        state.append("moved", json!("vapp-2"));
        state.append("moved", json!("vapp-1"));
        assert_eq!(state.get("moved"), Some(&json!(["vapp-1", "vapp-2"])));
    }

    #[test]
    fn values_round_trip_through_serde() {
        let mut state = CheckpointState::new("migrate");
        state.set("target_gateways", json!(["gw-1", "gw-2"]));
        state.record_completion("create-gateways");

        let bytes = serde_json::to_vec(&state).unwrap();
        let restored: CheckpointState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.get("target_gateways"), Some(&json!(["gw-1", "gw-2"])));
        assert!(restored.is_completed("create-gateways"));
        assert_eq!(restored.run_id, state.run_id);
    }
}
