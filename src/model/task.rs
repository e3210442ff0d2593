// src/model/task.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{TaskGroupId, TaskId};

/// A unit of work that is completed by a worker.
///
/// `input`, `output` and `errors` are opaque to the orchestrator; they are
/// handed to workers and observers untouched.
///
/// The children of a task are not stored here: they are a derived index kept
/// by the task's operator and rebuilt from `parent_ids` whenever a group is
/// prepared or a task is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: TaskId,
    pub task_group_id: TaskGroupId,
    pub name: String,
    /// Identifier used to resolve the worker endpoint.
    pub worker: String,
    /// Optional rate-limiting group; may span task groups.
    pub workgroup: String,
    /// Optional equivalence class: the first member to succeed completes all.
    pub key: String,
    pub remaining_attempts: i64,
    pub is_paused: bool,
    pub is_complete: bool,
    pub priority: i64,
    /// Earliest time the task may be dispatched (`None` = immediately).
    pub run_after: Option<DateTime<Utc>>,
    pub progress_weight: i64,
    /// Seed tasks survive a group reset; everything else is deleted.
    pub is_seed: bool,
    pub error_delay_in_seconds: i64,
    pub input: Value,
    pub output: Value,
    /// Append-only log of failures, oldest first.
    pub errors: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub parent_ids: Vec<TaskId>,
    /// True only while an execution attempt is in flight.
    pub busy_executing: bool,
    pub is_deleting: bool,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: String::new(),
            task_group_id: String::new(),
            name: String::new(),
            worker: String::new(),
            workgroup: String::new(),
            key: String::new(),
            remaining_attempts: 0,
            is_paused: false,
            is_complete: false,
            priority: 0,
            run_after: None,
            progress_weight: 0,
            is_seed: false,
            error_delay_in_seconds: 0,
            input: Value::Null,
            output: Value::Null,
            errors: Vec::new(),
            created_at: Utc::now(),
            parent_ids: Vec::new(),
            busy_executing: false,
            is_deleting: false,
        }
    }
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(task_group_id: impl Into<TaskGroupId>, name: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            task_group_id: task_group_id.into(),
            name: name.into(),
            worker: worker.into(),
            ..Self::default()
        }
    }

    /// Assign a fresh id if none was provided.
    pub fn ensure_id(&mut self) -> &TaskId {
        if self.id.is_empty() {
            self.id = new_id();
        }
        &self.id
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parent_ids.iter().any(|p| p == parent_id)
    }

    /// Add `parent_id` to `parent_ids` unless already present.
    pub fn add_parent(&mut self, parent_id: &str) {
        if !self.has_parent(parent_id) {
            self.parent_ids.push(parent_id.to_string());
        }
    }

    /// Terminal for execution: either completed or out of attempts.
    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.remaining_attempts <= 0
    }
}

/// Generate a new task / group id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_json_fields_fall_back_to_defaults() {
        let task: Task = serde_json::from_str(r#"{"id":"T1","parentIds":["T0"],"remainingAttempts":3}"#)
            .expect("task should parse");

        assert_eq!(task.id, "T1");
        assert_eq!(task.parent_ids, vec!["T0".to_string()]);
        assert_eq!(task.remaining_attempts, 3);
        assert_eq!(task.input, Value::Null);
        assert!(task.run_after.is_none());
        assert!(!task.is_complete);
    }

    #[test]
    fn ensure_id_keeps_existing_ids() {
        let mut task = Task {
            id: "fixed".into(),
            ..Task::default()
        };
        assert_eq!(task.ensure_id(), "fixed");

        let mut anonymous = Task::default();
        let id = anonymous.ensure_id().clone();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn add_parent_is_deduplicated() {
        let mut task = Task::new("G1", "child", "w");
        task.add_parent("P");
        task.add_parent("P");
        assert_eq!(task.parent_ids, vec!["P".to_string()]);
    }
}
