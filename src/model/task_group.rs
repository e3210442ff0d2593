// src/model/task_group.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CrewError, Result};
use crate::model::Task;
use crate::model::task::new_id;
use crate::types::TaskGroupId;

/// Persisted attributes of a task group.
///
/// The live group (operators, indexes) is `engine::TaskGroup`; this is what
/// storage keeps and what observers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskGroupRecord {
    pub id: TaskGroupId,
    pub name: String,
    pub is_paused: bool,
    pub created_at: DateTime<Utc>,
    pub is_deleting: bool,
}

impl Default for TaskGroupRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            is_paused: false,
            created_at: Utc::now(),
            is_deleting: false,
        }
    }
}

impl TaskGroupRecord {
    pub fn new(id: impl Into<TaskGroupId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A group and its initial tasks, as imported with `--group`.
///
/// ```json
/// { "id": "crawl", "name": "Crawl", "tasks": [{ "name": "seed", "worker": "fetch", "isSeed": true }] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskGroupDefinition {
    pub id: Option<TaskGroupId>,
    pub name: String,
    pub tasks: Vec<Task>,
}

impl TaskGroupDefinition {
    /// Split into a record (fresh id when none is given) and its tasks.
    pub fn into_parts(self) -> (TaskGroupRecord, Vec<Task>) {
        let id = self.id.filter(|id| !id.is_empty()).unwrap_or_else(new_id);
        (TaskGroupRecord::new(id, self.name), self.tasks)
    }
}

/// Group ids double as directory names in file storage, so path characters
/// are rejected.
pub fn validate_group_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CrewError::InvalidGroupId("group id must not be empty".to_string()));
    }
    if id.contains(['/', '\\', '.']) {
        return Err(CrewError::InvalidGroupId(format!(
            "group id '{id}' contains invalid characters"
        )));
    }
    Ok(())
}
