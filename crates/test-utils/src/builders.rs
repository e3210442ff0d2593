#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskcrew::engine::{EngineSettings, TaskGroupController};
use taskcrew::model::Task;
use taskcrew::storage::{MemoryTaskStorage, TaskStorage};

/// Builder for `Task` to simplify test setup.
///
/// Tasks start with one attempt and no error delay so failures retry
/// immediately.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(group: &str, name: &str, worker: &str) -> Self {
        let mut task = Task::new(group, name, worker);
        task.remaining_attempts = 1;
        Self { task }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn parent(mut self, parent_id: &str) -> Self {
        self.task.add_parent(parent_id);
        self
    }

    pub fn attempts(mut self, n: i64) -> Self {
        self.task.remaining_attempts = n;
        self
    }

    pub fn error_delay(mut self, secs: i64) -> Self {
        self.task.error_delay_in_seconds = secs;
        self
    }

    pub fn workgroup(mut self, workgroup: &str) -> Self {
        self.task.workgroup = workgroup.to_string();
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.task.key = key.to_string();
        self
    }

    pub fn paused(mut self, val: bool) -> Self {
        self.task.is_paused = val;
        self
    }

    pub fn seed(mut self, val: bool) -> Self {
        self.task.is_seed = val;
        self
    }

    pub fn complete(mut self, output: Value) -> Self {
        self.task.is_complete = true;
        self.task.output = output;
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.task.input = input;
        self
    }

    pub fn run_after(mut self, at: DateTime<Utc>) -> Self {
        self.task.run_after = Some(at);
        self
    }

    /// Shift `created_at` so listing order is deterministic.
    pub fn created_offset_secs(mut self, secs: i64) -> Self {
        self.task.created_at += chrono::Duration::seconds(secs);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Settings with short timings so shutdowns and lease retries resolve
/// within a test's timeout.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        lease: Duration::from_secs(5),
        lock_retry: Duration::from_millis(50),
        shutdown_poll_interval: Duration::from_millis(50),
        shutdown_max_polls: 40,
        reevaluate_interval: Duration::ZERO,
        ..EngineSettings::default()
    }
}

/// A controller over fresh in-memory storage.
pub fn memory_controller() -> (Arc<TaskGroupController>, Arc<MemoryTaskStorage>) {
    memory_controller_with(test_settings())
}

/// Like [`memory_controller`], with custom engine settings.
pub fn memory_controller_with(
    settings: EngineSettings,
) -> (Arc<TaskGroupController>, Arc<MemoryTaskStorage>) {
    let storage = Arc::new(MemoryTaskStorage::new());
    let dyn_storage: Arc<dyn TaskStorage> = storage.clone();
    (TaskGroupController::new(dyn_storage, settings), storage)
}
