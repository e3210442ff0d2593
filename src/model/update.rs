// src/model/update.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::Task;

/// Partial update of a task. Only fields that are `Some` are applied.
///
/// `run_after` is doubly optional: `Some(None)` clears the run-after time
/// (JSON `null`), while a missing field leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub run_after: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_delay_in_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_seed: Option<bool>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskUpdate {
    /// Update that only moves `run_after`.
    pub fn run_after(at: DateTime<Utc>) -> Self {
        Self {
            run_after: Some(Some(at)),
            ..Self::default()
        }
    }

    /// Update that only changes the pause flag.
    pub fn paused(is_paused: bool) -> Self {
        Self {
            is_paused: Some(is_paused),
            ..Self::default()
        }
    }

    /// Update that only changes the remaining attempts.
    pub fn attempts(remaining_attempts: i64) -> Self {
        Self {
            remaining_attempts: Some(remaining_attempts),
            ..Self::default()
        }
    }

    /// Reset a task so it runs again from scratch.
    pub fn reset(remaining_attempts: i64, now: DateTime<Utc>) -> Self {
        Self {
            remaining_attempts: Some(remaining_attempts),
            is_complete: Some(false),
            output: Some(Value::Null),
            errors: Some(Vec::new()),
            run_after: Some(Some(now)),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every present field to `task`.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(worker) = &self.worker {
            task.worker = worker.clone();
        }
        if let Some(is_paused) = self.is_paused {
            task.is_paused = is_paused;
        }
        if let Some(run_after) = self.run_after {
            task.run_after = run_after;
        }
        if let Some(is_complete) = self.is_complete {
            task.is_complete = is_complete;
        }
        if let Some(remaining_attempts) = self.remaining_attempts {
            task.remaining_attempts = remaining_attempts;
        }
        if let Some(delay) = self.error_delay_in_seconds {
            task.error_delay_in_seconds = delay;
        }
        if let Some(input) = &self.input {
            task.input = input.clone();
        }
        if let Some(output) = &self.output {
            task.output = output.clone();
        }
        if let Some(errors) = &self.errors {
            task.errors = errors.clone();
        }
        if let Some(is_seed) = self.is_seed {
            task.is_seed = is_seed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_present_fields_are_applied() {
        let mut task = Task {
            name: "before".into(),
            remaining_attempts: 3,
            input: json!({"n": 1}),
            ..Task::default()
        };

        let update: TaskUpdate = serde_json::from_value(json!({ "name": "after", "isPaused": true }))
            .expect("update should parse");
        update.apply_to(&mut task);

        assert_eq!(task.name, "after");
        assert!(task.is_paused);
        assert_eq!(task.remaining_attempts, 3);
        assert_eq!(task.input, json!({"n": 1}));
    }

    #[test]
    fn null_run_after_clears_while_missing_keeps() {
        let at = Utc::now();
        let mut task = Task {
            run_after: Some(at),
            ..Task::default()
        };

        let keep: TaskUpdate = serde_json::from_value(json!({ "name": "x" })).unwrap();
        keep.apply_to(&mut task);
        assert_eq!(task.run_after, Some(at));

        let clear: TaskUpdate = serde_json::from_value(json!({ "runAfter": null })).unwrap();
        assert_eq!(clear.run_after, Some(None));
        clear.apply_to(&mut task);
        assert_eq!(task.run_after, None);
    }

    #[test]
    fn reset_clears_progress() {
        let now = Utc::now();
        let mut task = Task {
            is_complete: true,
            remaining_attempts: 0,
            output: json!("done"),
            errors: vec![json!("boom")],
            ..Task::default()
        };

        TaskUpdate::reset(4, now).apply_to(&mut task);

        assert!(!task.is_complete);
        assert_eq!(task.remaining_attempts, 4);
        assert_eq!(task.output, Value::Null);
        assert!(task.errors.is_empty());
        assert_eq!(task.run_after, Some(now));
    }
}
