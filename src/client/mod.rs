// src/client/mod.rs

//! Delivery of tasks to workers.
//!
//! The operator talks to a [`TaskClient`] instead of a concrete transport.
//! Production code uses [`HttpPostClient`]; tests provide scripted clients
//! that record posts and return canned [`WorkerResponse`]s.

pub mod http;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::model::Task;
use crate::types::TaskId;

pub use http::HttpPostClient;

/// Trait abstracting how a task is delivered to its worker.
///
/// An `Err` is a transport failure; a worker-reported failure comes back as
/// `Ok` with [`WorkerResponse::error`] set. The operator treats both the same.
pub trait TaskClient: Send + Sync {
    fn post<'a>(
        &'a self,
        task: &'a Task,
        parents: &'a [ParentResult],
    ) -> Pin<Box<dyn Future<Output = Result<WorkerResponse>> + Send + 'a>>;
}

/// Snapshot of a parent handed to the worker alongside the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentResult {
    pub task_id: TaskId,
    pub worker: String,
    pub input: Value,
    pub output: Value,
}

impl From<&Task> for ParentResult {
    fn from(parent: &Task) -> Self {
        Self {
            task_id: parent.id.clone(),
            worker: parent.worker.clone(),
            input: parent.input.clone(),
            output: parent.output.clone(),
        }
    }
}

/// Body sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPayload {
    pub input: Value,
    pub worker: String,
    pub task_id: TaskId,
    pub parents: Vec<ParentResult>,
}

impl WorkerPayload {
    pub fn new(task: &Task, parents: &[ParentResult]) -> Self {
        Self {
            input: task.input.clone(),
            worker: task.worker.clone(),
            task_id: task.id.clone(),
            parents: parents.to_vec(),
        }
    }
}

/// A child task declared by a worker response.
///
/// Every field is optional on the wire; zero attempts and a zero error delay
/// are replaced by configured defaults when the child is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildTask {
    pub id: TaskId,
    pub name: String,
    pub worker: String,
    pub workgroup: String,
    pub key: String,
    pub remaining_attempts: i64,
    pub is_paused: bool,
    pub run_after: Option<DateTime<Utc>>,
    pub error_delay_in_seconds: i64,
    pub input: Value,
    pub parent_ids: Vec<TaskId>,
}

/// What a worker returns for one execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerResponse {
    pub output: Value,
    pub children: Vec<ChildTask>,
    pub workgroup_delay_in_seconds: i64,
    pub children_delay_in_seconds: i64,
    /// Worker-reported failure; `null` / absent means success.
    pub error: Option<Value>,
}

impl WorkerResponse {
    /// Successful response carrying only an output.
    pub fn output(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// Worker-reported failure.
    pub fn failed(error: impl Into<Value>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_response_parses_minimal_and_full_bodies() {
        let minimal: WorkerResponse = serde_json::from_value(json!({ "output": "done" })).unwrap();
        assert_eq!(minimal.output, json!("done"));
        assert!(minimal.error.is_none());
        assert!(minimal.children.is_empty());

        let null_error: WorkerResponse = serde_json::from_value(json!({ "error": null })).unwrap();
        assert!(null_error.error.is_none());

        let full: WorkerResponse = serde_json::from_value(json!({
            "output": {"pages": 2},
            "children": [{"name": "page-1", "worker": "fetch", "parentIds": ["x"]}],
            "workgroupDelayInSeconds": 5,
            "childrenDelayInSeconds": 2,
            "error": "rate limited"
        }))
        .unwrap();
        assert_eq!(full.children[0].name, "page-1");
        assert_eq!(full.children[0].parent_ids, vec!["x".to_string()]);
        assert_eq!(full.workgroup_delay_in_seconds, 5);
        assert_eq!(full.children_delay_in_seconds, 2);
        assert_eq!(full.error, Some(json!("rate limited")));
    }

    #[test]
    fn payload_carries_parent_summaries_in_order() {
        let mut parent_a = Task::new("G", "a", "wa");
        parent_a.output = json!(1);
        let mut parent_b = Task::new("G", "b", "wb");
        parent_b.output = json!(2);
        let mut task = Task::new("G", "c", "wc");
        task.input = json!({"q": true});

        let parents = vec![ParentResult::from(&parent_a), ParentResult::from(&parent_b)];
        let body = serde_json::to_value(WorkerPayload::new(&task, &parents)).unwrap();

        assert_eq!(body["taskId"], json!(task.id));
        assert_eq!(body["worker"], json!("wc"));
        assert_eq!(body["input"], json!({"q": true}));
        assert_eq!(body["parents"][0]["output"], json!(1));
        assert_eq!(body["parents"][1]["taskId"], json!(parent_b.id));
    }
}
