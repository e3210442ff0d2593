// src/model/event.rs

use serde::Serialize;

use crate::model::{Task, TaskGroupRecord};

/// What happened to the entity carried by a feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Create,
    Update,
    Delete,
}

/// A task snapshot taken right after a change.
#[derive(Debug, Clone, Serialize)]
pub struct TaskUpdateEvent {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub task: Task,
}

/// A group snapshot taken right after a change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupUpdateEvent {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub task_group: TaskGroupRecord,
}

/// Everything observers can receive from a controller, on a single stream.
///
/// Delivery is best-effort: when the stream is full, events are dropped.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FeedEvent {
    Task(TaskUpdateEvent),
    TaskGroup(TaskGroupUpdateEvent),
}

impl FeedEvent {
    pub fn task(kind: UpdateKind, task: Task) -> Self {
        FeedEvent::Task(TaskUpdateEvent { kind, task })
    }

    pub fn group(kind: UpdateKind, task_group: TaskGroupRecord) -> Self {
        FeedEvent::TaskGroup(TaskGroupUpdateEvent { kind, task_group })
    }
}
