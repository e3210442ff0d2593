// src/engine/children.rs

//! Registration of worker-declared children.
//!
//! Children may depend on each other, so they are registered in repeated
//! passes: each pass adds every child whose parents already exist. When a
//! pass makes no progress the declaration is malformed, and every child
//! registered so far is deleted again so no partial graph survives.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::client::{ChildTask, TaskClient};
use crate::engine::EngineSettings;
use crate::engine::group::TaskGroup;
use crate::errors::{CrewError, Result};
use crate::model::Task;
use crate::model::task::new_id;
use crate::types::TaskId;

/// Turn a declaration into a task of `parent`'s group.
///
/// Zero attempts and a zero error delay fall back to the configured
/// defaults. `parent` is always among the child's parents, and a positive
/// `children_delay` pushes `run_after` to at least `now + delay`.
pub fn child_to_task(
    declared: &ChildTask,
    parent: &Task,
    children_delay: i64,
    now: DateTime<Utc>,
    settings: &EngineSettings,
) -> Task {
    let mut task = Task {
        id: if declared.id.is_empty() {
            new_id()
        } else {
            declared.id.clone()
        },
        task_group_id: parent.task_group_id.clone(),
        name: declared.name.clone(),
        worker: declared.worker.clone(),
        workgroup: declared.workgroup.clone(),
        key: declared.key.clone(),
        remaining_attempts: if declared.remaining_attempts == 0 {
            settings.default_remaining_attempts
        } else {
            declared.remaining_attempts
        },
        is_paused: declared.is_paused,
        run_after: declared.run_after,
        error_delay_in_seconds: if declared.error_delay_in_seconds == 0 {
            settings.default_error_delay_in_seconds
        } else {
            declared.error_delay_in_seconds
        },
        input: declared.input.clone(),
        parent_ids: declared.parent_ids.clone(),
        created_at: now,
        ..Task::default()
    };
    task.add_parent(&parent.id);

    if children_delay > 0 {
        let delayed = now + chrono::Duration::seconds(children_delay);
        task.run_after = Some(task.run_after.map_or(delayed, |at| at.max(delayed)));
    }
    task
}

/// Register `declared` as children of `parent` in `group`.
///
/// Returns the ids of the registered children. On failure nothing remains
/// registered and [`CrewError::ChildCreation`] is returned.
pub async fn create_children(
    group: &Arc<TaskGroup>,
    parent: &Task,
    declared: &[ChildTask],
    children_delay: i64,
    client: &Arc<dyn TaskClient>,
    settings: &EngineSettings,
) -> Result<Vec<TaskId>> {
    let now = Utc::now();
    let mut pending: Vec<Task> = declared
        .iter()
        .map(|child| child_to_task(child, parent, children_delay, now, settings))
        .collect();
    let mut registered: Vec<TaskId> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let before = pending.len();
        let mut blocked = Vec::new();
        for child in pending {
            match group.add_task(child.clone(), Arc::clone(client)) {
                Ok(task) => registered.push(task.id),
                Err(err) => {
                    debug!(task = %parent.id, child = %child.id, error = %err, "child not registered in this pass");
                    blocked.push(child);
                }
            }
        }
        pending = blocked;
        if pending.len() == before {
            break;
        }
    }

    if pending.is_empty() {
        debug!(task = %parent.id, children = registered.len(), "children registered");
        return Ok(registered);
    }

    warn!(
        task = %parent.id,
        registered = registered.len(),
        declared = declared.len(),
        "malformed child declarations; rolling back"
    );
    for child_id in registered.iter().rev() {
        if let Err(err) = group.delete_task(child_id).await {
            warn!(task = %parent.id, child = %child_id, error = %err, "failed to roll back child");
        }
    }
    Err(CrewError::ChildCreation {
        registered: registered.len(),
        declared: declared.len(),
    })
}
