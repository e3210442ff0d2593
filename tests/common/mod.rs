#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use taskcrew::engine::TaskGroup;
use taskcrew::model::Task;
use taskcrew_test_utils::wait_until;

/// Current snapshot of `id`; panics if the task is gone.
pub fn task_of(group: &TaskGroup, id: &str) -> Task {
    group
        .task(id)
        .unwrap_or_else(|| panic!("task {id} not in group"))
}

/// Wait (up to 3s) until `id` is complete and no longer executing.
pub async fn wait_complete(group: &Arc<TaskGroup>, id: &str) {
    let done = wait_until(Duration::from_secs(3), || {
        group.task(id).is_some_and(|t| t.is_complete && !t.busy_executing)
    })
    .await;
    assert!(done, "task {id} did not complete: {:?}", group.task(id));
}

/// Wait (up to 3s) until `id` has no attempts left.
pub async fn wait_exhausted(group: &Arc<TaskGroup>, id: &str) {
    let done = wait_until(Duration::from_secs(3), || {
        group
            .task(id)
            .is_some_and(|t| t.remaining_attempts <= 0 && !t.busy_executing)
    })
    .await;
    assert!(done, "task {id} did not run out of attempts: {:?}", group.task(id));
}
