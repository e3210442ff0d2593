// src/engine/eligibility.rs

use crate::model::Task;

/// Whether `task` may be dispatched right now, ignoring `run_after`.
///
/// `parent_complete` looks a parent up live in the owning group and returns
/// `None` when it is not there. A missing parent blocks the task the same way
/// an incomplete one does. `group_blocked` is set while the owning group is
/// paused or being deleted.
pub fn can_execute<F>(task: &Task, group_blocked: bool, parent_complete: F) -> bool
where
    F: Fn(&str) -> Option<bool>,
{
    if task.is_deleting
        || group_blocked
        || task.is_complete
        || task.is_paused
        || task.remaining_attempts <= 0
    {
        return false;
    }

    task.parent_ids
        .iter()
        .all(|parent| parent_complete(parent).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ready(parents: &[&str]) -> Task {
        Task {
            id: "T".into(),
            remaining_attempts: 1,
            parent_ids: parents.iter().map(|p| p.to_string()).collect(),
            ..Task::default()
        }
    }

    #[test]
    fn root_task_with_attempts_is_eligible() {
        assert!(can_execute(&ready(&[]), false, |_| None));
    }

    #[test]
    fn missing_or_incomplete_parents_block() {
        let task = ready(&["A", "B"]);
        assert!(!can_execute(&task, false, |p| (p == "A").then_some(true)));
        assert!(!can_execute(&task, false, |p| Some(p == "A")));
        assert!(can_execute(&task, false, |_| Some(true)));
    }

    #[test]
    fn run_after_is_ignored() {
        let mut task = ready(&[]);
        task.run_after = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        assert!(can_execute(&task, false, |_| None));
    }

    proptest! {
        #[test]
        fn blocking_flags_win_over_parent_state(
            paused in any::<bool>(),
            complete in any::<bool>(),
            deleting in any::<bool>(),
            group_blocked in any::<bool>(),
            attempts in -3i64..4,
            parents_done in any::<bool>(),
        ) {
            let mut task = ready(&["P"]);
            task.is_paused = paused;
            task.is_complete = complete;
            task.is_deleting = deleting;
            task.remaining_attempts = attempts;

            let eligible = can_execute(&task, group_blocked, |_| Some(parents_done));
            let blocked = paused || complete || deleting || group_blocked || attempts <= 0;

            if blocked {
                prop_assert!(!eligible);
            } else {
                prop_assert_eq!(eligible, parents_done);
            }
        }
    }
}
