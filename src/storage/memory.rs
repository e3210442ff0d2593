// src/storage/memory.rs

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::errors::Result;
use crate::model::{Task, TaskGroupRecord};
use crate::storage::{LeaseTable, TaskStorage};
use crate::types::{TaskGroupId, TaskId};

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTaskStorage {
    tasks: RwLock<HashMap<TaskId, Task>>,
    groups: RwLock<HashMap<TaskGroupId, TaskGroupRecord>>,
    leases: LeaseTable,
}

impl MemoryTaskStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_tasks<F>(&self, pred: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Task> = tasks.values().filter(|t| pred(t)).cloned().collect();
        sort_tasks(&mut out);
        out
    }
}

/// Oldest first, ties broken by id so listings are stable.
pub(crate) fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub(crate) fn sort_groups(groups: &mut [TaskGroupRecord]) {
    groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

impl TaskStorage for MemoryTaskStorage {
    fn save_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        tasks.remove(task_id);
        Ok(())
    }

    fn find_task(&self, task_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(task_id).cloned())
    }

    fn all_tasks_in_group(&self, group_id: &str) -> Result<Vec<Task>> {
        Ok(self.collect_tasks(|t| t.task_group_id == group_id))
    }

    fn tasks_in_workgroup(&self, workgroup: &str) -> Result<Vec<Task>> {
        Ok(self.collect_tasks(|t| !workgroup.is_empty() && t.workgroup == workgroup))
    }

    fn tasks_with_key(&self, group_id: &str, key: &str) -> Result<Vec<Task>> {
        Ok(self.collect_tasks(|t| t.task_group_id == group_id && !key.is_empty() && t.key == key))
    }

    fn save_task_group(&self, group: &TaskGroupRecord) -> Result<()> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    fn delete_task_group(&self, group_id: &str) -> Result<()> {
        {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|_, t| t.task_group_id != group_id);
        }
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.remove(group_id);
        Ok(())
    }

    fn find_task_group(&self, group_id: &str) -> Result<Option<TaskGroupRecord>> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        Ok(groups.get(group_id).cloned())
    }

    fn all_task_groups(&self) -> Result<Vec<TaskGroupRecord>> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<TaskGroupRecord> = groups.values().cloned().collect();
        sort_groups(&mut out);
        Ok(out)
    }

    fn leases(&self) -> &LeaseTable {
        &self.leases
    }
}
