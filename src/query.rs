// src/query.rs

//! Read-only listing of stored groups and tasks.
//!
//! Answers straight from [`TaskStorage`], so it also works against storage
//! no controller has loaded.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::{CrewError, Result};
use crate::model::{Task, TaskGroupRecord};
use crate::storage::TaskStorage;

/// One page of a listing plus the number of matches across all pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Cut page `page` (1-based) of `page_size` items out of `items`.
///
/// `page_size == 0` returns everything; page 0 and pages past the end are
/// empty.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let total = items.len();
    let page_size = if page_size == 0 { total } else { page_size };
    let start = page
        .checked_sub(1)
        .map_or(0, |p| p.saturating_mul(page_size))
        .min(total);
    let end = if page == 0 {
        start
    } else {
        start.saturating_add(page_size).min(total)
    };

    let items = items.into_iter().skip(start).take(end - start).collect();
    Page { items, total }
}

fn name_matches(name: &str, search: &str) -> bool {
    search.is_empty() || name.to_lowercase().contains(&search.to_lowercase())
}

#[derive(Debug, Clone)]
pub struct TaskQuery {
    storage: Arc<dyn TaskStorage>,
}

impl TaskQuery {
    pub fn new(storage: Arc<dyn TaskStorage>) -> Self {
        Self { storage }
    }

    /// Groups whose name contains `search` (case-insensitive), newest first.
    pub fn list_groups(&self, page: usize, page_size: usize, search: &str) -> Result<Page<TaskGroupRecord>> {
        let mut groups: Vec<TaskGroupRecord> = self
            .storage
            .all_task_groups()?
            .into_iter()
            .filter(|g| name_matches(&g.name, search))
            .collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(groups, page, page_size))
    }

    /// Tasks of a group whose name contains `search`, oldest first.
    pub fn list_tasks(
        &self,
        group_id: &str,
        page: usize,
        page_size: usize,
        search: &str,
        skip_completed: bool,
    ) -> Result<Page<Task>> {
        let mut tasks: Vec<Task> = self
            .storage
            .all_tasks_in_group(group_id)?
            .into_iter()
            .filter(|t| name_matches(&t.name, search))
            .filter(|t| !(skip_completed && t.is_complete))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(tasks, page, page_size))
    }

    /// Fraction of completed tasks in `[0, 1]`; `0` for an empty group.
    pub fn group_progress(&self, group_id: &str) -> Result<f64> {
        let tasks = self.storage.all_tasks_in_group(group_id)?;
        if tasks.is_empty() {
            return Ok(0.0);
        }
        let completed = tasks.iter().filter(|t| t.is_complete).count();
        Ok(completed as f64 / tasks.len() as f64)
    }

    pub fn get_group(&self, group_id: &str) -> Result<TaskGroupRecord> {
        self.storage
            .find_task_group(group_id)?
            .ok_or_else(|| CrewError::TaskGroupNotFound(group_id.to_string()))
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.storage
            .find_task(task_id)?
            .ok_or_else(|| CrewError::TaskNotFound(task_id.to_string()))
    }
}
