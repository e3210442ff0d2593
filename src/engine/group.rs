// src/engine/group.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{ParentResult, TaskClient};
use crate::dag::graph::{TaskGraph, children_index};
use crate::engine::controller::TaskGroupController;
use crate::engine::operator::{OperatorEvent, TaskOperator};
use crate::engine::EngineContext;
use crate::errors::{CrewError, Result};
use crate::model::{FeedEvent, Task, TaskGroupRecord, TaskUpdate, UpdateKind};
use crate::types::{TaskGroupId, TaskId};

/// The live operators of one task group.
///
/// Holds the task-id -> operator index and the derived children back-index
/// (on each operator). Group-wide operations fan out to the operators'
/// mailboxes.
pub struct TaskGroup {
    me: Weak<TaskGroup>,
    record: RwLock<TaskGroupRecord>,
    deleting: AtomicBool,
    operators: RwLock<HashMap<TaskId, Arc<TaskOperator>>>,
    controller: Weak<TaskGroupController>,
    ctx: EngineContext,
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id())
            .field("tasks", &self.len())
            .field("deleting", &self.is_deleting())
            .finish_non_exhaustive()
    }
}

impl TaskGroup {
    pub fn new(
        record: TaskGroupRecord,
        ctx: EngineContext,
        controller: Weak<TaskGroupController>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            deleting: AtomicBool::new(record.is_deleting),
            record: RwLock::new(record),
            operators: RwLock::new(HashMap::new()),
            controller,
            ctx,
        })
    }

    /// A group without a controller. Workgroup delays stay inside it.
    pub fn standalone(record: TaskGroupRecord, ctx: EngineContext) -> Arc<Self> {
        Self::new(record, ctx, Weak::new())
    }

    pub fn id(&self) -> TaskGroupId {
        self.record().id
    }

    pub fn record(&self) -> TaskGroupRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_paused(&self) -> bool {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_paused
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_deleting(&self) -> TaskGroupRecord {
        self.deleting.store(true, Ordering::SeqCst);
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        record.is_deleting = true;
        record.clone()
    }

    pub fn controller(&self) -> Option<Arc<TaskGroupController>> {
        self.controller.upgrade()
    }

    pub fn operator(&self, task_id: &str) -> Option<Arc<TaskOperator>> {
        self.operators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    /// All operators, oldest task first.
    pub fn operators(&self) -> Vec<Arc<TaskOperator>> {
        let mut ops: Vec<Arc<TaskOperator>> = self
            .operators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        ops.sort_by_cached_key(|op| op.with_task(|t| (t.created_at, t.id.clone())));
        ops
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.operator(task_id).map(|op| op.task())
    }

    /// Snapshots of every task, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.operators().iter().map(|op| op.task()).collect()
    }

    pub fn len(&self) -> usize {
        self.operators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build operators for `tasks` and the children back-index.
    ///
    /// Runs in two passes since children are only known once every task has
    /// been seen. Nothing is persisted and no operator is started.
    pub fn prepare(&self, tasks: Vec<Task>, client: Arc<dyn TaskClient>) {
        let group_id = self.id();
        let mut prepared: HashMap<TaskId, Arc<TaskOperator>> = HashMap::new();
        let mut snapshot: Vec<Task> = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            task.ensure_id();
            task.task_group_id = group_id.clone();
            // A stored in-flight flag is left over from a previous process.
            task.busy_executing = false;
            if prepared.contains_key(&task.id) {
                warn!(group = %group_id, task = %task.id, "duplicate task id; keeping the last one");
                snapshot.retain(|t| t.id != task.id);
            }
            let op = TaskOperator::new(task.clone(), self.me.clone(), client.clone(), self.ctx.clone());
            prepared.insert(task.id.clone(), op);
            snapshot.push(task);
        }

        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for (parent_id, children) in children_index(&snapshot) {
            match prepared.get(&parent_id) {
                Some(parent) => parent.set_children(children),
                None => {
                    warn!(group = %group_id, parent = %parent_id, children = ?children, "tasks reference a missing parent and will stay blocked");
                }
            }
        }

        let cyclic = TaskGraph::from_tasks(&snapshot).tasks_in_cycles();
        if !cyclic.is_empty() {
            warn!(group = %group_id, tasks = ?cyclic, "dependency cycle detected; these tasks will stay blocked");
        }

        let count = prepared.len();
        self.operators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(prepared);
        debug!(group = %group_id, tasks = count, "group prepared");
    }

    /// Start every operator that is not running yet.
    pub fn operate(&self) {
        let mut started = 0usize;
        for op in self.operators() {
            if op.operate() {
                started += 1;
            }
        }
        debug!(group = %self.id(), started, "group operating");
    }

    /// Register a single task after the group was prepared.
    ///
    /// Fails if the id is taken, a parent is not in the group, or the new
    /// edges would close a cycle. On success the task is persisted, a create
    /// event is published and its operator is started.
    pub fn add_task(&self, mut task: Task, client: Arc<dyn TaskClient>) -> Result<Task> {
        let group_id = self.id();
        if self.is_deleting() {
            return Err(CrewError::GroupDeleting(group_id));
        }
        task.ensure_id();
        task.task_group_id = group_id.clone();

        let op = {
            let mut ops = self.operators.write().unwrap_or_else(PoisonError::into_inner);
            if ops.contains_key(&task.id) {
                return Err(CrewError::DuplicateTask(task.id));
            }
            if task.has_parent(&task.id) {
                return Err(CrewError::CycleDetected(format!(
                    "task '{}' lists itself as parent",
                    task.id
                )));
            }
            if let Some(missing) = task.parent_ids.iter().find(|p| !ops.contains_key(*p)) {
                return Err(CrewError::MissingParent {
                    task: task.id.clone(),
                    parent: missing.clone(),
                });
            }

            // Tasks loaded earlier may already name this one as parent.
            let children: Vec<TaskId> = ops
                .values()
                .filter(|op| op.with_task(|t| t.has_parent(&task.id)))
                .map(|op| op.id().to_string())
                .collect();
            if let Some(parent) = first_reachable(&ops, &children, &task.parent_ids) {
                return Err(CrewError::CycleDetected(format!(
                    "task '{}' would depend on its own descendant '{parent}'",
                    task.id
                )));
            }

            self.ctx.storage.save_task(&task)?;

            let op = TaskOperator::new(task.clone(), self.me.clone(), client, self.ctx.clone());
            for parent_id in &task.parent_ids {
                if let Some(parent) = ops.get(parent_id) {
                    parent.add_child(&task.id);
                }
            }
            op.set_children(children);
            ops.insert(task.id.clone(), Arc::clone(&op));
            op
        };

        debug!(group = %group_id, task = %task.id, parents = ?task.parent_ids, "task added");
        self.publish(UpdateKind::Create, task.clone());
        op.operate();
        Ok(task)
    }

    /// Remove a task: detach it, stop its operator, drop it from storage.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let op = self
            .operators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id)
            .ok_or_else(|| CrewError::TaskNotFound(task_id.to_string()))?;

        let parent_ids = op.with_task(|t| t.parent_ids.clone());
        for parent_id in &parent_ids {
            if let Some(parent) = self.operator(parent_id) {
                parent.remove_child(task_id);
            }
        }

        if let Err(err) = op.shutdown(true).await {
            warn!(group = %self.id(), task = %task_id, error = %err, "deleting task whose operator did not stop");
        }
        self.ctx.storage.delete_task(task_id)?;
        debug!(group = %self.id(), task = %task_id, "task deleted");
        self.publish(UpdateKind::Delete, op.task());
        Ok(())
    }

    fn require(&self, task_id: &str) -> Result<Arc<TaskOperator>> {
        self.operator(task_id)
            .ok_or_else(|| CrewError::TaskNotFound(task_id.to_string()))
    }

    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        self.require(task_id)?.update(update).await
    }

    pub async fn reset_task(&self, task_id: &str, remaining_attempts: i64) -> Result<Task> {
        self.require(task_id)?.reset(remaining_attempts).await
    }

    /// Give a task new attempts without touching its output or errors.
    pub async fn retry_task(&self, task_id: &str, remaining_attempts: i64) -> Result<Task> {
        self.require(task_id)?
            .update(TaskUpdate::attempts(remaining_attempts))
            .await
    }

    /// Pause or resume the group and every task in it.
    pub async fn pause(&self, is_paused: bool) -> Result<TaskGroupRecord> {
        let record = {
            let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
            record.is_paused = is_paused;
            record.clone()
        };
        self.ctx.storage.save_task_group(&record)?;
        self.ctx
            .feed
            .publish(FeedEvent::group(UpdateKind::Update, record.clone()));

        for op in self.operators() {
            op.update(TaskUpdate::paused(is_paused)).await?;
        }
        info!(group = %record.id, is_paused, "group pause changed");
        Ok(record)
    }

    /// Start the group over.
    ///
    /// In a group with seed tasks, everything that is not a seed is deleted
    /// and the seeds are reset; otherwise every task is reset.
    pub async fn reset(&self, remaining_attempts: i64) -> Result<()> {
        let tasks = self.tasks();
        let seeded = tasks.iter().any(|t| t.is_seed);

        if seeded {
            for task in tasks.iter().filter(|t| !t.is_seed) {
                self.delete_task(&task.id).await?;
            }
        }
        for task in tasks.iter().filter(|t| !seeded || t.is_seed) {
            self.reset_task(&task.id, remaining_attempts).await?;
        }
        info!(group = %self.id(), seeded, remaining_attempts, "group reset");
        Ok(())
    }

    /// Give every incomplete task new attempts.
    pub async fn retry(&self, remaining_attempts: i64) -> Result<()> {
        for op in self.operators() {
            if op.with_task(|t| t.is_complete) {
                continue;
            }
            op.update(TaskUpdate::attempts(remaining_attempts)).await?;
        }
        Ok(())
    }

    pub(crate) fn rename(&self, name: &str) -> TaskGroupRecord {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        record.name = name.to_string();
        record.clone()
    }

    /// Push `run_after` of incomplete tasks in `workgroup` to `until`.
    pub fn delay_workgroup(&self, workgroup: &str, until: DateTime<Utc>) -> usize {
        let mut delayed = 0;
        for op in self.operators() {
            if op.with_task(|t| t.workgroup == workgroup && !t.is_complete) {
                op.notify(TaskUpdate::run_after(until));
                delayed += 1;
            }
        }
        delayed
    }

    /// Post `Evaluate` to incomplete, unpaused, idle operators.
    pub fn evaluate_idle(&self) -> usize {
        let mut nudged = 0;
        for op in self.operators() {
            let idle = op.with_task(|t| !t.is_complete && !t.is_paused && !t.busy_executing);
            if idle {
                op.deliver(OperatorEvent::Evaluate);
                nudged += 1;
            }
        }
        nudged
    }

    /// Snapshots of `task`'s parents, in declaration order.
    pub fn parent_results(&self, task: &Task) -> Vec<ParentResult> {
        task.parent_ids
            .iter()
            .filter_map(|id| self.operator(id))
            .map(|op| op.with_task(|t| ParentResult::from(t)))
            .collect()
    }

    /// Stop every operator, concurrently.
    pub async fn shutdown(&self, deleting: bool) -> Result<()> {
        let mut set = JoinSet::new();
        for op in self.operators() {
            set.spawn(async move { op.shutdown(deleting).await });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| CrewError::Other(e.into())).and_then(|r| r);
            if let Err(err) = result {
                warn!(group = %self.id(), error = %err, "operator shutdown failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish(&self, kind: UpdateKind, task: Task) {
        self.ctx.feed.publish(FeedEvent::task(kind, task));
    }
}

/// Walk down the children back-index from `start` and return the first task
/// found in `targets`.
fn first_reachable(
    ops: &HashMap<TaskId, Arc<TaskOperator>>,
    start: &[TaskId],
    targets: &[TaskId],
) -> Option<TaskId> {
    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut stack: Vec<TaskId> = start.to_vec();
    while let Some(id) = stack.pop() {
        if targets.contains(&id) {
            return Some(id);
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(op) = ops.get(&id) {
            stack.extend(op.children());
        }
    }
    None
}
