// src/engine/controller.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::TaskClient;
use crate::config::model::ConfigFile;
use crate::dag::graph::TaskGraph;
use crate::engine::group::TaskGroup;
use crate::engine::{EngineContext, EngineSettings, Feed};
use crate::errors::{CrewError, Result};
use crate::model::{FeedEvent, Task, TaskGroupRecord, UpdateKind, validate_group_id};
use crate::storage::TaskStorage;
use crate::types::TaskGroupId;

/// Every live task group of the process.
///
/// Owns the storage handle and the observer feed, applies workgroup delays
/// across groups and runs the periodic re-evaluation sweep.
pub struct TaskGroupController {
    me: Weak<TaskGroupController>,
    groups: RwLock<HashMap<TaskGroupId, Arc<TaskGroup>>>,
    ctx: EngineContext,
    feed_rx: Mutex<Option<mpsc::Receiver<FeedEvent>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TaskGroupController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroupController")
            .field("groups", &self.group_ids())
            .finish_non_exhaustive()
    }
}

impl TaskGroupController {
    pub fn new(storage: Arc<dyn TaskStorage>, settings: EngineSettings) -> Arc<Self> {
        let (feed, feed_rx) = Feed::channel(settings.event_buffer.max(1));
        let ctx = EngineContext::new(storage, feed, settings);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            groups: RwLock::new(HashMap::new()),
            ctx,
            feed_rx: Mutex::new(Some(feed_rx)),
            sweep: Mutex::new(None),
        })
    }

    pub fn from_config(storage: Arc<dyn TaskStorage>, cfg: &ConfigFile) -> Arc<Self> {
        Self::new(storage, EngineSettings::from(cfg))
    }

    pub fn storage(&self) -> Arc<dyn TaskStorage> {
        Arc::clone(&self.ctx.storage)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    /// Hand out the feed receiver. Only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<FeedEvent>> {
        self.feed_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn group(&self, group_id: &str) -> Option<Arc<TaskGroup>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .cloned()
    }

    /// Like [`group`](Self::group), but a missing group is an error.
    pub fn require_group(&self, group_id: &str) -> Result<Arc<TaskGroup>> {
        self.group(group_id)
            .ok_or_else(|| CrewError::TaskGroupNotFound(group_id.to_string()))
    }

    /// Live groups, newest first.
    pub fn groups(&self) -> Vec<Arc<TaskGroup>> {
        let mut groups: Vec<Arc<TaskGroup>> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        groups.sort_by_cached_key(|g| {
            let record = g.record();
            (std::cmp::Reverse(record.created_at), record.id)
        });
        groups
    }

    fn group_ids(&self) -> Vec<TaskGroupId> {
        let mut ids: Vec<TaskGroupId> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Create a new group with its initial tasks and start it.
    ///
    /// The id is validated, the dependency graph must be acyclic, and the
    /// group and every task are persisted before any operator starts.
    pub fn add_group(
        &self,
        record: TaskGroupRecord,
        tasks: Vec<Task>,
        client: Arc<dyn TaskClient>,
    ) -> Result<Arc<TaskGroup>> {
        validate_group_id(&record.id)?;

        let mut tasks = tasks;
        for task in &mut tasks {
            task.ensure_id();
            task.task_group_id = record.id.clone();
        }
        TaskGraph::from_tasks(&tasks).ensure_acyclic()?;

        let group = {
            let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
            if groups.contains_key(&record.id) || self.ctx.storage.find_task_group(&record.id)?.is_some() {
                return Err(CrewError::DuplicateTaskGroup(record.id));
            }

            self.ctx.storage.save_task_group(&record)?;
            for task in &tasks {
                self.ctx.storage.save_task(task)?;
            }

            let group = TaskGroup::new(record.clone(), self.ctx.clone(), self.me.clone());
            groups.insert(record.id.clone(), Arc::clone(&group));
            group
        };

        info!(group = %record.id, name = %record.name, tasks = tasks.len(), "task group added");
        self.process_task_group_update(UpdateKind::Create, record);
        for task in &tasks {
            self.process_task_update(UpdateKind::Create, task.clone());
        }

        group.prepare(tasks, client);
        group.operate();
        Ok(group)
    }

    /// Delete a group.
    ///
    /// The group is flagged as deleting first, so no new execution can start,
    /// and every operator is stopped before its storage state is removed.
    pub async fn remove_group(&self, group_id: &str) -> Result<()> {
        let group = self.require_group(group_id)?;

        let record = group.mark_deleting();
        self.ctx.storage.save_task_group(&record)?;
        self.process_task_group_update(UpdateKind::Update, record.clone());

        if let Err(err) = group.shutdown(true).await {
            warn!(group = %group_id, error = %err, "removing group with operators that did not stop");
        }

        self.ctx.storage.delete_task_group(group_id)?;
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group_id);

        info!(group = %group_id, "task group removed");
        self.process_task_group_update(UpdateKind::Delete, record);
        Ok(())
    }

    /// Rename a group.
    pub fn update_group(&self, group_id: &str, name: &str) -> Result<TaskGroupRecord> {
        let group = self.require_group(group_id)?;
        let record = group.rename(name);
        self.ctx.storage.save_task_group(&record)?;
        self.process_task_group_update(UpdateKind::Update, record.clone());
        Ok(record)
    }

    /// Register every stored group without starting it.
    ///
    /// Groups that were mid-deletion when the previous process stopped are
    /// deleted now. Returns the number of groups kept.
    pub async fn bootstrap(&self, client: Arc<dyn TaskClient>) -> Result<usize> {
        let mut unfinished = Vec::new();
        let mut loaded = 0usize;

        for (record, tasks) in self.ctx.storage.load_all()? {
            if self.group(&record.id).is_some() {
                debug!(group = %record.id, "group already registered; skipping");
                continue;
            }
            let group = TaskGroup::new(record.clone(), self.ctx.clone(), self.me.clone());
            group.prepare(tasks, Arc::clone(&client));
            self.groups
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.id.clone(), group);

            if record.is_deleting {
                unfinished.push(record.id);
            } else {
                loaded += 1;
            }
        }

        for group_id in unfinished {
            info!(group = %group_id, "finishing interrupted group deletion");
            self.remove_group(&group_id).await?;
        }

        info!(groups = loaded, "controller bootstrapped");
        Ok(loaded)
    }

    /// Start every registered group.
    pub fn operate(&self) {
        for group in self.groups() {
            if !group.is_deleting() {
                group.operate();
            }
        }
    }

    /// Periodically post `Evaluate` to every idle, incomplete operator.
    ///
    /// Returns `false` if the interval is zero or a sweep is already running.
    pub fn spawn_reevaluation_sweep(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let mut sweep = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if sweep.is_some() {
            return false;
        }

        let me = self.me.clone();
        *sweep = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticks.tick().await;
                let Some(controller) = me.upgrade() else {
                    break;
                };
                let mut nudged = 0usize;
                for group in controller.groups() {
                    if !group.is_deleting() {
                        nudged += group.evaluate_idle();
                    }
                }
                debug!(operators = nudged, "re-evaluation sweep");
            }
        }));
        true
    }

    /// Push `run_after` of every incomplete task in `workgroup`, in every
    /// group, to `now + seconds`. Returns the number of tasks delayed.
    pub fn delay_workgroup(&self, workgroup: &str, seconds: i64, origin_group_id: &str) -> usize {
        if workgroup.is_empty() || seconds <= 0 {
            return 0;
        }
        let until = Utc::now() + chrono::Duration::seconds(seconds);
        let delayed: usize = self
            .groups()
            .iter()
            .map(|group| group.delay_workgroup(workgroup, until))
            .sum();
        info!(workgroup = %workgroup, origin = %origin_group_id, seconds, delayed, "workgroup delayed");
        delayed
    }

    /// Publish a task change to observers. Never blocks.
    pub fn process_task_update(&self, kind: UpdateKind, task: Task) {
        self.ctx.feed.publish(FeedEvent::task(kind, task));
    }

    /// Publish a group change to observers. Never blocks.
    pub fn process_task_group_update(&self, kind: UpdateKind, record: TaskGroupRecord) {
        self.ctx.feed.publish(FeedEvent::group(kind, record));
    }

    /// Stop the sweep and every group. Tasks are persisted, not deleted.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(sweep) = self.sweep.lock().unwrap_or_else(PoisonError::into_inner).take() {
            sweep.abort();
        }

        let mut first_err = None;
        for group in self.groups() {
            if let Err(err) = group.shutdown(false).await {
                warn!(group = %group.id(), error = %err, "group shutdown failed");
                first_err.get_or_insert(err);
            }
        }
        info!("controller stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
