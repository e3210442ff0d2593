// src/engine/operator.rs

//! The per-task actor.
//!
//! Every mutation of a task happens inside its operator's event loop. Other
//! operators, the group and the controller only read the shared snapshot and
//! post [`OperatorEvent`]s into the mailbox.
//!
//! The loop prefers the mailbox over timers, so an update that arrives while
//! an execute timer is due is applied (and re-evaluated) first.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::{ParentResult, TaskClient, WorkerResponse};
use crate::engine::eligibility;
use crate::engine::group::TaskGroup;
use crate::engine::timers::{self, Deadline, TimerKind, Timers};
use crate::engine::{EngineContext, children};
use crate::errors::{CrewError, Result};
use crate::model::{FeedEvent, Task, TaskUpdate, UpdateKind};
use crate::storage::LeaseGuard;
use crate::types::TaskId;

/// Messages an operator processes, strictly in arrival order.
#[derive(Debug)]
pub enum OperatorEvent {
    /// A parent finished; eligibility may have changed.
    ParentCompleted { parent_id: TaskId },
    /// Apply a partial update. `reply` receives the new snapshot or the
    /// persistence error.
    Update {
        update: TaskUpdate,
        reply: Option<oneshot::Sender<Result<Task>>>,
    },
    /// Another task with the same key succeeded; complete with its output.
    KeySiblingCompleted { origin: TaskId, output: Value },
    /// Re-run eligibility.
    Evaluate,
    /// Stop the actor. `done` fires once the final state is settled.
    Shutdown {
        deleting: bool,
        done: oneshot::Sender<()>,
    },
}

pub struct TaskOperator {
    id: TaskId,
    task: RwLock<Task>,
    children: RwLock<Vec<TaskId>>,
    timers: Mutex<Timers>,
    mailbox: mpsc::Sender<OperatorEvent>,
    inbox: Mutex<Option<mpsc::Receiver<OperatorEvent>>>,
    executing: watch::Sender<bool>,
    group: Weak<TaskGroup>,
    client: Arc<dyn TaskClient>,
    ctx: EngineContext,
}

impl fmt::Debug for TaskOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOperator")
            .field("id", &self.id)
            .field("timers", &self.timers())
            .finish_non_exhaustive()
    }
}

impl TaskOperator {
    pub(crate) fn new(
        task: Task,
        group: Weak<TaskGroup>,
        client: Arc<dyn TaskClient>,
        ctx: EngineContext,
    ) -> Arc<Self> {
        let (mailbox, inbox) = mpsc::channel(ctx.settings.mailbox_capacity.max(1));
        let (executing, _) = watch::channel(false);
        Arc::new(Self {
            id: task.id.clone(),
            task: RwLock::new(task),
            children: RwLock::new(Vec::new()),
            timers: Mutex::new(Timers::default()),
            mailbox,
            inbox: Mutex::new(Some(inbox)),
            executing,
            group,
            client,
            ctx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the task.
    pub fn task(&self) -> Task {
        self.task.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Read the task without cloning it. Do not take other locks inside `f`.
    pub fn with_task<R>(&self, f: impl FnOnce(&Task) -> R) -> R {
        f(&self.task.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_task<R>(&self, f: impl FnOnce(&mut Task) -> R) -> R {
        f(&mut self.task.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn children(&self) -> Vec<TaskId> {
        self.children.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_children(&self, children: Vec<TaskId>) {
        *self.children.write().unwrap_or_else(PoisonError::into_inner) = children;
    }

    pub(crate) fn add_child(&self, child_id: &str) {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        if !children.iter().any(|c| c == child_id) {
            children.push(child_id.to_string());
        }
    }

    pub(crate) fn remove_child(&self, child_id: &str) {
        self.children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| c != child_id);
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current timer state.
    pub fn timers(&self) -> Timers {
        *self.lock_timers()
    }

    /// Watch the "executing" signal: `true` while a worker call is in flight.
    pub fn subscribe_executing(&self) -> watch::Receiver<bool> {
        self.executing.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.with_task(|t| t.busy_executing)
    }

    /// Whether the event loop has been started.
    pub fn is_operating(&self) -> bool {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Start the event loop. Returns `false` if it was already started.
    pub fn operate(self: &Arc<Self>) -> bool {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(inbox) = inbox else {
            return false;
        };

        let operator = Arc::clone(self);
        tokio::spawn(async move {
            operator.run(inbox).await;
        });
        true
    }

    /// Post an event without blocking.
    ///
    /// A full mailbox moves the send onto a background task so the event is
    /// still delivered.
    pub fn deliver(&self, event: OperatorEvent) {
        match self.mailbox.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(task = %self.id, "mailbox full; delivering in background");
                let mailbox = self.mailbox.clone();
                tokio::spawn(async move {
                    let _ = mailbox.send(event).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                debug!(task = %self.id, "operator stopped; dropping event");
            }
        }
    }

    /// Ask the operator to re-run eligibility.
    pub fn request_evaluate(&self) {
        self.deliver(OperatorEvent::Evaluate);
    }

    /// Apply `update` in event-loop order and return the resulting task.
    pub async fn update(&self, update: TaskUpdate) -> Result<Task> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(OperatorEvent::Update {
                update,
                reply: Some(reply),
            })
            .await
            .map_err(|_| CrewError::OperatorStopped(self.id.clone()))?;
        rx.await
            .map_err(|_| CrewError::OperatorStopped(self.id.clone()))?
    }

    /// Fire-and-forget variant of [`update`](Self::update).
    pub fn notify(&self, update: TaskUpdate) {
        self.deliver(OperatorEvent::Update {
            update,
            reply: None,
        });
    }

    /// Make the task run again from scratch with `remaining_attempts`.
    pub async fn reset(&self, remaining_attempts: i64) -> Result<Task> {
        self.update(TaskUpdate::reset(remaining_attempts, Utc::now()))
            .await
    }

    /// Stop the operator, waiting (bounded) for an in-flight execution.
    ///
    /// With `deleting`, the task is flagged and not persisted again; the
    /// caller removes it from storage afterwards.
    pub async fn shutdown(&self, deleting: bool) -> Result<()> {
        if !self.is_operating() {
            self.finish(deleting);
            return Ok(());
        }

        let (done_tx, mut done) = oneshot::channel();
        if self
            .mailbox
            .send(OperatorEvent::Shutdown {
                deleting,
                done: done_tx,
            })
            .await
            .is_err()
        {
            // The loop already exited.
            return Ok(());
        }

        let settings = &self.ctx.settings;
        for poll in 1..=settings.shutdown_max_polls {
            match tokio::time::timeout(settings.shutdown_poll_interval, &mut done).await {
                Ok(_) => return Ok(()),
                Err(_) if self.is_busy() => {
                    info!(task = %self.id, poll, max_polls = settings.shutdown_max_polls, "waiting for in-flight execution before shutdown");
                }
                Err(_) => {
                    debug!(task = %self.id, poll, "waiting for operator to stop");
                }
            }
        }

        warn!(task = %self.id, "operator did not stop in time");
        Err(CrewError::ShutdownTimeout(self.id.clone()))
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<OperatorEvent>) {
        debug!(task = %self.id, "operator started");
        self.evaluate();

        loop {
            let next = self.timers().next(Utc::now());
            tokio::select! {
                biased;

                event = inbox.recv() => match event {
                    Some(OperatorEvent::Shutdown { deleting, done }) => {
                        self.finish(deleting);
                        let _ = done.send(());
                        break;
                    }
                    Some(event) => self.handle(event).await,
                    None => break,
                },

                kind = timers::fire(next) => match kind {
                    TimerKind::Execute => {
                        self.lock_timers().disarm_execute();
                        self.execute().await;
                    }
                    TimerKind::Evaluate => {
                        self.lock_timers().disarm_evaluate();
                        self.evaluate();
                    }
                },
            }
        }

        debug!(task = %self.id, "operator stopped");
    }

    async fn handle(&self, event: OperatorEvent) {
        match event {
            OperatorEvent::ParentCompleted { parent_id } => {
                debug!(task = %self.id, parent = %parent_id, "parent completed");
                self.evaluate();
            }
            OperatorEvent::Update { update, reply } => {
                let result = self.apply_update(&update);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                self.evaluate();
            }
            OperatorEvent::KeySiblingCompleted { origin, output } => {
                self.complete_as_key_sibling(&origin, output);
            }
            OperatorEvent::Evaluate => {
                // A pending retry backoff decides when to look again.
                if self.timers().evaluate().is_some() {
                    debug!(task = %self.id, "retry backoff pending; evaluation deferred");
                    return;
                }
                self.evaluate();
            }
            OperatorEvent::Shutdown { .. } => {}
        }
    }

    fn apply_update(&self, update: &TaskUpdate) -> Result<Task> {
        let task = self.write_task(|t| {
            update.apply_to(t);
            t.clone()
        });
        let saved = self.ctx.storage.save_task(&task);
        if let Err(err) = &saved {
            warn!(task = %self.id, error = %err, "failed to persist update");
        }
        self.publish(UpdateKind::Update, task.clone());
        saved.map(|_| task)
    }

    fn complete_as_key_sibling(&self, origin: &str, output: Value) {
        if self.with_task(|t| t.is_complete) {
            return;
        }
        info!(task = %self.id, origin = %origin, "completed by key sibling");
        let task = self.write_task(|t| {
            t.is_complete = true;
            t.output = output;
            t.clone()
        });
        self.persist(&task);
        self.publish(UpdateKind::Update, task);
        self.evaluate();
        if let Some(group) = self.group.upgrade() {
            self.notify_children_completed(&group);
        }
    }

    fn finish(&self, deleting: bool) {
        let task = self.write_task(|t| {
            if deleting {
                t.is_deleting = true;
            }
            t.clone()
        });
        if !deleting {
            self.persist(&task);
        }
        self.lock_timers().disarm_all();
    }

    /// Eligibility of the task as of now, ignoring `run_after`.
    pub fn can_execute(&self) -> bool {
        let Some(group) = self.group.upgrade() else {
            return false;
        };
        let task = self.task();
        let group_blocked = group.is_deleting() || group.is_paused();
        eligibility::can_execute(&task, group_blocked, |parent| {
            group
                .operator(parent)
                .map(|op| op.with_task(|t| t.is_complete))
        })
    }

    /// Arm the execute timer if eligible, disarm it otherwise.
    pub(crate) fn evaluate(&self) {
        let eligible = self.can_execute();
        let run_after = self.with_task(|t| t.run_after);
        let mut timers = self.lock_timers();
        if eligible {
            timers.disarm_evaluate();
            timers.arm_execute(Deadline::from_run_after(run_after));
        } else {
            timers.disarm_execute();
        }
    }

    fn arm_retry_in(&self, wait: Duration) {
        let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(1));
        self.lock_timers().arm_evaluate(Utc::now() + wait);
    }

    async fn execute(&self) {
        if !self.can_execute() {
            debug!(task = %self.id, "no longer eligible; skipping execution");
            return;
        }
        let Some(group) = self.group.upgrade() else {
            return;
        };
        let settings = Arc::clone(&self.ctx.settings);

        let worker = self.with_task(|t| t.worker.clone());
        let permit = self.ctx.throttle.acquire(&worker).await;
        // A pause, delay or group removal may have landed while waiting for a slot.
        let deferred = self.with_task(|t| t.run_after.is_some_and(|at| at > Utc::now()));
        if deferred || !self.can_execute() {
            debug!(task = %self.id, worker = %worker, "no longer due after waiting for a worker slot");
            drop(permit);
            self.evaluate();
            return;
        }

        let lease = match LeaseGuard::acquire(self.ctx.storage.clone(), &self.id, settings.lease) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(task = %self.id, "execution lease held elsewhere; retrying later");
                self.arm_retry_in(settings.lock_retry);
                return;
            }
            Err(err) => {
                warn!(task = %self.id, error = %err, "failed to take execution lease; retrying later");
                self.arm_retry_in(settings.lock_retry);
                return;
            }
        };

        let task = self.write_task(|t| {
            t.busy_executing = true;
            t.clone()
        });
        self.executing.send_replace(true);
        self.publish(UpdateKind::Update, task.clone());

        let parents = group.parent_results(&task);
        info!(
            task = %self.id,
            group = %task.task_group_id,
            worker = %task.worker,
            remaining_attempts = task.remaining_attempts,
            "executing task"
        );
        let result = self.post_with_lease(&task, &parents, &lease).await;
        drop(permit);

        self.write_task(|t| t.remaining_attempts -= 1);
        let now = Utc::now();

        let (outcome, workgroup_delay, children_delay) = match result {
            Ok(mut response) => {
                let workgroup_delay = response.workgroup_delay_in_seconds;
                let children_delay = response.children_delay_in_seconds;
                match response.error.take() {
                    Some(error) => (Err(error), workgroup_delay, children_delay),
                    None => (Ok(response), workgroup_delay, children_delay),
                }
            }
            Err(err) => (Err(Value::String(err.to_string())), 0, 0),
        };

        let mut created: Vec<TaskId> = Vec::new();
        let mut completed = false;
        match outcome {
            Err(error) => {
                warn!(task = %self.id, worker = %task.worker, error = %error, "execution failed");
                self.record_failure(error, now);
            }
            Ok(response) => {
                self.write_task(|t| t.output = response.output.clone());
                match self.create_children(&group, &response, children_delay).await {
                    Ok(ids) => {
                        created = ids;
                        completed = true;
                        self.write_task(|t| t.is_complete = true);
                        info!(task = %self.id, children = created.len(), "task complete");
                        self.complete_key_siblings(&group, &response.output);
                    }
                    Err(err) => {
                        warn!(task = %self.id, error = %err, "child creation failed");
                        self.record_failure(Value::String(err.to_string()), now);
                    }
                }
            }
        }

        if workgroup_delay > 0 {
            self.delay_workgroup(&group, workgroup_delay);
        }
        if children_delay > 0 {
            self.delay_existing_children(&group, &created, children_delay, now);
        }
        if completed {
            self.notify_children_completed(&group);
        }

        let task = self.write_task(|t| {
            t.busy_executing = false;
            t.clone()
        });
        self.persist(&task);
        self.publish(UpdateKind::Update, task);
        self.executing.send_replace(false);
        drop(lease);
    }

    /// Call the worker, renewing the lease at half its length meanwhile.
    async fn post_with_lease(
        &self,
        task: &Task,
        parents: &[ParentResult],
        lease: &LeaseGuard,
    ) -> Result<WorkerResponse> {
        let length = self.ctx.settings.lease;
        let every = (length / 2).max(Duration::from_millis(10));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        let mut post = self.client.post(task, parents);

        loop {
            tokio::select! {
                result = &mut post => return result,
                _ = renew.tick() => {
                    if !lease.renew(length) {
                        warn!(task = %self.id, "execution lease lost while waiting on worker");
                    }
                }
            }
        }
    }

    async fn create_children(
        &self,
        group: &Arc<TaskGroup>,
        response: &WorkerResponse,
        children_delay: i64,
    ) -> Result<Vec<TaskId>> {
        if response.children.is_empty() {
            return Ok(Vec::new());
        }
        let parent = self.task();
        children::create_children(
            group,
            &parent,
            &response.children,
            children_delay,
            &self.client,
            &self.ctx.settings,
        )
        .await
    }

    fn record_failure(&self, error: Value, now: chrono::DateTime<Utc>) {
        let (remaining, delay) = self.write_task(|t| {
            t.errors.push(error);
            (t.remaining_attempts, t.error_delay_in_seconds)
        });
        if remaining > 0 {
            let at = now + chrono::Duration::seconds(delay.max(0));
            debug!(task = %self.id, remaining_attempts = remaining, retry_at = %at, "retry scheduled");
            self.lock_timers().arm_evaluate(at);
        } else {
            warn!(task = %self.id, "no attempts left");
        }
    }

    fn complete_key_siblings(&self, group: &TaskGroup, output: &Value) {
        let key = self.with_task(|t| t.key.clone());
        if key.is_empty() {
            return;
        }
        for sibling in group.operators() {
            if sibling.id() == self.id || !sibling.with_task(|t| t.key == key) {
                continue;
            }
            sibling.deliver(OperatorEvent::KeySiblingCompleted {
                origin: self.id.clone(),
                output: output.clone(),
            });
        }
    }

    fn delay_workgroup(&self, group: &TaskGroup, seconds: i64) {
        let workgroup = self.with_task(|t| t.workgroup.clone());
        if workgroup.is_empty() {
            return;
        }
        match group.controller() {
            Some(controller) => {
                controller.delay_workgroup(&workgroup, seconds, &group.id());
            }
            None => {
                group.delay_workgroup(&workgroup, Utc::now() + chrono::Duration::seconds(seconds));
            }
        }
    }

    fn delay_existing_children(
        &self,
        group: &TaskGroup,
        created: &[TaskId],
        seconds: i64,
        now: chrono::DateTime<Utc>,
    ) {
        let until = now + chrono::Duration::seconds(seconds);
        for child_id in self.children() {
            if created.contains(&child_id) {
                continue;
            }
            let Some(child) = group.operator(&child_id) else {
                continue;
            };
            if !child.with_task(|t| t.is_complete) {
                child.notify(TaskUpdate::run_after(until));
            }
        }
    }

    fn notify_children_completed(&self, group: &TaskGroup) {
        for child_id in self.children() {
            if let Some(child) = group.operator(&child_id) {
                child.deliver(OperatorEvent::ParentCompleted {
                    parent_id: self.id.clone(),
                });
            }
        }
    }

    fn persist(&self, task: &Task) {
        if let Err(err) = self.ctx.storage.save_task(task) {
            warn!(task = %self.id, error = %err, "failed to persist task");
        }
    }

    fn publish(&self, kind: UpdateKind, task: Task) {
        self.ctx.feed.publish(FeedEvent::task(kind, task));
    }
}
