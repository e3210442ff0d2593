// src/storage/mod.rs

//! Persistence of tasks and task groups.
//!
//! The engine only sees [`TaskStorage`]. Two backends ship with the crate:
//! - [`MemoryTaskStorage`]: process-local maps, used by tests and `--dry-run`.
//! - [`FileTaskStorage`]: one JSON file per task under `<root>/<group id>/`.
//!
//! Both hand out per-task execution leases so that at most one holder
//! executes a given task at a time. [`LeaseTable`] covers one process;
//! [`FileTaskStorage`] also takes a lock file under its root, which extends
//! the guarantee to every process sharing that directory. Leases expire on
//! their own; holders renew them while a worker call is in flight and
//! release them through [`LeaseGuard`] on every exit path.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{Task, TaskGroupRecord};
use crate::types::TaskId;

pub use file::FileTaskStorage;
pub use memory::MemoryTaskStorage;

/// A held execution lease on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLease {
    pub task_id: TaskId,
    token: Uuid,
}

/// Storage seam used by groups, operators and the controller.
///
/// Methods are synchronous; every backend in this crate answers from memory
/// or small local files.
pub trait TaskStorage: Send + Sync + Debug {
    fn save_task(&self, task: &Task) -> Result<()>;

    /// Remove a task. Removing an unknown task is not an error.
    fn delete_task(&self, task_id: &str) -> Result<()>;
    fn find_task(&self, task_id: &str) -> Result<Option<Task>>;
    fn all_tasks_in_group(&self, group_id: &str) -> Result<Vec<Task>>;

    /// Tasks of every group sharing `workgroup`.
    fn tasks_in_workgroup(&self, workgroup: &str) -> Result<Vec<Task>>;
    fn tasks_with_key(&self, group_id: &str, key: &str) -> Result<Vec<Task>>;

    fn save_task_group(&self, group: &TaskGroupRecord) -> Result<()>;

    /// Remove a group together with all of its tasks.
    fn delete_task_group(&self, group_id: &str) -> Result<()>;
    fn find_task_group(&self, group_id: &str) -> Result<Option<TaskGroupRecord>>;
    fn all_task_groups(&self) -> Result<Vec<TaskGroupRecord>>;

    /// Every stored group with its tasks, for bootstrapping a controller.
    fn load_all(&self) -> Result<Vec<(TaskGroupRecord, Vec<Task>)>> {
        let mut out = Vec::new();
        for group in self.all_task_groups()? {
            let tasks = self.all_tasks_in_group(&group.id)?;
            out.push((group, tasks));
        }
        Ok(out)
    }

    /// Lease table backing the lock operations below.
    fn leases(&self) -> &LeaseTable;

    /// Try to take the execution lease of `task_id` for `lease`.
    ///
    /// `Ok(None)` means another holder owns an unexpired lease.
    fn try_lock_task(&self, task_id: &str, lease: Duration) -> Result<Option<TaskLease>> {
        Ok(self.leases().acquire(task_id, lease))
    }

    /// Extend a held lease. Returns `false` if it was lost (expired and taken).
    fn renew_lease(&self, lease: &TaskLease, duration: Duration) -> Result<bool> {
        Ok(self.leases().renew(lease, duration))
    }

    fn unlock_task(&self, lease: &TaskLease) -> Result<()> {
        self.leases().release(lease);
        Ok(())
    }
}

#[derive(Debug)]
struct LeaseEntry {
    token: Uuid,
    expires_at: Instant,
}

/// Bounded-expiry lease bookkeeping shared by the storage backends.
#[derive(Debug, Default)]
pub struct LeaseTable {
    entries: Mutex<HashMap<TaskId, LeaseEntry>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, task_id: &str, lease: Duration) -> Option<TaskLease> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(task_id) {
            if existing.expires_at > now {
                return None;
            }
            debug!(task = %task_id, "taking over expired lease");
        }
        let token = Uuid::new_v4();
        entries.insert(
            task_id.to_string(),
            LeaseEntry {
                token,
                expires_at: now + lease,
            },
        );
        Some(TaskLease {
            task_id: task_id.to_string(),
            token,
        })
    }

    pub fn renew(&self, lease: &TaskLease, duration: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&lease.task_id) {
            Some(entry) if entry.token == lease.token => {
                entry.expires_at = Instant::now() + duration;
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, lease: &TaskLease) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(&lease.task_id)
            .is_some_and(|entry| entry.token == lease.token)
        {
            entries.remove(&lease.task_id);
        }
    }

    pub fn is_locked(&self, task_id: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(task_id)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

/// Releases a [`TaskLease`] when dropped.
#[derive(Debug)]
pub struct LeaseGuard {
    storage: Arc<dyn TaskStorage>,
    lease: TaskLease,
}

impl LeaseGuard {
    /// Take the lease of `task_id`, or `Ok(None)` if someone else holds it.
    pub fn acquire(
        storage: Arc<dyn TaskStorage>,
        task_id: &str,
        duration: Duration,
    ) -> Result<Option<Self>> {
        Ok(storage
            .try_lock_task(task_id, duration)?
            .map(|lease| Self { storage, lease }))
    }

    pub fn renew(&self, duration: Duration) -> bool {
        match self.storage.renew_lease(&self.lease, duration) {
            Ok(held) => held,
            Err(err) => {
                warn!(task = %self.lease.task_id, error = %err, "failed to renew lease");
                false
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(err) = self.storage.unlock_task(&self.lease) {
            warn!(task = %self.lease.task_id, error = %err, "failed to release lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_released() {
        let table = LeaseTable::new();
        let lease = table.acquire("t1", Duration::from_secs(30)).expect("first acquire");
        assert!(table.acquire("t1", Duration::from_secs(30)).is_none());
        assert!(table.is_locked("t1"));

        table.release(&lease);
        assert!(!table.is_locked("t1"));
        assert!(table.acquire("t1", Duration::from_secs(30)).is_some());
    }

    #[test]
    fn expired_lease_can_be_taken_over_and_old_holder_cannot_renew() {
        let table = LeaseTable::new();
        let stale = table.acquire("t1", Duration::ZERO).expect("first acquire");
        let fresh = table.acquire("t1", Duration::from_secs(30)).expect("takeover");

        assert!(!table.renew(&stale, Duration::from_secs(30)));
        // Releasing the stale lease must not drop the new holder's lease.
        table.release(&stale);
        assert!(table.is_locked("t1"));
        assert!(table.renew(&fresh, Duration::from_secs(30)));
    }

    #[test]
    fn guard_releases_on_drop() {
        let storage: Arc<dyn TaskStorage> = Arc::new(MemoryTaskStorage::new());
        {
            let guard = LeaseGuard::acquire(storage.clone(), "t1", Duration::from_secs(30))
                .unwrap()
                .expect("lease should be free");
            assert!(guard.renew(Duration::from_secs(30)));
            assert!(storage.leases().is_locked("t1"));
        }
        assert!(!storage.leases().is_locked("t1"));
    }
}
