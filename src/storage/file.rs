// src/storage/file.rs

//! JSON-file storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<group id>/group.json
//! <root>/<group id>/tasks/<task id>.json
//! ```
//!
//! An in-memory `task id -> group id` index is built when the storage is
//! opened so single-task lookups do not scan every group.
//!
//! Execution leases are mirrored to `<root>/.leases/<task id>.lock`, created
//! exclusively, so processes sharing a root do not run the same task twice.
//! Taking over an expired lock file is best effort.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{CrewError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::model::{Task, TaskGroupRecord, validate_group_id};
use crate::storage::memory::{sort_groups, sort_tasks};
use crate::storage::{LeaseTable, TaskLease, TaskStorage};
use crate::types::{TaskGroupId, TaskId};

const GROUP_FILE: &str = "group.json";
const TASKS_DIR: &str = "tasks";
const LEASES_DIR: &str = ".leases";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseFile {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

impl LeaseFile {
    fn new(token: Uuid, duration: Duration) -> Self {
        let length = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            token,
            expires_at: Utc::now() + length,
        }
    }
}

#[derive(Debug)]
pub struct FileTaskStorage {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    index: RwLock<HashMap<TaskId, TaskGroupId>>,
    leases: LeaseTable,
}

fn storage_err(err: anyhow::Error) -> CrewError {
    CrewError::StorageError(format!("{err:#}"))
}

fn validate_task_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(CrewError::StorageError(format!(
            "task id '{id}' cannot be used as a file name"
        )));
    }
    Ok(())
}

impl FileTaskStorage {
    /// Open (creating if needed) a storage rooted at `root` on the real disk.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_fs(root, Arc::new(RealFileSystem))
    }

    pub fn with_fs(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let root = root.into();
        fs.create_dir_all(&root).map_err(storage_err)?;

        let storage = Self {
            root,
            fs,
            index: RwLock::new(HashMap::new()),
            leases: LeaseTable::new(),
        };
        storage.rebuild_index()?;
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, group_id: &str) -> PathBuf {
        self.root.join(group_id)
    }

    fn task_path(&self, group_id: &str, task_id: &str) -> PathBuf {
        self.group_dir(group_id)
            .join(TASKS_DIR)
            .join(format!("{task_id}.json"))
    }

    fn lease_path(&self, task_id: &str) -> PathBuf {
        self.root.join(LEASES_DIR).join(format!("{task_id}.lock"))
    }

    /// Create the lock file for `lease`, replacing one that has expired.
    fn claim_lease_file(&self, lease: &TaskLease, duration: Duration) -> Result<bool> {
        let path = self.lease_path(&lease.task_id);
        let bytes = serde_json::to_vec(&LeaseFile::new(lease.token, duration))?;
        if self.fs.create_new(&path, &bytes).map_err(storage_err)? {
            return Ok(true);
        }

        match self.read_json::<LeaseFile>(&path) {
            Ok(held) if held.expires_at > Utc::now() => return Ok(false),
            Ok(_) => debug!(task = %lease.task_id, "taking over expired lease file"),
            Err(err) => warn!(task = %lease.task_id, error = %err, "replacing unreadable lease file"),
        }
        if self.fs.exists(&path) {
            self.fs.remove_file(&path).map_err(storage_err)?;
        }
        self.fs.create_new(&path, &bytes).map_err(storage_err)
    }

    fn owns_lease_file(&self, lease: &TaskLease) -> bool {
        self.read_json::<LeaseFile>(&self.lease_path(&lease.task_id))
            .is_ok_and(|held| held.token == lease.token)
    }

    fn rebuild_index(&self) -> Result<()> {
        let mut index = HashMap::new();
        for group_dir in self.group_dirs()? {
            let Some(group_id) = group_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for task in self.read_tasks_in(&group_dir)? {
                index.insert(task.id, group_id.to_string());
            }
        }
        info!(root = %self.root.display(), tasks = index.len(), "file storage opened");
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        Ok(())
    }

    fn group_dirs(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .fs
            .read_dir(&self.root)
            .map_err(storage_err)?
            .into_iter()
            .filter(|p| self.fs.is_dir(p))
            .filter(|p| {
                !p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
            })
            .collect())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let contents = self.fs.read_to_string(path).map_err(storage_err)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.fs.write(path, &bytes).map_err(storage_err)
    }

    fn read_tasks_in(&self, group_dir: &Path) -> Result<Vec<Task>> {
        let tasks_dir = group_dir.join(TASKS_DIR);
        if !self.fs.is_dir(&tasks_dir) {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for path in self.fs.read_dir(&tasks_dir).map_err(storage_err)? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<Task>(&path) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable task file"),
            }
        }
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    fn all_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for dir in self.group_dirs()? {
            tasks.extend(self.read_tasks_in(&dir)?);
        }
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    fn group_of(&self, task_id: &str) -> Option<TaskGroupId> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }
}

impl TaskStorage for FileTaskStorage {
    fn save_task(&self, task: &Task) -> Result<()> {
        validate_group_id(&task.task_group_id)?;
        validate_task_id(&task.id)?;
        self.write_json(&self.task_path(&task.task_group_id, &task.id), task)?;
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), task.task_group_id.clone());
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let Some(group_id) = self.group_of(task_id) else {
            return Ok(());
        };
        let path = self.task_path(&group_id, task_id);
        if self.fs.exists(&path) {
            self.fs.remove_file(&path).map_err(storage_err)?;
        }
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        debug!(task = %task_id, group = %group_id, "task file removed");
        Ok(())
    }

    fn find_task(&self, task_id: &str) -> Result<Option<Task>> {
        let Some(group_id) = self.group_of(task_id) else {
            return Ok(None);
        };
        let path = self.task_path(&group_id, task_id);
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    fn all_tasks_in_group(&self, group_id: &str) -> Result<Vec<Task>> {
        self.read_tasks_in(&self.group_dir(group_id))
    }

    fn tasks_in_workgroup(&self, workgroup: &str) -> Result<Vec<Task>> {
        if workgroup.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .all_tasks()?
            .into_iter()
            .filter(|t| t.workgroup == workgroup)
            .collect())
    }

    fn tasks_with_key(&self, group_id: &str, key: &str) -> Result<Vec<Task>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .all_tasks_in_group(group_id)?
            .into_iter()
            .filter(|t| t.key == key)
            .collect())
    }

    fn save_task_group(&self, group: &TaskGroupRecord) -> Result<()> {
        validate_group_id(&group.id)?;
        self.write_json(&self.group_dir(&group.id).join(GROUP_FILE), group)
    }

    fn delete_task_group(&self, group_id: &str) -> Result<()> {
        validate_group_id(group_id)?;
        let dir = self.group_dir(group_id);
        if self.fs.is_dir(&dir) {
            self.fs.remove_dir_all(&dir).map_err(storage_err)?;
        }
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, g| g != group_id);
        info!(group = %group_id, "group directory removed");
        Ok(())
    }

    fn find_task_group(&self, group_id: &str) -> Result<Option<TaskGroupRecord>> {
        if validate_group_id(group_id).is_err() {
            return Ok(None);
        }
        let path = self.group_dir(group_id).join(GROUP_FILE);
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    fn all_task_groups(&self) -> Result<Vec<TaskGroupRecord>> {
        let mut groups = Vec::new();
        for dir in self.group_dirs()? {
            let path = dir.join(GROUP_FILE);
            if !self.fs.is_file(&path) {
                continue;
            }
            match self.read_json::<TaskGroupRecord>(&path) {
                Ok(group) => groups.push(group),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable group file"),
            }
        }
        sort_groups(&mut groups);
        Ok(groups)
    }

    fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    fn try_lock_task(&self, task_id: &str, lease: Duration) -> Result<Option<TaskLease>> {
        validate_task_id(task_id)?;
        let Some(held) = self.leases.acquire(task_id, lease) else {
            return Ok(None);
        };
        match self.claim_lease_file(&held, lease) {
            Ok(true) => Ok(Some(held)),
            Ok(false) => {
                debug!(task = %task_id, "lease file held by another process");
                self.leases.release(&held);
                Ok(None)
            }
            Err(err) => {
                self.leases.release(&held);
                Err(err)
            }
        }
    }

    fn renew_lease(&self, lease: &TaskLease, duration: Duration) -> Result<bool> {
        if !self.leases.renew(lease, duration) || !self.owns_lease_file(lease) {
            return Ok(false);
        }
        self.write_json(&self.lease_path(&lease.task_id), &LeaseFile::new(lease.token, duration))?;
        Ok(true)
    }

    fn unlock_task(&self, lease: &TaskLease) -> Result<()> {
        self.leases.release(lease);
        if self.owns_lease_file(lease) {
            self.fs
                .remove_file(&self.lease_path(&lease.task_id))
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn storage() -> (FileTaskStorage, MockFileSystem) {
        let fs = MockFileSystem::new();
        let storage = FileTaskStorage::with_fs("/data", Arc::new(fs.clone())).expect("open");
        (storage, fs)
    }

    #[test]
    fn tasks_are_written_under_their_group_directory() {
        let (storage, fs) = storage();
        storage.save_task_group(&TaskGroupRecord::new("G1", "crawl")).unwrap();
        let task = Task::new("G1", "fetch", "fetcher");
        storage.save_task(&task).unwrap();

        let expected = PathBuf::from(format!("/data/G1/tasks/{}.json", task.id));
        assert!(fs.is_file(&expected));
        assert_eq!(storage.find_task(&task.id).unwrap(), Some(task));
    }

    #[test]
    fn index_is_rebuilt_when_reopened() {
        let fs = MockFileSystem::new();
        let task = Task::new("G1", "fetch", "fetcher");
        {
            let storage = FileTaskStorage::with_fs("/data", Arc::new(fs.clone())).unwrap();
            storage.save_task_group(&TaskGroupRecord::new("G1", "crawl")).unwrap();
            storage.save_task(&task).unwrap();
        }

        let reopened = FileTaskStorage::with_fs("/data", Arc::new(fs)).unwrap();
        assert_eq!(reopened.find_task(&task.id).unwrap().map(|t| t.name), Some("fetch".to_string()));
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.len(), 1);
    }

    #[test]
    fn unsafe_task_ids_are_rejected() {
        let (storage, _) = storage();
        let mut task = Task::new("G1", "x", "w");
        task.id = "../escape".into();
        assert!(matches!(storage.save_task(&task), Err(CrewError::StorageError(_))));
    }

    #[test]
    fn lock_files_keep_two_storages_from_sharing_a_lease() {
        let fs = MockFileSystem::new();
        let here = FileTaskStorage::with_fs("/data", Arc::new(fs.clone())).unwrap();
        let there = FileTaskStorage::with_fs("/data", Arc::new(fs.clone())).unwrap();

        let lease = here.try_lock_task("t1", Duration::from_secs(60)).unwrap().unwrap();
        assert!(fs.is_file(Path::new("/data/.leases/t1.lock")));
        assert!(there.try_lock_task("t1", Duration::from_secs(60)).unwrap().is_none());
        assert!(here.renew_lease(&lease, Duration::from_secs(60)).unwrap());

        here.unlock_task(&lease).unwrap();
        assert!(!fs.exists(Path::new("/data/.leases/t1.lock")));
        assert!(there.try_lock_task("t1", Duration::from_secs(60)).unwrap().is_some());
        // The lease directory is not mistaken for a group.
        assert!(there.all_task_groups().unwrap().is_empty());
    }

    #[test]
    fn expired_lock_file_is_taken_over() {
        let fs = MockFileSystem::new();
        let here = FileTaskStorage::with_fs("/data", Arc::new(fs.clone())).unwrap();
        let there = FileTaskStorage::with_fs("/data", Arc::new(fs)).unwrap();

        let stale = here.try_lock_task("t1", Duration::ZERO).unwrap().unwrap();
        let fresh = there.try_lock_task("t1", Duration::from_secs(60)).unwrap();
        assert!(fresh.is_some());
        assert!(!here.renew_lease(&stale, Duration::from_secs(60)).unwrap());

        // Releasing the stale lease leaves the new holder's file alone.
        here.unlock_task(&stale).unwrap();
        assert!(here.try_lock_task("t1", Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn deleting_a_group_removes_its_directory() {
        let (storage, fs) = storage();
        storage.save_task_group(&TaskGroupRecord::new("G1", "crawl")).unwrap();
        let task = Task::new("G1", "fetch", "fetcher");
        storage.save_task(&task).unwrap();

        storage.delete_task_group("G1").unwrap();

        assert_eq!(fs.file_count(), 0);
        assert!(storage.find_task(&task.id).unwrap().is_none());
        assert!(storage.all_task_groups().unwrap().is_empty());
    }
}
