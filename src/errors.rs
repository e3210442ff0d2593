// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrewError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task group not found: {0}")]
    TaskGroupNotFound(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task group already exists: {0}")]
    DuplicateTaskGroup(String),

    #[error("Task '{task}' references parent '{parent}' which is not in the group")]
    MissingParent { task: String, parent: String },

    #[error("Cycle detected in task group: {0}")]
    CycleDetected(String),

    #[error("Task group {0} is being deleted")]
    GroupDeleting(String),

    #[error("Invalid task group id: {0}")]
    InvalidGroupId(String),

    #[error("Unable to create children - corrupt parent/child relationship ({registered} of {declared} registered)")]
    ChildCreation { registered: usize, declared: usize },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Worker call failed: {0}")]
    ClientError(String),

    #[error("Operator for task {0} is no longer running")]
    OperatorStopped(String),

    #[error("Timed out waiting for task {0} to shut down")]
    ShutdownTimeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for CrewError {
    fn from(err: reqwest::Error) -> Self {
        CrewError::ClientError(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CrewError>;
