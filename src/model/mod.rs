// src/model/mod.rs

//! Plain data records shared by the engine, storage and clients.
//!
//! - [`task`] is the DAG node / unit of work.
//! - [`task_group`] is the persisted part of a task group.
//! - [`update`] describes partial updates applied by an operator.
//! - [`event`] holds the feed events published for observers.

pub mod event;
pub mod task;
pub mod task_group;
pub mod update;

pub use event::{FeedEvent, TaskGroupUpdateEvent, TaskUpdateEvent, UpdateKind};
pub use task::Task;
pub use task_group::{validate_group_id, TaskGroupDefinition, TaskGroupRecord};
pub use update::TaskUpdate;
