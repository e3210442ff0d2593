// src/engine/mod.rs

//! Orchestration engine for taskcrew.
//!
//! This module ties together:
//! - [`operator`]: one actor per task, owning its timers and execution
//! - [`group`]: the operators of one task group and their back-index
//! - [`controller`]: every live group of the process, cross-group delays
//!   and the observer feed
//!
//! Operators only talk to each other by posting [`OperatorEvent`]s into
//! mailboxes. The pure eligibility predicate lives in [`eligibility`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::storage::TaskStorage;

pub mod children;
pub mod controller;
pub mod eligibility;
pub mod feed;
pub mod group;
pub mod operator;
pub mod throttle;
pub mod timers;

pub use controller::TaskGroupController;
pub use feed::Feed;
pub use group::TaskGroup;
pub use operator::{OperatorEvent, TaskOperator};
pub use throttle::Throttle;
pub use timers::{Deadline, Timers};

/// Tunables shared by the controller, its groups and their operators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub mailbox_capacity: usize,
    pub event_buffer: usize,
    /// Length of the per-task execution lease.
    pub lease: Duration,
    /// Wait before re-evaluating when the lease is held elsewhere.
    pub lock_retry: Duration,
    pub shutdown_poll_interval: Duration,
    pub shutdown_max_polls: u32,
    /// Applied to worker-declared children that leave attempts at zero.
    pub default_remaining_attempts: i64,
    /// Applied to worker-declared children that leave the error delay at zero.
    pub default_error_delay_in_seconds: i64,
    pub max_in_flight_per_worker: usize,
    /// `Duration::ZERO` disables the periodic sweep.
    pub reevaluate_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            event_buffer: 64,
            lease: Duration::from_secs(60),
            lock_retry: Duration::from_secs(5),
            shutdown_poll_interval: Duration::from_secs(10),
            shutdown_max_polls: 10,
            default_remaining_attempts: 5,
            default_error_delay_in_seconds: 60,
            max_in_flight_per_worker: 0,
            reevaluate_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl From<&ConfigFile> for EngineSettings {
    fn from(cfg: &ConfigFile) -> Self {
        Self {
            mailbox_capacity: cfg.controller.mailbox_capacity,
            event_buffer: cfg.controller.event_buffer,
            lease: Duration::from_secs(cfg.storage.lease_secs),
            lock_retry: Duration::from_secs(cfg.storage.lock_retry_secs),
            shutdown_poll_interval: Duration::from_secs(cfg.shutdown.poll_interval_secs),
            shutdown_max_polls: cfg.shutdown.max_polls,
            default_remaining_attempts: cfg.defaults.remaining_attempts,
            default_error_delay_in_seconds: cfg.defaults.error_delay_in_seconds,
            max_in_flight_per_worker: cfg.throttle.max_in_flight_per_worker,
            reevaluate_interval: Duration::from_secs(cfg.controller.reevaluate_interval_secs),
        }
    }
}

/// Shared handles every group and operator carries.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub storage: Arc<dyn TaskStorage>,
    pub feed: Feed,
    pub settings: Arc<EngineSettings>,
    pub throttle: Arc<Throttle>,
}

impl EngineContext {
    pub fn new(storage: Arc<dyn TaskStorage>, feed: Feed, settings: EngineSettings) -> Self {
        let throttle = Arc::new(Throttle::new(settings.max_in_flight_per_worker));
        Self {
            storage,
            feed,
            settings: Arc::new(settings),
            throttle,
        }
    }
}
