// src/config/model.rs

use serde::Deserialize;

use crate::types::StorageBackend;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [controller]
/// event_buffer = 64
/// mailbox_capacity = 64
/// reevaluate_interval_secs = 900
///
/// [storage]
/// backend = "file"
/// path = ".crew"
///
/// [client]
/// worker_base_url = "http://localhost:8090/demo/"
///
/// [defaults]
/// remaining_attempts = 5
/// error_delay_in_seconds = 60
/// ```
///
/// All sections are optional and have reasonable defaults. This is the raw,
/// unvalidated form; use [`ConfigFile`] (via `TryFrom`) everywhere else.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
    #[serde(default)]
    pub throttle: ThrottleSection,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`),
/// so holders can rely on capacities being non-zero etc.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub controller: ControllerSection,
    pub storage: StorageSection,
    pub client: ClientSection,
    pub defaults: DefaultsSection,
    pub shutdown: ShutdownSection,
    pub throttle: ThrottleSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            controller: raw.controller,
            storage: raw.storage,
            client: raw.client,
            defaults: raw.defaults,
            shutdown: raw.shutdown,
            throttle: raw.throttle,
        }
    }
}

/// `[controller]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSection {
    /// Capacity of the feed stream; events beyond it are dropped.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of each operator's mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Interval of the periodic re-evaluation sweep; `0` disables it.
    #[serde(default = "default_reevaluate_interval_secs")]
    pub reevaluate_interval_secs: u64,
}

fn default_event_buffer() -> usize {
    64
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_reevaluate_interval_secs() -> u64 {
    15 * 60
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            mailbox_capacity: default_mailbox_capacity(),
            reevaluate_interval_secs: default_reevaluate_interval_secs(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the `file` backend.
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Length of a per-task execution lease.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// How long an operator waits before re-evaluating when another holder
    /// owns its lease.
    #[serde(default = "default_lock_retry_secs")]
    pub lock_retry_secs: u64,
}

fn default_storage_path() -> String {
    ".crew".to_string()
}

fn default_lease_secs() -> u64 {
    60
}

fn default_lock_retry_secs() -> u64 {
    5
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            lease_secs: default_lease_secs(),
            lock_retry_secs: default_lock_retry_secs(),
        }
    }
}

/// `[client]` section: where and how tasks are POSTed.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    /// Prefix the task's `worker` is appended to.
    ///
    /// Overridden by `CREW_WORKER_BASE_URL`.
    #[serde(default = "default_worker_base_url")]
    pub worker_base_url: String,

    /// Sent verbatim as the `Authorization` header.
    ///
    /// Overridden by `CREW_WORKER_AUTHORIZATION_HEADER`.
    #[serde(default)]
    pub authorization_header: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_worker_base_url() -> String {
    "http://localhost:8090/demo/".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            worker_base_url: default_worker_base_url(),
            authorization_header: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[defaults]` section, applied to worker-declared children that leave the
/// fields at zero.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_remaining_attempts")]
    pub remaining_attempts: i64,

    #[serde(default = "default_error_delay_in_seconds")]
    pub error_delay_in_seconds: i64,
}

fn default_remaining_attempts() -> i64 {
    5
}

fn default_error_delay_in_seconds() -> i64 {
    60
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            remaining_attempts: default_remaining_attempts(),
            error_delay_in_seconds: default_error_delay_in_seconds(),
        }
    }
}

/// `[shutdown]` section: how long to wait for an in-flight execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_polls() -> u32 {
    10
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

/// `[throttle]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThrottleSection {
    /// Maximum concurrent executions per worker; `0` means unlimited.
    #[serde(default)]
    pub max_in_flight_per_worker: usize,
}
