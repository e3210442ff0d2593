// src/config/mod.rs

//! Configuration loading and validation for taskcrew.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and overlay the environment (`loader.rs`).
//! - Validate basic sanity of the values (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env_overrides, default_config_path, load_and_validate, load_from_path, load_with_env};
pub use model::{
    ClientSection, ConfigFile, ControllerSection, DefaultsSection, RawConfigFile, ShutdownSection,
    StorageSection, ThrottleSection,
};
