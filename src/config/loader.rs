// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable overriding `[client].worker_base_url`.
pub const ENV_WORKER_BASE_URL: &str = "CREW_WORKER_BASE_URL";

/// Environment variable overriding `[client].authorization_header`.
pub const ENV_WORKER_AUTHORIZATION_HEADER: &str = "CREW_WORKER_AUTHORIZATION_HEADER";

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file, apply environment overrides and validate.
///
/// A missing file is not an error: the built-in defaults are used instead,
/// so a bare `taskcrew` invocation works out of the box.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_and_validate`] but with an explicit environment lookup.
pub fn load_with_env<F>(path: impl AsRef<Path>, lookup: F) -> Result<ConfigFile>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let mut raw = if path.exists() {
        load_from_path(path)?
    } else {
        debug!(path = %path.display(), "config file not found, using defaults");
        RawConfigFile::default()
    };

    apply_env_overrides(&mut raw, lookup);

    ConfigFile::try_from(raw)
}

/// Overlay client settings taken from the environment.
///
/// Empty values are ignored.
pub fn apply_env_overrides<F>(raw: &mut RawConfigFile, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_WORKER_BASE_URL).filter(|v| !v.trim().is_empty()) {
        debug!(url = %url, "worker base url overridden from environment");
        raw.client.worker_base_url = url;
    }
    if let Some(auth) = lookup(ENV_WORKER_AUTHORIZATION_HEADER).filter(|v| !v.trim().is_empty()) {
        debug!("worker authorization header overridden from environment");
        raw.client.authorization_header = Some(auth);
    }
}

/// Default config path: `Crew.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Crew.toml")
}
