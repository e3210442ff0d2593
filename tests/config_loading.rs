// tests/config_loading.rs

use std::fs;

use taskcrew::config::{load_and_validate, load_with_env};
use taskcrew::engine::EngineSettings;
use taskcrew::errors::CrewError;
use taskcrew::types::StorageBackend;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_with_env(dir.path().join("Crew.toml"), |_| None).unwrap();

    assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    assert_eq!(cfg.defaults.remaining_attempts, 5);
    assert_eq!(cfg.client.worker_base_url, "http://localhost:8090/demo/");
}

#[test]
fn file_values_and_env_overrides_are_combined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Crew.toml");
    fs::write(
        &path,
        r#"
[controller]
mailbox_capacity = 8
reevaluate_interval_secs = 0

[storage]
backend = "file"
path = "/var/lib/crew"
lease_secs = 30

[client]
worker_base_url = "http://from-file/"
timeout_secs = 20

[throttle]
max_in_flight_per_worker = 4
"#,
    )
    .unwrap();

    let cfg = load_with_env(&path, |key| {
        (key == "CREW_WORKER_BASE_URL").then(|| "http://from-env/".to_string())
    })
    .unwrap();

    assert_eq!(cfg.storage.backend, StorageBackend::File);
    assert_eq!(cfg.storage.path, "/var/lib/crew");
    assert_eq!(cfg.client.worker_base_url, "http://from-env/");
    assert_eq!(cfg.client.timeout_secs, 20);

    let settings = EngineSettings::from(&cfg);
    assert_eq!(settings.mailbox_capacity, 8);
    assert_eq!(settings.lease.as_secs(), 30);
    assert!(settings.reevaluate_interval.is_zero());
    assert_eq!(settings.max_in_flight_per_worker, 4);
    assert_eq!(settings.event_buffer, 64);
}

#[test]
fn invalid_values_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Crew.toml");

    fs::write(&path, "[shutdown]\nmax_polls = 0\n").unwrap();
    assert!(matches!(load_and_validate(&path), Err(CrewError::ConfigError(_))));

    fs::write(&path, "[storage]\nbackend = \"redis\"\n").unwrap();
    assert!(matches!(load_and_validate(&path), Err(CrewError::TomlError(_))));
}
