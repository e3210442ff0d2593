use std::str::FromStr;
use serde::Deserialize;

/// Identifier of a single task (UUID v4 unless supplied by the caller).
pub type TaskId = String;

/// Identifier of a task group. Used as a directory name by file storage.
pub type TaskGroupId = String;

/// Which persistence backend the binary should use.
///
/// - `Memory`: state lives only as long as the process.
/// - `File`: one JSON file per task under `<path>/<group id>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "file" => Ok(StorageBackend::File),
            other => Err(format!(
                "invalid storage backend: {other} (expected \"memory\" or \"file\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!("FILE".parse::<StorageBackend>(), Ok(StorageBackend::File));
        assert_eq!(" memory ".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
