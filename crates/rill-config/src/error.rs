//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, saving, or validating patches and
/// snapshots.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Failed to parse or serialize JSON
    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot written by an incompatible format version
    #[error("snapshot format version {found} is not supported (expected {expected})")]
    SnapshotVersion {
        /// Version found in the file.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// Snapshot field buffers whose length disagrees with their domain
    #[error("snapshot field buffers do not match their domains: {}", .latches.join(", "))]
    CorruptSnapshot {
        /// Ids of the offending latches.
        latches: Vec<String>,
    },

    /// Patch not found by name or path
    #[error("patch not found: {0}")]
    PatchNotFound(String),

    /// Validation errors
    #[error("validation failed: {0}")]
    Validation(#[from] crate::validation::ValidationError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn read_file_factory_keeps_path() {
        let err = ConfigError::read_file("/some/path", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/some/path"))
        );
        assert!(err.to_string().contains("failed to read file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn write_and_create_dir_display_paths() {
        let err = ConfigError::write_file("/a/b.toml", mock_io_err());
        assert!(err.to_string().contains("/a/b.toml"), "got: {err}");
        let err = ConfigError::create_dir("/a/b", mock_io_err());
        assert!(err.to_string().contains("failed to create directory"), "got: {err}");
    }

    #[test]
    fn snapshot_version_display() {
        let err = ConfigError::SnapshotVersion {
            found: 9,
            expected: 1,
        };
        assert_eq!(
            err.to_string(),
            "snapshot format version 9 is not supported (expected 1)"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn patch_not_found_display() {
        let err = ConfigError::PatchNotFound("sparkle".to_string());
        assert_eq!(err.to_string(), "patch not found: sparkle");
    }
}
