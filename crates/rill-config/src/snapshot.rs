//! JSON state snapshots for session resume.

use std::path::Path;

use rill_core::StateStore;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Snapshot format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A saved [`StateStore`] plus the patch it came from.
///
/// Floats are written with round-trip precision, so a loaded snapshot
/// resumes bit-identically.
///
/// # Example
///
/// ```rust
/// use rill_config::SnapshotFile;
/// use rill_core::StateStore;
///
/// let file = SnapshotFile::new(StateStore::new()).with_patch("pulse");
/// let json = file.to_json().unwrap();
/// assert_eq!(SnapshotFile::from_json(&json).unwrap(), file);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotFile {
    /// Format version.
    pub version: u32,
    /// Name of the patch the state belongs to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Saved state.
    pub state: StateStore,
}

impl SnapshotFile {
    /// Wrap a state store at the current format version.
    pub fn new(state: StateStore) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            patch: None,
            state,
        }
    }

    /// Record the patch name.
    pub fn with_patch(mut self, name: impl Into<String>) -> Self {
        self.patch = Some(name.into());
        self
    }

    /// Parse a snapshot from JSON.
    ///
    /// # Errors
    ///
    /// Malformed JSON, an unsupported [`version`](Self::version), or field
    /// buffers whose length disagrees with their domain.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: SnapshotFile = serde_json::from_str(json)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(ConfigError::SnapshotVersion {
                found: file.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let corrupt = file.state.inconsistent_latches();
        if !corrupt.is_empty() {
            return Err(ConfigError::CorruptSnapshot {
                latches: corrupt.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(file)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Serialization failures.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a snapshot file.
    ///
    /// # Errors
    ///
    /// I/O failures and everything [`from_json`](Self::from_json) rejects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_json(&content)
    }

    /// Save to a file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Serialization and I/O failures.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_json()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }
}
