//! Patch files, state snapshots, and validation for rill.
//!
//! # Features
//!
//! - **Patch files**: Load and save [`Patch`] documents as TOML
//! - **Snapshots**: Save and resume a runtime's [`StateStore`](rill_core::StateStore) as JSON
//! - **Validation**: Check block types, port references, buses, and rail
//!   settings before compiling
//! - **Paths**: Platform-specific patch directory and name lookup
//!
//! # Example
//!
//! ```rust,no_run
//! use rill_config::{SnapshotFile, load_patch, validate_patch};
//! use rill_core::{Runtime, compile_patch};
//! use rill_blocks::BlockRegistry;
//!
//! let patch = load_patch("pulse.toml").unwrap();
//! validate_patch(&patch).unwrap();
//! let program = compile_patch(&patch, &BlockRegistry::new()).into_result().unwrap();
//! let mut rt = Runtime::new(program);
//! rt.run_frame(16.0).unwrap();
//! SnapshotFile::new(rt.snapshot()).with_patch("pulse").save("pulse.json").unwrap();
//! ```

mod error;
mod patch_file;
mod snapshot;

/// Platform-specific patch locations.
pub mod paths;

/// Patch validation.
pub mod validation;

pub use error::ConfigError;
pub use patch_file::{load_patch, parse_patch, patch_to_toml, save_patch};
pub use paths::{find_patch, list_user_patches, resolve_patch, user_patches_dir};
pub use snapshot::{SNAPSHOT_VERSION, SnapshotFile};
pub use validation::{PatchValidator, ValidationError, ValidationResult, validate_patch};

/// Re-export of the patch document type.
pub use rill_core::Patch;
