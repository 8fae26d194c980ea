//! Platform-specific locations of patch files.
//!
//! - **User patches**: `~/.config/rill/patches/` (Linux),
//!   `~/Library/Application Support/rill/patches/` (macOS),
//!   `%APPDATA%\rill\patches\` (Windows)
//!
//! # Example
//!
//! ```rust,no_run
//! use rill_config::paths;
//!
//! if let Some(path) = paths::find_patch("pulse") {
//!     println!("Found patch at: {:?}", path);
//! }
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Application name used for directory paths.
const APP_NAME: &str = "rill";

/// Subdirectory name for patches.
const PATCHES_SUBDIR: &str = "patches";

/// Returns the user-specific patches directory.
///
/// Falls back to `./rill/patches` if the config directory cannot be
/// determined.
pub fn user_patches_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join(PATCHES_SUBDIR)
}

/// Find a patch file by path or name.
///
/// `name` may be a path to an existing file, or a patch name (with or
/// without `.toml`) looked up in [`user_patches_dir`].
pub fn find_patch(name: &str) -> Option<PathBuf> {
    find_patch_in(name, &user_patches_dir())
}

/// Resolve a patch name, returning [`ConfigError::PatchNotFound`] if it does
/// not exist.
///
/// # Errors
///
/// [`ConfigError::PatchNotFound`] when neither lookup matches.
pub fn resolve_patch(name: &str) -> Result<PathBuf, ConfigError> {
    find_patch(name).ok_or_else(|| ConfigError::PatchNotFound(name.to_string()))
}

fn find_patch_in(name: &str, dir: &Path) -> Option<PathBuf> {
    let path = PathBuf::from(name);
    if path.is_file() {
        return Some(path);
    }

    let filename = if name.ends_with(".toml") {
        name.to_string()
    } else {
        format!("{name}.toml")
    };
    let candidate = dir.join(filename);
    candidate.is_file().then_some(candidate)
}

/// Ensure the user patches directory exists.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_user_patches_dir() -> Result<PathBuf, ConfigError> {
    let dir = user_patches_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    }
    Ok(dir)
}

/// List `.toml` files in the user patches directory, sorted.
///
/// Returns an empty vector if the directory doesn't exist or can't be read.
pub fn list_user_patches() -> Vec<PathBuf> {
    list_patches_in_dir(&user_patches_dir())
}

fn list_patches_in_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut patches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    patches.sort();
    patches
}

/// Patch name from a file path (the file stem).
///
/// ```rust
/// use rill_config::paths::patch_name_from_path;
/// use std::path::Path;
///
/// assert_eq!(
///     patch_name_from_path(Path::new("/patches/pulse.toml")),
///     Some("pulse".to_string())
/// );
/// ```
pub fn patch_name_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(ToString::to_string)
}
