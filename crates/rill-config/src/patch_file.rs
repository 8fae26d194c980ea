//! TOML patch files.
//!
//! A patch file is the serde form of [`Patch`]: block instances, wires, user
//! buses, publishers, listeners, named outputs, and the rail configuration.
//!
//! # TOML Format
//!
//! ```toml
//! name = "pulse"
//!
//! [rails]
//! period_a_ms = 500.0
//!
//! [rails.policies.energy]
//! policy = "patched"
//!
//! [[block]]
//! id = "osc"
//! type = "lfo"
//! params = { period_ms = 2000, shape = "triangle" }
//!
//! [[block]]
//! id = "level"
//! type = "smooth"
//!
//! [[wire]]
//! from = "osc.out"
//! to = "level.in"
//!
//! [[publish]]
//! bus = "energy"
//! from = "level.out"
//!
//! [[output]]
//! name = "level"
//! from = "level.out"
//! ```

use std::path::Path;

use rill_core::Patch;

use crate::error::ConfigError;

/// Parse a patch from a TOML string.
///
/// # Errors
///
/// [`ConfigError::TomlParse`] for malformed TOML, unknown keys, or port
/// references without a `block.port` dot.
pub fn parse_patch(toml_str: &str) -> Result<Patch, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Load a patch from a TOML file.
///
/// # Errors
///
/// I/O failures and everything [`parse_patch`] rejects.
pub fn load_patch(path: impl AsRef<Path>) -> Result<Patch, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    parse_patch(&content)
}

/// Convert a patch to a TOML string.
///
/// # Errors
///
/// [`ConfigError::TomlSerialize`] if a value has no TOML form.
pub fn patch_to_toml(patch: &Patch) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(patch)?)
}

/// Save a patch to a TOML file, creating parent directories as needed.
///
/// # Errors
///
/// Serialization and I/O failures.
pub fn save_patch(patch: &Patch, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
    }

    let content = patch_to_toml(patch)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::{CombineMode, Domain, DrivePolicy, Param, TimeModel};

    const PULSE: &str = r#"
name = "pulse"

[rails]
period_a_ms = 500.0
time_model = { kind = "finite", duration_ms = 4000.0 }

[rails.policies.energy]
policy = "patched"

[[block]]
id = "osc"
type = "lfo"
params = { period_ms = 2000, shape = "triangle" }

[[block]]
id = "level"
type = "smooth"

[[wire]]
from = "osc.out"
to = "level.in"

[[publish]]
bus = "energy"
from = "level.out"
sortKey = 3

[[output]]
name = "level"
from = "level.out"
"#;

    #[test]
    fn parses_documented_format() {
        let patch = parse_patch(PULSE).unwrap();
        assert_eq!(patch.name.as_deref(), Some("pulse"));
        assert_eq!(patch.rails.period_a_ms, 500.0);
        assert_eq!(patch.rails.period_b_ms, 4000.0);
        assert_eq!(
            patch.rails.time_model,
            TimeModel::Finite {
                duration_ms: 4000.0
            }
        );
        assert_eq!(patch.rails.policies.energy.policy, DrivePolicy::Patched);
        assert_eq!(patch.rails.policies.time.policy, DrivePolicy::Normalled);
        assert_eq!(patch.blocks.len(), 2);
        assert_eq!(
            patch.blocks[0].params.get("period_ms"),
            Some(&Param::Number(2000.0))
        );
        assert_eq!(patch.wires[0].to.port, "in");
        assert_eq!(patch.publishers[0].sort_key, 3);
    }

    #[test]
    fn toml_round_trip_preserves_patch() {
        let patch = parse_patch(PULSE)
            .unwrap()
            .bus("accent", Domain::Color, CombineMode::Layer)
            .latched_wire(("level", "out"), ("osc", "rate"));
        let text = patch_to_toml(&patch).unwrap();
        assert_eq!(parse_patch(&text).unwrap(), patch);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_port_refs() {
        assert!(matches!(
            parse_patch("[[block]]\nid = \"a\"\ntype = \"lfo\"\ncolour = 1\n"),
            Err(ConfigError::TomlParse(_))
        ));
        assert!(matches!(
            parse_patch("[[wire]]\nfrom = \"osc\"\nto = \"a.in\"\n"),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
