//! Structural validation of patches against a block library.
//!
//! Validation catches authoring mistakes (unknown types, dangling port
//! references, bad rail settings) without lowering anything. It does not
//! replace compilation: type checking and cycle detection still happen in
//! [`compile_patch`](rill_core::compile_patch).
//!
//! # Example
//!
//! ```rust
//! use rill_config::{PatchValidator, ValidationError};
//! use rill_core::Patch;
//!
//! let patch = Patch::new().block("osc", "lfo").output("x", ("osc", "wobble"));
//! let err = PatchValidator::new().validate(&patch).unwrap_err();
//! assert!(matches!(err, ValidationError::UnknownPort { .. }));
//! ```

use std::collections::BTreeSet;

use rill_blocks::BlockRegistry;
use rill_core::{BlockLibrary, BlockSpec, Param, Patch, PortRef, RailId, TimeModel};
use thiserror::Error;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A block names a type the library does not provide.
    #[error("block '{block}' has unknown type '{block_type}'")]
    UnknownBlockType {
        /// Block id.
        block: String,
        /// Requested type.
        block_type: String,
    },

    /// Two blocks share an id.
    #[error("block id '{0}' is used more than once")]
    DuplicateBlock(String),

    /// A reference names a block that does not exist.
    #[error("unknown block '{0}'")]
    UnknownBlock(String),

    /// A reference names a port the block does not have.
    #[error("block '{block}' has no {direction} port '{port}'")]
    UnknownPort {
        /// Block id.
        block: String,
        /// Port name.
        port: String,
        /// `input` or `output`.
        direction: &'static str,
    },

    /// A publisher or listener names an undeclared bus.
    #[error("unknown bus '{0}'")]
    UnknownBus(String),

    /// A bus is declared twice or shadows a rail.
    #[error("bus '{0}' is declared more than once or shadows a rail")]
    DuplicateBus(String),

    /// A numeric parameter is NaN or infinite.
    #[error("parameter '{param}' of block '{block}' is not finite")]
    NonFiniteParam {
        /// Block id.
        block: String,
        /// Parameter name.
        param: String,
    },

    /// A rail setting is out of range.
    #[error("invalid rail setting '{setting}': {reason}")]
    InvalidRails {
        /// Offending setting.
        setting: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

impl ValidationError {
    fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

/// Validator for patches.
///
/// Defaults to the built-in [`BlockRegistry`]; hosts with custom blocks pass
/// their own library.
pub struct PatchValidator<L: BlockLibrary = BlockRegistry> {
    library: L,
}

impl Default for PatchValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchValidator {
    /// Create a validator over the built-in blocks.
    pub fn new() -> Self {
        Self {
            library: BlockRegistry::new(),
        }
    }
}

impl<L: BlockLibrary> PatchValidator<L> {
    /// Create a validator over a custom library.
    pub fn with_library(library: L) -> Self {
        Self { library }
    }

    /// Library blocks are resolved against.
    pub fn library(&self) -> &L {
        &self.library
    }

    /// Validate every block, reference, bus, and rail setting of a patch.
    ///
    /// Returns every problem found, wrapped in
    /// [`ValidationError::Multiple`] when there is more than one.
    pub fn validate(&self, patch: &Patch) -> ValidationResult<()> {
        let mut errors = Vec::new();
        self.check_blocks(patch, &mut errors);
        self.check_refs(patch, &mut errors);
        check_buses(patch, &mut errors);
        check_rails(patch, &mut errors);
        ValidationError::collect(errors)
    }

    fn spec_of<'a>(&'a self, patch: &Patch, block: &str) -> Option<&'a BlockSpec> {
        let instance = patch.blocks.iter().find(|b| b.id == block)?;
        self.library.block(&instance.block_type)
    }

    fn check_blocks(&self, patch: &Patch, errors: &mut Vec<ValidationError>) {
        let mut seen = BTreeSet::new();
        for block in &patch.blocks {
            if !seen.insert(block.id.as_str()) {
                errors.push(ValidationError::DuplicateBlock(block.id.clone()));
            }
            if self.library.block(&block.block_type).is_none() {
                errors.push(ValidationError::UnknownBlockType {
                    block: block.id.clone(),
                    block_type: block.block_type.clone(),
                });
            }
            for (name, param) in &block.params {
                if let Param::Number(x) = param
                    && !x.is_finite()
                {
                    errors.push(ValidationError::NonFiniteParam {
                        block: block.id.clone(),
                        param: name.clone(),
                    });
                }
            }
        }
    }

    fn check_port(
        &self,
        patch: &Patch,
        port: &PortRef,
        output: bool,
        errors: &mut Vec<ValidationError>,
    ) {
        if !patch.blocks.iter().any(|b| b.id == port.block) {
            errors.push(ValidationError::UnknownBlock(port.block.clone()));
            return;
        }
        // unknown types are already reported by check_blocks
        let Some(spec) = self.spec_of(patch, &port.block) else {
            return;
        };
        let found = if output {
            spec.output(&port.port).is_some()
        } else {
            spec.input(&port.port).is_some()
        };
        if !found {
            errors.push(ValidationError::UnknownPort {
                block: port.block.clone(),
                port: port.port.clone(),
                direction: if output { "output" } else { "input" },
            });
        }
    }

    fn check_refs(&self, patch: &Patch, errors: &mut Vec<ValidationError>) {
        for wire in &patch.wires {
            self.check_port(patch, &wire.from, true, errors);
            self.check_port(patch, &wire.to, false, errors);
        }
        for publisher in &patch.publishers {
            self.check_port(patch, &publisher.from, true, errors);
        }
        for listener in &patch.listeners {
            self.check_port(patch, &listener.to, false, errors);
        }
        for output in &patch.outputs {
            self.check_port(patch, &output.from, true, errors);
        }
    }
}

fn check_buses(patch: &Patch, errors: &mut Vec<ValidationError>) {
    let mut declared = BTreeSet::new();
    for bus in &patch.buses {
        if RailId::from_name(&bus.name).is_some() || !declared.insert(bus.name.as_str()) {
            errors.push(ValidationError::DuplicateBus(bus.name.clone()));
        }
    }
    let known = |name: &str| RailId::from_name(name).is_some() || declared.contains(name);
    let used = patch
        .publishers
        .iter()
        .map(|p| p.bus.as_str())
        .chain(patch.listeners.iter().map(|l| l.bus.as_str()));
    let mut reported = BTreeSet::new();
    for name in used {
        if !known(name) && reported.insert(name) {
            errors.push(ValidationError::UnknownBus(name.to_string()));
        }
    }
    for rail in RailId::ALL {
        if let Some(bus) = &patch.rails.policies.get(rail).bus
            && !declared.contains(bus.as_str())
            && reported.insert(bus.as_str())
        {
            errors.push(ValidationError::UnknownBus(bus.clone()));
        }
    }
}

fn check_rails(patch: &Patch, errors: &mut Vec<ValidationError>) {
    let rails = &patch.rails;
    for (setting, period) in [
        ("period_a_ms", rails.period_a_ms),
        ("period_b_ms", rails.period_b_ms),
    ] {
        if !(period.is_finite() && period > 0.0) {
            errors.push(ValidationError::InvalidRails {
                setting: setting.to_string(),
                reason: format!("{period} is not a positive number of milliseconds"),
            });
        }
    }
    if let TimeModel::Finite { duration_ms } = rails.time_model
        && !(duration_ms.is_finite() && duration_ms >= 0.0)
    {
        errors.push(ValidationError::InvalidRails {
            setting: "time_model.duration_ms".to_string(),
            reason: format!("{duration_ms} is not a finite, non-negative duration"),
        });
    }
}

/// Validate a patch against the built-in blocks.
///
/// This is a convenience function that creates a validator internally.
pub fn validate_patch(patch: &Patch) -> ValidationResult<()> {
    PatchValidator::new().validate(patch)
}
