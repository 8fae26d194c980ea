//! Built-in block library for rill patches.
//!
//! This crate provides a registry of block types for
//! [`compile_patch`](rill_core::compile_patch). Each block is a
//! [`BlockSpec`]: typed ports, default sources for unconnected inputs, and a
//! pure lowering function. The core compiler only sees the registry through
//! the [`BlockLibrary`] trait.
//!
//! # Features
//!
//! - **Block Discovery**: List all available blocks with their ports
//! - **Category System**: Blocks organized by role (math, signal, state, field)
//! - **Extensible**: Hosts can register their own block types
//!
//! # Example
//!
//! ```rust
//! use rill_blocks::{BlockCategory, BlockRegistry};
//! use rill_core::{BlockLibrary, Param, Patch, Runtime, Value, compile_patch};
//!
//! let registry = BlockRegistry::new();
//! for block in registry.blocks_in_category(BlockCategory::State) {
//!     println!("{}: {}", block.type_name, block.description);
//! }
//!
//! let patch = Patch::new()
//!     .block_with("speed", "const", [("value", Param::Number(2.0))])
//!     .block("pos", "integrate")
//!     .wire(("speed", "out"), ("pos", "in"))
//!     .output("pos", ("pos", "out"));
//! let program = compile_patch(&patch, &registry).into_result().unwrap();
//! let mut rt = Runtime::new(program);
//! rt.run_frame(500.0).unwrap();
//! assert_eq!(rt.output("pos"), Some(&Value::Float(1.0)));
//! assert!(registry.block_types().contains(&"lfo"));
//! ```

use rill_core::{BlockLibrary, BlockSpec, Domain, TypeDesc};

mod field;
mod math;
mod signal;
mod state;

pub(crate) const FLOAT: TypeDesc = TypeDesc::signal(Domain::Float);
pub(crate) const TRIGGER: TypeDesc = TypeDesc::signal(Domain::Trigger);
pub(crate) const BOOL: TypeDesc = TypeDesc::signal(Domain::Bool);
pub(crate) const DOMAIN: TypeDesc = TypeDesc::signal(Domain::Domain);
pub(crate) const FIELD: TypeDesc = TypeDesc::field(Domain::Float);

/// Category of block for organization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCategory {
    /// Stateless arithmetic and comparisons
    Math,
    /// Generators, rail readers, and value constructors
    Signal,
    /// Blocks that remember values across frames
    State,
    /// Per-element domains and fields
    Field,
}

impl BlockCategory {
    /// Every category, in display order.
    pub const ALL: [BlockCategory; 4] = [
        BlockCategory::Math,
        BlockCategory::Signal,
        BlockCategory::State,
        BlockCategory::Field,
    ];

    /// Returns a human-readable name for the category.
    pub const fn name(&self) -> &'static str {
        match self {
            BlockCategory::Math => "Math",
            BlockCategory::Signal => "Signal",
            BlockCategory::State => "State",
            BlockCategory::Field => "Field",
        }
    }

    /// Returns a description of the category.
    pub const fn description(&self) -> &'static str {
        match self {
            BlockCategory::Math => "Arithmetic, mixing, clamping, and comparisons",
            BlockCategory::Signal => "Oscillators, rail readers, and vector/color builders",
            BlockCategory::State => "Integrators, delays, smoothers, and envelopes",
            BlockCategory::Field => "Domains, per-element fields, and reductions",
        }
    }
}

/// Internal entry in the registry.
struct RegistryEntry {
    category: BlockCategory,
    spec: BlockSpec,
}

/// Registry of block types.
///
/// [`BlockRegistry::new`] registers every built-in block; hosts may add
/// their own with [`register`](Self::register).
pub struct BlockRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// Create a new registry with all built-in blocks registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        math::register(&mut registry);
        signal::register(&mut registry);
        state::register(&mut registry);
        field::register(&mut registry);
        registry
    }

    /// Create a registry with no blocks.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a block type, replacing any block with the same type name.
    pub fn register(&mut self, category: BlockCategory, spec: BlockSpec) {
        self.entries.retain(|e| e.spec.type_name != spec.type_name);
        self.entries.push(RegistryEntry { category, spec });
    }

    /// Returns specs for all registered blocks.
    pub fn all_blocks(&self) -> Vec<&BlockSpec> {
        self.entries.iter().map(|e| &e.spec).collect()
    }

    /// Returns specs for blocks in a specific category.
    pub fn blocks_in_category(&self, category: BlockCategory) -> Vec<&BlockSpec> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .map(|e| &e.spec)
            .collect()
    }

    /// Get a spec by block type name.
    pub fn get(&self, type_name: &str) -> Option<&BlockSpec> {
        self.entries
            .iter()
            .find(|e| e.spec.type_name == type_name)
            .map(|e| &e.spec)
    }

    /// Category of a block type.
    pub fn category(&self, type_name: &str) -> Option<BlockCategory> {
        self.entries
            .iter()
            .find(|e| e.spec.type_name == type_name)
            .map(|e| e.category)
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no blocks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BlockLibrary for BlockRegistry {
    fn block(&self, type_name: &str) -> Option<&BlockSpec> {
        self.get(type_name)
    }

    fn block_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.iter().map(|e| e.spec.type_name).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn registry_has_all_blocks() {
        let registry = BlockRegistry::new();
        assert!(registry.len() >= 20);
        let types = registry.block_types();
        let unique: BTreeSet<&str> = types.iter().copied().collect();
        assert_eq!(unique.len(), types.len());
    }

    #[test]
    fn every_category_is_populated() {
        let registry = BlockRegistry::new();
        for category in BlockCategory::ALL {
            assert!(
                !registry.blocks_in_category(category).is_empty(),
                "{} is empty",
                category.name()
            );
        }
    }

    #[test]
    fn lookup_by_type_name() {
        let registry = BlockRegistry::new();
        let spec = registry.get("integrate").unwrap();
        assert_eq!(spec.inputs.len(), 1);
        assert_eq!(registry.category("integrate"), Some(BlockCategory::State));
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn port_names_are_unique_per_direction() {
        for spec in BlockRegistry::new().all_blocks() {
            let inputs: BTreeSet<&str> = spec.inputs.iter().map(|p| p.name).collect();
            let outputs: BTreeSet<&str> = spec.outputs.iter().map(|p| p.name).collect();
            assert_eq!(inputs.len(), spec.inputs.len(), "{}", spec.type_name);
            assert_eq!(outputs.len(), spec.outputs.len(), "{}", spec.type_name);
            assert!(!spec.outputs.is_empty(), "{} has no outputs", spec.type_name);
        }
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = BlockRegistry::new();
        let before = registry.len();
        let spec = registry.get("add").unwrap().clone();
        registry.register(BlockCategory::Signal, spec);
        assert_eq!(registry.len(), before);
        assert_eq!(registry.category("add"), Some(BlockCategory::Signal));
    }
}
