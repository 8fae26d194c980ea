//! Block lowering: the seam between a block library and the program builder.
//!
//! A block type is described by a [`BlockSpec`]: its typed ports, how each
//! unconnected input is filled, and a [`LowerFn`] that emits the block's ops
//! into a [`ProgramBuilder`] through a [`LowerCtx`]. Libraries expose their
//! specs through the [`BlockLibrary`] trait; [`compile_patch`](crate::compile_patch)
//! drives the lowering.

use std::collections::BTreeMap;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::latch::{LatchId, StateCell};
use crate::op::{BinaryFn, OpKind, UnaryFn};
use crate::program::ProgramBuilder;
use crate::slot::SlotId;
use crate::types::{Domain, TypeDesc, Value};

/// How an unconnected input port gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultSource {
    /// A fixed constant.
    Value(Value),
    /// The canonical zero of the port's domain.
    Zero,
    /// No fallback; leaving the port unconnected is a compile error.
    Required,
}

/// One typed port of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    /// Port name, unique per direction.
    pub name: &'static str,
    /// Port type.
    pub ty: TypeDesc,
    /// Fallback for unconnected inputs. Always `Required` on outputs.
    pub default: DefaultSource,
    /// One-line description.
    pub description: &'static str,
}

impl PortSpec {
    /// Input port.
    pub fn input(
        name: &'static str,
        ty: TypeDesc,
        default: DefaultSource,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            ty,
            default,
            description,
        }
    }

    /// Output port.
    pub fn output(name: &'static str, ty: TypeDesc, description: &'static str) -> Self {
        Self {
            name,
            ty,
            default: DefaultSource::Required,
            description,
        }
    }
}

/// Emits a block's ops. Returns one slot per declared output, in order.
pub type LowerFn = fn(&mut LowerCtx<'_>, &BlockInputs) -> Result<Vec<SlotId>, CompileError>;

/// Description and lowering of one block type.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    /// Type name used in patches.
    pub type_name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Input ports, in lowering order.
    pub inputs: Vec<PortSpec>,
    /// Output ports, in lowering order.
    pub outputs: Vec<PortSpec>,
    /// Lowering function.
    pub lower: LowerFn,
}

impl BlockSpec {
    /// Input port by name, with its index.
    pub fn input(&self, name: &str) -> Option<(usize, &PortSpec)> {
        self.inputs.iter().enumerate().find(|(_, p)| p.name == name)
    }

    /// Output port by name, with its index.
    pub fn output(&self, name: &str) -> Option<(usize, &PortSpec)> {
        self.outputs.iter().enumerate().find(|(_, p)| p.name == name)
    }
}

/// Source of block types for [`compile_patch`](crate::compile_patch).
pub trait BlockLibrary {
    /// Spec of a block type.
    fn block(&self, type_name: &str) -> Option<&BlockSpec>;

    /// Every block type name, sorted.
    fn block_types(&self) -> Vec<&str>;
}

/// Resolved input slots of a block being lowered, one per declared input.
#[derive(Debug, Clone, Default)]
pub struct BlockInputs {
    ports: Vec<(&'static str, SlotId)>,
}

impl BlockInputs {
    pub(crate) fn new(ports: Vec<(&'static str, SlotId)>) -> Self {
        Self { ports }
    }

    /// Slot of the input at `index`.
    pub fn get(&self, index: usize) -> Option<SlotId> {
        self.ports.get(index).map(|(_, slot)| *slot)
    }

    /// Slot of the input named `name`.
    pub fn by_name(&self, name: &str) -> Option<SlotId> {
        self.ports
            .iter()
            .find(|(port, _)| *port == name)
            .map(|(_, slot)| *slot)
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns true if the block has no inputs.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl Index<usize> for BlockInputs {
    type Output = SlotId;

    fn index(&self, index: usize) -> &SlotId {
        &self.ports[index].1
    }
}

/// Authored block parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// Boolean switch.
    Bool(bool),
    /// Number (integers are accepted and widened).
    Number(f64),
    /// Free text.
    Text(String),
}

impl Param {
    fn kind_name(&self) -> &'static str {
        match self {
            Param::Bool(_) => "bool",
            Param::Number(_) => "number",
            Param::Text(_) => "text",
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Number(v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

/// Lowering context of one block instance.
///
/// Wraps the builder so that state cells are namespaced by block id and
/// parameter errors name the block.
pub struct LowerCtx<'a> {
    builder: &'a mut ProgramBuilder,
    block_id: &'a str,
    params: &'a BTreeMap<String, Param>,
}

impl<'a> LowerCtx<'a> {
    /// Context for block `block_id` with authored `params`.
    pub fn new(
        builder: &'a mut ProgramBuilder,
        block_id: &'a str,
        params: &'a BTreeMap<String, Param>,
    ) -> Self {
        Self {
            builder,
            block_id,
            params,
        }
    }

    /// Id of the block being lowered.
    pub fn block_id(&self) -> &str {
        self.block_id
    }

    /// Underlying builder, for ops without a helper here.
    pub fn builder(&mut self) -> &mut ProgramBuilder {
        self.builder
    }

    /// Raw parameter.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    fn invalid(&self, name: &str, expected: &str, found: &Param) -> CompileError {
        CompileError::InvalidParam {
            block: self.block_id.to_string(),
            param: name.to_string(),
            reason: format!("expected {expected}, found {}", found.kind_name()),
        }
    }

    /// Numeric parameter, `default` if absent.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidParam`] if present but not a finite number.
    pub fn param_f64(&self, name: &str, default: f64) -> Result<f64, CompileError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(Param::Number(v)) if v.is_finite() => Ok(*v),
            Some(Param::Number(_)) => Err(CompileError::InvalidParam {
                block: self.block_id.to_string(),
                param: name.to_string(),
                reason: "must be finite".to_string(),
            }),
            Some(other) => Err(self.invalid(name, "number", other)),
        }
    }

    /// Boolean parameter, `default` if absent.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidParam`] if present but not a boolean.
    pub fn param_bool(&self, name: &str, default: bool) -> Result<bool, CompileError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(Param::Bool(v)) => Ok(*v),
            Some(other) => Err(self.invalid(name, "bool", other)),
        }
    }

    /// Text parameter, `None` if absent.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidParam`] if present but not text.
    pub fn param_str(&self, name: &str) -> Result<Option<&str>, CompileError> {
        match self.params.get(name) {
            None => Ok(None),
            Some(Param::Text(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(self.invalid(name, "text", other)),
        }
    }

    /// Adds an op.
    pub fn op(&mut self, kind: OpKind, inputs: &[SlotId]) -> SlotId {
        self.builder.op(kind, inputs)
    }

    /// Constant in the value's natural domain.
    pub fn constant(&mut self, value: Value) -> SlotId {
        self.builder.constant(value)
    }

    /// Constant of an explicit domain.
    pub fn constant_of(&mut self, domain: Domain, value: Value) -> SlotId {
        self.builder.constant_of(domain, value)
    }

    /// One-argument math.
    pub fn unary(&mut self, f: UnaryFn, a: SlotId) -> SlotId {
        self.builder.unary(f, a)
    }

    /// Two-argument math.
    pub fn binary(&mut self, f: BinaryFn, a: SlotId, b: SlotId) -> SlotId {
        self.builder.binary(f, a, b)
    }

    /// This frame's delta time.
    pub fn delta_time(&mut self) -> SlotId {
        self.builder.delta_time()
    }

    /// Evaluates a field into a buffer.
    pub fn materialize(&mut self, field: SlotId) -> SlotId {
        self.builder.materialize(field)
    }

    /// Declares a state cell with id `"{block_id}/{name}"`.
    pub fn state_cell(
        &mut self,
        name: &str,
        value_type: TypeDesc,
        init: Value,
        domain: Option<SlotId>,
    ) -> StateCell {
        let id = LatchId::new(format!("{}/{name}", self.block_id));
        self.builder.state_cell(id, value_type, init, domain)
    }

    /// Commits a state cell.
    pub fn commit(&mut self, cell: StateCell, next: SlotId) {
        self.builder.commit(cell, next);
    }
}
