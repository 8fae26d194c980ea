//! Mutation-time program builder.
//!
//! [`ProgramBuilder`] is the authoring model: it allocates typed slots, adds
//! pure ops, declares buses and publishes into them, reads rails, declares
//! state cells, and names outputs. Nothing here fails eagerly; problems are
//! recorded and reported together by [`compile()`](ProgramBuilder::compile),
//! the same way a graph editor keeps accepting edits while showing errors.

use std::collections::BTreeMap;

use crate::bus::{BusDecl, BusId, CombineMode, Publisher, PublisherId};
use crate::compile::{self, CompileReport};
use crate::error::CompileError;
use crate::latch::{LatchDecl, LatchId, LatchKind, StateCell};
use crate::op::{BinaryFn, OpKind, OpNode, UnaryFn};
use crate::rail::{RailId, RailsConfig};
use crate::slot::{Producer, SlotId, SlotTable, Storage};
use crate::types::{Domain, TypeDesc, Value, World};

/// Records that slot `source` reaches `consumer_block` through authored wire
/// `wire`, so cycle suggestions can name the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireTag {
    pub(crate) source: SlotId,
    pub(crate) consumer_block: usize,
    pub(crate) wire: usize,
}

/// Builds a program one op at a time.
///
/// # Example
///
/// ```
/// use rill_core::{BinaryFn, Domain, ProgramBuilder, TypeDesc, Value};
///
/// let mut b = ProgramBuilder::new();
/// let cell = b.state_cell("acc", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
/// let prev = cell.prev();
/// let one = b.constant(Value::Float(1.0));
/// let next = b.binary(BinaryFn::Add, prev, one);
/// b.commit(cell, next);
/// b.output("count", prev);
/// let program = b.compile().into_result().unwrap();
/// assert_eq!(program.latches().len(), 1);
/// ```
#[derive(Debug)]
pub struct ProgramBuilder {
    pub(crate) slots: SlotTable,
    pub(crate) ops: Vec<OpNode>,
    pub(crate) buses: Vec<BusDecl>,
    pub(crate) bus_names: BTreeMap<String, usize>,
    pub(crate) latches: Vec<LatchDecl>,
    latch_index: BTreeMap<LatchId, usize>,
    pub(crate) rail_reads: BTreeMap<RailId, SlotId>,
    pub(crate) outputs: BTreeMap<String, SlotId>,
    pub(crate) inputs: BTreeMap<String, TypeDesc>,
    pub(crate) errors: Vec<CompileError>,
    pub(crate) blocks: Vec<String>,
    current_block: Option<usize>,
    pub(crate) rails: RailsConfig,
    pub(crate) wire_tags: Vec<WireTag>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    /// Creates a builder with default rail configuration.
    pub fn new() -> Self {
        Self::with_rails(RailsConfig::default())
    }

    /// Creates a builder with the given time model and rail policies.
    pub fn with_rails(rails: RailsConfig) -> Self {
        let mut builder = Self {
            slots: SlotTable::new(),
            ops: Vec::new(),
            buses: Vec::new(),
            bus_names: BTreeMap::new(),
            latches: Vec::new(),
            latch_index: BTreeMap::new(),
            rail_reads: BTreeMap::new(),
            outputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
            errors: Vec::new(),
            blocks: Vec::new(),
            current_block: None,
            rails,
            wire_tags: Vec::new(),
        };
        for rail in RailId::ALL {
            let mut decl = BusDecl::new(
                rail.name().to_string(),
                rail.ty(),
                rail.combine(),
                rail.silent(),
            );
            decl.rail = Some(rail);
            builder.bus_names.insert(rail.name().to_string(), builder.buses.len());
            builder.buses.push(decl);
        }
        builder
    }

    /// Rail configuration this program will run with.
    pub fn rails(&self) -> &RailsConfig {
        &self.rails
    }

    /// Type of an allocated slot.
    pub fn slot_type(&self, slot: SlotId) -> Option<TypeDesc> {
        self.slots.get(slot).map(|info| info.ty)
    }

    /// Slot table built so far.
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Records an error to be reported by [`compile()`](Self::compile).
    pub fn push_error(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    // --- blocks ---

    /// Attributes subsequently created slots and ops to block `name`.
    pub fn enter_block(&mut self, name: impl Into<String>) -> usize {
        let index = self.blocks.len();
        self.blocks.push(name.into());
        self.current_block = Some(index);
        index
    }

    /// Attributes new slots to a block entered earlier.
    pub(crate) fn resume_block(&mut self, index: usize) {
        if index < self.blocks.len() {
            self.current_block = Some(index);
        }
    }

    /// Stops attributing new slots to a block.
    pub fn exit_block(&mut self) {
        self.current_block = None;
    }

    /// Block new slots are attributed to.
    pub fn current_block(&self) -> Option<usize> {
        self.current_block
    }

    fn label(&self, name: &str) -> String {
        match self.current_block {
            Some(b) => format!("{}.{name}", self.blocks[b]),
            None => name.to_string(),
        }
    }

    // --- ops ---

    /// Adds an op and returns its output slot.
    ///
    /// If the inputs do not fit the op a `TypeMismatch` is recorded and a
    /// float signal slot is returned so lowering can continue.
    pub fn op(&mut self, kind: OpKind, inputs: &[SlotId]) -> SlotId {
        let label = self.label(kind.name());
        let types: Option<Vec<TypeDesc>> = inputs.iter().map(|s| self.slot_type(*s)).collect();
        let inferred = match types {
            Some(types) => kind.infer(&types),
            None => Err("input slot does not exist".to_string()),
        };
        let (ty, storage) = inferred.unwrap_or_else(|detail| {
            self.errors.push(CompileError::TypeMismatch {
                context: format!("op `{label}`"),
                expected: format!("inputs accepted by `{}`", kind.name()),
                found: detail,
            });
            (TypeDesc::signal(Domain::Float), Storage::Inline)
        });
        let index = self.ops.len();
        let output = self
            .slots
            .alloc(ty, storage, label, self.current_block, Producer::Op(index));
        self.ops.push(OpNode {
            kind,
            inputs: inputs.to_vec(),
            output,
            block: self.current_block,
        });
        output
    }

    /// Constant in the value's natural domain.
    pub fn constant(&mut self, value: Value) -> SlotId {
        let domain = value.natural_domain();
        self.constant_of(domain, value)
    }

    /// Constant of an explicit domain (e.g. a phase or time literal).
    pub fn constant_of(&mut self, domain: Domain, value: Value) -> SlotId {
        self.op(OpKind::Const { value, domain }, &[])
    }

    /// Host-supplied signal, `default` until set at runtime.
    pub fn input(&mut self, name: impl Into<String>, domain: Domain, default: Value) -> SlotId {
        let name = name.into();
        let ty = TypeDesc::signal(domain);
        match self.inputs.get(&name).copied() {
            Some(existing) if existing != ty => self.errors.push(CompileError::TypeMismatch {
                context: format!("input `{name}`"),
                expected: existing.to_string(),
                found: ty.to_string(),
            }),
            _ => {
                self.inputs.insert(name.clone(), ty);
            }
        }
        self.op(
            OpKind::Input {
                name,
                default,
                domain,
            },
            &[],
        )
    }

    /// This frame's delta time in milliseconds.
    pub fn delta_time(&mut self) -> SlotId {
        self.op(OpKind::DeltaTime, &[])
    }

    /// One-argument math.
    pub fn unary(&mut self, f: UnaryFn, a: SlotId) -> SlotId {
        self.op(OpKind::Unary(f), &[a])
    }

    /// Two-argument math.
    pub fn binary(&mut self, f: BinaryFn, a: SlotId, b: SlotId) -> SlotId {
        self.op(OpKind::Binary(f), &[a, b])
    }

    /// Evaluates a field into a buffer.
    pub fn materialize(&mut self, field: SlotId) -> SlotId {
        self.op(OpKind::Materialize, &[field])
    }

    // --- placeholders ---

    /// Forward reference to a value produced later.
    pub fn placeholder(&mut self, ty: TypeDesc, label: &str) -> SlotId {
        let label = self.label(label);
        self.slots.placeholder(ty, label, self.current_block)
    }

    /// Resolves `placeholder` to `target`. Errors are recorded.
    pub fn bind(&mut self, placeholder: SlotId, target: SlotId) {
        if let Err(e) = self.slots.bind(placeholder, target) {
            self.errors.push(e);
        }
    }

    pub(crate) fn tag_wire(&mut self, source: SlotId, consumer_block: usize, wire: usize) {
        self.wire_tags.push(WireTag {
            source,
            consumer_block,
            wire,
        });
    }

    // --- buses and rails ---

    /// Declares a bus. `silent` defaults to the canonical zero of its domain.
    pub fn bus(
        &mut self,
        name: impl Into<String>,
        ty: TypeDesc,
        mode: CombineMode,
        silent: Option<Value>,
    ) -> Option<BusId> {
        let name = name.into();
        if RailId::from_name(&name).is_some() {
            self.errors.push(CompileError::ReservedBus(name));
            return None;
        }
        if self.bus_names.contains_key(&name) {
            self.errors.push(CompileError::DuplicateBus(name));
            return None;
        }
        let fallback = if ty.world == World::Field {
            None
        } else {
            ty.domain.canonical_zero()
        };
        let silent = match silent.or(fallback) {
            Some(v) if v.fits(ty) => v,
            Some(v) => {
                self.errors.push(CompileError::TypeMismatch {
                    context: format!("silent value of bus `{name}`"),
                    expected: ty.to_string(),
                    found: v.kind_name().to_string(),
                });
                Value::Float(0.0)
            }
            None => {
                self.errors.push(CompileError::MissingDefaultSource {
                    block: format!("bus `{name}`"),
                    port: "silent".to_string(),
                });
                Value::Float(0.0)
            }
        };
        let index = self.buses.len();
        self.bus_names.insert(name.clone(), index);
        self.buses.push(BusDecl::new(name, ty, mode, silent));
        Some(BusId(index as u32))
    }

    /// Publishes `source` into a bus or rail.
    pub fn publish(&mut self, bus: &str, source: SlotId, sort_key: i32) -> Option<PublisherId> {
        let Some(&index) = self.bus_names.get(bus) else {
            self.errors.push(CompileError::UnknownBus(bus.to_string()));
            return None;
        };
        let Some(source_ty) = self.slot_type(source) else {
            let decl = &self.buses[index];
            let err = CompileError::TypeMismatch {
                context: format!("publish into `{}`", decl.name),
                expected: decl.ty.to_string(),
                found: format!("slot {source}, which does not exist"),
            };
            self.errors.push(err);
            return None;
        };
        let decl = &mut self.buses[index];
        if !decl.ty.accepts(source_ty) {
            let err = CompileError::TypeMismatch {
                context: format!("publish into `{}`", decl.name),
                expected: decl.ty.to_string(),
                found: source_ty.to_string(),
            };
            self.errors.push(err);
            return None;
        }
        let id = PublisherId(decl.next_publisher);
        decl.next_publisher += 1;
        decl.publishers.push(Publisher {
            id,
            source,
            sort_key,
        });
        Some(id)
    }

    /// Slot carrying a bus's combined value this frame.
    ///
    /// Listening to a rail name returns the rail's frame-latched read.
    pub fn listen(&mut self, bus: &str) -> SlotId {
        if let Some(rail) = RailId::from_name(bus) {
            return self.rail(rail);
        }
        let Some(&index) = self.bus_names.get(bus) else {
            self.errors.push(CompileError::UnknownBus(bus.to_string()));
            return self.constant(Value::Float(0.0));
        };
        if let Some(slot) = self.buses[index].combined {
            return slot;
        }
        let ty = self.buses[index].ty;
        let storage = if ty.world == World::Field {
            Storage::Lazy
        } else {
            Storage::Inline
        };
        let slot = self.slots.alloc(
            ty,
            storage,
            format!("bus:{bus}"),
            None,
            Producer::Combine(index),
        );
        self.buses[index].combined = Some(slot);
        slot
    }

    /// Previous frame's resolved value of `rail`.
    pub fn rail(&mut self, rail: RailId) -> SlotId {
        if let Some(slot) = self.rail_reads.get(&rail) {
            return *slot;
        }
        let slot = self.slots.alloc(
            rail.ty(),
            Storage::Inline,
            format!("rail:{}", rail.name()),
            None,
            Producer::RailRead(rail),
        );
        self.rail_reads.insert(rail, slot);
        slot
    }

    // --- state ---

    /// Declares a latch and returns its lowering handle.
    ///
    /// `init` is the value before the first commit; for field latches it is
    /// the per-element value and `domain` must name the domain slot.
    pub fn state_cell(
        &mut self,
        id: impl Into<LatchId>,
        value_type: TypeDesc,
        init: Value,
        domain: Option<SlotId>,
    ) -> StateCell {
        let id = id.into();
        if self.latch_index.contains_key(&id) {
            self.errors.push(CompileError::DuplicateLatch(id.clone()));
        }
        let kind = LatchKind::of(value_type);
        let storage = match kind {
            LatchKind::Signal => Storage::Inline,
            LatchKind::Field => Storage::Buffer,
        };
        let index = self.latches.len();
        let prev = self.slots.alloc(
            value_type,
            storage,
            format!("{id}.prev"),
            self.current_block,
            Producer::LatchRead(index),
        );
        self.latch_index.insert(id.clone(), index);
        self.latches.push(LatchDecl {
            id: id.clone(),
            kind,
            value_type,
            in_slot: None,
            out_slot: prev,
            domain_slot: domain,
            init,
        });
        StateCell {
            latch: index,
            id,
            prev,
            value_type,
        }
    }

    /// Commits `next` as the cell's value for the following frame.
    pub fn commit(&mut self, cell: StateCell, next: SlotId) {
        self.latches[cell.latch].in_slot = Some(next);
    }

    // --- outputs ---

    /// Names `slot` as a program output.
    pub fn output(&mut self, name: impl Into<String>, slot: SlotId) {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            self.errors.push(CompileError::DuplicateOutput(name));
        } else {
            self.outputs.insert(name, slot);
        }
    }

    /// Validates, checks cycles, and schedules the program.
    pub fn compile(self) -> CompileReport {
        compile::compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rails_are_preregistered_and_reserved() {
        let mut b = ProgramBuilder::new();
        assert!(
            b.bus(
                "energy",
                TypeDesc::signal(Domain::Float),
                CombineMode::Sum,
                None
            )
            .is_none()
        );
        assert_eq!(b.errors, vec![CompileError::ReservedBus("energy".into())]);
    }

    #[test]
    fn listening_twice_shares_one_slot() {
        let mut b = ProgramBuilder::new();
        b.bus("glow", TypeDesc::signal(Domain::Float), CombineMode::Max, None);
        let a = b.listen("glow");
        let c = b.listen("glow");
        assert_eq!(a, c);
    }

    #[test]
    fn listening_to_rail_reads_the_rail() {
        let mut b = ProgramBuilder::new();
        let a = b.listen("phaseA");
        assert_eq!(a, b.rail(RailId::PhaseA));
        assert_eq!(b.slot_type(a), Some(TypeDesc::signal(Domain::Phase)));
    }

    #[test]
    fn publish_type_is_checked() {
        let mut b = ProgramBuilder::new();
        let c = b.constant(Value::Color([1.0; 4]));
        assert!(b.publish("energy", c, 0).is_none());
        assert!(matches!(b.errors[0], CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn publishing_a_foreign_slot_is_reported() {
        let mut b = ProgramBuilder::new();
        assert!(b.publish("energy", SlotId(9999), 0).is_none());
        let CompileError::TypeMismatch { context, found, .. } = &b.errors[0] else {
            panic!("expected a type mismatch, got {:?}", b.errors);
        };
        assert_eq!(context, "publish into `energy`");
        assert!(found.contains("s9999"));
        assert!(!b.compile().is_ok());
    }

    #[test]
    fn domain_bus_needs_explicit_silent_value() {
        let mut b = ProgramBuilder::new();
        b.bus(
            "shape",
            TypeDesc::signal(Domain::Domain),
            CombineMode::Last,
            None,
        );
        assert!(matches!(
            b.errors[0],
            CompileError::MissingDefaultSource { .. }
        ));
    }

    #[test]
    fn op_type_errors_are_deferred() {
        let mut b = ProgramBuilder::new();
        let c = b.constant(Value::Color([1.0; 4]));
        let v = b.constant(Value::Vec2([1.0, 1.0]));
        let out = b.binary(BinaryFn::Add, c, v);
        assert_eq!(b.slot_type(out), Some(TypeDesc::signal(Domain::Float)));
        assert_eq!(b.errors.len(), 1);
    }

    #[test]
    fn labels_carry_block_names() {
        let mut b = ProgramBuilder::new();
        b.enter_block("osc");
        let one = b.constant(Value::Float(1.0));
        b.exit_block();
        assert_eq!(b.slots.label(one), "osc.const");
    }
}
