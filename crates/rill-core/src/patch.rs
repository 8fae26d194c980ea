//! Authored patches and their compilation.
//!
//! A [`Patch`] is the serializable document a host edits: block instances,
//! wires between their ports, buses with publishers and listeners, named
//! outputs, and the rail configuration. [`compile_patch`] lowers it through a
//! [`BlockLibrary`] into a [`ProgramBuilder`] and compiles the result.

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::CombineMode;
use crate::compile::CompileReport;
use crate::error::CompileError;
use crate::latch::LatchId;
use crate::lower::{BlockInputs, BlockLibrary, BlockSpec, DefaultSource, LowerCtx, Param, PortSpec};
use crate::program::ProgramBuilder;
use crate::rail::RailsConfig;
use crate::slot::SlotId;
use crate::types::{Domain, TypeDesc, Value, World};

/// Reference to a block port, written `block.port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRef {
    /// Block id.
    pub block: String,
    /// Port name.
    pub port: String,
}

impl PortRef {
    /// Creates a port reference.
    pub fn new(block: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block, self.port)
    }
}

/// A port reference that is not of the form `block.port`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("port reference `{0}` must look like `block.port`")]
pub struct PortRefError(pub String);

impl FromStr for PortRef {
    type Err = PortRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((block, port)) if !block.is_empty() && !port.is_empty() => {
                Ok(PortRef::new(block, port))
            }
            _ => Err(PortRefError(s.to_string())),
        }
    }
}

impl TryFrom<String> for PortRef {
    type Error = PortRefError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortRef> for String {
    fn from(p: PortRef) -> String {
        p.to_string()
    }
}

impl From<(&str, &str)> for PortRef {
    fn from((block, port): (&str, &str)) -> Self {
        PortRef::new(block, port)
    }
}

/// One block instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockInstance {
    /// Unique id within the patch.
    pub id: String,
    /// Block type name in the library.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Authored parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Param>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A direct connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Wire {
    /// Producing output.
    pub from: PortRef,
    /// Consuming input.
    pub to: PortRef,
    /// Deliver the previous frame's value instead of this frame's.
    #[serde(default, skip_serializing_if = "is_false")]
    pub latched: bool,
}

fn signal_world() -> World {
    World::Signal
}

/// A user bus declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSpec {
    /// Bus name; must not collide with a rail.
    pub name: String,
    /// Value domain.
    pub domain: Domain,
    /// Signal or field.
    #[serde(default = "signal_world")]
    pub world: World,
    /// Combine rule.
    pub mode: CombineMode,
    /// Value with no publishers; the domain's zero if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent: Option<Value>,
}

impl BusSpec {
    /// Declared bus type.
    pub fn ty(&self) -> TypeDesc {
        TypeDesc::new(self.world, self.domain)
    }
}

/// An output port publishing into a bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSpec {
    /// Target bus or rail.
    pub bus: String,
    /// Published output.
    pub from: PortRef,
    /// Ordering key for order-dependent modes.
    #[serde(default, alias = "sortKey")]
    pub sort_key: i32,
}

/// An input port reading a bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerSpec {
    /// Source bus or rail.
    pub bus: String,
    /// Receiving input.
    pub to: PortRef,
}

/// A named program output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    /// Output name.
    pub name: String,
    /// Exposed port.
    pub from: PortRef,
}

/// Serializable patch document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Time model and rail policies.
    #[serde(default)]
    pub rails: RailsConfig,
    /// Block instances, in lowering order.
    #[serde(default, rename = "block", skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockInstance>,
    /// Wires, indexed by position in diagnostics.
    #[serde(default, rename = "wire", skip_serializing_if = "Vec::is_empty")]
    pub wires: Vec<Wire>,
    /// User buses.
    #[serde(default, rename = "bus", skip_serializing_if = "Vec::is_empty")]
    pub buses: Vec<BusSpec>,
    /// Bus publishers.
    #[serde(default, rename = "publish", skip_serializing_if = "Vec::is_empty")]
    pub publishers: Vec<PublisherSpec>,
    /// Bus listeners.
    #[serde(default, rename = "listen", skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<ListenerSpec>,
    /// Named outputs.
    #[serde(default, rename = "output", skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

impl Patch {
    /// Empty patch with default rails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block without parameters.
    pub fn block(self, id: &str, block_type: &str) -> Self {
        self.block_with(id, block_type, [])
    }

    /// Adds a block with parameters.
    pub fn block_with<const N: usize>(
        mut self,
        id: &str,
        block_type: &str,
        params: [(&str, Param); N],
    ) -> Self {
        self.blocks.push(BlockInstance {
            id: id.to_string(),
            block_type: block_type.to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
        self
    }

    /// Adds a same-frame wire.
    pub fn wire(mut self, from: impl Into<PortRef>, to: impl Into<PortRef>) -> Self {
        self.wires.push(Wire {
            from: from.into(),
            to: to.into(),
            latched: false,
        });
        self
    }

    /// Adds a wire delivering the previous frame's value.
    pub fn latched_wire(mut self, from: impl Into<PortRef>, to: impl Into<PortRef>) -> Self {
        self.wires.push(Wire {
            from: from.into(),
            to: to.into(),
            latched: true,
        });
        self
    }

    /// Declares a signal bus.
    pub fn bus(mut self, name: &str, domain: Domain, mode: CombineMode) -> Self {
        self.buses.push(BusSpec {
            name: name.to_string(),
            domain,
            world: World::Signal,
            mode,
            silent: None,
        });
        self
    }

    /// Publishes an output into a bus or rail.
    pub fn publish(mut self, bus: &str, from: impl Into<PortRef>, sort_key: i32) -> Self {
        self.publishers.push(PublisherSpec {
            bus: bus.to_string(),
            from: from.into(),
            sort_key,
        });
        self
    }

    /// Feeds an input from a bus or rail.
    pub fn listen(mut self, bus: &str, to: impl Into<PortRef>) -> Self {
        self.listeners.push(ListenerSpec {
            bus: bus.to_string(),
            to: to.into(),
        });
        self
    }

    /// Exposes an output port.
    pub fn output(mut self, name: &str, from: impl Into<PortRef>) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            from: from.into(),
        });
        self
    }

    /// Replaces the rail configuration.
    pub fn with_rails(mut self, rails: RailsConfig) -> Self {
        self.rails = rails;
        self
    }
}

/// Lowers `patch` through `library` and compiles it.
///
/// All structural problems are accumulated in the returned report. Wires are
/// tagged with their index so cycle diagnostics can point at the wire to
/// latch.
pub fn compile_patch(patch: &Patch, library: &dyn BlockLibrary) -> CompileReport {
    let mut lowering = Lowering {
        patch,
        builder: ProgramBuilder::with_rails(patch.rails.clone()),
        blocks: BTreeMap::new(),
        order: Vec::new(),
        broken: BTreeSet::new(),
    };
    lowering.declare(library);
    let drivers = lowering.drivers();
    for id in lowering.order.clone() {
        lowering.lower(id, &drivers);
    }
    lowering.connect();
    lowering.builder.compile()
}

struct Known<'p> {
    index: usize,
    spec: &'p BlockSpec,
    instance: &'p BlockInstance,
    outputs: Vec<SlotId>,
}

#[derive(Clone, Copy)]
enum Driver<'p> {
    Wire(usize, &'p Wire),
    Listen(&'p str),
}

struct Lowering<'p> {
    patch: &'p Patch,
    builder: ProgramBuilder,
    blocks: BTreeMap<&'p str, Known<'p>>,
    order: Vec<&'p str>,
    /// Blocks of unknown type; references to them are skipped silently.
    broken: BTreeSet<&'p str>,
}

impl<'p> Lowering<'p> {
    fn declare(&mut self, library: &'p dyn BlockLibrary) {
        let patch = self.patch;
        for bus in &patch.buses {
            self.builder
                .bus(bus.name.clone(), bus.ty(), bus.mode, bus.silent.clone());
        }
        for instance in &patch.blocks {
            let id = instance.id.as_str();
            if self.blocks.contains_key(id) || self.broken.contains(id) {
                self.builder
                    .push_error(CompileError::DuplicateBlock(id.to_string()));
                continue;
            }
            let Some(spec) = library.block(&instance.block_type) else {
                self.builder.push_error(CompileError::UnknownBlockType {
                    block: id.to_string(),
                    block_type: instance.block_type.clone(),
                });
                self.broken.insert(id);
                continue;
            };
            let index = self.builder.enter_block(id);
            let outputs = spec
                .outputs
                .iter()
                .map(|port| self.builder.placeholder(port.ty, port.name))
                .collect();
            self.builder.exit_block();
            self.blocks.insert(
                id,
                Known {
                    index,
                    spec,
                    instance,
                    outputs,
                },
            );
            self.order.push(id);
        }
    }

    fn block(&mut self, block: &str) -> Option<&Known<'p>> {
        if self.broken.contains(block) {
            return None;
        }
        if !self.blocks.contains_key(block) {
            self.builder
                .push_error(CompileError::UnknownBlock(block.to_string()));
        }
        self.blocks.get(block)
    }

    fn unknown_port(&mut self, port: &PortRef) {
        self.builder.push_error(CompileError::UnknownPort {
            block: port.block.clone(),
            port: port.port.clone(),
        });
    }

    /// Slot and type of an output port.
    fn source(&mut self, port: &PortRef) -> Option<(SlotId, TypeDesc)> {
        let found = self.block(&port.block).map(|known| {
            known
                .spec
                .output(&port.port)
                .map(|(i, spec)| (known.outputs[i], spec.ty))
        })?;
        if found.is_none() {
            self.unknown_port(port);
        }
        found
    }

    /// Block id and input index of an input port.
    fn target(&mut self, port: &'p PortRef) -> Option<(&'p str, usize)> {
        let found = self
            .block(&port.block)
            .map(|known| known.spec.input(&port.port).map(|(i, _)| i))?;
        if found.is_none() {
            self.unknown_port(port);
        }
        found.map(|i| (port.block.as_str(), i))
    }

    fn drivers(&mut self) -> BTreeMap<(&'p str, usize), Driver<'p>> {
        let patch = self.patch;
        let mut drivers = BTreeMap::new();
        let wires = patch
            .wires
            .iter()
            .enumerate()
            .map(|(i, w)| (&w.to, Driver::Wire(i, w)));
        let listeners = patch
            .listeners
            .iter()
            .map(|l| (&l.to, Driver::Listen(l.bus.as_str())));
        for (to, driver) in wires.chain(listeners) {
            let Some(key) = self.target(to) else {
                continue;
            };
            if drivers.insert(key, driver).is_some() {
                self.builder.push_error(CompileError::MultipleDrivers {
                    block: to.block.clone(),
                    port: to.port.clone(),
                });
            }
        }
        drivers
    }

    fn lower(&mut self, id: &'p str, drivers: &BTreeMap<(&'p str, usize), Driver<'p>>) {
        let Some(known) = self.blocks.get(id) else {
            return;
        };
        let (index, spec, instance) = (known.index, known.spec, known.instance);
        let outputs = known.outputs.clone();
        self.builder.resume_block(index);

        let mut ports = Vec::with_capacity(spec.inputs.len());
        let mut complete = true;
        for (j, port) in spec.inputs.iter().enumerate() {
            let slot = match drivers.get(&(id, j)) {
                Some(Driver::Wire(w, wire)) => self.wired(index, *w, wire, port),
                Some(Driver::Listen(bus)) => self.listened(bus, id, port),
                None => self.default_for(id, port),
            };
            match slot {
                Some(slot) => ports.push((port.name, slot)),
                None => complete = false,
            }
        }

        let lowered = if complete {
            let mut ctx = LowerCtx::new(&mut self.builder, id, &instance.params);
            match (spec.lower)(&mut ctx, &BlockInputs::new(ports)) {
                Ok(slots) if slots.len() == outputs.len() => Some(slots),
                Ok(slots) => {
                    self.builder.push_error(CompileError::OutputArity {
                        block: id.to_string(),
                        expected: outputs.len(),
                        found: slots.len(),
                    });
                    None
                }
                Err(e) => {
                    self.builder.push_error(e);
                    None
                }
            }
        } else {
            None
        };

        match lowered {
            Some(slots) => {
                for ((placeholder, slot), port) in outputs.iter().zip(slots).zip(&spec.outputs) {
                    if let Some(found) = self.builder.slot_type(slot) {
                        if !port.ty.accepts(found) {
                            self.builder.push_error(CompileError::TypeMismatch {
                                context: format!("output `{id}.{}`", port.name),
                                expected: port.ty.to_string(),
                                found: found.to_string(),
                            });
                        }
                    }
                    self.builder.bind(*placeholder, slot);
                }
            }
            None => {
                // bind to zero so consumers do not also report unbound slots
                for (placeholder, port) in outputs.iter().zip(&spec.outputs) {
                    if port.ty.world == World::Field {
                        continue;
                    }
                    if let Some(zero) = port.ty.domain.canonical_zero() {
                        let slot = self.builder.constant_of(port.ty.domain, zero);
                        self.builder.bind(*placeholder, slot);
                    }
                }
            }
        }
        self.builder.exit_block();
    }

    fn wired(
        &mut self,
        consumer: usize,
        index: usize,
        wire: &Wire,
        port: &PortSpec,
    ) -> Option<SlotId> {
        let (source, ty) = self.source(&wire.from)?;
        let slot = if wire.latched {
            let latch = LatchId::new(format!("{}.latch", wire.to));
            if ty.world == World::Field {
                self.builder
                    .push_error(CompileError::LatchDomainMissing { latch });
                return None;
            }
            let Some(init) = ty.domain.canonical_zero() else {
                self.builder.push_error(CompileError::MissingDefaultSource {
                    block: wire.to.block.clone(),
                    port: wire.to.port.clone(),
                });
                return None;
            };
            let cell = self
                .builder
                .state_cell(latch, TypeDesc::signal(ty.domain), init, None);
            let prev = cell.prev();
            self.builder.commit(cell, source);
            prev
        } else {
            self.builder.tag_wire(source, consumer, index);
            source
        };
        let delivered = if wire.latched {
            TypeDesc::signal(ty.domain)
        } else {
            ty
        };
        if port.ty.accepts(delivered) {
            Some(slot)
        } else {
            self.builder.push_error(CompileError::TypeMismatch {
                context: format!("wire #{index} `{}` -> `{}`", wire.from, wire.to),
                expected: port.ty.to_string(),
                found: delivered.to_string(),
            });
            None
        }
    }

    fn listened(&mut self, bus: &str, block: &str, port: &PortSpec) -> Option<SlotId> {
        if !self.builder.bus_names.contains_key(bus) {
            self.builder
                .push_error(CompileError::UnknownBus(bus.to_string()));
            return None;
        }
        let slot = self.builder.listen(bus);
        let ty = self.builder.slot_type(slot)?;
        if port.ty.accepts(ty) {
            Some(slot)
        } else {
            self.builder.push_error(CompileError::TypeMismatch {
                context: format!("listener `{bus}` -> `{block}.{}`", port.name),
                expected: port.ty.to_string(),
                found: ty.to_string(),
            });
            None
        }
    }

    fn default_for(&mut self, block: &str, port: &PortSpec) -> Option<SlotId> {
        let value = match &port.default {
            _ if port.ty.world == World::Field => None,
            DefaultSource::Value(v) => Some(v.clone()),
            DefaultSource::Zero => port.ty.domain.canonical_zero(),
            DefaultSource::Required => None,
        };
        match value {
            Some(v) => Some(self.builder.constant_of(port.ty.domain, v)),
            None => {
                self.builder.push_error(CompileError::MissingDefaultSource {
                    block: block.to_string(),
                    port: port.name.to_string(),
                });
                None
            }
        }
    }

    fn connect(&mut self) {
        let patch = self.patch;
        for publisher in &patch.publishers {
            if let Some((slot, _)) = self.source(&publisher.from) {
                self.builder
                    .publish(&publisher.bus, slot, publisher.sort_key);
            }
        }
        for output in &patch.outputs {
            if let Some((slot, _)) = self.source(&output.from) {
                self.builder.output(output.name.clone(), slot);
            }
        }
    }
}
