//! Compilation: validation, cycle checking, and scheduling.
//!
//! [`compile`] consumes a [`ProgramBuilder`] and produces a [`CompileReport`].
//! Every structural problem found along the way is collected, so a failing
//! report lists all of them at once. A report only carries a [`Program`] when
//! there are no errors; warnings never block compilation.

use std::collections::{BTreeMap, BTreeSet};

use crate::bus::{BusDecl, Publisher, PublisherId};
use crate::cycle::{self, CycleContext, CycleDiagnostic};
use crate::error::{CompileError, CompileErrors, CompileWarning};
use crate::graph::DepGraph;
use crate::latch::{LatchDecl, LatchKind};
use crate::op::OpNode;
use crate::program::ProgramBuilder;
use crate::rail::{DrivePolicy, RailId, RailsConfig};
use crate::schedule::{self, Schedule, ScheduleInput};
use crate::slot::{SlotId, SlotTable, Storage};
use crate::types::{Domain, TypeDesc, World};

/// Immutable, scheduled program.
///
/// Programs are produced only by a successful compile and never change; hot
/// swapping replaces the whole program.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) slots: SlotTable,
    pub(crate) ops: Vec<OpNode>,
    pub(crate) buses: Vec<BusDecl>,
    pub(crate) latches: Vec<LatchDecl>,
    pub(crate) outputs: BTreeMap<String, SlotId>,
    pub(crate) inputs: BTreeMap<String, TypeDesc>,
    pub(crate) rails: RailsConfig,
    pub(crate) schedule: Schedule,
    pub(crate) warnings: Vec<CompileWarning>,
    pub(crate) blocks: Vec<String>,
}

impl Program {
    /// Per-frame step list.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Slot bound to output `name`.
    pub fn output(&self, name: &str) -> Option<SlotId> {
        self.outputs.get(name).copied()
    }

    /// All named outputs.
    pub fn outputs(&self) -> &BTreeMap<String, SlotId> {
        &self.outputs
    }

    /// Host inputs and their types.
    pub fn inputs(&self) -> &BTreeMap<String, TypeDesc> {
        &self.inputs
    }

    /// Slot table.
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Ops, indexed by [`OpId`](crate::OpId).
    pub fn ops(&self) -> &[OpNode] {
        &self.ops
    }

    /// Declared latches.
    pub fn latches(&self) -> &[LatchDecl] {
        &self.latches
    }

    /// Buses, rails first.
    pub fn buses(&self) -> &[BusDecl] {
        &self.buses
    }

    /// Rail configuration.
    pub fn rails(&self) -> &RailsConfig {
        &self.rails
    }

    /// Non-fatal findings.
    pub fn warnings(&self) -> &[CompileWarning] {
        &self.warnings
    }

    /// Names of the blocks the program was lowered from.
    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }
}

/// Result of one compile.
#[derive(Debug, Clone)]
pub struct CompileReport {
    /// The program, if compilation succeeded.
    pub program: Option<Program>,
    /// Every error found.
    pub errors: Vec<CompileError>,
    /// Non-fatal findings.
    pub warnings: Vec<CompileWarning>,
}

impl CompileReport {
    /// Returns true if a program was produced.
    pub fn is_ok(&self) -> bool {
        self.program.is_some()
    }

    /// Converts into the program or the collected errors.
    pub fn into_result(self) -> Result<Program, CompileErrors> {
        match self.program {
            Some(program) => Ok(program),
            None => Err(CompileErrors(self.errors)),
        }
    }

    /// Cycle diagnostics among the errors.
    pub fn cycles(&self) -> impl Iterator<Item = &CycleDiagnostic> {
        self.errors.iter().filter_map(CompileError::as_cycle)
    }
}

/// Follows placeholder aliases, recording each problem once.
struct Resolver<'a> {
    slots: &'a SlotTable,
    errors: Vec<CompileError>,
    loops: BTreeSet<SlotId>,
    unbound: BTreeSet<SlotId>,
    dangling: bool,
}

impl<'a> Resolver<'a> {
    fn new(slots: &'a SlotTable) -> Self {
        Self {
            slots,
            errors: Vec::new(),
            loops: BTreeSet::new(),
            unbound: BTreeSet::new(),
            dangling: false,
        }
    }

    fn resolve(&mut self, id: SlotId) -> SlotId {
        match self.slots.resolve(id) {
            Ok(target) => {
                match self.slots.get(target) {
                    None => {
                        self.dangling = true;
                        if self.unbound.insert(target) {
                            self.errors.push(CompileError::UnboundSlot {
                                slot: target,
                                label: target.to_string(),
                            });
                        }
                    }
                    Some(info) if info.is_placeholder() => {
                        if self.unbound.insert(target) {
                            self.errors.push(CompileError::UnboundSlot {
                                slot: target,
                                label: info.label.clone(),
                            });
                        }
                    }
                    Some(_) => {}
                }
                target
            }
            Err(mut chain) => {
                let start = chain
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| **s)
                    .map_or(0, |(i, _)| i);
                chain.rotate_left(start);
                if let Some(first) = chain.first() {
                    if self.loops.insert(*first) {
                        let diag = cycle::alias_loop(self.slots, &chain);
                        self.errors.push(CompileError::InstantCycle(Box::new(diag)));
                    }
                }
                id
            }
        }
    }
}

/// Compiles a builder into a report.
pub(crate) fn compile(mut builder: ProgramBuilder) -> CompileReport {
    bind_rails(&mut builder);

    let ProgramBuilder {
        slots,
        mut ops,
        mut buses,
        mut latches,
        mut outputs,
        inputs,
        errors: deferred,
        blocks,
        rails,
        mut wire_tags,
        rail_reads,
        ..
    } = builder;

    let mut errors = deferred;

    let mut resolver = Resolver::new(&slots);
    for op in &mut ops {
        for input in &mut op.inputs {
            *input = resolver.resolve(*input);
        }
    }
    for bus in &mut buses {
        for publisher in &mut bus.publishers {
            publisher.source = resolver.resolve(publisher.source);
        }
    }
    for latch in &mut latches {
        latch.in_slot = latch.in_slot.map(|s| resolver.resolve(s));
        latch.domain_slot = latch.domain_slot.map(|s| resolver.resolve(s));
    }
    for slot in outputs.values_mut() {
        *slot = resolver.resolve(*slot);
    }
    for tag in &mut wire_tags {
        tag.source = resolver.resolve(tag.source);
    }
    let dangling = resolver.dangling;
    errors.append(&mut resolver.errors);

    for latch in &latches {
        validate_latch(&slots, latch, &mut errors);
    }
    for bus in &buses {
        let count = bus.publishers.len();
        if bus.rail.is_none() && count > 1 && !bus.mode.supports(bus.ty) {
            errors.push(CompileError::UnsupportedCombineMode {
                bus: bus.name.clone(),
                mode: bus.mode,
                ty: bus.ty.to_string(),
                publishers: count,
            });
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "compile: {} slots, {} ops, {} buses, {} latches",
        slots.len(),
        ops.len(),
        buses.len(),
        latches.len()
    );

    if dangling {
        return failed(errors);
    }

    let graph = DepGraph::build(&slots, &ops, &buses, &latches);
    let context = CycleContext {
        slots: &slots,
        ops: &ops,
        buses: &buses,
        latches: &latches,
        blocks: &blocks,
        wire_tags: &wire_tags,
    };
    for diag in cycle::check(&graph, &context) {
        errors.push(CompileError::InstantCycle(Box::new(diag)));
    }

    if !errors.is_empty() {
        return failed(errors);
    }

    let input = ScheduleInput {
        slots: &slots,
        buses: &buses,
        latches: &latches,
        rail_reads: &rail_reads,
    };
    let schedule = match schedule::build(&graph, &input) {
        Ok(schedule) => schedule,
        Err(remaining) => return failed(vec![CompileError::Unschedulable { remaining }]),
    };

    let warnings = drive_conflicts(&rails, &buses);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "compile: scheduled {} steps, {} warnings",
        schedule.len(),
        warnings.len()
    );

    let program = Program {
        slots,
        ops,
        buses,
        latches,
        outputs,
        inputs,
        rails,
        schedule,
        warnings: warnings.clone(),
        blocks,
    };
    CompileReport {
        program: Some(program),
        errors: Vec::new(),
        warnings,
    }
}

fn failed(errors: Vec<CompileError>) -> CompileReport {
    #[cfg(feature = "tracing")]
    tracing::debug!("compile: failed with {} errors", errors.len());

    CompileReport {
        program: None,
        errors,
        warnings: Vec::new(),
    }
}

/// Adds each rail's previous resolved value as the lowest-priority publisher
/// of the user bus it is bound to.
fn bind_rails(builder: &mut ProgramBuilder) {
    for rail in RailId::ALL {
        let Some(name) = builder.rails.binding(rail).map(str::to_string) else {
            continue;
        };
        if RailId::from_name(&name).is_some() {
            builder.push_error(CompileError::ReservedBus(name));
            continue;
        }
        let Some(&index) = builder.bus_names.get(&name) else {
            builder.push_error(CompileError::UnknownBus(name));
            continue;
        };
        let ty = builder.buses[index].ty;
        if !ty.accepts(rail.ty()) {
            builder.push_error(CompileError::TypeMismatch {
                context: format!("binding rail `{rail}` to bus `{name}`"),
                expected: ty.to_string(),
                found: rail.ty().to_string(),
            });
            continue;
        }
        let source = builder.rail(rail);
        let bus = &mut builder.buses[index];
        let id = PublisherId(bus.next_publisher);
        bus.next_publisher += 1;
        bus.publishers.push(Publisher {
            id,
            source,
            sort_key: i32::MIN,
        });
    }
}

fn validate_latch(slots: &SlotTable, latch: &LatchDecl, errors: &mut Vec<CompileError>) {
    let Some(input) = latch.in_slot else {
        errors.push(CompileError::UncommittedStateCell {
            latch: latch.id.clone(),
        });
        return;
    };

    if let Some(info) = slots.get(input) {
        if !latch.value_type.accepts(info.ty) {
            errors.push(CompileError::LatchTypeMismatch {
                latch: latch.id.clone(),
                side: "input",
                declared: latch.value_type.to_string(),
                found: info.ty.to_string(),
            });
        } else if latch.kind == LatchKind::Field
            && !info.is_placeholder()
            && info.storage != Storage::Buffer
        {
            errors.push(CompileError::LatchCommitNeedsBuffer {
                latch: latch.id.clone(),
                slot: input,
                label: info.label.clone(),
            });
        }
    }

    let init_type = match latch.kind {
        LatchKind::Signal => latch.value_type,
        LatchKind::Field => TypeDesc::signal(latch.value_type.domain),
    };
    if !latch.init.fits(init_type) {
        errors.push(CompileError::LatchTypeMismatch {
            latch: latch.id.clone(),
            side: "init",
            declared: init_type.to_string(),
            found: latch.init.kind_name().to_string(),
        });
    }

    if latch.kind == LatchKind::Field {
        match latch.domain_slot.and_then(|d| slots.get(d)) {
            None => errors.push(CompileError::LatchDomainMissing {
                latch: latch.id.clone(),
            }),
            Some(info) if info.ty.world == World::Field || info.ty.domain != Domain::Domain => {
                errors.push(CompileError::TypeMismatch {
                    context: format!("domain of field latch `{}`", latch.id),
                    expected: TypeDesc::signal(Domain::Domain).to_string(),
                    found: info.ty.to_string(),
                });
            }
            Some(_) => {}
        }
    }
}

fn drive_conflicts(rails: &RailsConfig, buses: &[BusDecl]) -> Vec<CompileWarning> {
    buses
        .iter()
        .filter_map(|bus| {
            let rail = bus.rail?;
            let publishers = bus.publishers.len();
            (rails.policy(rail) == DrivePolicy::Normalled && publishers > 0)
                .then_some(CompileWarning::RailDriveConflict { rail, publishers })
        })
        .collect()
}
