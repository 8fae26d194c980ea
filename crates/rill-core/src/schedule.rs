//! Compiled schedule: the flat per-frame step list.
//!
//! A [`Schedule`] is produced once per successful compile and executed front
//! to back every frame. Steps are grouped into four phases that always run in
//! this order:
//!
//! 1. [`Phase::LatchRead`]: signal latches and rails load the previous
//!    frame's values. Nothing here depends on this frame.
//! 2. [`Phase::Compute`]: ops, bus combines, and field latch reads (which
//!    wait for their domain slot) in a deterministic topological order.
//! 3. [`Phase::RailResolve`]: every rail resolves its final value from its
//!    internal generator and publishers.
//! 4. [`Phase::LatchCommit`]: every latch stores its input for next frame.

use core::fmt;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use crate::bus::{BusDecl, BusId};
use crate::graph::{DepGraph, NodeRef};
use crate::latch::{LatchDecl, LatchKind};
use crate::op::OpId;
use crate::rail::RailId;
use crate::slot::{Producer, SlotId, SlotTable};

/// Execution phase of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Previous-frame reads.
    LatchRead,
    /// Same-frame evaluation.
    Compute,
    /// Rail resolution.
    RailResolve,
    /// Next-frame writes.
    LatchCommit,
}

impl Phase {
    /// All phases, in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::LatchRead,
        Phase::Compute,
        Phase::RailResolve,
        Phase::LatchCommit,
    ];

    /// Lowercase name used in summaries.
    pub const fn name(self) -> &'static str {
        match self {
            Phase::LatchRead => "latch-read",
            Phase::Compute => "compute",
            Phase::RailResolve => "rail-resolve",
            Phase::LatchCommit => "latch-commit",
        }
    }
}

/// A single instruction of the schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Load a signal latch's previous value into its output slot.
    LatchRead {
        /// Latch index.
        latch: usize,
        /// Output slot.
        out: SlotId,
    },
    /// Load a rail's previous resolved value.
    RailRead {
        /// Rail.
        rail: RailId,
        /// Output slot.
        out: SlotId,
    },
    /// Load a field latch's previous buffer, resetting it if the domain
    /// resolved this frame differs from the stored one.
    FieldLatchRead {
        /// Latch index.
        latch: usize,
        /// Output slot.
        out: SlotId,
        /// Slot holding this frame's domain.
        domain: SlotId,
    },
    /// Evaluate an op.
    Compute {
        /// Op to evaluate.
        op: OpId,
    },
    /// Combine a bus's publishers into its listener slot.
    BusEval {
        /// Bus.
        bus: BusId,
        /// Listener slot.
        out: SlotId,
        /// Publisher sources in canonical `(sort_key, id)` order.
        sources: Vec<SlotId>,
    },
    /// Resolve a rail's value for this frame.
    RailResolve {
        /// Rail.
        rail: RailId,
        /// Publisher sources in canonical order.
        sources: Vec<SlotId>,
    },
    /// Store a latch's input for next frame.
    LatchCommit {
        /// Latch index.
        latch: usize,
        /// Slot committed.
        input: SlotId,
    },
}

impl Step {
    /// Phase this step belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Step::LatchRead { .. } | Step::RailRead { .. } => Phase::LatchRead,
            Step::FieldLatchRead { .. } | Step::Compute { .. } | Step::BusEval { .. } => {
                Phase::Compute
            }
            Step::RailResolve { .. } => Phase::RailResolve,
            Step::LatchCommit { .. } => Phase::LatchCommit,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::LatchRead { latch, out } => write!(f, "LatchRead latch[{latch}] → {out}"),
            Step::RailRead { rail, out } => write!(f, "RailRead {rail} → {out}"),
            Step::FieldLatchRead { latch, out, domain } => {
                write!(f, "FieldLatchRead latch[{latch}] @{domain} → {out}")
            }
            Step::Compute { op } => write!(f, "Compute {op}"),
            Step::BusEval { bus, out, sources } => {
                write!(f, "BusEval bus[{}] {} sources → {out}", bus.index(), sources.len())
            }
            Step::RailResolve { rail, sources } => {
                write!(f, "RailResolve {rail} ({} publishers)", sources.len())
            }
            Step::LatchCommit { latch, input } => write!(f, "LatchCommit {input} → latch[{latch}]"),
        }
    }
}

/// Immutable, ordered step list of one program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    /// All steps, in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps of one phase.
    pub fn phase(&self, phase: Phase) -> &[Step] {
        let start = self.steps.partition_point(|s| s.phase() < phase);
        let end = self.steps.partition_point(|s| s.phase() <= phase);
        &self.steps[start..end]
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Program parts the scheduler reads. Slot references are already resolved.
pub(crate) struct ScheduleInput<'a> {
    pub(crate) slots: &'a SlotTable,
    pub(crate) buses: &'a [BusDecl],
    pub(crate) latches: &'a [LatchDecl],
    pub(crate) rail_reads: &'a BTreeMap<RailId, SlotId>,
}

/// Orders the graph into phases.
///
/// Returns the number of nodes that could not be ordered if the graph still
/// contains a cycle; the cycle checker runs first, so callers treat that as
/// an internal error.
pub(crate) fn build(graph: &DepGraph, input: &ScheduleInput<'_>) -> Result<Schedule, usize> {
    let order = kahn_sort(graph)?;
    let mut steps = Vec::new();

    for (i, latch) in input.latches.iter().enumerate() {
        if latch.kind == LatchKind::Signal {
            steps.push(Step::LatchRead {
                latch: i,
                out: latch.out_slot,
            });
        }
    }
    for (rail, out) in input.rail_reads {
        steps.push(Step::RailRead {
            rail: *rail,
            out: *out,
        });
    }

    for node in order {
        let NodeRef::Slot(slot) = graph.node(node) else {
            continue;
        };
        match input.slots.producer(slot) {
            Some(Producer::Op(op)) => steps.push(Step::Compute { op: OpId(op as u32) }),
            Some(Producer::Combine(bus)) => {
                let sources = input.buses[bus]
                    .sorted_publishers()
                    .iter()
                    .map(|p| p.source)
                    .collect();
                steps.push(Step::BusEval {
                    bus: BusId(bus as u32),
                    out: slot,
                    sources,
                });
            }
            Some(Producer::LatchRead(latch)) => {
                let decl = &input.latches[latch];
                if let (LatchKind::Field, Some(domain)) = (decl.kind, decl.domain_slot) {
                    steps.push(Step::FieldLatchRead {
                        latch,
                        out: slot,
                        domain,
                    });
                }
            }
            Some(Producer::RailRead(_)) | None => {}
        }
    }

    for rail in RailId::ALL {
        let sources = input
            .buses
            .iter()
            .find(|b| b.rail == Some(rail))
            .map(|b| b.sorted_publishers().iter().map(|p| p.source).collect())
            .unwrap_or_default();
        steps.push(Step::RailResolve { rail, sources });
    }

    for (i, latch) in input.latches.iter().enumerate() {
        if let Some(input) = latch.in_slot {
            steps.push(Step::LatchCommit { latch: i, input });
        }
    }

    #[cfg(feature = "tracing")]
    for (i, step) in steps.iter().enumerate() {
        tracing::debug!("  step[{i}]: {step}");
    }

    Ok(Schedule { steps })
}

/// Kahn's algorithm with a min-heap, so ties always resolve to the lowest
/// node index and the order is reproducible.
fn kahn_sort(graph: &DepGraph) -> Result<Vec<usize>, usize> {
    let mut degree = graph.in_degrees();
    let mut ready: BinaryHeap<Reverse<usize>> = degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| Reverse(n))
        .collect();
    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(Reverse(n)) = ready.pop() {
        order.push(n);
        for &e in graph.outgoing(n) {
            let to = graph.edges()[e].to;
            degree[to] -= 1;
            if degree[to] == 0 {
                ready.push(Reverse(to));
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(graph.node_count() - order.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinaryFn;
    use crate::program::ProgramBuilder;
    use crate::types::{Domain, TypeDesc, Value};

    fn schedule_of(b: &ProgramBuilder) -> Schedule {
        let graph = DepGraph::build(&b.slots, &b.ops, &b.buses, &b.latches);
        build(
            &graph,
            &ScheduleInput {
                slots: &b.slots,
                buses: &b.buses,
                latches: &b.latches,
                rail_reads: &b.rail_reads,
            },
        )
        .unwrap()
    }

    #[test]
    fn phases_are_ordered() {
        let mut b = ProgramBuilder::new();
        let cell = b.state_cell("acc", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
        let t = b.listen("time");
        let next = b.binary(BinaryFn::Add, cell.prev(), t);
        b.commit(cell, next);
        let schedule = schedule_of(&b);

        let phases: Vec<Phase> = schedule.steps().iter().map(Step::phase).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
        assert_eq!(schedule.phase(Phase::LatchRead).len(), 2);
        assert_eq!(schedule.phase(Phase::Compute).len(), 1);
        assert_eq!(schedule.phase(Phase::RailResolve).len(), 6);
        assert_eq!(schedule.phase(Phase::LatchCommit).len(), 1);
    }

    #[test]
    fn producers_precede_consumers() {
        let mut b = ProgramBuilder::new();
        let p = b.placeholder(TypeDesc::signal(Domain::Float), "p");
        let one = b.constant(Value::Float(1.0));
        let a = b.binary(BinaryFn::Add, p, one);
        let late = b.constant(Value::Float(5.0));
        // `a` was created first but reads `late`, as after placeholder resolution
        b.ops[1].inputs[0] = late;
        let schedule = schedule_of(&b);
        let position = |slot: SlotId| {
            schedule.steps().iter().position(
                |s| matches!(s, Step::Compute { op } if b.ops[op.0 as usize].output == slot),
            )
        };
        assert!(position(late).unwrap() < position(a).unwrap());
    }

    #[test]
    fn kahn_is_deterministic() {
        let mut b = ProgramBuilder::new();
        for i in 0..16 {
            let _ = b.constant(Value::Float(f64::from(i)));
        }
        let a = schedule_of(&b);
        let c = schedule_of(&b);
        assert_eq!(a, c);
    }
}
