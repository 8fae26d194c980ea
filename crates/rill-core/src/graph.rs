//! Same-frame dependency graph.
//!
//! Nodes are value slots, one combine node per listened bus, and one commit
//! node per latch. Edges are *same-frame* dependencies only:
//!
//! - op input slot → op output slot
//! - publisher source → bus combine node → bus listener slot
//! - latch input → latch commit, and for field latches domain slot → commit
//!   and domain slot → latch output (the read needs the resolved domain)
//!
//! A latch's input never has an edge to its output; that pair is kept apart in
//! [`DepGraph::cross_frame`] so diagnostics can talk about it without the
//! cycle checker ever seeing it. Rails are not part of the graph at all.

use crate::bus::{BusDecl, BusId};
use crate::latch::{LatchDecl, LatchKind};
use crate::op::{OpId, OpNode};
use crate::slot::{SlotId, SlotTable};

/// A node of the dependency graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeRef {
    /// A value slot.
    Slot(SlotId),
    /// Combine step of a bus.
    Bus(BusId),
    /// Commit step of the latch at this index.
    Commit(usize),
}

/// Why an edge exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Op argument.
    Op(OpId),
    /// Publisher feeding a bus.
    Publish(BusId),
    /// Bus feeding its listener slot.
    Listen(BusId),
    /// Value committed by a latch.
    LatchInput(usize),
    /// Domain a field latch commits against.
    LatchDomain(usize),
    /// Domain a field latch read resolves against.
    DomainGate(usize),
    /// Placeholder forwarding to another placeholder.
    Alias,
}

/// A same-frame edge between node indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Source node index.
    pub from: usize,
    /// Target node index.
    pub to: usize,
    /// Origin of the edge.
    pub kind: EdgeKind,
}

/// Latch input/output pair: a dependency that crosses to the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrossFrameEdge {
    /// Latch index.
    pub latch: usize,
    /// Slot committed this frame.
    pub from: SlotId,
    /// Slot read next frame.
    pub to: SlotId,
}

/// Arena-indexed dependency graph.
///
/// Node indices are laid out as all slots (by slot id), then one node per bus,
/// then one node per latch commit, so a node's index is computed rather than
/// looked up.
#[derive(Debug, Clone)]
pub struct DepGraph {
    slot_count: usize,
    bus_count: usize,
    latch_count: usize,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    cross_frame: Vec<CrossFrameEdge>,
}

impl DepGraph {
    /// Builds the graph from resolved program parts.
    pub(crate) fn build(
        slots: &SlotTable,
        ops: &[OpNode],
        buses: &[BusDecl],
        latches: &[LatchDecl],
    ) -> Self {
        let mut graph = Self {
            slot_count: slots.len(),
            bus_count: buses.len(),
            latch_count: latches.len(),
            edges: Vec::new(),
            outgoing: vec![Vec::new(); slots.len() + buses.len() + latches.len()],
            cross_frame: Vec::new(),
        };

        for (i, op) in ops.iter().enumerate() {
            let to = graph.slot(op.output);
            for input in &op.inputs {
                let from = graph.slot(*input);
                graph.add(from, to, EdgeKind::Op(OpId(i as u32)));
            }
        }

        for (i, bus) in buses.iter().enumerate() {
            let id = BusId(i as u32);
            let Some(listener) = bus.combined else {
                continue;
            };
            let node = graph.bus(id);
            for publisher in bus.sorted_publishers() {
                let from = graph.slot(publisher.source);
                graph.add(from, node, EdgeKind::Publish(id));
            }
            let to = graph.slot(listener);
            graph.add(node, to, EdgeKind::Listen(id));
        }

        for (i, latch) in latches.iter().enumerate() {
            let commit = graph.commit(i);
            if let Some(input) = latch.in_slot {
                let from = graph.slot(input);
                graph.add(from, commit, EdgeKind::LatchInput(i));
                graph.cross_frame.push(CrossFrameEdge {
                    latch: i,
                    from: input,
                    to: latch.out_slot,
                });
            }
            if latch.kind == LatchKind::Field {
                if let Some(domain) = latch.domain_slot {
                    let from = graph.slot(domain);
                    graph.add(from, commit, EdgeKind::LatchDomain(i));
                    let out = graph.slot(latch.out_slot);
                    graph.add(from, out, EdgeKind::DomainGate(i));
                }
            }
        }
        graph
    }

    fn add(&mut self, from: usize, to: usize, kind: EdgeKind) {
        let index = self.edges.len();
        self.edges.push(Edge { from, to, kind });
        self.outgoing[from].push(index);
    }

    /// Node index of a slot.
    pub fn slot(&self, slot: SlotId) -> usize {
        slot.0 as usize
    }

    /// Node index of a bus combine node.
    pub fn bus(&self, bus: BusId) -> usize {
        self.slot_count + bus.0 as usize
    }

    /// Node index of a latch commit node.
    pub fn commit(&self, latch: usize) -> usize {
        self.slot_count + self.bus_count + latch
    }

    /// Node at `index`.
    pub fn node(&self, index: usize) -> NodeRef {
        if index < self.slot_count {
            NodeRef::Slot(SlotId(index as u32))
        } else if index < self.slot_count + self.bus_count {
            NodeRef::Bus(BusId((index - self.slot_count) as u32))
        } else {
            NodeRef::Commit(index - self.slot_count - self.bus_count)
        }
    }

    /// Total node count.
    pub fn node_count(&self) -> usize {
        self.slot_count + self.bus_count + self.latch_count
    }

    /// All same-frame edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Indices (into [`edges`](Self::edges)) of the edges leaving `node`.
    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    /// Latch input/output pairs, which are never same-frame edges.
    pub fn cross_frame(&self) -> &[CrossFrameEdge] {
        &self.cross_frame
    }

    /// Number of incoming edges per node.
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.node_count()];
        for edge in &self.edges {
            degrees[edge.to] += 1;
        }
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;
    use crate::types::{Domain, TypeDesc, Value};

    #[test]
    fn latch_feedback_is_cross_frame_only() {
        let mut b = ProgramBuilder::new();
        let cell = b.state_cell("acc", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
        let prev = cell.prev();
        let one = b.constant(Value::Float(1.0));
        let next = b.binary(crate::op::BinaryFn::Add, prev, one);
        b.commit(cell, next);

        let graph = DepGraph::build(&b.slots, &b.ops, &b.buses, &b.latches);
        assert_eq!(graph.cross_frame().len(), 1);
        assert_eq!(graph.cross_frame()[0].from, next);
        assert_eq!(graph.cross_frame()[0].to, prev);
        assert!(
            graph
                .edges()
                .iter()
                .all(|e| !(e.from == graph.slot(next) && e.to == graph.slot(prev)))
        );
        let commit = graph.commit(0);
        assert!(
            graph
                .edges()
                .iter()
                .any(|e| e.from == graph.slot(next) && e.to == commit)
        );
    }

    #[test]
    fn node_indices_round_trip() {
        let mut b = ProgramBuilder::new();
        let one = b.constant(Value::Float(1.0));
        let graph = DepGraph::build(&b.slots, &b.ops, &b.buses, &b.latches);
        assert_eq!(graph.node(graph.slot(one)), NodeRef::Slot(one));
        assert_eq!(graph.node(graph.bus(BusId(2))), NodeRef::Bus(BusId(2)));
    }

    #[test]
    fn unlistened_bus_has_no_edges() {
        let mut b = ProgramBuilder::new();
        b.bus(
            "glow",
            TypeDesc::signal(Domain::Float),
            crate::bus::CombineMode::Sum,
            None,
        );
        let one = b.constant(Value::Float(1.0));
        b.publish("glow", one, 0);
        let graph = DepGraph::build(&b.slots, &b.ops, &b.buses, &b.latches);
        assert!(graph.edges().is_empty());
    }
}
