//! Instantaneous-cycle detection and latch suggestions.
//!
//! Strongly connected components are found with an iterative Tarjan pass
//! over the same-frame graph. A component with more than one node, or a node
//! with an edge to itself, is a value that depends on itself within one
//! frame. For each such component the checker extracts one concrete cycle,
//! ranks the edges on it as latch-insertion candidates, and notes any latch
//! that feeds from the loop without breaking it.

use core::fmt;
use std::collections::VecDeque;

use crate::bus::{BusDecl, BusId};
use crate::graph::{DepGraph, EdgeKind, NodeRef};
use crate::latch::{LatchDecl, LatchId};
use crate::op::OpNode;
use crate::program::WireTag;
use crate::slot::{SlotId, SlotTable};
use crate::types::World;

const UNVISITED: usize = usize::MAX;

/// One edge of a reported cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    /// Source node.
    pub from: NodeRef,
    /// Target node.
    pub to: NodeRef,
    /// Label of the source node.
    pub from_label: String,
    /// Label of the target node.
    pub to_label: String,
    /// Why the edge exists.
    pub kind: EdgeKind,
    /// Block that consumes the value, if any.
    pub consumer_block: Option<String>,
    /// True if the edge crosses a block or bus boundary.
    pub crosses_boundary: bool,
    /// True if a signal latch can be inserted on this edge.
    pub latchable: bool,
    /// Index of the authored patch wire carrying this edge, if known.
    pub wire: Option<usize>,
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` -> `{}`", self.from_label, self.to_label)?;
        if let Some(wire) = self.wire {
            write!(f, " (wire #{wire})")?;
        }
        Ok(())
    }
}

/// Structured report of one illegal same-frame cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDiagnostic {
    /// Every node of the strongly connected component.
    pub scc_nodes: Vec<NodeRef>,
    /// Labels of `scc_nodes`, in the same order.
    pub scc_labels: Vec<String>,
    /// One concrete cycle, in traversal order.
    pub cycle_edges: Vec<EdgeRef>,
    /// Edges where a single latch removes every cycle of the component,
    /// best first.
    pub suggested_latch_edges: Vec<EdgeRef>,
    /// Latches fed from inside the loop whose previous-frame output is not
    /// on the instantaneous path.
    pub bypassed_latches: Vec<LatchId>,
    /// Human-readable summary.
    pub message: String,
}

impl fmt::Display for CycleDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Read-only program parts the checker needs for labelling and ranking.
pub(crate) struct CycleContext<'a> {
    pub(crate) slots: &'a SlotTable,
    pub(crate) ops: &'a [OpNode],
    pub(crate) buses: &'a [BusDecl],
    pub(crate) latches: &'a [LatchDecl],
    pub(crate) blocks: &'a [String],
    pub(crate) wire_tags: &'a [WireTag],
}

/// Strongly connected components, each sorted, in reverse topological order.
pub(crate) fn strongly_connected(graph: &DepGraph) -> Vec<Vec<usize>> {
    let n = graph.node_count();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut call: Vec<(usize, usize)> = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            let out = graph.outgoing(v);
            if frame.1 < out.len() {
                let w = graph.edges()[out[frame.1]].to;
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }
    components
}

fn has_self_loop(graph: &DepGraph, node: usize) -> bool {
    graph
        .outgoing(node)
        .iter()
        .any(|&e| graph.edges()[e].to == node)
}

/// Checks the graph and returns one diagnostic per illegal component.
pub(crate) fn check(graph: &DepGraph, ctx: &CycleContext<'_>) -> Vec<CycleDiagnostic> {
    let mut illegal: Vec<Vec<usize>> = strongly_connected(graph)
        .into_iter()
        .filter(|c| c.len() > 1 || has_self_loop(graph, c[0]))
        .collect();
    illegal.sort_by_key(|c| c[0]);

    #[cfg(feature = "tracing")]
    tracing::debug!("cycle_check: {} illegal components", illegal.len());

    illegal
        .iter()
        .map(|component| diagnose(graph, ctx, component))
        .collect()
}

fn diagnose(graph: &DepGraph, ctx: &CycleContext<'_>, component: &[usize]) -> CycleDiagnostic {
    let mut member = vec![false; graph.node_count()];
    for &n in component {
        member[n] = true;
    }

    let cycle = shortest_cycle(graph, &member, component[0]);
    let cycle_edges: Vec<EdgeRef> = cycle.iter().map(|&e| edge_ref(graph, ctx, e)).collect();

    let mut ranked: Vec<(usize, usize, EdgeRef)> = Vec::new();
    let last = cycle.len().saturating_sub(1);
    for (pos, (&e, edge)) in cycle.iter().zip(&cycle_edges).enumerate() {
        if edge.latchable && !cyclic_without(graph, &member, component, e) {
            ranked.push((pos, last - pos, edge.clone()));
        }
    }
    ranked.sort_by_key(|(pos, distance, edge)| (!edge.crosses_boundary, *distance, *pos));
    let suggested: Vec<EdgeRef> = ranked.into_iter().map(|(_, _, e)| e).collect();

    let bypassed: Vec<LatchId> = ctx
        .latches
        .iter()
        .filter(|latch| {
            latch.in_slot.is_some_and(|s| member[graph.slot(s)]) || member[graph.slot(latch.out_slot)]
        })
        .map(|latch| latch.id.clone())
        .collect();

    let scc_nodes: Vec<NodeRef> = component.iter().map(|&n| graph.node(n)).collect();
    let scc_labels: Vec<String> = scc_nodes.iter().map(|n| node_label(ctx, *n)).collect();

    let mut message = format!(
        "instantaneous cycle through {} node(s): {}",
        component.len(),
        path_text(&cycle_edges)
    );
    for latch in &bypassed {
        message.push_str(&format!(
            "\n  note: latch `{latch}` participates in this loop but its output edge \
             (previous-frame value) was not on the instantaneous path"
        ));
    }
    let any_latchable = component
        .iter()
        .any(|&n| source_latchable(ctx, graph.node(n)));
    match suggested.first() {
        Some(best) => {
            message.push_str("\n  help: ");
            message.push_str(&latch_hint(ctx, best));
        }
        None if !any_latchable => message.push_str(
            "\n  help: no edge in this loop can carry a latch: field values and domains \
             have no previous-frame default; break the loop on a signal connection",
        ),
        None => message.push_str(
            "\n  help: no single latch breaks every cycle here; \
             latch each loop separately",
        ),
    }

    CycleDiagnostic {
        scc_nodes,
        scc_labels,
        cycle_edges,
        suggested_latch_edges: suggested,
        bypassed_latches: bypassed,
        message,
    }
}

/// Shortest cycle through `start` inside the component, as edge indices.
fn shortest_cycle(graph: &DepGraph, member: &[bool], start: usize) -> Vec<usize> {
    let mut parent: Vec<Option<usize>> = vec![None; graph.node_count()];
    let mut seen = vec![false; graph.node_count()];
    let mut queue = VecDeque::from([start]);
    seen[start] = true;

    while let Some(u) = queue.pop_front() {
        for &e in graph.outgoing(u) {
            let w = graph.edges()[e].to;
            if !member[w] {
                continue;
            }
            if w == start {
                let mut path = vec![e];
                let mut cursor = u;
                while let Some(pe) = parent[cursor] {
                    path.push(pe);
                    cursor = graph.edges()[pe].from;
                }
                path.reverse();
                return path;
            }
            if !seen[w] {
                seen[w] = true;
                parent[w] = Some(e);
                queue.push_back(w);
            }
        }
    }
    Vec::new()
}

/// True if the component still has a cycle once edge `removed` is cut.
fn cyclic_without(graph: &DepGraph, member: &[bool], component: &[usize], removed: usize) -> bool {
    let mut degree = vec![0usize; graph.node_count()];
    for &n in component {
        for &e in graph.outgoing(n) {
            let to = graph.edges()[e].to;
            if e != removed && member[to] {
                degree[to] += 1;
            }
        }
    }
    let mut ready: Vec<usize> = component.iter().copied().filter(|&n| degree[n] == 0).collect();
    let mut done = 0;
    while let Some(n) = ready.pop() {
        done += 1;
        for &e in graph.outgoing(n) {
            let to = graph.edges()[e].to;
            if e != removed && member[to] {
                degree[to] -= 1;
                if degree[to] == 0 {
                    ready.push(to);
                }
            }
        }
    }
    done < component.len()
}

fn edge_ref(graph: &DepGraph, ctx: &CycleContext<'_>, index: usize) -> EdgeRef {
    let edge = graph.edges()[index];
    let from = graph.node(edge.from);
    let to = graph.node(edge.to);

    let consumer = match edge.kind {
        EdgeKind::Op(op) => ctx.ops.get(op.0 as usize).and_then(|o| o.block),
        _ => None,
    };
    let source_block = match from {
        NodeRef::Slot(s) => ctx.slots.block_of(s),
        _ => None,
    };
    let crosses_boundary = match edge.kind {
        EdgeKind::Publish(_) | EdgeKind::Listen(_) => true,
        _ => source_block != consumer,
    };
    let latchable = source_latchable(ctx, from);
    let wire = match (from, consumer) {
        (NodeRef::Slot(s), Some(block)) => ctx
            .wire_tags
            .iter()
            .find(|t| t.source == s && t.consumer_block == block)
            .map(|t| t.wire),
        _ => None,
    };

    EdgeRef {
        from,
        to,
        from_label: node_label(ctx, from),
        to_label: node_label(ctx, to),
        kind: edge.kind,
        consumer_block: consumer.and_then(|b| ctx.blocks.get(b).cloned()),
        crosses_boundary,
        latchable,
        wire,
    }
}

/// A signal latch needs a non-field source with a canonical zero.
fn source_latchable(ctx: &CycleContext<'_>, node: NodeRef) -> bool {
    match node {
        NodeRef::Slot(s) => ctx.slots.get(s).is_some_and(|info| {
            info.ty.world != World::Field && info.ty.domain.canonical_zero().is_some()
        }),
        _ => false,
    }
}

fn latch_hint(ctx: &CycleContext<'_>, edge: &EdgeRef) -> String {
    match (edge.kind, edge.wire) {
        (_, Some(wire)) => format!("insert a latch on {edge}: mark wire #{wire} as latched"),
        (EdgeKind::Publish(bus), None) => format!(
            "insert a latch between `{}` and bus `{}`: publish the previous-frame value instead",
            edge.from_label,
            bus_name(ctx, bus)
        ),
        (_, None) => match &edge.consumer_block {
            Some(block) => format!("insert a latch on {edge} inside block `{block}`"),
            None => format!("insert a state cell on {edge}"),
        },
    }
}

fn bus_name(ctx: &CycleContext<'_>, bus: BusId) -> String {
    ctx.buses
        .get(bus.0 as usize)
        .map_or_else(|| format!("#{}", bus.0), |decl| decl.name.clone())
}

fn node_label(ctx: &CycleContext<'_>, node: NodeRef) -> String {
    match node {
        NodeRef::Slot(s) => ctx.slots.label(s),
        NodeRef::Bus(b) => ctx
            .buses
            .get(b.0 as usize)
            .map_or_else(|| format!("bus #{}", b.0), |bus| format!("bus:{}", bus.name)),
        NodeRef::Commit(l) => ctx
            .latches
            .get(l)
            .map_or_else(|| format!("commit #{l}"), |latch| format!("commit:{}", latch.id)),
    }
}

fn path_text(edges: &[EdgeRef]) -> String {
    let Some(first) = edges.first() else {
        return String::new();
    };
    let mut text = first.from_label.clone();
    for edge in edges {
        text.push_str(" -> ");
        text.push_str(&edge.to_label);
    }
    text
}

/// Diagnostic for placeholders that forward to each other without a producer.
pub(crate) fn alias_loop(slots: &SlotTable, chain: &[SlotId]) -> CycleDiagnostic {
    let labels: Vec<String> = chain.iter().map(|s| slots.label(*s)).collect();
    let cycle_edges: Vec<EdgeRef> = chain
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let next = chain[(i + 1) % chain.len()];
            EdgeRef {
                from: NodeRef::Slot(s),
                to: NodeRef::Slot(next),
                from_label: labels[i].clone(),
                to_label: labels[(i + 1) % chain.len()].clone(),
                kind: EdgeKind::Alias,
                consumer_block: None,
                crosses_boundary: false,
                latchable: false,
                wire: None,
            }
        })
        .collect();
    let message = format!(
        "instantaneous cycle: placeholders forward to each other and nothing produces a value: {}",
        path_text(&cycle_edges)
    );
    CycleDiagnostic {
        scc_nodes: chain.iter().map(|s| NodeRef::Slot(*s)).collect(),
        scc_labels: labels,
        cycle_edges,
        suggested_latch_edges: Vec::new(),
        bypassed_latches: Vec::new(),
        message,
    }
}
