//! Persistent cross-frame state.
//!
//! [`StateStore`] is the single owner of everything that survives a frame:
//! committed latch values keyed by [`LatchId`], the resolved rail values, and
//! the root clock. It is mutated only by the runtime's latch-read/commit and
//! rail-resolve steps, and serializes with serde so that session resume,
//! scrubbing, and offline export all start from exactly the same memory.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::latch::{LatchDecl, LatchId, LatchKind};
use crate::rail::{RailId, TimeModel};
use crate::types::{DomainKey, FieldBuffer, Value};

/// Root clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    /// Root time after the most recent advance.
    pub time_ms: f64,
    /// Root time before the most recent advance.
    pub prev_time_ms: f64,
    /// Number of frames completed.
    pub frame: u64,
}

/// Stored state of one latch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEntry {
    /// Signal latch value.
    Signal(Value),
    /// Field latch buffer (carries its [`DomainKey`]).
    Field(FieldBuffer),
}

impl StateEntry {
    /// Kind of latch this entry belongs to.
    pub fn kind(&self) -> LatchKind {
        match self {
            StateEntry::Signal(_) => LatchKind::Signal,
            StateEntry::Field(_) => LatchKind::Field,
        }
    }

    fn compatible_with(&self, decl: &LatchDecl) -> bool {
        match self {
            StateEntry::Signal(v) => {
                decl.kind == LatchKind::Signal && v.fits(decl.value_type)
            }
            StateEntry::Field(buf) => {
                decl.kind == LatchKind::Field
                    && buf.stride == decl.value_type.domain.components()
                    && buf.is_consistent()
            }
        }
    }
}

/// Outcome of migrating a store to a new program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapReport {
    /// Latches whose stored state carried over.
    pub reused: Vec<LatchId>,
    /// Latches whose stored state was discarded because kind or type changed.
    pub reset: Vec<LatchId>,
    /// Latches the new program declares for the first time.
    pub introduced: Vec<LatchId>,
    /// Stored latches the new program no longer declares.
    pub dropped: Vec<LatchId>,
}

/// Persistent state for a running program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStore {
    clock: Clock,
    latches: BTreeMap<LatchId, StateEntry>,
    rails: BTreeMap<RailId, Value>,
}

impl StateStore {
    /// Creates an empty store at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root clock.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Stored entry of a latch.
    pub fn latch(&self, id: &LatchId) -> Option<&StateEntry> {
        self.latches.get(id)
    }

    /// Ids of every stored latch, sorted.
    pub fn latch_ids(&self) -> impl Iterator<Item = &LatchId> {
        self.latches.keys()
    }

    /// Number of stored latches.
    pub fn len(&self) -> usize {
        self.latches.len()
    }

    /// Returns true if no latch has committed yet.
    pub fn is_empty(&self) -> bool {
        self.latches.is_empty()
    }

    /// Field latches whose stored buffer length disagrees with its domain.
    ///
    /// Only a hand-edited or truncated snapshot produces these; the runtime
    /// cold-resets them on first read.
    pub fn inconsistent_latches(&self) -> Vec<&LatchId> {
        self.latches
            .iter()
            .filter(|(_, entry)| matches!(entry, StateEntry::Field(buf) if !buf.is_consistent()))
            .map(|(id, _)| id)
            .collect()
    }

    /// Value a rail resolved to at the end of the last frame.
    pub fn rail(&self, rail: RailId) -> Option<&Value> {
        self.rails.get(&rail)
    }

    pub(crate) fn advance_clock(&mut self, model: TimeModel, dt_ms: f64) {
        self.clock.prev_time_ms = self.clock.time_ms;
        self.clock.time_ms = model.advance(self.clock.time_ms, dt_ms);
    }

    pub(crate) fn finish_frame(&mut self) {
        self.clock.frame += 1;
    }

    pub(crate) fn set_rail(&mut self, rail: RailId, value: Value) {
        self.rails.insert(rail, value);
    }

    /// Previous value of a signal latch, or its init if nothing usable is stored.
    pub(crate) fn read_signal(&self, decl: &LatchDecl) -> Value {
        match self.latches.get(&decl.id) {
            Some(StateEntry::Signal(v)) if v.fits(decl.value_type) => v.clone(),
            _ => decl.init.clone(),
        }
    }

    /// Previous buffer of a field latch for `domain`.
    ///
    /// If the stored buffer was built for a different domain it is replaced by
    /// a cold init buffer and the old key is returned so the caller can emit
    /// exactly one reset event. A latch with no stored buffer starts cold
    /// without an event.
    pub(crate) fn read_field(
        &mut self,
        decl: &LatchDecl,
        domain: DomainKey,
    ) -> (FieldBuffer, Option<DomainKey>) {
        let stride = decl.value_type.domain.components();
        if let Some(StateEntry::Field(buf)) = self.latches.get(&decl.id) {
            if buf.domain == domain && buf.stride == stride && buf.is_consistent() {
                return (buf.clone(), None);
            }
        }
        let previous = match self.latches.get(&decl.id) {
            Some(StateEntry::Field(buf)) => Some(buf.domain),
            _ => None,
        };
        let mut init = decl.init.components().unwrap_or_default();
        init.resize(stride, 0.0);
        let cold = FieldBuffer::filled(domain, &init);
        if previous.is_some() {
            self.latches
                .insert(decl.id.clone(), StateEntry::Field(cold.clone()));
        }
        (cold, previous)
    }

    pub(crate) fn commit_signal(&mut self, id: &LatchId, value: Value) {
        self.latches.insert(id.clone(), StateEntry::Signal(value));
    }

    pub(crate) fn commit_field(&mut self, id: &LatchId, buffer: FieldBuffer) {
        self.latches.insert(id.clone(), StateEntry::Field(buffer));
    }

    /// Keeps entries a new program can reuse and discards the rest.
    pub(crate) fn migrate(&mut self, latches: &[LatchDecl]) -> SwapReport {
        let mut report = SwapReport::default();
        let declared: BTreeSet<&LatchId> = latches.iter().map(|d| &d.id).collect();

        let stale: Vec<LatchId> = self
            .latches
            .keys()
            .filter(|id| !declared.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.latches.remove(&id);
            report.dropped.push(id);
        }

        for decl in latches {
            match self.latches.get(&decl.id) {
                Some(entry) if entry.compatible_with(decl) => report.reused.push(decl.id.clone()),
                Some(_) => {
                    self.latches.remove(&decl.id);
                    report.reset.push(decl.id.clone());
                }
                None => report.introduced.push(decl.id.clone()),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotId;
    use crate::types::{Domain, TypeDesc};

    fn signal_decl(id: &str) -> LatchDecl {
        LatchDecl {
            id: LatchId::new(id),
            kind: LatchKind::Signal,
            value_type: TypeDesc::signal(Domain::Float),
            in_slot: Some(SlotId(0)),
            out_slot: SlotId(1),
            domain_slot: None,
            init: Value::Float(7.0),
        }
    }

    fn field_decl(id: &str) -> LatchDecl {
        LatchDecl {
            id: LatchId::new(id),
            kind: LatchKind::Field,
            value_type: TypeDesc::field(Domain::Float),
            in_slot: Some(SlotId(0)),
            out_slot: SlotId(1),
            domain_slot: Some(SlotId(2)),
            init: Value::Float(0.5),
        }
    }

    #[test]
    fn signal_read_falls_back_to_init() {
        let mut store = StateStore::new();
        let decl = signal_decl("a");
        assert_eq!(store.read_signal(&decl), Value::Float(7.0));
        store.commit_signal(&decl.id, Value::Float(1.0));
        assert_eq!(store.read_signal(&decl), Value::Float(1.0));
    }

    #[test]
    fn field_read_resets_once_on_domain_change() {
        let mut store = StateStore::new();
        let decl = field_decl("f");
        let d4 = DomainKey::new(4, 1);
        let d6 = DomainKey::new(6, 1);

        let (cold, prev) = store.read_field(&decl, d4);
        assert_eq!(prev, None);
        assert_eq!(cold.data, vec![0.5; 4]);

        store.commit_field(&decl.id, FieldBuffer::filled(d4, &[2.0]));
        let (buf, prev) = store.read_field(&decl, d4);
        assert_eq!(prev, None);
        assert_eq!(buf.data, vec![2.0; 4]);

        let (buf, prev) = store.read_field(&decl, d6);
        assert_eq!(prev, Some(d4));
        assert_eq!(buf.data, vec![0.5; 6]);

        let (_, prev) = store.read_field(&decl, d6);
        assert_eq!(prev, None);
    }

    #[test]
    fn truncated_field_buffer_is_reset() {
        let mut store = StateStore::new();
        let decl = field_decl("f");
        let d4 = DomainKey::new(4, 1);
        store.commit_field(
            &decl.id,
            FieldBuffer {
                domain: d4,
                stride: 1,
                data: vec![2.0, 2.0],
            },
        );
        assert_eq!(store.inconsistent_latches(), vec![&decl.id]);

        let (buf, prev) = store.read_field(&decl, d4);
        assert_eq!(prev, Some(d4));
        assert_eq!(buf.data, vec![0.5; 4]);
        assert!(store.inconsistent_latches().is_empty());
    }

    #[test]
    fn migrate_resets_truncated_field_buffer() {
        let mut store = StateStore::new();
        let decl = field_decl("f");
        store.commit_field(
            &decl.id,
            FieldBuffer {
                domain: DomainKey::new(3, 1),
                stride: 1,
                data: vec![1.0],
            },
        );
        let report = store.migrate(std::slice::from_ref(&decl));
        assert_eq!(report.reset, vec![decl.id.clone()]);
        assert!(store.is_empty());
    }

    #[test]
    fn migrate_partitions_ids() {
        let mut store = StateStore::new();
        store.commit_signal(&LatchId::new("keep"), Value::Float(1.0));
        store.commit_signal(&LatchId::new("gone"), Value::Float(2.0));
        store.commit_signal(&LatchId::new("retyped"), Value::Float(3.0));

        let mut retyped = field_decl("retyped");
        retyped.value_type = TypeDesc::field(Domain::Float);
        let report = store.migrate(&[signal_decl("keep"), retyped, signal_decl("new")]);

        assert_eq!(report.reused, vec![LatchId::new("keep")]);
        assert_eq!(report.reset, vec![LatchId::new("retyped")]);
        assert_eq!(report.introduced, vec![LatchId::new("new")]);
        assert_eq!(report.dropped, vec![LatchId::new("gone")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clock_respects_time_model() {
        let mut store = StateStore::new();
        store.advance_clock(TimeModel::Finite { duration_ms: 20.0 }, 16.0);
        store.advance_clock(TimeModel::Finite { duration_ms: 20.0 }, 16.0);
        assert_eq!(store.clock().time_ms, 20.0);
        assert_eq!(store.clock().prev_time_ms, 16.0);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut store = StateStore::new();
        store.commit_signal(&LatchId::new("a"), Value::Float(0.1 + 0.2));
        store.commit_field(
            &LatchId::new("b"),
            FieldBuffer::filled(DomainKey::new(2, 9), &[1.0, 2.0]),
        );
        store.set_rail(RailId::PhaseA, Value::Float(0.25));
        store.advance_clock(TimeModel::Infinite, 16.67);
        let json = serde_json::to_string(&store).unwrap();
        let back: StateStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
