//! Frame executor.
//!
//! [`Runtime`] owns an installed [`Program`], the persistent [`StateStore`],
//! and the per-frame value store. Each call to [`Runtime::run_frame`] walks
//! the program's schedule once:
//!
//! ```text
//! advance clock → generate rail candidates
//!   → LatchRead (latches, rails) → Compute → RailResolve → LatchCommit
//! ```
//!
//! The value store is rebuilt every frame; only latch commits, rail
//! resolution, and the clock touch the state store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::compile::Program;
use crate::error::{DiagnosticEvent, RuntimeError};
use crate::latch::LatchKind;
use crate::op::{FrameContext, KernelFault, OpId};
use crate::rail::{self, RailId, RailValues};
use crate::schedule::Step;
use crate::slot::{SlotId, SlotTable};
use crate::state::{Clock, StateStore, SwapReport};
use crate::types::{FieldValue, MAX_FIELD_ELEMENTS, Value};

/// What happened during one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    /// Index of the frame (0 for the first frame run on a fresh store).
    pub frame: u64,
    /// Root time after this frame's advance.
    pub time_ms: f64,
    /// Delta the frame was run with.
    pub dt_ms: f64,
    /// Non-fatal diagnostics raised this frame.
    pub events: Vec<DiagnosticEvent>,
}

/// Frame-ephemeral slot values. Every slot is written at most once per frame.
#[derive(Debug, Clone, Default)]
struct ValueStore {
    values: Vec<Option<Value>>,
}

impl ValueStore {
    fn reset(&mut self, len: usize) {
        self.values.clear();
        self.values.resize(len, None);
    }

    fn get(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(slot.index() as usize).and_then(Option::as_ref)
    }

    fn read(&self, slot: SlotId, slots: &SlotTable) -> Result<&Value, RuntimeError> {
        self.get(slot).ok_or_else(|| RuntimeError::UninitializedSlot {
            slot,
            label: slots.label(slot),
        })
    }

    fn read_all(&self, inputs: &[SlotId], slots: &SlotTable) -> Result<Vec<&Value>, RuntimeError> {
        inputs.iter().map(|s| self.read(*s, slots)).collect()
    }

    fn write(&mut self, slot: SlotId, value: Value, slots: &SlotTable) -> Result<(), RuntimeError> {
        let Some(entry) = self.values.get_mut(slot.index() as usize) else {
            return Err(RuntimeError::UninitializedSlot {
                slot,
                label: slots.label(slot),
            });
        };
        if entry.is_some() {
            return Err(RuntimeError::SlotWrittenTwice {
                slot,
                label: slots.label(slot),
            });
        }
        *entry = Some(value);
        Ok(())
    }
}

/// Everything a step may touch, borrowed apart so the program stays shared.
struct Frame<'a> {
    program: &'a Program,
    values: &'a mut ValueStore,
    state: &'a mut StateStore,
    internal: &'a RailValues,
    ctx: FrameContext<'a>,
    reported: &'a mut BTreeSet<RailId>,
    events: &'a mut Vec<DiagnosticEvent>,
}

impl Frame<'_> {
    fn execute(&mut self, step: &Step) -> Result<(), RuntimeError> {
        let program = self.program;
        let slots = &program.slots;
        match step {
            Step::LatchRead { latch, out } => {
                let value = self.state.read_signal(&program.latches[*latch]);
                self.values.write(*out, value, slots)
            }
            Step::RailRead { rail, out } => {
                let value = match self.state.rail(*rail) {
                    Some(v) => v.clone(),
                    None => rail::generate(&program.rails, &Clock::default())[rail.index()]
                        .clone(),
                };
                self.values.write(*out, value, slots)
            }
            Step::FieldLatchRead { latch, out, domain } => {
                let decl = &program.latches[*latch];
                let key = self.values.read(*domain, slots)?.as_domain().ok_or_else(|| {
                    RuntimeError::Latch {
                        latch: decl.id.clone(),
                        detail: "domain slot does not hold a domain".to_string(),
                    }
                })?;
                if key.count > MAX_FIELD_ELEMENTS {
                    return Err(RuntimeError::Latch {
                        latch: decl.id.clone(),
                        detail: format!(
                            "domain of {} elements exceeds the limit of {MAX_FIELD_ELEMENTS}",
                            key.count
                        ),
                    });
                }
                let (buffer, previous) = self.state.read_field(decl, key);
                if let Some(previous) = previous {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        latch = %decl.id,
                        %previous,
                        current = %key,
                        "field latch reset after domain change"
                    );
                    self.events.push(DiagnosticEvent::LatchDomainReset {
                        latch: decl.id.clone(),
                        previous,
                        current: key,
                    });
                }
                self.values
                    .write(*out, Value::Field(FieldValue::Buffer(buffer)), slots)
            }
            Step::Compute { op } => {
                let node = &program.ops[op.index() as usize];
                let out_ty = slots
                    .get(node.output)
                    .map(|info| info.ty)
                    .ok_or_else(|| RuntimeError::UninitializedSlot {
                        slot: node.output,
                        label: node.output.to_string(),
                    })?;
                let value = {
                    let args = self.values.read_all(&node.inputs, slots)?;
                    node.kind
                        .eval(out_ty, &args, &self.ctx)
                        .map_err(|fault| kernel_error(*op, fault))?
                };
                self.values.write(node.output, value, slots)
            }
            Step::BusEval { bus, out, sources } => {
                let decl = &program.buses[bus.index() as usize];
                let value = {
                    let args = self.values.read_all(sources, slots)?;
                    decl.mode
                        .combine(&args)
                        .unwrap_or_else(|| decl.silent.clone())
                };
                self.values.write(*out, value, slots)
            }
            Step::RailResolve { rail, sources } => {
                let policy = program.rails.policy(*rail);
                let (value, conflict) = {
                    let args = self.values.read_all(sources, slots)?;
                    rail::resolve(*rail, policy, &self.internal[rail.index()], &args)
                };
                if conflict && self.reported.insert(*rail) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        %rail,
                        publishers = sources.len(),
                        "publishers into a normalled rail are ignored"
                    );
                    self.events.push(DiagnosticEvent::RailDriveConflict {
                        rail: *rail,
                        publishers: sources.len(),
                    });
                }
                self.state.set_rail(*rail, value);
                Ok(())
            }
            Step::LatchCommit { latch, input } => {
                let decl = &program.latches[*latch];
                let value = self.values.read(*input, slots)?.clone();
                match (decl.kind, value) {
                    (LatchKind::Signal, value) => {
                        self.state.commit_signal(&decl.id, value);
                        Ok(())
                    }
                    (LatchKind::Field, Value::Field(FieldValue::Buffer(buffer))) => {
                        self.state.commit_field(&decl.id, buffer);
                        Ok(())
                    }
                    (LatchKind::Field, other) => Err(RuntimeError::Latch {
                        latch: decl.id.clone(),
                        detail: format!("cannot commit a {}", other.kind_name()),
                    }),
                }
            }
        }
    }
}

fn kernel_error(op: OpId, fault: KernelFault) -> RuntimeError {
    match fault {
        KernelFault::Type(detail) => RuntimeError::Kernel { op, detail },
        KernelFault::DomainMismatch(left, right) => RuntimeError::DomainMismatch { op, left, right },
        KernelFault::DomainTooLarge(requested) => RuntimeError::DomainTooLarge {
            op,
            requested,
            max: MAX_FIELD_ELEMENTS,
        },
    }
}

/// Executes a compiled program frame by frame.
///
/// # Example
///
/// ```
/// use rill_core::{BinaryFn, Domain, ProgramBuilder, Runtime, TypeDesc, Value};
///
/// let mut b = ProgramBuilder::new();
/// let cell = b.state_cell("acc", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
/// let dt = b.delta_time();
/// let next = b.binary(BinaryFn::Add, cell.prev(), dt);
/// b.commit(cell, next);
/// b.output("elapsed", next);
///
/// let mut runtime = Runtime::new(b.compile().into_result().unwrap());
/// runtime.run_frame(10.0).unwrap();
/// runtime.run_frame(10.0).unwrap();
/// assert_eq!(runtime.output("elapsed"), Some(&Value::Float(20.0)));
/// ```
#[derive(Debug, Clone)]
pub struct Runtime {
    program: Arc<Program>,
    state: StateStore,
    values: ValueStore,
    inputs: BTreeMap<String, Value>,
    report: FrameReport,
    reported_conflicts: BTreeSet<RailId>,
}

impl Runtime {
    /// Installs `program` over an empty state store.
    pub fn new(program: impl Into<Arc<Program>>) -> Self {
        Self {
            program: program.into(),
            state: StateStore::new(),
            values: ValueStore::default(),
            inputs: BTreeMap::new(),
            report: FrameReport::default(),
            reported_conflicts: BTreeSet::new(),
        }
    }

    /// Installs `program` over a restored state store.
    ///
    /// Entries the program cannot reuse are discarded, exactly as in
    /// [`restore`](Self::restore).
    pub fn with_state(program: impl Into<Arc<Program>>, state: StateStore) -> Self {
        let mut runtime = Self::new(program);
        runtime.restore(state);
        runtime
    }

    /// Runs one frame of `dt_ms` milliseconds.
    ///
    /// The frame runs against a staged copy of the state store. A frame that
    /// fails leaves the clock, rails, latches, and outputs exactly as they were
    /// before the call.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidDelta`] for a negative or non-finite delta.
    /// [`RuntimeError::DomainMismatch`] and [`RuntimeError::DomainTooLarge`]
    /// when host inputs reshape fields inconsistently. The other variants
    /// indicate a corrupted schedule.
    pub fn run_frame(&mut self, dt_ms: f64) -> Result<&FrameReport, RuntimeError> {
        if !dt_ms.is_finite() || dt_ms < 0.0 {
            return Err(RuntimeError::InvalidDelta(dt_ms));
        }
        let program = Arc::clone(&self.program);
        let mut values = ValueStore::default();
        values.reset(program.slots.len());
        let mut state = self.state.clone();
        let mut reported = self.reported_conflicts.clone();
        state.advance_clock(program.rails.time_model, dt_ms);
        let clock = state.clock();
        let internal = rail::generate(&program.rails, &clock);
        let mut events = Vec::new();

        let mut frame = Frame {
            program: &program,
            values: &mut values,
            state: &mut state,
            internal: &internal,
            ctx: FrameContext {
                dt_ms,
                time_ms: clock.time_ms,
                frame: clock.frame,
                inputs: &self.inputs,
            },
            reported: &mut reported,
            events: &mut events,
        };
        for step in program.schedule.steps() {
            frame.execute(step)?;
        }

        state.finish_frame();
        self.state = state;
        self.values = values;
        self.reported_conflicts = reported;
        self.report = FrameReport {
            frame: clock.frame,
            time_ms: clock.time_ms,
            dt_ms,
            events,
        };
        Ok(&self.report)
    }

    /// Sets a host input for subsequent frames.
    ///
    /// # Errors
    ///
    /// Unknown names and values of the wrong kind are rejected.
    pub fn set_input(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.check_input(name, &value)?;
        self.inputs.insert(name.to_string(), value);
        Ok(())
    }

    /// Replaces every host input at once. Nothing changes if any entry is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Same as [`set_input`](Self::set_input).
    pub fn set_inputs(&mut self, inputs: BTreeMap<String, Value>) -> Result<(), RuntimeError> {
        for (name, value) in &inputs {
            self.check_input(name, value)?;
        }
        self.inputs = inputs;
        Ok(())
    }

    fn check_input(&self, name: &str, value: &Value) -> Result<(), RuntimeError> {
        let ty = self
            .program
            .inputs
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownInput(name.to_string()))?;
        if value.fits(*ty) {
            Ok(())
        } else {
            Err(RuntimeError::InputType {
                name: name.to_string(),
                expected: ty.to_string(),
                found: value.kind_name(),
            })
        }
    }

    /// Removes a host input so it reads its default again.
    pub fn clear_input(&mut self, name: &str) -> Option<Value> {
        self.inputs.remove(name)
    }

    /// Current host inputs.
    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Value of output `name` after the last frame.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.program.output(name).and_then(|s| self.values.get(s))
    }

    /// All outputs after the last frame.
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.program
            .outputs
            .iter()
            .filter_map(|(name, slot)| Some((name.clone(), self.values.get(*slot)?.clone())))
            .collect()
    }

    /// Value of any slot after the last frame.
    pub fn value(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(slot)
    }

    /// Persistent state.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Copy of the persistent state, for saving or scrubbing.
    pub fn snapshot(&self) -> StateStore {
        self.state.clone()
    }

    /// Replaces the persistent state, keeping only entries the installed
    /// program can reuse.
    pub fn restore(&mut self, state: StateStore) -> SwapReport {
        self.state = state;
        self.values.reset(0);
        self.report = FrameReport::default();
        self.state.migrate(&self.program.latches)
    }

    /// Installs a new program, carrying over state by latch id.
    ///
    /// Inputs the new program still declares with the same type are kept.
    pub fn swap_program(&mut self, program: impl Into<Arc<Program>>) -> SwapReport {
        self.program = program.into();
        let declared = &self.program.inputs;
        self.inputs
            .retain(|name, value| declared.get(name).is_some_and(|ty| value.fits(*ty)));
        self.values.reset(0);
        self.reported_conflicts.clear();
        let report = self.state.migrate(&self.program.latches);

        #[cfg(feature = "tracing")]
        tracing::info!(
            reused = report.reused.len(),
            reset = report.reset.len(),
            introduced = report.introduced.len(),
            dropped = report.dropped.len(),
            "program swapped"
        );

        report
    }

    /// Installed program.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Report of the last frame run.
    pub fn last_report(&self) -> &FrameReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CombineMode;
    use crate::latch::LatchId;
    use crate::op::{BinaryFn, OpKind};
    use crate::program::ProgramBuilder;
    use crate::rail::{DrivePolicy, RailsConfig};
    use crate::state::StateEntry;
    use crate::types::{Domain, TypeDesc};

    fn float() -> TypeDesc {
        TypeDesc::signal(Domain::Float)
    }

    fn counter() -> Program {
        let mut b = ProgramBuilder::new();
        let cell = b.state_cell("count", float(), Value::Float(5.0), None);
        let one = b.constant(Value::Float(1.0));
        let next = b.binary(BinaryFn::Add, cell.prev(), one);
        b.output("prev", cell.prev());
        b.commit(cell, next);
        b.compile().into_result().unwrap()
    }

    #[test]
    fn latch_reads_previous_commit() {
        let mut rt = Runtime::new(counter());
        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("prev"), Some(&Value::Float(5.0)));
        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("prev"), Some(&Value::Float(6.0)));
        assert_eq!(
            rt.state().latch(&LatchId::new("count")),
            Some(&StateEntry::Signal(Value::Float(7.0)))
        );
    }

    #[test]
    fn negative_delta_is_rejected() {
        let mut rt = Runtime::new(counter());
        assert_eq!(
            rt.run_frame(-1.0).unwrap_err(),
            RuntimeError::InvalidDelta(-1.0)
        );
        assert!(rt.run_frame(f64::NAN).is_err());
    }

    #[test]
    fn first_frame_time_is_dt() {
        let mut rt = Runtime::new(counter());
        let report = rt.run_frame(16.0).unwrap();
        assert_eq!(report.frame, 0);
        assert_eq!(report.time_ms, 16.0);
        assert_eq!(rt.state().clock().frame, 1);
    }

    #[test]
    fn inputs_are_type_checked() {
        let mut b = ProgramBuilder::new();
        let speed = b.input("speed", Domain::Float, Value::Float(1.0));
        b.output("speed", speed);
        let mut rt = Runtime::new(b.compile().into_result().unwrap());

        rt.run_frame(1.0).unwrap();
        assert_eq!(rt.output("speed"), Some(&Value::Float(1.0)));
        rt.set_input("speed", Value::Float(3.0)).unwrap();
        rt.run_frame(1.0).unwrap();
        assert_eq!(rt.output("speed"), Some(&Value::Float(3.0)));

        assert!(matches!(
            rt.set_input("speed", Value::Bool(true)),
            Err(RuntimeError::InputType { .. })
        ));
        assert_eq!(
            rt.set_input("nope", Value::Float(0.0)),
            Err(RuntimeError::UnknownInput("nope".into()))
        );
    }

    #[test]
    fn normalled_rail_conflict_is_reported_once() {
        let mut b = ProgramBuilder::new();
        let one = b.constant(Value::Float(1.0));
        b.publish("energy", one, 0);
        let energy = b.listen("energy");
        b.output("energy", energy);
        let mut rt = Runtime::new(b.compile().into_result().unwrap());

        let first = rt.run_frame(16.0).unwrap().events.clone();
        assert_eq!(
            first,
            vec![DiagnosticEvent::RailDriveConflict {
                rail: RailId::Energy,
                publishers: 1
            }]
        );
        assert!(rt.run_frame(16.0).unwrap().events.is_empty());
        assert_eq!(rt.output("energy"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn mixed_energy_is_visible_next_frame() {
        let rails = RailsConfig::default().with_policy(RailId::Energy, DrivePolicy::Mixed);
        let mut b = ProgramBuilder::with_rails(rails);
        let two = b.constant(Value::Float(2.0));
        b.publish("energy", two, 0);
        let energy = b.listen("energy");
        b.output("energy", energy);
        let mut rt = Runtime::new(b.compile().into_result().unwrap());

        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("energy"), Some(&Value::Float(0.0)));
        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("energy"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn empty_bus_reads_silent_value() {
        let mut b = ProgramBuilder::new();
        b.bus(
            "tint",
            TypeDesc::signal(Domain::Color),
            CombineMode::Layer,
            Some(Value::Color([0.1, 0.2, 0.3, 1.0])),
        );
        let tint = b.listen("tint");
        b.output("tint", tint);
        let mut rt = Runtime::new(b.compile().into_result().unwrap());
        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("tint"), Some(&Value::Color([0.1, 0.2, 0.3, 1.0])));
    }

    #[test]
    fn swap_keeps_matching_latches() {
        let mut rt = Runtime::new(counter());
        rt.run_frame(16.0).unwrap();
        rt.run_frame(16.0).unwrap();

        let report = rt.swap_program(counter());
        assert_eq!(report.reused, vec![LatchId::new("count")]);
        rt.run_frame(16.0).unwrap();
        assert_eq!(rt.output("prev"), Some(&Value::Float(7.0)));
    }

    #[test]
    fn swap_resets_retyped_latch() {
        let mut rt = Runtime::new(counter());
        rt.run_frame(16.0).unwrap();

        let mut b = ProgramBuilder::new();
        let cell = b.state_cell(
            "count",
            TypeDesc::signal(Domain::Vec2),
            Value::Vec2([0.0, 0.0]),
            None,
        );
        let prev = cell.prev();
        b.commit(cell, prev);
        let report = rt.swap_program(b.compile().into_result().unwrap());
        assert_eq!(report.reset, vec![LatchId::new("count")]);
    }

    #[test]
    fn field_domain_mismatch_is_a_runtime_error() {
        let mut b = ProgramBuilder::new();
        let three = b.constant(Value::Float(3.0));
        let four = b.constant(Value::Float(4.0));
        let d3 = b.op(OpKind::MakeDomain { identity: 1 }, &[three]);
        let d4 = b.op(OpKind::MakeDomain { identity: 1 }, &[four]);
        let r3 = b.op(OpKind::FieldRamp, &[d3]);
        let r4 = b.op(OpKind::FieldRamp, &[d4]);
        let sum = b.binary(BinaryFn::Add, r3, r4);
        b.output("sum", sum);
        let mut rt = Runtime::new(b.compile().into_result().unwrap());
        assert!(matches!(
            rt.run_frame(16.0),
            Err(RuntimeError::DomainMismatch { .. })
        ));
    }
}
