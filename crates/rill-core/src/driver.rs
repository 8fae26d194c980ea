//! Playback drivers: live transport with scrubbing, and offline export.
//!
//! Both drivers run the same [`Runtime::run_frame`] against the same initial
//! [`StateStore`], so a tick sequence produces bit-identical state whether it
//! was played live, replayed by a seek, or rendered in a batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compile::Program;
use crate::error::{DiagnosticEvent, RuntimeError};
use crate::runtime::{FrameReport, Runtime};
use crate::state::StateStore;
use crate::types::Value;

/// One simulation tick: a delta and the host inputs in effect for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Frame delta in milliseconds.
    pub dt_ms: f64,
    /// Complete host input map for the frame.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
}

impl Tick {
    /// Tick with no host inputs.
    pub fn new(dt_ms: f64) -> Self {
        Self {
            dt_ms,
            inputs: BTreeMap::new(),
        }
    }
}

/// Live playback that records every tick so any earlier frame can be
/// reconstructed exactly.
///
/// Seeking backwards restores the origin snapshot and replays the recorded
/// ticks; playing after a backwards seek discards the recorded future.
#[derive(Debug, Clone)]
pub struct Transport {
    runtime: Runtime,
    origin: StateStore,
    origin_inputs: BTreeMap<String, Value>,
    ticks: Vec<Tick>,
    position: usize,
}

impl Transport {
    /// Starts recording from the runtime's current state and inputs.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            origin: runtime.snapshot(),
            origin_inputs: runtime.inputs().clone(),
            runtime,
            ticks: Vec::new(),
            position: 0,
        }
    }

    /// Sets a host input for the next played frame.
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::set_input`].
    pub fn set_input(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.runtime.set_input(name, value)
    }

    /// Plays one new frame and records it.
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::run_frame`]. A failed frame is not recorded and
    /// leaves both the runtime and the recording untouched.
    pub fn play(&mut self, dt_ms: f64) -> Result<&FrameReport, RuntimeError> {
        let tick = Tick {
            dt_ms,
            inputs: self.runtime.inputs().clone(),
        };
        self.runtime.run_frame(dt_ms)?;
        self.ticks.truncate(self.position);
        self.ticks.push(tick);
        self.position += 1;
        Ok(self.runtime.last_report())
    }

    /// Re-runs the recorded tick at the current position, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::run_frame`].
    pub fn step(&mut self) -> Result<Option<&FrameReport>, RuntimeError> {
        let Some(tick) = self.ticks.get(self.position) else {
            return Ok(None);
        };
        self.runtime.set_inputs(tick.inputs.clone())?;
        self.runtime.run_frame(tick.dt_ms)?;
        self.position += 1;
        Ok(Some(self.runtime.last_report()))
    }

    /// Moves to the state after `frame` recorded frames (clamped to the
    /// recording).
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::run_frame`].
    pub fn seek(&mut self, frame: usize) -> Result<(), RuntimeError> {
        let target = frame.min(self.ticks.len());
        if target < self.position {
            self.runtime.restore(self.origin.clone());
            self.runtime.set_inputs(self.origin_inputs.clone())?;
            self.position = 0;
        }
        while self.position < target {
            let tick = &self.ticks[self.position];
            self.runtime.set_inputs(tick.inputs.clone())?;
            self.runtime.run_frame(tick.dt_ms)?;
            self.position += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("transport: seek to frame {target}");

        Ok(())
    }

    /// Frames played since the origin.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of recorded ticks.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Returns true if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Recorded ticks.
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Underlying runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Consumes the transport, returning the runtime.
    pub fn into_runtime(self) -> Runtime {
        self.runtime
    }
}

/// Outputs of one exported frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFrame {
    /// Frame index.
    pub frame: u64,
    /// Root time after the frame.
    pub time_ms: f64,
    /// Delta of the frame.
    pub dt_ms: f64,
    /// Every named output.
    pub outputs: BTreeMap<String, Value>,
    /// Diagnostics raised by the frame.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<DiagnosticEvent>,
}

/// Result of an offline export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    /// Exported frames, in order.
    pub frames: Vec<ExportFrame>,
    /// State after the last frame.
    pub final_state: StateStore,
}

/// Batch driver: runs a fresh runtime over a tick sequence.
#[derive(Debug, Clone)]
pub struct OfflineExport {
    program: Arc<Program>,
    initial: StateStore,
    inputs: BTreeMap<String, Value>,
}

impl OfflineExport {
    /// Export of `program` from an empty state store.
    pub fn new(program: impl Into<Arc<Program>>) -> Self {
        Self {
            program: program.into(),
            initial: StateStore::new(),
            inputs: BTreeMap::new(),
        }
    }

    /// Starts from a saved snapshot instead.
    pub fn with_state(mut self, state: StateStore) -> Self {
        self.initial = state;
        self
    }

    /// Holds a host input for every frame of [`run`](Self::run).
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Runs fixed deltas with the configured inputs, calling `on_frame` after
    /// each frame.
    ///
    /// # Errors
    ///
    /// Rejected inputs and [`Runtime::run_frame`] failures.
    pub fn run<F>(&self, dts: &[f64], on_frame: F) -> Result<ExportResult, RuntimeError>
    where
        F: FnMut(&ExportFrame),
    {
        let ticks: Vec<Tick> = dts
            .iter()
            .map(|dt| Tick {
                dt_ms: *dt,
                inputs: self.inputs.clone(),
            })
            .collect();
        self.run_ticks(&ticks, on_frame)
    }

    /// Runs recorded ticks, each with its own input map.
    ///
    /// # Errors
    ///
    /// Rejected inputs and [`Runtime::run_frame`] failures.
    pub fn run_ticks<F>(&self, ticks: &[Tick], mut on_frame: F) -> Result<ExportResult, RuntimeError>
    where
        F: FnMut(&ExportFrame),
    {
        let mut runtime = Runtime::with_state(Arc::clone(&self.program), self.initial.clone());
        let mut frames = Vec::with_capacity(ticks.len());
        for tick in ticks {
            runtime.set_inputs(tick.inputs.clone())?;
            let report = runtime.run_frame(tick.dt_ms)?.clone();
            let frame = ExportFrame {
                frame: report.frame,
                time_ms: report.time_ms,
                dt_ms: report.dt_ms,
                outputs: runtime.outputs(),
                events: report.events,
            };
            on_frame(&frame);
            frames.push(frame);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("export: {} frames", frames.len());

        Ok(ExportResult {
            frames,
            final_state: runtime.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{BinaryFn, OpKind, ReduceFn};
    use crate::program::ProgramBuilder;
    use crate::types::{Domain, TypeDesc};

    fn integrator() -> Program {
        let mut b = ProgramBuilder::new();
        let cell = b.state_cell("pos", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
        let speed = b.input("speed", Domain::Float, Value::Float(1.0));
        let dt = b.delta_time();
        let step = b.binary(BinaryFn::Mul, speed, dt);
        let next = b.binary(BinaryFn::Add, cell.prev(), step);
        b.commit(cell, next);
        b.output("pos", next);
        b.compile().into_result().unwrap()
    }

    /// A host-sized ramp added to a fixed three-element ramp.
    fn host_sized_fields() -> Program {
        let mut b = ProgramBuilder::new();
        let n = b.input("n", Domain::Float, Value::Float(3.0));
        let three = b.constant(Value::Float(3.0));
        let host = b.op(OpKind::MakeDomain { identity: 1 }, &[n]);
        let fixed = b.op(OpKind::MakeDomain { identity: 1 }, &[three]);
        let a = b.op(OpKind::FieldRamp, &[host]);
        let c = b.op(OpKind::FieldRamp, &[fixed]);
        let sum = b.binary(BinaryFn::Add, a, c);
        let total = b.op(OpKind::FieldReduce(ReduceFn::Sum), &[sum]);
        b.output("total", total);
        b.compile().into_result().unwrap()
    }

    #[test]
    fn failed_frame_leaves_no_trace() {
        let mut transport = Transport::new(Runtime::new(host_sized_fields()));
        transport.play(10.0).unwrap();
        let after_first = transport.runtime().snapshot();

        transport.set_input("n", Value::Float(4.0)).unwrap();
        assert!(matches!(
            transport.play(10.0),
            Err(RuntimeError::DomainMismatch { .. })
        ));
        assert_eq!(transport.runtime().snapshot(), after_first);
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.position(), 1);
        assert_eq!(transport.runtime().output("total"), Some(&Value::Float(3.0)));

        transport.set_input("n", Value::Float(3.0)).unwrap();
        transport.play(10.0).unwrap();
        let live = transport.runtime().snapshot();
        assert_eq!(live.clock().time_ms, 20.0);
        assert_eq!(live.clock().frame, 2);

        transport.seek(0).unwrap();
        transport.seek(2).unwrap();
        assert_eq!(transport.runtime().snapshot(), live);
    }

    #[test]
    fn failed_play_after_seek_keeps_recording() {
        let mut transport = Transport::new(Runtime::new(host_sized_fields()));
        transport.play(10.0).unwrap();
        transport.play(10.0).unwrap();
        transport.seek(1).unwrap();
        transport.set_input("n", Value::Float(5.0)).unwrap();
        assert!(transport.play(10.0).is_err());
        assert_eq!(transport.len(), 2);
    }

    #[test]
    fn seek_back_reproduces_live_state() {
        let mut transport = Transport::new(Runtime::new(integrator()));
        transport.play(10.0).unwrap();
        transport.set_input("speed", Value::Float(3.0)).unwrap();
        transport.play(10.0).unwrap();
        let live = transport.runtime().snapshot();
        transport.play(10.0).unwrap();

        transport.seek(2).unwrap();
        assert_eq!(transport.position(), 2);
        assert_eq!(transport.runtime().snapshot(), live);
        assert_eq!(
            transport.runtime().output("pos"),
            Some(&Value::Float(40.0))
        );
    }

    #[test]
    fn step_replays_recorded_future() {
        let mut transport = Transport::new(Runtime::new(integrator()));
        for _ in 0..3 {
            transport.play(5.0).unwrap();
        }
        let end = transport.runtime().snapshot();
        transport.seek(0).unwrap();
        while transport.step().unwrap().is_some() {}
        assert_eq!(transport.runtime().snapshot(), end);
    }

    #[test]
    fn play_after_seek_truncates() {
        let mut transport = Transport::new(Runtime::new(integrator()));
        transport.play(5.0).unwrap();
        transport.play(5.0).unwrap();
        transport.seek(1).unwrap();
        transport.play(7.0).unwrap();
        assert_eq!(transport.len(), 2);
        assert_eq!(transport.ticks()[1].dt_ms, 7.0);
    }

    #[test]
    fn export_matches_transport() {
        let program = Arc::new(integrator());
        let mut transport = Transport::new(Runtime::new(Arc::clone(&program)));
        for _ in 0..10 {
            transport.play(16.0).unwrap();
        }
        let result = OfflineExport::new(program)
            .run_ticks(transport.ticks(), |_| {})
            .unwrap();
        assert_eq!(result.final_state, transport.runtime().snapshot());
        assert_eq!(result.frames.len(), 10);
    }

    #[test]
    fn export_reports_each_frame() {
        let mut seen = Vec::new();
        let result = OfflineExport::new(integrator())
            .with_input("speed", Value::Float(2.0))
            .run(&[1.0, 2.0], |f| seen.push(f.frame))
            .unwrap();
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(result.frames[1].outputs["pos"], Value::Float(6.0));
    }

    #[test]
    fn export_rejects_unknown_input() {
        let err = OfflineExport::new(integrator())
            .with_input("nope", Value::Float(2.0))
            .run(&[1.0], |_| {})
            .unwrap_err();
        assert_eq!(err, RuntimeError::UnknownInput("nope".into()));
    }
}
