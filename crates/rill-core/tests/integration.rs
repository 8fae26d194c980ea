//! Integration tests for rill-core.
//!
//! Exercises the compiler, runtime, and drivers together: latch round trips
//! through serialized snapshots, field latch resets, bus combine ordering,
//! rail feedback, cycle rejection, and live/export determinism.

use std::sync::Arc;

use rill_core::{
    BinaryFn, CombineMode, CompileError, DiagnosticEvent, Domain, DrivePolicy, LatchId,
    OfflineExport, OpKind, Program, ProgramBuilder, RailId, RailsConfig, ReduceFn, Runtime,
    StateStore, Transport, TypeDesc, UnaryFn, Value,
};

const FRAME_MS: f64 = 16.67;

fn float() -> TypeDesc {
    TypeDesc::signal(Domain::Float)
}

/// `pos += speed * dt`, plus a sine of the phaseA rail to exercise rail reads.
fn motion() -> Program {
    let mut b = ProgramBuilder::new();
    let pos = b.state_cell("pos", float(), Value::Float(0.0), None);
    let speed = b.input("speed", Domain::Float, Value::Float(1.0));
    let dt = b.delta_time();
    let step = b.binary(BinaryFn::Mul, speed, dt);
    let next = b.binary(BinaryFn::Add, pos.prev(), step);
    b.commit(pos, next);
    let phase = b.listen("phaseA");
    let wobble = b.unary(UnaryFn::Sin, phase);
    b.output("pos", next);
    b.output("wobble", wobble);
    b.compile().into_result().unwrap()
}

// ============================================================================
// 1. State round trips
// ============================================================================

#[test]
fn snapshot_survives_json_round_trip() {
    let mut live = Runtime::new(motion());
    for _ in 0..5 {
        live.run_frame(FRAME_MS).unwrap();
    }
    let json = serde_json::to_string(live.state()).unwrap();
    let restored: StateStore = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, live.state());

    let mut resumed = Runtime::with_state(motion(), restored);
    for _ in 0..5 {
        live.run_frame(FRAME_MS).unwrap();
        resumed.run_frame(FRAME_MS).unwrap();
        assert_eq!(live.outputs(), resumed.outputs());
    }
    assert_eq!(live.snapshot(), resumed.snapshot());
}

#[test]
fn latch_delivers_value_committed_last_frame() {
    let mut b = ProgramBuilder::new();
    let cell = b.state_cell("echo", float(), Value::Float(-1.0), None);
    let t = b.input("x", Domain::Float, Value::Float(0.0));
    let prev = cell.prev();
    b.commit(cell, t);
    b.output("echo", prev);
    let mut rt = Runtime::new(b.compile().into_result().unwrap());

    let mut seen = Vec::new();
    for x in [1.0, 2.0, 3.0] {
        rt.set_input("x", Value::Float(x)).unwrap();
        rt.run_frame(FRAME_MS).unwrap();
        seen.push(rt.output("echo").and_then(Value::as_float).unwrap());
    }
    assert_eq!(seen, vec![-1.0, 1.0, 2.0]);
    assert!(rt.state().latch(&LatchId::new("echo")).is_some());
}

// ============================================================================
// 2. Field latches
// ============================================================================

#[test]
fn field_domain_change_resets_once() {
    let mut b = ProgramBuilder::new();
    let count = b.input("count", Domain::Float, Value::Float(3.0));
    let domain = b.op(OpKind::MakeDomain { identity: 7 }, &[count]);
    let trail = b.state_cell(
        "trail",
        TypeDesc::field(Domain::Float),
        Value::Float(0.0),
        Some(domain),
    );
    let ramp = b.op(OpKind::FieldRamp, &[domain]);
    let lazy = b.binary(BinaryFn::Add, trail.prev(), ramp);
    let next = b.materialize(lazy);
    b.commit(trail, next);
    let total = b.op(OpKind::FieldReduce(ReduceFn::Sum), &[next]);
    b.output("total", total);
    let mut rt = Runtime::new(b.compile().into_result().unwrap());

    for _ in 0..3 {
        let report = rt.run_frame(FRAME_MS).unwrap();
        assert!(report.events.is_empty());
    }

    rt.set_input("count", Value::Float(5.0)).unwrap();
    let events = rt.run_frame(FRAME_MS).unwrap().events.clone();
    let resets: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, DiagnosticEvent::LatchDomainReset { .. }))
        .collect();
    assert_eq!(resets.len(), 1);

    // the new domain is stored, so the next frame is quiet again
    assert!(rt.run_frame(FRAME_MS).unwrap().events.is_empty());
}

// ============================================================================
// 3. Buses
// ============================================================================

fn bus_program(mode: CombineMode, publishers: &[(f64, i32)]) -> Program {
    let mut b = ProgramBuilder::new();
    b.bus("level", float(), mode, None);
    for (value, key) in publishers {
        let c = b.constant(Value::Float(*value));
        b.publish("level", c, *key);
    }
    let level = b.listen("level");
    b.output("level", level);
    b.compile().into_result().unwrap()
}

fn first_frame(program: Program, output: &str) -> Value {
    let mut rt = Runtime::new(program);
    rt.run_frame(FRAME_MS).unwrap();
    rt.output(output).cloned().unwrap()
}

#[test]
fn sum_ignores_sort_keys() {
    let a = first_frame(bus_program(CombineMode::Sum, &[(2.0, 0), (3.0, 1)]), "level");
    let b = first_frame(bus_program(CombineMode::Sum, &[(2.0, 1), (3.0, 0)]), "level");
    assert_eq!(a, Value::Float(5.0));
    assert_eq!(a, b);
}

#[test]
fn last_picks_highest_sort_key() {
    let a = first_frame(bus_program(CombineMode::Last, &[(2.0, 0), (3.0, 1)]), "level");
    let b = first_frame(bus_program(CombineMode::Last, &[(2.0, 1), (3.0, 0)]), "level");
    assert_eq!(a, Value::Float(3.0));
    assert_eq!(b, Value::Float(2.0));
}

#[test]
fn same_frame_bus_feedback_is_rejected() {
    let mut b = ProgramBuilder::new();
    b.bus("level", float(), CombineMode::Sum, None);
    let level = b.listen("level");
    let one = b.constant(Value::Float(1.0));
    let louder = b.binary(BinaryFn::Add, level, one);
    b.publish("level", louder, 0);
    let report = b.compile();

    assert!(report.program.is_none());
    let cycle = report.cycles().next().unwrap();
    assert!(!cycle.suggested_latch_edges.is_empty());
    assert!(cycle.cycle_edges.len() >= 2);
    assert!(matches!(report.errors[0], CompileError::InstantCycle(_)));
}

// ============================================================================
// 4. Rails
// ============================================================================

#[test]
fn rail_feedback_reads_previous_frame() {
    let rails = RailsConfig::default().with_policy(RailId::Energy, DrivePolicy::Mixed);
    let mut b = ProgramBuilder::with_rails(rails);
    let energy = b.listen("energy");
    let one = b.constant(Value::Float(1.0));
    let boosted = b.binary(BinaryFn::Add, energy, one);
    b.publish("energy", boosted, 0);
    b.output("boosted", boosted);
    let mut rt = Runtime::new(b.compile().into_result().unwrap());

    let mut seen = Vec::new();
    for _ in 0..3 {
        rt.run_frame(FRAME_MS).unwrap();
        seen.push(rt.output("boosted").and_then(Value::as_float).unwrap());
    }
    assert_eq!(seen, vec![1.0, 2.0, 3.0]);
    assert_eq!(rt.state().rail(RailId::Energy), Some(&Value::Float(3.0)));
}

#[test]
fn rail_bound_to_a_bus_it_drives_reads_previous_frame() {
    // energy mirrors into `glow`, and `glow` publishes back into energy
    let rails = RailsConfig::default()
        .with_policy(RailId::Energy, DrivePolicy::Mixed)
        .with_binding(RailId::Energy, "glow");
    let mut b = ProgramBuilder::with_rails(rails);
    b.bus("glow", float(), CombineMode::Sum, None);
    let one = b.constant(Value::Float(1.0));
    b.publish("glow", one, 0);
    let glow = b.listen("glow");
    b.publish("energy", glow, 0);
    b.output("glow", glow);
    let report = b.compile();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let mut rt = Runtime::new(report.into_result().unwrap());

    let mut previous = 0.0;
    for _ in 0..4 {
        rt.run_frame(FRAME_MS).unwrap();
        let glow = rt.output("glow").and_then(Value::as_float).unwrap();
        assert_eq!(glow, previous + 1.0);
        previous = rt
            .state()
            .rail(RailId::Energy)
            .and_then(Value::as_float)
            .unwrap();
        assert_eq!(previous, glow);
    }
}

#[test]
fn normalled_rail_ignores_publishers() {
    let mut b = ProgramBuilder::new();
    let late = b.constant_of(Domain::Time, Value::Float(1.0e6));
    b.publish("time", late, 0);
    let time = b.listen("time");
    b.output("time", time);
    let report = b.compile();
    assert_eq!(report.warnings.len(), 1);

    let mut rt = Runtime::new(report.into_result().unwrap());
    rt.run_frame(10.0).unwrap();
    rt.run_frame(10.0).unwrap();
    assert_eq!(rt.output("time"), Some(&Value::Float(10.0)));
}

// ============================================================================
// 5. Determinism across drivers
// ============================================================================

#[test]
fn export_matches_live_playback() {
    let program = Arc::new(motion());
    let mut live = Runtime::new(Arc::clone(&program));
    let mut outputs = Vec::new();
    for _ in 0..60 {
        live.run_frame(FRAME_MS).unwrap();
        outputs.push(live.outputs());
    }

    let dts = vec![FRAME_MS; 60];
    let exported = OfflineExport::new(program).run(&dts, |_| {}).unwrap();
    assert_eq!(exported.final_state, live.snapshot());
    for (frame, live_outputs) in exported.frames.iter().zip(&outputs) {
        assert_eq!(&frame.outputs, live_outputs);
    }
}

#[test]
fn scrubbing_matches_live_playback() {
    let mut transport = Transport::new(Runtime::new(motion()));
    let mut states = vec![transport.runtime().snapshot()];
    for i in 0..30 {
        if i == 10 {
            transport.set_input("speed", Value::Float(-2.0)).unwrap();
        }
        transport.play(FRAME_MS).unwrap();
        states.push(transport.runtime().snapshot());
    }

    for target in [25, 3, 17, 0, 30] {
        transport.seek(target).unwrap();
        assert_eq!(transport.runtime().snapshot(), states[target], "frame {target}");
    }
}
