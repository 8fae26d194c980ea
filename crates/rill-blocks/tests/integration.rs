//! Integration tests for rill-blocks.
//!
//! Tests compile whole patches against the built-in registry and run them
//! through the core runtime and drivers.

use rill_blocks::BlockRegistry;
use rill_core::{
    CombineMode, CompileError, Domain, DrivePolicy, OfflineExport, Param, Patch, Runtime,
    Transport, Value, compile_patch,
};

const FRAME_MS: f64 = 16.67;

fn runtime(patch: &Patch) -> Runtime {
    let program = compile_patch(patch, &BlockRegistry::new())
        .into_result()
        .unwrap();
    Runtime::new(program)
}

fn float(rt: &Runtime, name: &str) -> f64 {
    rt.output(name).and_then(Value::as_float).unwrap()
}

// ============================================================================
// 1. Feedback
// ============================================================================

#[test]
fn state_block_closes_a_feedback_loop() {
    // speed = 1 - pos, with pos read back through a one-frame delay
    let patch = Patch::new()
        .block_with("one", "const", [("value", Param::Number(1.0))])
        .block("speed", "sub")
        .block("pos", "integrate")
        .block("prev", "delay")
        .wire(("one", "out"), ("speed", "a"))
        .wire(("prev", "out"), ("speed", "b"))
        .wire(("speed", "out"), ("pos", "in"))
        .wire(("pos", "out"), ("prev", "in"))
        .output("pos", ("pos", "out"));
    let mut rt = runtime(&patch);
    rt.run_frame(500.0).unwrap();
    assert_eq!(float(&rt, "pos"), 0.5);
    rt.run_frame(500.0).unwrap();
    assert_eq!(float(&rt, "pos"), 0.75);
}

#[test]
fn instantaneous_loop_suggests_a_wire_to_latch() {
    let mut patch = Patch::new()
        .block_with("one", "const", [("value", Param::Number(1.0))])
        .block("sum", "add")
        .block("half", "mul")
        .block_with("k", "const", [("value", Param::Number(0.5))])
        .wire(("one", "out"), ("sum", "a"))
        .wire(("half", "out"), ("sum", "b"))
        .wire(("sum", "out"), ("half", "a"))
        .wire(("k", "out"), ("half", "b"))
        .output("sum", ("sum", "out"));

    let report = compile_patch(&patch, &BlockRegistry::new());
    assert!(report.program.is_none());
    let cycles: Vec<_> = report.cycles().collect();
    assert_eq!(cycles.len(), 1);
    let wire = cycles[0]
        .suggested_latch_edges
        .iter()
        .find_map(|e| e.wire)
        .unwrap();
    assert!(wire == 1 || wire == 2, "suggested wire {wire} is outside the loop");

    // sum = 1 + 0.5 * sum(prev) converges toward 2
    patch.wires[wire].latched = true;
    let mut rt = runtime(&patch);
    let mut last = 0.0;
    for _ in 0..40 {
        rt.run_frame(FRAME_MS).unwrap();
        last = float(&rt, "sum");
    }
    assert!((last - 2.0).abs() < 1e-6);
}

#[test]
fn missing_required_input_is_reported() {
    let patch = Patch::new().block("r", "ramp");
    let report = compile_patch(&patch, &BlockRegistry::new());
    assert!(report.errors.contains(&CompileError::MissingDefaultSource {
        block: "r".into(),
        port: "domain".into(),
    }));
}

// ============================================================================
// 2. Buses and rails
// ============================================================================

#[test]
fn oscillators_sum_on_a_bus() {
    let patch = Patch::new()
        .bus("level", Domain::Float, CombineMode::Sum)
        .block_with("a", "lfo", [("shape", Param::from("saw"))])
        .block_with("b", "lfo", [("shape", Param::from("saw"))])
        .block("gain", "mul")
        .publish("level", ("a", "out"), 0)
        .publish("level", ("b", "out"), 1)
        .listen("level", ("gain", "a"))
        .output("gain", ("gain", "out"));
    let mut rt = runtime(&patch);
    rt.run_frame(750.0).unwrap();
    // each saw sits at 2 * 0.75 - 1
    assert_eq!(float(&rt, "gain"), 1.0);
}

#[test]
fn patched_energy_rail_reads_publishers_next_frame() {
    let mut patch = Patch::new()
        .block_with("low", "const", [("value", Param::Number(0.25))])
        .block_with("high", "const", [("value", Param::Number(0.5))])
        .block("amb", "ambience")
        .publish("energy", ("low", "out"), 0)
        .publish("energy", ("high", "out"), 0)
        .output("energy", ("amb", "energy"));
    patch.rails.policies.energy.policy = DrivePolicy::Patched;

    let mut rt = runtime(&patch);
    rt.run_frame(FRAME_MS).unwrap();
    assert_eq!(float(&rt, "energy"), 0.0);
    rt.run_frame(FRAME_MS).unwrap();
    assert_eq!(float(&rt, "energy"), 0.75);
}

// ============================================================================
// 3. Envelopes and triggers
// ============================================================================

#[test]
fn envelope_fires_then_decays() {
    let patch = Patch::new()
        .block("hit", "input")
        .block("on", "compare")
        .block("edge", "edge")
        .block_with("env", "envelope", [("decay_ms", Param::Number(500.0))])
        .wire(("hit", "out"), ("on", "a"))
        .wire(("on", "out"), ("edge", "in"))
        .wire(("edge", "out"), ("env", "trig"))
        .output("env", ("env", "out"));
    let mut rt = runtime(&patch);

    rt.set_input("hit", Value::Float(1.0)).unwrap();
    rt.run_frame(FRAME_MS).unwrap();
    assert_eq!(float(&rt, "env"), 1.0);

    rt.run_frame(500.0).unwrap();
    assert!((float(&rt, "env") - (-1.0f64).exp()).abs() < 1e-12);
}

#[test]
fn sample_hold_keeps_value_between_triggers() {
    let patch = Patch::new()
        .block("x", "input")
        .block("gate", "input")
        .block("on", "compare")
        .block("edge", "edge")
        .block("sh", "sample_hold")
        .wire(("gate", "out"), ("on", "a"))
        .wire(("on", "out"), ("edge", "in"))
        .wire(("x", "out"), ("sh", "in"))
        .wire(("edge", "out"), ("sh", "trig"))
        .output("held", ("sh", "out"));
    let mut rt = runtime(&patch);

    rt.set_input("x", Value::Float(3.0)).unwrap();
    rt.set_input("gate", Value::Float(1.0)).unwrap();
    rt.run_frame(FRAME_MS).unwrap();
    rt.set_input("x", Value::Float(9.0)).unwrap();
    rt.run_frame(FRAME_MS).unwrap();
    assert_eq!(float(&rt, "held"), 3.0);
}

// ============================================================================
// 4. Determinism
// ============================================================================

fn sparkle() -> Patch {
    Patch::new()
        .block_with("count", "const", [("value", Param::Number(12.0))])
        .block("dots", "domain")
        .block("r", "ramp")
        .block_with("osc", "lfo", [("period_ms", Param::Number(700.0))])
        .block("lift", "offset")
        .block_with("glow", "trail", [("decay", Param::Number(0.8))])
        .block_with("peak", "reduce", [("op", Param::from("max"))])
        .block("smooth", "smooth")
        .wire(("count", "out"), ("dots", "count"))
        .wire(("dots", "out"), ("r", "domain"))
        .wire(("r", "out"), ("lift", "in"))
        .wire(("osc", "out"), ("lift", "amount"))
        .wire(("lift", "out"), ("glow", "in"))
        .wire(("glow", "out"), ("peak", "in"))
        .wire(("peak", "out"), ("smooth", "in"))
        .output("peak", ("smooth", "out"))
}

#[test]
fn export_matches_live_playback() {
    let program = compile_patch(&sparkle(), &BlockRegistry::new())
        .into_result()
        .unwrap();
    let dts = vec![FRAME_MS; 90];

    let mut live = Runtime::new(program.clone());
    let mut expected = Vec::new();
    for dt in &dts {
        live.run_frame(*dt).unwrap();
        expected.push(live.outputs());
    }

    let export = OfflineExport::new(program).run(&dts, |_| {}).unwrap();
    let exported: Vec<_> = export.frames.into_iter().map(|f| f.outputs).collect();
    assert_eq!(exported, expected);
    assert_eq!(&export.final_state, live.state());
}

#[test]
fn scrubbing_back_replays_identically() {
    let program = compile_patch(&sparkle(), &BlockRegistry::new())
        .into_result()
        .unwrap();
    let mut transport = Transport::new(Runtime::new(program));
    for _ in 0..30 {
        transport.play(FRAME_MS).unwrap();
    }
    let at_30 = transport.runtime().outputs();
    for _ in 0..30 {
        transport.play(FRAME_MS).unwrap();
    }
    transport.seek(30).unwrap();
    assert_eq!(transport.runtime().outputs(), at_30);
}
