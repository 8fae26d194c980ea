//! Property tests for built-in block invariants.

use proptest::prelude::*;
use rill_blocks::BlockRegistry;
use rill_core::{Param, Patch, Runtime, Value, compile_patch};

fn run(patch: &Patch, dts: &[f64]) -> Vec<Runtime> {
    let program = compile_patch(patch, &BlockRegistry::new())
        .into_result()
        .unwrap();
    let mut rt = Runtime::new(program);
    let mut seen = Vec::with_capacity(dts.len());
    for dt in dts {
        rt.run_frame(*dt).unwrap();
        seen.push(rt.clone());
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lfo_phase_stays_in_unit_interval(
        period in 1.0f64..5000.0,
        rate in -4.0f64..4.0,
        dts in prop::collection::vec(0.0f64..250.0, 1..40),
    ) {
        let patch = Patch::new()
            .block_with("rate", "const", [("value", Param::Number(rate))])
            .block_with("osc", "lfo", [("period_ms", Param::Number(period))])
            .wire(("rate", "out"), ("osc", "rate"))
            .output("phase", ("osc", "phase"))
            .output("out", ("osc", "out"));
        for rt in run(&patch, &dts) {
            let phase = rt.output("phase").and_then(Value::as_float).unwrap();
            let out = rt.output("out").and_then(Value::as_float).unwrap();
            prop_assert!((0.0..1.0).contains(&phase), "phase {phase}");
            prop_assert!((-1.0..=1.0).contains(&out), "out {out}");
        }
    }

    #[test]
    fn smooth_never_overshoots(
        target in -100.0f64..100.0,
        time in 1.0f64..1000.0,
        dts in prop::collection::vec(0.0f64..100.0, 1..40),
    ) {
        let patch = Patch::new()
            .block_with("x", "const", [("value", Param::Number(target))])
            .block_with("s", "smooth", [("time_ms", Param::Number(time))])
            .wire(("x", "out"), ("s", "in"))
            .output("out", ("s", "out"));
        for rt in run(&patch, &dts) {
            let out = rt.output("out").and_then(Value::as_float).unwrap();
            prop_assert!(out.abs() <= target.abs() + 1e-9, "{out} passed {target}");
            prop_assert!(out * target >= 0.0);
        }
    }
}
