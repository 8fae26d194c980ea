//! Blocks that carry values across frames.
//!
//! Every block here declares its memory through
//! [`LowerCtx::state_cell`]: the cell's `prev` slot reads the value committed
//! last frame, so these blocks are the legal way to close a feedback loop.

use rill_core::{
    BinaryFn, BlockInputs, BlockSpec, CompileError, DefaultSource, Domain, LowerCtx, OpKind,
    PortSpec, SlotId, UnaryFn, Value,
};

use crate::{BOOL, BlockCategory, BlockRegistry, FLOAT, TRIGGER};

pub(crate) fn register(registry: &mut BlockRegistry) {
    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "integrate",
            description: "Accumulates `in` per second of frame time (`initial`)",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Rate per second")],
            outputs: vec![PortSpec::output("out", FLOAT, "Running total")],
            lower: lower_integrate,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "delay",
            description: "Outputs its input from the previous frame (`initial`)",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Value")],
            outputs: vec![PortSpec::output("out", FLOAT, "Last frame's input")],
            lower: lower_delay,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "smooth",
            description: "Eases toward the input over `time_ms`",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Target")],
            outputs: vec![PortSpec::output("out", FLOAT, "Smoothed value")],
            lower: lower_smooth,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "envelope",
            description: "Jumps to 1 on a trigger and decays exponentially over `decay_ms`",
            inputs: vec![PortSpec::input("trig", TRIGGER, DefaultSource::Zero, "Attack")],
            outputs: vec![PortSpec::output("out", FLOAT, "Envelope level")],
            lower: lower_envelope,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "counter",
            description: "Counts triggers; `reset` wins over `trig`",
            inputs: vec![
                PortSpec::input("trig", TRIGGER, DefaultSource::Zero, "Increment"),
                PortSpec::input("reset", TRIGGER, DefaultSource::Zero, "Back to zero"),
            ],
            outputs: vec![PortSpec::output("out", FLOAT, "Count")],
            lower: lower_counter,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "edge",
            description: "Fires a trigger on the frame `in` turns true",
            inputs: vec![PortSpec::input("in", BOOL, DefaultSource::Zero, "Condition")],
            outputs: vec![PortSpec::output("out", TRIGGER, "Rising edge")],
            lower: lower_edge,
        },
    );

    registry.register(
        BlockCategory::State,
        BlockSpec {
            type_name: "sample_hold",
            description: "Captures `in` when `trig` fires and holds it",
            inputs: vec![
                PortSpec::input("in", FLOAT, DefaultSource::Zero, "Value to sample"),
                PortSpec::input("trig", TRIGGER, DefaultSource::Zero, "Sample now"),
            ],
            outputs: vec![PortSpec::output("out", FLOAT, "Held value")],
            lower: lower_sample_hold,
        },
    );
}

fn positive_param(ctx: &LowerCtx<'_>, name: &str, default: f64) -> Result<f64, CompileError> {
    let value = ctx.param_f64(name, default)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: name.to_string(),
            reason: "must be positive".to_string(),
        })
    }
}

fn lower_integrate(
    ctx: &mut LowerCtx<'_>,
    inputs: &BlockInputs,
) -> Result<Vec<SlotId>, CompileError> {
    let initial = ctx.param_f64("initial", 0.0)?;
    let cell = ctx.state_cell("total", FLOAT, Value::Float(initial), None);
    let dt = ctx.delta_time();
    let ms = ctx.binary(BinaryFn::Mul, inputs[0], dt);
    let per_second = ctx.constant(Value::Float(1000.0));
    let step = ctx.binary(BinaryFn::Div, ms, per_second);
    let next = ctx.binary(BinaryFn::Add, cell.prev(), step);
    ctx.commit(cell, next);
    Ok(vec![next])
}

fn lower_delay(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let initial = ctx.param_f64("initial", 0.0)?;
    let cell = ctx.state_cell("value", FLOAT, Value::Float(initial), None);
    let prev = cell.prev();
    ctx.commit(cell, inputs[0]);
    Ok(vec![prev])
}

fn lower_smooth(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let time = positive_param(ctx, "time_ms", 100.0)?;
    let cell = ctx.state_cell("value", FLOAT, Value::Float(0.0), None);
    let dt = ctx.delta_time();
    let time = ctx.constant(Value::Float(time));
    let ratio = ctx.binary(BinaryFn::Div, dt, time);
    let zero = ctx.constant(Value::Float(0.0));
    let one = ctx.constant(Value::Float(1.0));
    let k = ctx.op(OpKind::Clamp, &[ratio, zero, one]);
    let next = ctx.op(OpKind::Mix, &[cell.prev(), inputs[0], k]);
    ctx.commit(cell, next);
    Ok(vec![next])
}

fn lower_envelope(
    ctx: &mut LowerCtx<'_>,
    inputs: &BlockInputs,
) -> Result<Vec<SlotId>, CompileError> {
    let decay = positive_param(ctx, "decay_ms", 500.0)?;
    let cell = ctx.state_cell("level", FLOAT, Value::Float(0.0), None);
    let dt = ctx.delta_time();
    let rate = ctx.constant(Value::Float(-decay));
    let exponent = ctx.binary(BinaryFn::Div, dt, rate);
    let falloff = ctx.unary(UnaryFn::Exp, exponent);
    let decayed = ctx.binary(BinaryFn::Mul, cell.prev(), falloff);
    let peak = ctx.constant(Value::Float(1.0));
    let next = ctx.op(OpKind::Select, &[inputs[0], peak, decayed]);
    ctx.commit(cell, next);
    Ok(vec![next])
}

fn lower_counter(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let cell = ctx.state_cell("count", FLOAT, Value::Float(0.0), None);
    let zero = ctx.constant(Value::Float(0.0));
    let one = ctx.constant(Value::Float(1.0));
    let step = ctx.op(OpKind::Select, &[inputs[0], one, zero]);
    let counted = ctx.binary(BinaryFn::Add, cell.prev(), step);
    let next = ctx.op(OpKind::Select, &[inputs[1], zero, counted]);
    ctx.commit(cell, next);
    Ok(vec![next])
}

fn lower_edge(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let cell = ctx.state_cell("was", BOOL, Value::Bool(false), None);
    let fire = ctx.constant_of(Domain::Trigger, Value::Bool(true));
    let quiet = ctx.constant_of(Domain::Trigger, Value::Bool(false));
    let fresh = ctx.op(OpKind::Select, &[cell.prev(), quiet, fire]);
    let next = ctx.op(OpKind::Select, &[inputs[0], fresh, quiet]);
    ctx.commit(cell, inputs[0]);
    Ok(vec![next])
}

fn lower_sample_hold(
    ctx: &mut LowerCtx<'_>,
    inputs: &BlockInputs,
) -> Result<Vec<SlotId>, CompileError> {
    let cell = ctx.state_cell("held", FLOAT, Value::Float(0.0), None);
    let next = ctx.op(OpKind::Select, &[inputs[1], inputs[0], cell.prev()]);
    ctx.commit(cell, next);
    Ok(vec![next])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::{Param, Patch, Runtime, compile_patch};

    fn run(patch: &Patch) -> Runtime {
        let program = compile_patch(patch, &BlockRegistry::new())
            .into_result()
            .unwrap();
        Runtime::new(program)
    }

    fn out(rt: &Runtime) -> f64 {
        rt.output("out").and_then(Value::as_float).unwrap()
    }

    #[test]
    fn delay_lags_one_frame() {
        let patch = Patch::new()
            .block_with("x", "input", [("default", Param::Number(1.0))])
            .block_with("d", "delay", [("initial", Param::Number(-1.0))])
            .wire(("x", "out"), ("d", "in"))
            .output("out", ("d", "out"));
        let mut rt = run(&patch);
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), -1.0);
        rt.set_input("x", Value::Float(5.0)).unwrap();
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 1.0);
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 5.0);
    }

    #[test]
    fn smooth_reaches_target_after_time() {
        let patch = Patch::new()
            .block_with("x", "const", [("value", Param::Number(8.0))])
            .block_with("s", "smooth", [("time_ms", Param::Number(100.0))])
            .wire(("x", "out"), ("s", "in"))
            .output("out", ("s", "out"));
        let mut rt = run(&patch);
        rt.run_frame(50.0).unwrap();
        assert_eq!(out(&rt), 4.0);
        rt.run_frame(500.0).unwrap();
        assert_eq!(out(&rt), 8.0);
    }

    #[test]
    fn smooth_rejects_zero_time() {
        let patch = Patch::new().block_with("s", "smooth", [("time_ms", Param::Number(0.0))]);
        let report = compile_patch(&patch, &BlockRegistry::new());
        assert!(matches!(
            report.errors.as_slice(),
            [CompileError::InvalidParam { param, .. }] if param == "time_ms"
        ));
    }

    #[test]
    fn counter_counts_rising_edges_and_resets() {
        let patch = Patch::new()
            .block("go", "input")
            .block("rst", "input")
            .block("go_on", "compare")
            .block("rst_on", "compare")
            .block("go_edge", "edge")
            .block("rst_edge", "edge")
            .block("n", "counter")
            .wire(("go", "out"), ("go_on", "a"))
            .wire(("rst", "out"), ("rst_on", "a"))
            .wire(("go_on", "out"), ("go_edge", "in"))
            .wire(("rst_on", "out"), ("rst_edge", "in"))
            .wire(("go_edge", "out"), ("n", "trig"))
            .wire(("rst_edge", "out"), ("n", "reset"))
            .output("out", ("n", "out"));
        let mut rt = run(&patch);

        rt.set_input("go", Value::Float(1.0)).unwrap();
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 1.0);
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 1.0, "held input is not a new edge");

        rt.set_input("go", Value::Float(0.0)).unwrap();
        rt.run_frame(16.0).unwrap();
        rt.set_input("go", Value::Float(1.0)).unwrap();
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 2.0);

        rt.set_input("rst", Value::Float(1.0)).unwrap();
        rt.run_frame(16.0).unwrap();
        assert_eq!(out(&rt), 0.0);
    }
}
