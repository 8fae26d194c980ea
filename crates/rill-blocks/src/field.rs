//! Domains and per-element fields.

use rill_core::{
    BinaryFn, BlockInputs, BlockSpec, CompileError, DefaultSource, LowerCtx, OpKind, PortSpec,
    ReduceFn, SlotId, Value,
};

use crate::{BlockCategory, BlockRegistry, DOMAIN, FIELD, FLOAT};

/// Stable domain identity derived from the declaring block's id (FNV-1a).
///
/// Renaming the block changes the identity, which cold-resets every field
/// latch over the domain.
fn identity_of(block_id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    block_id
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

pub(crate) fn register(registry: &mut BlockRegistry) {
    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "domain",
            description: "Element set of `count` elements, identified by the block id",
            inputs: vec![PortSpec::input(
                "count",
                FLOAT,
                DefaultSource::Value(Value::Float(16.0)),
                "Element count (rounded)",
            )],
            outputs: vec![PortSpec::output("out", DOMAIN, "Domain")],
            lower: |ctx, inputs| {
                let identity = identity_of(ctx.block_id());
                Ok(vec![ctx.op(OpKind::MakeDomain { identity }, &[inputs[0]])])
            },
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "ramp",
            description: "Normalized element index, 0 at the first element and 1 at the last",
            inputs: vec![PortSpec::input("domain", DOMAIN, DefaultSource::Required, "Domain")],
            outputs: vec![PortSpec::output("out", FIELD, "Index ramp")],
            lower: |ctx, inputs| Ok(vec![ctx.op(OpKind::FieldRamp, &[inputs[0]])]),
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "broadcast",
            description: "Same value at every element",
            inputs: vec![
                PortSpec::input("domain", DOMAIN, DefaultSource::Required, "Domain"),
                PortSpec::input("value", FLOAT, DefaultSource::Zero, "Value"),
            ],
            outputs: vec![PortSpec::output("out", FIELD, "Constant field")],
            lower: |ctx, inputs| {
                Ok(vec![ctx.op(OpKind::FieldBroadcast, &[inputs[0], inputs[1]])])
            },
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "scale",
            description: "Multiplies every element by `factor`",
            inputs: vec![
                PortSpec::input("in", FIELD, DefaultSource::Required, "Field"),
                PortSpec::input(
                    "factor",
                    FLOAT,
                    DefaultSource::Value(Value::Float(1.0)),
                    "Multiplier",
                ),
            ],
            outputs: vec![PortSpec::output("out", FIELD, "Scaled field")],
            lower: |ctx, inputs| Ok(vec![ctx.binary(BinaryFn::Mul, inputs[0], inputs[1])]),
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "offset",
            description: "Adds `amount` to every element",
            inputs: vec![
                PortSpec::input("in", FIELD, DefaultSource::Required, "Field"),
                PortSpec::input("amount", FLOAT, DefaultSource::Zero, "Offset"),
            ],
            outputs: vec![PortSpec::output("out", FIELD, "Shifted field")],
            lower: |ctx, inputs| Ok(vec![ctx.binary(BinaryFn::Add, inputs[0], inputs[1])]),
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "reduce",
            description: "Collapses a field to one number (`op`: sum, mean, max, min)",
            inputs: vec![PortSpec::input("in", FIELD, DefaultSource::Required, "Field")],
            outputs: vec![PortSpec::output("out", FLOAT, "Reduction")],
            lower: lower_reduce,
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "trail",
            description: "Per-element feedback: `prev * decay + in`, reset when the domain changes",
            inputs: vec![PortSpec::input("in", FIELD, DefaultSource::Required, "Field")],
            outputs: vec![PortSpec::output("out", FIELD, "Accumulated field")],
            lower: lower_trail,
        },
    );

    registry.register(
        BlockCategory::Field,
        BlockSpec {
            type_name: "history",
            description: "Last `length` values of a signal, newest first",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Signal")],
            outputs: vec![PortSpec::output("out", FIELD, "History")],
            lower: lower_history,
        },
    );
}

fn lower_reduce(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let f = match ctx.param_str("op")?.unwrap_or("sum") {
        "sum" => ReduceFn::Sum,
        "mean" => ReduceFn::Mean,
        "max" => ReduceFn::Max,
        "min" => ReduceFn::Min,
        other => {
            return Err(CompileError::InvalidParam {
                block: ctx.block_id().to_string(),
                param: "op".to_string(),
                reason: format!("unknown reduction `{other}`"),
            });
        }
    };
    Ok(vec![ctx.op(OpKind::FieldReduce(f), &[inputs[0]])])
}

fn lower_trail(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let decay = ctx.param_f64("decay", 0.9)?;
    if !(0.0..=1.0).contains(&decay) {
        return Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: "decay".to_string(),
            reason: format!("{decay} is outside [0, 1]"),
        });
    }
    let domain = ctx.op(OpKind::FieldDomain, &[inputs[0]]);
    let cell = ctx.state_cell("buffer", FIELD, Value::Float(0.0), Some(domain));
    let decay = ctx.constant(Value::Float(decay));
    let faded = ctx.binary(BinaryFn::Mul, cell.prev(), decay);
    let sum = ctx.binary(BinaryFn::Add, faded, inputs[0]);
    let next = ctx.materialize(sum);
    ctx.commit(cell, next);
    Ok(vec![next])
}

fn lower_history(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let length = ctx.param_f64("length", 8.0)?;
    if length < 1.0 || length.fract() != 0.0 || length > f64::from(u32::MAX) {
        return Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: "length".to_string(),
            reason: format!("{length} is not a positive whole number"),
        });
    }
    let identity = identity_of(ctx.block_id());
    let count = ctx.constant(Value::Float(length));
    let domain = ctx.op(OpKind::MakeDomain { identity }, &[count]);
    let cell = ctx.state_cell("buffer", FIELD, Value::Float(0.0), Some(domain));
    let next = ctx.op(OpKind::FieldPush, &[cell.prev(), inputs[0]]);
    ctx.commit(cell, next);
    Ok(vec![next])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::{DiagnosticEvent, Param, Patch, Runtime, compile_patch};

    fn run(patch: &Patch) -> Runtime {
        let program = compile_patch(patch, &BlockRegistry::new())
            .into_result()
            .unwrap();
        Runtime::new(program)
    }

    fn total(rt: &Runtime) -> f64 {
        rt.output("total").and_then(Value::as_float).unwrap()
    }

    #[test]
    fn identity_is_stable_per_block_id() {
        assert_eq!(identity_of("dots"), identity_of("dots"));
        assert_ne!(identity_of("dots"), identity_of("stars"));
        assert_eq!(identity_of(""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn ramp_reduces_to_half_count() {
        let patch = Patch::new()
            .block_with("n", "const", [("value", Param::Number(5.0))])
            .block("dots", "domain")
            .block("r", "ramp")
            .block("sum", "reduce")
            .wire(("n", "out"), ("dots", "count"))
            .wire(("dots", "out"), ("r", "domain"))
            .wire(("r", "out"), ("sum", "in"))
            .output("total", ("sum", "out"));
        let mut rt = run(&patch);
        rt.run_frame(16.0).unwrap();
        assert_eq!(total(&rt), 2.5);
    }

    #[test]
    fn trail_accumulates_and_resets_on_resize() {
        let patch = Patch::new()
            .block_with("count", "input", [("default", Param::Number(3.0))])
            .block_with("one", "const", [("value", Param::Number(1.0))])
            .block("dots", "domain")
            .block("fill", "broadcast")
            .block_with("glow", "trail", [("decay", Param::Number(0.5))])
            .block("sum", "reduce")
            .wire(("count", "out"), ("dots", "count"))
            .wire(("dots", "out"), ("fill", "domain"))
            .wire(("one", "out"), ("fill", "value"))
            .wire(("fill", "out"), ("glow", "in"))
            .wire(("glow", "out"), ("sum", "in"))
            .output("total", ("sum", "out"));
        let mut rt = run(&patch);

        rt.run_frame(16.0).unwrap();
        assert_eq!(total(&rt), 3.0);
        rt.run_frame(16.0).unwrap();
        assert_eq!(total(&rt), 4.5);

        rt.set_input("count", Value::Float(5.0)).unwrap();
        let report = rt.run_frame(16.0).unwrap();
        assert!(
            report
                .events
                .iter()
                .any(|e| matches!(e, DiagnosticEvent::LatchDomainReset { .. }))
        );
        assert_eq!(total(&rt), 5.0);
    }

    #[test]
    fn history_keeps_newest_first() {
        let patch = Patch::new()
            .block("x", "input")
            .block_with("h", "history", [("length", Param::Number(3.0))])
            .block("sum", "reduce")
            .wire(("x", "out"), ("h", "in"))
            .wire(("h", "out"), ("sum", "in"))
            .output("total", ("sum", "out"))
            .output("hist", ("h", "out"));
        let mut rt = run(&patch);
        for x in [1.0, 2.0, 3.0, 4.0] {
            rt.set_input("x", Value::Float(x)).unwrap();
            rt.run_frame(16.0).unwrap();
        }
        assert_eq!(total(&rt), 9.0);
        let hist = rt.output("hist").and_then(Value::as_field).unwrap();
        assert_eq!(hist.component(0, 0), 4.0);
        assert_eq!(hist.component(2, 0), 2.0);
    }

    #[test]
    fn history_rejects_fractional_length() {
        let patch = Patch::new().block_with("h", "history", [("length", Param::Number(2.5))]);
        let report = compile_patch(&patch, &BlockRegistry::new());
        assert!(matches!(
            report.errors.as_slice(),
            [CompileError::InvalidParam { param, .. }] if param == "length"
        ));
    }
}
