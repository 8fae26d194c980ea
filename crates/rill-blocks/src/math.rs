//! Stateless arithmetic blocks.

use rill_core::{
    BinaryFn, BlockInputs, BlockSpec, CompareFn, CompileError, DefaultSource, LowerCtx, LowerFn,
    OpKind, PortSpec, SlotId, UnaryFn, Value,
};

use crate::{BOOL, BlockCategory, BlockRegistry, FLOAT};

pub(crate) fn register(registry: &mut BlockRegistry) {
    registry.register(
        BlockCategory::Math,
        BlockSpec {
            type_name: "const",
            description: "Constant number from the `value` parameter",
            inputs: vec![],
            outputs: vec![PortSpec::output("out", FLOAT, "The constant")],
            lower: lower_const,
        },
    );

    for (type_name, f, description, b_default) in [
        ("add", BinaryFn::Add, "a + b", 0.0),
        ("sub", BinaryFn::Sub, "a - b", 0.0),
        ("mul", BinaryFn::Mul, "a * b", 1.0),
        ("div", BinaryFn::Div, "a / b (zero when b is zero)", 1.0),
        ("min", BinaryFn::Min, "Smaller of a and b", 0.0),
        ("max", BinaryFn::Max, "Larger of a and b", 0.0),
        ("mod", BinaryFn::Mod, "Euclidean remainder of a by b", 1.0),
    ] {
        registry.register(
            BlockCategory::Math,
            BlockSpec {
                type_name,
                description,
                inputs: vec![
                    PortSpec::input("a", FLOAT, DefaultSource::Zero, "Left operand"),
                    PortSpec::input(
                        "b",
                        FLOAT,
                        DefaultSource::Value(Value::Float(b_default)),
                        "Right operand",
                    ),
                ],
                outputs: vec![PortSpec::output("out", FLOAT, description)],
                lower: binary_lowering(f),
            },
        );
    }

    registry.register(
        BlockCategory::Math,
        BlockSpec {
            type_name: "neg",
            description: "Negation",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Value")],
            outputs: vec![PortSpec::output("out", FLOAT, "-in")],
            lower: |ctx, inputs| Ok(vec![ctx.unary(UnaryFn::Neg, inputs[0])]),
        },
    );

    registry.register(
        BlockCategory::Math,
        BlockSpec {
            type_name: "mix",
            description: "Linear interpolation from a to b by t",
            inputs: vec![
                PortSpec::input("a", FLOAT, DefaultSource::Zero, "Value at t = 0"),
                PortSpec::input(
                    "b",
                    FLOAT,
                    DefaultSource::Value(Value::Float(1.0)),
                    "Value at t = 1",
                ),
                PortSpec::input("t", FLOAT, DefaultSource::Zero, "Blend amount"),
            ],
            outputs: vec![PortSpec::output("out", FLOAT, "a + (b - a) * t")],
            lower: |ctx, inputs| Ok(vec![ctx.op(OpKind::Mix, &[inputs[0], inputs[1], inputs[2]])]),
        },
    );

    registry.register(
        BlockCategory::Math,
        BlockSpec {
            type_name: "clamp",
            description: "Limits the input to [`min`, `max`]",
            inputs: vec![PortSpec::input("in", FLOAT, DefaultSource::Zero, "Value")],
            outputs: vec![PortSpec::output("out", FLOAT, "Clamped value")],
            lower: lower_clamp,
        },
    );

    registry.register(
        BlockCategory::Math,
        BlockSpec {
            type_name: "compare",
            description: "Compares a with b using the `op` parameter (lt, le, gt, ge)",
            inputs: vec![
                PortSpec::input("a", FLOAT, DefaultSource::Zero, "Left operand"),
                PortSpec::input("b", FLOAT, DefaultSource::Zero, "Right operand"),
            ],
            outputs: vec![PortSpec::output("out", BOOL, "Comparison result")],
            lower: lower_compare,
        },
    );
}

fn binary_lowering(f: BinaryFn) -> LowerFn {
    match f {
        BinaryFn::Add => |ctx, i| binary(ctx, i, BinaryFn::Add),
        BinaryFn::Sub => |ctx, i| binary(ctx, i, BinaryFn::Sub),
        BinaryFn::Mul => |ctx, i| binary(ctx, i, BinaryFn::Mul),
        BinaryFn::Div => |ctx, i| binary(ctx, i, BinaryFn::Div),
        BinaryFn::Min => |ctx, i| binary(ctx, i, BinaryFn::Min),
        BinaryFn::Max => |ctx, i| binary(ctx, i, BinaryFn::Max),
        BinaryFn::Mod => |ctx, i| binary(ctx, i, BinaryFn::Mod),
    }
}

fn binary(
    ctx: &mut LowerCtx<'_>,
    inputs: &BlockInputs,
    f: BinaryFn,
) -> Result<Vec<SlotId>, CompileError> {
    Ok(vec![ctx.binary(f, inputs[0], inputs[1])])
}

fn lower_const(ctx: &mut LowerCtx<'_>, _: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let value = ctx.param_f64("value", 0.0)?;
    Ok(vec![ctx.constant(Value::Float(value))])
}

fn lower_clamp(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let lo = ctx.param_f64("min", 0.0)?;
    let hi = ctx.param_f64("max", 1.0)?;
    if lo > hi {
        return Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: "min".to_string(),
            reason: format!("{lo} is greater than max {hi}"),
        });
    }
    let lo = ctx.constant(Value::Float(lo));
    let hi = ctx.constant(Value::Float(hi));
    Ok(vec![ctx.op(OpKind::Clamp, &[inputs[0], lo, hi])])
}

fn lower_compare(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let f = match ctx.param_str("op")?.unwrap_or("gt") {
        "lt" => CompareFn::Lt,
        "le" => CompareFn::Le,
        "gt" => CompareFn::Gt,
        "ge" => CompareFn::Ge,
        other => {
            return Err(CompileError::InvalidParam {
                block: ctx.block_id().to_string(),
                param: "op".to_string(),
                reason: format!("unknown comparison `{other}`"),
            });
        }
    };
    Ok(vec![ctx.op(OpKind::Compare(f), &[inputs[0], inputs[1]])])
}
