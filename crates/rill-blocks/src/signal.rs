//! Generators, rail readers, host inputs, and value constructors.

use core::f64::consts::TAU;

use rill_core::{
    BinaryFn, BlockInputs, BlockSpec, CompareFn, CompileError, DefaultSource, Domain, LowerCtx,
    OpKind, PortSpec, RailId, SlotId, TypeDesc, UnaryFn, Value,
};

use crate::{BlockCategory, BlockRegistry, FLOAT};

/// LFO waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Sine,
    Triangle,
    Saw,
    Square,
}

impl Shape {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Shape::Sine),
            "triangle" => Some(Shape::Triangle),
            "saw" => Some(Shape::Saw),
            "square" => Some(Shape::Square),
            _ => None,
        }
    }

    /// Bipolar waveform of `phase` in `[0, 1)`.
    fn lower(self, ctx: &mut LowerCtx<'_>, phase: SlotId) -> SlotId {
        match self {
            Shape::Sine => {
                let tau = num(ctx, TAU);
                let angle = ctx.binary(BinaryFn::Mul, phase, tau);
                ctx.unary(UnaryFn::Sin, angle)
            }
            Shape::Triangle => {
                let half = num(ctx, 0.5);
                let centered = ctx.binary(BinaryFn::Sub, phase, half);
                let folded = ctx.unary(UnaryFn::Abs, centered);
                let four = num(ctx, 4.0);
                let scaled = ctx.binary(BinaryFn::Mul, folded, four);
                let one = num(ctx, 1.0);
                ctx.binary(BinaryFn::Sub, scaled, one)
            }
            Shape::Saw => {
                let two = num(ctx, 2.0);
                let scaled = ctx.binary(BinaryFn::Mul, phase, two);
                let one = num(ctx, 1.0);
                ctx.binary(BinaryFn::Sub, scaled, one)
            }
            Shape::Square => {
                let half = num(ctx, 0.5);
                let low = ctx.op(OpKind::Compare(CompareFn::Lt), &[phase, half]);
                let up = num(ctx, 1.0);
                let down = num(ctx, -1.0);
                ctx.op(OpKind::Select, &[low, up, down])
            }
        }
    }
}

pub(crate) fn register(registry: &mut BlockRegistry) {
    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "lfo",
            description: "Free-running oscillator (`period_ms`, `shape`: sine, triangle, saw, square)",
            inputs: vec![PortSpec::input(
                "rate",
                FLOAT,
                DefaultSource::Value(Value::Float(1.0)),
                "Speed multiplier",
            )],
            outputs: vec![
                PortSpec::output("out", FLOAT, "Bipolar waveform"),
                PortSpec::output("phase", FLOAT, "Cycle position in [0, 1)"),
            ],
            lower: lower_lfo,
        },
    );

    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "clock",
            description: "Reads the time, phase, and pulse rails (previous frame)",
            inputs: vec![],
            outputs: vec![
                PortSpec::output("time", TypeDesc::signal(Domain::Time), "Root time in ms"),
                PortSpec::output("phase_a", TypeDesc::signal(Domain::Phase), "Primary phase"),
                PortSpec::output("phase_b", TypeDesc::signal(Domain::Phase), "Secondary phase"),
                PortSpec::output("pulse", TypeDesc::signal(Domain::Trigger), "Beat pulse"),
            ],
            lower: |ctx, _| {
                let b = ctx.builder();
                Ok(vec![
                    b.rail(RailId::Time),
                    b.rail(RailId::PhaseA),
                    b.rail(RailId::PhaseB),
                    b.rail(RailId::Pulse),
                ])
            },
        },
    );

    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "ambience",
            description: "Reads the energy and palette rails (previous frame)",
            inputs: vec![],
            outputs: vec![
                PortSpec::output("energy", FLOAT, "Global intensity"),
                PortSpec::output("palette", TypeDesc::signal(Domain::Color), "Global color"),
            ],
            lower: |ctx, _| {
                let b = ctx.builder();
                Ok(vec![b.rail(RailId::Energy), b.rail(RailId::Palette)])
            },
        },
    );

    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "input",
            description: "Host-supplied number (`name`, defaults to the block id; `default`)",
            inputs: vec![],
            outputs: vec![PortSpec::output("out", FLOAT, "Current host value")],
            lower: lower_input,
        },
    );

    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "color",
            description: "Builds a straight-alpha RGBA color",
            inputs: vec![
                PortSpec::input("r", FLOAT, DefaultSource::Zero, "Red"),
                PortSpec::input("g", FLOAT, DefaultSource::Zero, "Green"),
                PortSpec::input("b", FLOAT, DefaultSource::Zero, "Blue"),
                PortSpec::input("a", FLOAT, DefaultSource::Value(Value::Float(1.0)), "Alpha"),
            ],
            outputs: vec![PortSpec::output(
                "out",
                TypeDesc::signal(Domain::Color),
                "Color",
            )],
            lower: |ctx, i| {
                Ok(vec![ctx.op(OpKind::MakeColor, &[i[0], i[1], i[2], i[3]])])
            },
        },
    );

    registry.register(
        BlockCategory::Signal,
        BlockSpec {
            type_name: "vec2",
            description: "Builds a two-component vector",
            inputs: vec![
                PortSpec::input("x", FLOAT, DefaultSource::Zero, "X"),
                PortSpec::input("y", FLOAT, DefaultSource::Zero, "Y"),
            ],
            outputs: vec![PortSpec::output("out", TypeDesc::signal(Domain::Vec2), "Vector")],
            lower: |ctx, i| Ok(vec![ctx.op(OpKind::MakeVec2, &[i[0], i[1]])]),
        },
    );
}

fn num(ctx: &mut LowerCtx<'_>, v: f64) -> SlotId {
    ctx.constant(Value::Float(v))
}

fn lower_lfo(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let period = ctx.param_f64("period_ms", 1000.0)?;
    if period <= 0.0 {
        return Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: "period_ms".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    let name = ctx.param_str("shape")?.unwrap_or("sine");
    let Some(shape) = Shape::parse(name) else {
        return Err(CompileError::InvalidParam {
            block: ctx.block_id().to_string(),
            param: "shape".to_string(),
            reason: format!("unknown shape `{name}`"),
        });
    };

    let cell = ctx.state_cell("phase", FLOAT, Value::Float(0.0), None);
    let dt = ctx.delta_time();
    let scaled = ctx.binary(BinaryFn::Mul, dt, inputs[0]);
    let period = ctx.constant(Value::Float(period));
    let advance = ctx.binary(BinaryFn::Div, scaled, period);
    let sum = ctx.binary(BinaryFn::Add, cell.prev(), advance);
    let phase = ctx.unary(UnaryFn::Fract, sum);
    ctx.commit(cell, phase);

    let out = shape.lower(ctx, phase);
    Ok(vec![out, phase])
}

fn lower_input(ctx: &mut LowerCtx<'_>, _: &BlockInputs) -> Result<Vec<SlotId>, CompileError> {
    let name = match ctx.param_str("name")? {
        Some(name) => name.to_string(),
        None => ctx.block_id().to_string(),
    };
    let default = ctx.param_f64("default", 0.0)?;
    Ok(vec![ctx.builder().input(name, Domain::Float, Value::Float(default))])
}
