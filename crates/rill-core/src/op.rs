//! Pure compute kernels.
//!
//! Every op is a closed [`OpKind`] variant with a fixed arity and exactly one
//! output. Output type and storage are inferred from the input types at build
//! time; at runtime [`OpKind`] evaluates against the frame's values with no
//! access to anything else. Element-wise kernels (math, mix, clamp, select,
//! vector construction) lift automatically over fields: signal arguments
//! broadcast to every element and field arguments must share one domain.

use core::fmt;
use std::collections::BTreeMap;

use crate::slot::{SlotId, Storage};
use crate::types::{
    Domain, DomainKey, FieldBuffer, FieldExpr, FieldValue, MAX_FIELD_ELEMENTS, TypeDesc, Value, World,
};

/// Stable index of an op within one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub(crate) u32);

impl OpId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// One-argument math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryFn {
    /// `-x`
    Neg,
    /// `|x|`
    Abs,
    /// `sin(x)`
    Sin,
    /// `cos(x)`
    Cos,
    /// `x - floor(x)`
    Fract,
    /// `floor(x)`
    Floor,
    /// `e^x`
    Exp,
}

impl UnaryFn {
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryFn::Neg => -x,
            UnaryFn::Abs => x.abs(),
            UnaryFn::Sin => x.sin(),
            UnaryFn::Cos => x.cos(),
            UnaryFn::Fract => {
                // tiny negatives round up to exactly 1.0
                let f = x - x.floor();
                if f < 1.0 { f } else { 0.0 }
            }
            UnaryFn::Floor => x.floor(),
            UnaryFn::Exp => x.exp(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            UnaryFn::Neg => "neg",
            UnaryFn::Abs => "abs",
            UnaryFn::Sin => "sin",
            UnaryFn::Cos => "cos",
            UnaryFn::Fract => "fract",
            UnaryFn::Floor => "floor",
            UnaryFn::Exp => "exp",
        }
    }
}

/// Two-argument math, component-wise with scalar broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFn {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`, zero when `b` is zero.
    Div,
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
    /// Euclidean remainder, zero when `b` is zero.
    Mod,
}

impl BinaryFn {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryFn::Add => a + b,
            BinaryFn::Sub => a - b,
            BinaryFn::Mul => a * b,
            BinaryFn::Div => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            BinaryFn::Min => a.min(b),
            BinaryFn::Max => a.max(b),
            BinaryFn::Mod => {
                if b == 0.0 {
                    0.0
                } else {
                    a.rem_euclid(b)
                }
            }
        }
    }

    const fn name(self) -> &'static str {
        match self {
            BinaryFn::Add => "add",
            BinaryFn::Sub => "sub",
            BinaryFn::Mul => "mul",
            BinaryFn::Div => "div",
            BinaryFn::Min => "min",
            BinaryFn::Max => "max",
            BinaryFn::Mod => "mod",
        }
    }
}

/// Numeric comparison producing a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFn {
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
}

impl CompareFn {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            CompareFn::Lt => a < b,
            CompareFn::Le => a <= b,
            CompareFn::Gt => a > b,
            CompareFn::Ge => a >= b,
        }
    }
}

/// Field-to-signal reduction, component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceFn {
    /// Sum of all elements (zero for an empty field).
    Sum,
    /// Mean of all elements (zero for an empty field).
    Mean,
    /// Largest element (zero for an empty field).
    Max,
    /// Smallest element (zero for an empty field).
    Min,
}

/// Values an op may read besides its inputs.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    /// Delta of the current frame.
    pub dt_ms: f64,
    /// Root time after this frame's advance.
    pub time_ms: f64,
    /// Index of the current frame.
    pub frame: u64,
    /// Host-supplied input values.
    pub inputs: &'a BTreeMap<String, Value>,
}

/// Closed set of pure kernels.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Constant of `domain`.
    Const {
        /// The constant.
        value: Value,
        /// Its domain.
        domain: Domain,
    },
    /// Host-supplied value, `default` until set.
    Input {
        /// Input name.
        name: String,
        /// Value used while the host has not set the input.
        default: Value,
        /// Input domain.
        domain: Domain,
    },
    /// This frame's `dt` in milliseconds.
    DeltaTime,
    /// One-argument math.
    Unary(UnaryFn),
    /// Two-argument math.
    Binary(BinaryFn),
    /// Comparison of two numbers.
    Compare(CompareFn),
    /// `(a, b, t)` linear interpolation.
    Mix,
    /// `(x, lo, hi)` clamp.
    Clamp,
    /// `(cond, a, b)` selection.
    Select,
    /// `(x, y)` vector construction.
    MakeVec2,
    /// `(r, g, b, a)` color construction.
    MakeColor,
    /// `(count)` domain construction with a fixed identity.
    MakeDomain {
        /// Stable identity of the element mapping.
        identity: u64,
    },
    /// `(domain, value)` lazy constant field.
    FieldBroadcast,
    /// `(domain)` lazy normalized index field.
    FieldRamp,
    /// `(field)` evaluation into a buffer.
    Materialize,
    /// `(field)` domain of a field.
    FieldDomain,
    /// `(field)` reduction to a signal.
    FieldReduce(ReduceFn),
    /// `(history, value)` shifts `history` by one element and writes `value`
    /// at index zero.
    FieldPush,
}

/// Reason a kernel could not evaluate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KernelFault {
    Type(String),
    DomainMismatch(DomainKey, DomainKey),
    DomainTooLarge(f64),
}

impl OpKind {
    /// Short name used in slot labels and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Const { .. } => "const",
            OpKind::Input { .. } => "input",
            OpKind::DeltaTime => "dt",
            OpKind::Unary(f) => f.name(),
            OpKind::Binary(f) => f.name(),
            OpKind::Compare(_) => "compare",
            OpKind::Mix => "mix",
            OpKind::Clamp => "clamp",
            OpKind::Select => "select",
            OpKind::MakeVec2 => "vec2",
            OpKind::MakeColor => "color",
            OpKind::MakeDomain { .. } => "domain",
            OpKind::FieldBroadcast => "broadcast",
            OpKind::FieldRamp => "ramp",
            OpKind::Materialize => "materialize",
            OpKind::FieldDomain => "field_domain",
            OpKind::FieldReduce(_) => "reduce",
            OpKind::FieldPush => "push",
        }
    }

    /// Number of inputs the op takes.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Const { .. } | OpKind::Input { .. } | OpKind::DeltaTime => 0,
            OpKind::Unary(_)
            | OpKind::MakeDomain { .. }
            | OpKind::FieldRamp
            | OpKind::Materialize
            | OpKind::FieldDomain
            | OpKind::FieldReduce(_) => 1,
            OpKind::Binary(_)
            | OpKind::Compare(_)
            | OpKind::MakeVec2
            | OpKind::FieldBroadcast
            | OpKind::FieldPush => 2,
            OpKind::Mix | OpKind::Clamp | OpKind::Select => 3,
            OpKind::MakeColor => 4,
        }
    }

    fn is_elementwise(&self) -> bool {
        matches!(
            self,
            OpKind::Unary(_)
                | OpKind::Binary(_)
                | OpKind::Compare(_)
                | OpKind::Mix
                | OpKind::Clamp
                | OpKind::Select
                | OpKind::MakeVec2
                | OpKind::MakeColor
        )
    }

    /// Infers the output type and storage from the input types.
    pub(crate) fn infer(&self, inputs: &[TypeDesc]) -> Result<(TypeDesc, Storage), String> {
        if inputs.len() != self.arity() {
            return Err(format!(
                "`{}` takes {} inputs, got {}",
                self.name(),
                self.arity(),
                inputs.len()
            ));
        }
        let world = join_worlds(inputs);
        let lifted = |domain: Domain| {
            let ty = TypeDesc::new(world, domain);
            let storage = if world == World::Field {
                Storage::Buffer
            } else {
                Storage::Inline
            };
            (ty, storage)
        };

        match self {
            OpKind::Const { value, domain } => {
                let ty = TypeDesc::scalar(*domain);
                if value.fits(ty) {
                    Ok((ty, Storage::Inline))
                } else {
                    Err(format!("constant {value} is not a {}", domain.name()))
                }
            }
            OpKind::Input {
                name,
                default,
                domain,
            } => {
                let ty = TypeDesc::signal(*domain);
                if default.fits(ty) {
                    Ok((ty, Storage::Inline))
                } else {
                    Err(format!("default of input `{name}` is not a {}", domain.name()))
                }
            }
            OpKind::DeltaTime => Ok((TypeDesc::signal(Domain::Float), Storage::Inline)),
            OpKind::Unary(_) => Ok(lifted(math(inputs[0])?)),
            OpKind::Binary(_) => Ok(lifted(broadcast(inputs[0], inputs[1])?)),
            OpKind::Compare(_) => {
                numeric(inputs[0])?;
                numeric(inputs[1])?;
                Ok(lifted(Domain::Bool))
            }
            OpKind::Mix => {
                let domain = broadcast(inputs[0], inputs[1])?;
                numeric(inputs[2])?;
                Ok(lifted(domain))
            }
            OpKind::Clamp => {
                let domain = math(inputs[0])?;
                numeric(inputs[1])?;
                numeric(inputs[2])?;
                Ok(lifted(domain))
            }
            OpKind::Select => {
                if !inputs[0].domain.is_boolean() {
                    return Err(format!("select condition must be bool, found {}", inputs[0]));
                }
                if inputs[1].domain != inputs[2].domain || inputs[1].domain == Domain::Domain {
                    return Err(format!(
                        "select branches must share a value domain, found {} and {}",
                        inputs[1], inputs[2]
                    ));
                }
                Ok(lifted(inputs[1].domain))
            }
            OpKind::MakeVec2 | OpKind::MakeColor => {
                for ty in inputs {
                    numeric(*ty)?;
                }
                let domain = if matches!(self, OpKind::MakeVec2) {
                    Domain::Vec2
                } else {
                    Domain::Color
                };
                Ok(lifted(domain))
            }
            OpKind::MakeDomain { .. } => {
                not_field(inputs[0])?;
                numeric(inputs[0])?;
                Ok((TypeDesc::new(world, Domain::Domain), Storage::Inline))
            }
            OpKind::FieldBroadcast => {
                domain_slot(inputs[0])?;
                not_field(inputs[1])?;
                if inputs[1].domain == Domain::Domain {
                    return Err("cannot broadcast a domain value".to_string());
                }
                Ok((TypeDesc::field(inputs[1].domain), Storage::Lazy))
            }
            OpKind::FieldRamp => {
                domain_slot(inputs[0])?;
                Ok((TypeDesc::field(Domain::Float), Storage::Lazy))
            }
            OpKind::Materialize => {
                field(inputs[0])?;
                Ok((inputs[0], Storage::Buffer))
            }
            OpKind::FieldDomain => {
                field(inputs[0])?;
                Ok((TypeDesc::signal(Domain::Domain), Storage::Inline))
            }
            OpKind::FieldReduce(_) => {
                field(inputs[0])?;
                let domain = math(inputs[0])?;
                Ok((TypeDesc::signal(domain), Storage::Inline))
            }
            OpKind::FieldPush => {
                field(inputs[0])?;
                not_field(inputs[1])?;
                if inputs[0].domain != inputs[1].domain {
                    return Err(format!(
                        "cannot push {} into {}",
                        inputs[1], inputs[0]
                    ));
                }
                Ok((inputs[0], Storage::Buffer))
            }
        }
    }

    /// Evaluates the op. `out` is the inferred output type.
    pub(crate) fn eval(
        &self,
        out: TypeDesc,
        args: &[&Value],
        ctx: &FrameContext<'_>,
    ) -> Result<Value, KernelFault> {
        if args.len() != self.arity() {
            return Err(KernelFault::Type(format!(
                "expected {} arguments, got {}",
                self.arity(),
                args.len()
            )));
        }
        if self.is_elementwise() {
            return self.elementwise(out, args);
        }
        match self {
            OpKind::Const { value, .. } => Ok(value.clone()),
            OpKind::Input {
                name,
                default,
                domain,
            } => Ok(ctx
                .inputs
                .get(name)
                .filter(|v| v.fits(TypeDesc::signal(*domain)))
                .unwrap_or(default)
                .clone()),
            OpKind::DeltaTime => Ok(Value::Float(ctx.dt_ms)),
            OpKind::MakeDomain { identity } => {
                let count = expect_float(args[0])?;
                let count = count.round().max(0.0);
                if count > f64::from(MAX_FIELD_ELEMENTS) {
                    return Err(KernelFault::DomainTooLarge(count));
                }
                Ok(Value::Domain(DomainKey::new(count as u32, *identity)))
            }
            OpKind::FieldBroadcast => {
                let domain = expect_domain(args[0])?;
                let components = args[1]
                    .components()
                    .ok_or_else(|| KernelFault::Type("broadcast of a field".to_string()))?;
                Ok(Value::Field(FieldValue::Lazy(FieldExpr::Broadcast {
                    domain,
                    components,
                })))
            }
            OpKind::FieldRamp => Ok(Value::Field(FieldValue::Lazy(FieldExpr::Ramp {
                domain: expect_domain(args[0])?,
            }))),
            OpKind::Materialize => Ok(Value::Field(FieldValue::Buffer(
                expect_field(args[0])?.materialize(),
            ))),
            OpKind::FieldDomain => Ok(Value::Domain(expect_field(args[0])?.domain())),
            OpKind::FieldReduce(f) => Ok(reduce(*f, out.domain, expect_field(args[0])?)),
            OpKind::FieldPush => {
                let history = expect_field(args[0])?;
                let value = args[1]
                    .components()
                    .ok_or_else(|| KernelFault::Type("push of a field".to_string()))?;
                Ok(push(history, &value, out.domain.components()))
            }
            _ => Err(KernelFault::Type(format!("`{}` is not evaluable", self.name()))),
        }
    }

    fn elementwise(&self, out: TypeDesc, args: &[&Value]) -> Result<Value, KernelFault> {
        let mut key: Option<DomainKey> = None;
        for arg in args {
            if let Value::Field(f) = arg {
                let d = f.domain();
                match key {
                    None => key = Some(d),
                    Some(first) if first != d => return Err(KernelFault::DomainMismatch(first, d)),
                    Some(_) => {}
                }
            }
        }
        let width = out.domain.components();
        let mut scratch: Vec<Vec<f64>> = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Field(_) => scratch.push(Vec::new()),
                other => scratch.push(other.components().ok_or_else(|| {
                    KernelFault::Type(format!("`{}` cannot read {}", self.name(), other.kind_name()))
                })?),
            }
        }

        let Some(key) = key else {
            let refs: Vec<&[f64]> = scratch.iter().map(Vec::as_slice).collect();
            return Ok(Value::from_components(out.domain, &self.kernel(&refs, width)));
        };

        let count = key.count as usize;
        let mut data = Vec::with_capacity(count * width);
        for i in 0..count {
            for (buf, arg) in scratch.iter_mut().zip(args) {
                if let Value::Field(f) = arg {
                    buf.clear();
                    buf.extend((0..f.stride()).map(|c| f.component(i, c)));
                }
            }
            let refs: Vec<&[f64]> = scratch.iter().map(Vec::as_slice).collect();
            data.extend(self.kernel(&refs, width));
        }
        Ok(Value::Field(FieldValue::Buffer(FieldBuffer {
            domain: key,
            stride: width,
            data,
        })))
    }

    /// Component kernel of an element-wise op. Always returns `width` values.
    fn kernel(&self, args: &[&[f64]], width: usize) -> Vec<f64> {
        let at = |arg: &[f64], i: usize| {
            let idx = if arg.len() == 1 { 0 } else { i };
            arg.get(idx).copied().unwrap_or(0.0)
        };
        let each = |f: &dyn Fn(usize) -> f64| (0..width).map(f).collect::<Vec<f64>>();
        match self {
            OpKind::Unary(f) => each(&|i| f.apply(at(args[0], i))),
            OpKind::Binary(f) => each(&|i| f.apply(at(args[0], i), at(args[1], i))),
            OpKind::Compare(f) => {
                let hit = f.apply(at(args[0], 0), at(args[1], 0));
                each(&|_| if hit { 1.0 } else { 0.0 })
            }
            OpKind::Mix => {
                let t = at(args[2], 0);
                each(&|i| {
                    let a = at(args[0], i);
                    a + (at(args[1], i) - a) * t
                })
            }
            OpKind::Clamp => {
                let (lo, hi) = (at(args[1], 0), at(args[2], 0));
                each(&|i| at(args[0], i).max(lo).min(hi))
            }
            OpKind::Select => {
                let pick = if at(args[0], 0) != 0.0 { args[1] } else { args[2] };
                each(&|i| at(pick, i))
            }
            OpKind::MakeVec2 | OpKind::MakeColor => each(&|i| at(args[i], 0)),
            _ => vec![0.0; width],
        }
    }
}

fn join_worlds(inputs: &[TypeDesc]) -> World {
    let rank = |w: World| match w {
        World::Config => 0,
        World::Scalar => 1,
        World::Signal => 2,
        World::Field => 3,
    };
    inputs
        .iter()
        .map(|t| t.world)
        .max_by_key(|w| rank(*w))
        .unwrap_or(World::Scalar)
}

fn math(ty: TypeDesc) -> Result<Domain, String> {
    match ty.domain {
        Domain::Float | Domain::Phase | Domain::Time | Domain::Vec2 | Domain::Color => {
            Ok(ty.domain)
        }
        _ => Err(format!("expected a numeric, vector, or color value, found {ty}")),
    }
}

fn numeric(ty: TypeDesc) -> Result<(), String> {
    if ty.domain.is_numeric() {
        Ok(())
    } else {
        Err(format!("expected a number, found {ty}"))
    }
}

fn not_field(ty: TypeDesc) -> Result<(), String> {
    if ty.world == World::Field {
        Err(format!("expected a per-frame value, found {ty}"))
    } else {
        Ok(())
    }
}

fn field(ty: TypeDesc) -> Result<(), String> {
    if ty.world == World::Field {
        Ok(())
    } else {
        Err(format!("expected a field, found {ty}"))
    }
}

fn domain_slot(ty: TypeDesc) -> Result<(), String> {
    not_field(ty)?;
    if ty.domain == Domain::Domain {
        Ok(())
    } else {
        Err(format!("expected a domain, found {ty}"))
    }
}

/// Result domain of a component-wise binary op with scalar broadcast.
fn broadcast(a: TypeDesc, b: TypeDesc) -> Result<Domain, String> {
    let (da, db) = (math(a)?, math(b)?);
    if da == db {
        Ok(da)
    } else if da.is_numeric() && db.is_numeric() {
        Ok(Domain::Float)
    } else if da.is_numeric() {
        Ok(db)
    } else if db.is_numeric() {
        Ok(da)
    } else {
        Err(format!("cannot combine {a} with {b}"))
    }
}

fn expect_float(value: &Value) -> Result<f64, KernelFault> {
    value
        .as_float()
        .ok_or_else(|| KernelFault::Type(format!("expected a number, got {}", value.kind_name())))
}

fn expect_domain(value: &Value) -> Result<DomainKey, KernelFault> {
    let domain = value
        .as_domain()
        .ok_or_else(|| KernelFault::Type(format!("expected a domain, got {}", value.kind_name())))?;
    if domain.count > MAX_FIELD_ELEMENTS {
        return Err(KernelFault::DomainTooLarge(f64::from(domain.count)));
    }
    Ok(domain)
}

fn expect_field(value: &Value) -> Result<&FieldValue, KernelFault> {
    value
        .as_field()
        .ok_or_else(|| KernelFault::Type(format!("expected a field, got {}", value.kind_name())))
}

fn reduce(f: ReduceFn, domain: Domain, field: &FieldValue) -> Value {
    let width = domain.components();
    let n = field.len();
    if n == 0 {
        return Value::from_components(domain, &vec![0.0; width]);
    }
    let mut acc: Vec<f64> = (0..width).map(|c| field.component(0, c)).collect();
    for i in 1..n {
        for (c, a) in acc.iter_mut().enumerate() {
            let x = field.component(i, c);
            *a = match f {
                ReduceFn::Sum | ReduceFn::Mean => *a + x,
                ReduceFn::Max => a.max(x),
                ReduceFn::Min => a.min(x),
            };
        }
    }
    if f == ReduceFn::Mean {
        for a in &mut acc {
            *a /= n as f64;
        }
    }
    Value::from_components(domain, &acc)
}

fn push(history: &FieldValue, value: &[f64], width: usize) -> Value {
    let key = history.domain();
    let count = key.count as usize;
    let mut data = Vec::with_capacity(count * width);
    for i in 0..count {
        for c in 0..width {
            let x = if i == 0 {
                value.get(c).copied().unwrap_or(0.0)
            } else {
                history.component(i - 1, c)
            };
            data.push(x);
        }
    }
    Value::Field(FieldValue::Buffer(FieldBuffer {
        domain: key,
        stride: width,
        data,
    }))
}

/// One op in a program.
#[derive(Debug, Clone, PartialEq)]
pub struct OpNode {
    /// Kernel.
    pub kind: OpKind,
    /// Input slots, in kernel argument order.
    pub inputs: Vec<SlotId>,
    /// Output slot.
    pub output: SlotId,
    pub(crate) block: Option<usize>,
}
