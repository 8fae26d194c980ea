//! Value and type descriptors shared by the compiler and the runtime.
//!
//! Every slot in a compiled program carries a [`TypeDesc`]: the *world* it
//! lives in (per-frame signal, per-element field, constant scalar, or block
//! configuration) and the *domain* of its values. At runtime slots hold a
//! [`Value`]. Field values are either lazy expressions ([`FieldExpr`]) or
//! materialized buffers ([`FieldBuffer`]); only the latter may be latched.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Evaluation world of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum World {
    /// One value per frame.
    Signal,
    /// One value per element of a domain.
    Field,
    /// Compile-time constant.
    Scalar,
    /// Block configuration (constant, authored in the patch).
    Config,
}

impl World {
    /// Lowercase name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            World::Signal => "signal",
            World::Field => "field",
            World::Scalar => "scalar",
            World::Config => "config",
        }
    }

    /// True for worlds whose value is fixed for the lifetime of a program.
    pub const fn is_constant(self) -> bool {
        matches!(self, World::Scalar | World::Config)
    }
}

/// Value kind carried by a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Unbounded real number.
    Float,
    /// Normalized cycle position in `[0, 1)`.
    Phase,
    /// Time in milliseconds.
    Time,
    /// Two-component vector.
    Vec2,
    /// Straight-alpha RGBA color.
    Color,
    /// Boolean.
    Bool,
    /// Boolean that is true on the frames an event fires.
    Trigger,
    /// Element-set descriptor of a field (a [`DomainKey`]).
    Domain,
}

impl Domain {
    /// Lowercase name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Domain::Float => "float",
            Domain::Phase => "phase",
            Domain::Time => "time",
            Domain::Vec2 => "vec2",
            Domain::Color => "color",
            Domain::Bool => "bool",
            Domain::Trigger => "trigger",
            Domain::Domain => "domain",
        }
    }

    /// Number of `f64` components per value.
    pub const fn components(self) -> usize {
        match self {
            Domain::Vec2 => 2,
            Domain::Color => 4,
            _ => 1,
        }
    }

    /// True for scalar real domains (float, phase, time).
    pub const fn is_numeric(self) -> bool {
        matches!(self, Domain::Float | Domain::Phase | Domain::Time)
    }

    /// True for boolean domains.
    pub const fn is_boolean(self) -> bool {
        matches!(self, Domain::Bool | Domain::Trigger)
    }

    /// Canonical zero value, used when an input declares a zero default and
    /// as the silent value of buses. `Domain` has none.
    pub fn canonical_zero(self) -> Option<Value> {
        match self {
            Domain::Float | Domain::Phase | Domain::Time => Some(Value::Float(0.0)),
            Domain::Vec2 => Some(Value::Vec2([0.0; 2])),
            Domain::Color => Some(Value::Color([0.0; 4])),
            Domain::Bool | Domain::Trigger => Some(Value::Bool(false)),
            Domain::Domain => None,
        }
    }
}

/// Full type of a slot: world plus domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDesc {
    /// Evaluation world.
    pub world: World,
    /// Value kind.
    pub domain: Domain,
}

impl TypeDesc {
    /// Creates a type descriptor.
    pub const fn new(world: World, domain: Domain) -> Self {
        Self { world, domain }
    }

    /// Per-frame signal of `domain`.
    pub const fn signal(domain: Domain) -> Self {
        Self::new(World::Signal, domain)
    }

    /// Per-element field of `domain`.
    pub const fn field(domain: Domain) -> Self {
        Self::new(World::Field, domain)
    }

    /// Constant scalar of `domain`.
    pub const fn scalar(domain: Domain) -> Self {
        Self::new(World::Scalar, domain)
    }

    /// Block configuration value of `domain`.
    pub const fn config(domain: Domain) -> Self {
        Self::new(World::Config, domain)
    }

    /// Returns true if a value of type `source` may be connected to a
    /// consumer expecting `self`.
    ///
    /// Domains must match exactly (adapters are the block library's job).
    /// Constants promote into signals; config promotes into scalars.
    pub fn accepts(self, source: TypeDesc) -> bool {
        if self.domain != source.domain {
            return false;
        }
        match (self.world, source.world) {
            (a, b) if a == b => true,
            (World::Signal, World::Scalar | World::Config) => true,
            (World::Scalar, World::Config) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.world.name(), self.domain.name())
    }
}

/// Largest element count a domain may have.
///
/// Domain counts come from signals, so a runaway value must fail the frame
/// instead of allocating unbounded buffers.
pub const MAX_FIELD_ELEMENTS: u32 = 1 << 20;

/// Stable identity and shape of a field's element set.
///
/// Latched field buffers are reused only while the key stays equal; any
/// change of count or identity cold-resets the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainKey {
    /// Number of elements.
    pub count: u32,
    /// Stable identity of the element mapping.
    pub identity: u64,
}

impl DomainKey {
    /// Creates a domain key.
    pub const fn new(count: u32, identity: u64) -> Self {
        Self { count, identity }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{:x}[{}]", self.identity, self.count)
    }
}

/// Materialized per-element storage.
///
/// Components are interleaved: element `i` occupies
/// `data[i * stride..(i + 1) * stride]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBuffer {
    /// Element set this buffer was produced for.
    pub domain: DomainKey,
    /// Components per element.
    pub stride: usize,
    /// Interleaved component data.
    pub data: Vec<f64>,
}

impl FieldBuffer {
    /// Creates a buffer with every element set to `components`.
    pub fn filled(domain: DomainKey, components: &[f64]) -> Self {
        let stride = components.len().max(1);
        let mut data = Vec::with_capacity(domain.count as usize * stride);
        for _ in 0..domain.count {
            if components.is_empty() {
                data.push(0.0);
            } else {
                data.extend_from_slice(components);
            }
        }
        Self {
            domain,
            stride,
            data,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.domain.count as usize
    }

    /// Returns true if the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.domain.count == 0
    }

    /// Returns true if `data` holds exactly `count * stride` components.
    ///
    /// Buffers built by kernels always are; buffers loaded from a snapshot
    /// may not be.
    pub fn is_consistent(&self) -> bool {
        self.stride > 0
            && self.domain.count <= MAX_FIELD_ELEMENTS
            && self.data.len() == self.domain.count as usize * self.stride
    }

    /// Components of element `index`.
    pub fn element(&self, index: usize) -> &[f64] {
        let start = index * self.stride;
        &self.data[start..start + self.stride]
    }
}

/// Lazy field expression, evaluated per element on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldExpr {
    /// Every element equals `components`.
    Broadcast {
        /// Element set.
        domain: DomainKey,
        /// Components of the broadcast value.
        components: Vec<f64>,
    },
    /// Element `i` equals `i / (count - 1)` (0 for single-element domains).
    Ramp {
        /// Element set.
        domain: DomainKey,
    },
}

impl FieldExpr {
    /// Element set the expression ranges over.
    pub fn domain(&self) -> DomainKey {
        match self {
            FieldExpr::Broadcast { domain, .. } | FieldExpr::Ramp { domain } => *domain,
        }
    }

    /// Components per element.
    pub fn stride(&self) -> usize {
        match self {
            FieldExpr::Broadcast { components, .. } => components.len().max(1),
            FieldExpr::Ramp { .. } => 1,
        }
    }

    /// Component `component` of element `index`.
    pub fn component(&self, index: usize, component: usize) -> f64 {
        match self {
            FieldExpr::Broadcast { components, .. } => {
                components.get(component).copied().unwrap_or(0.0)
            }
            FieldExpr::Ramp { domain } => {
                if domain.count <= 1 {
                    0.0
                } else {
                    index as f64 / f64::from(domain.count - 1)
                }
            }
        }
    }

    /// Evaluates every element into a buffer.
    pub fn materialize(&self) -> FieldBuffer {
        let domain = self.domain();
        let stride = self.stride();
        let mut data = Vec::with_capacity(domain.count as usize * stride);
        for i in 0..domain.count as usize {
            for c in 0..stride {
                data.push(self.component(i, c));
            }
        }
        FieldBuffer {
            domain,
            stride,
            data,
        }
    }
}

/// A field value: lazy or materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Unevaluated expression.
    Lazy(FieldExpr),
    /// Evaluated buffer.
    Buffer(FieldBuffer),
}

impl FieldValue {
    /// Element set of the value.
    pub fn domain(&self) -> DomainKey {
        match self {
            FieldValue::Lazy(expr) => expr.domain(),
            FieldValue::Buffer(buf) => buf.domain,
        }
    }

    /// Components per element.
    pub fn stride(&self) -> usize {
        match self {
            FieldValue::Lazy(expr) => expr.stride(),
            FieldValue::Buffer(buf) => buf.stride,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.domain().count as usize
    }

    /// Returns true if the field has no elements.
    pub fn is_empty(&self) -> bool {
        self.domain().count == 0
    }

    /// Component `component` of element `index`.
    pub fn component(&self, index: usize, component: usize) -> f64 {
        match self {
            FieldValue::Lazy(expr) => expr.component(index, component),
            FieldValue::Buffer(buf) => buf.data[index * buf.stride + component],
        }
    }

    /// Returns a buffer with the same contents, evaluating lazily held data.
    pub fn materialize(&self) -> FieldBuffer {
        match self {
            FieldValue::Lazy(expr) => expr.materialize(),
            FieldValue::Buffer(buf) => buf.clone(),
        }
    }

    /// True if the value is backed by a buffer.
    pub fn is_buffer(&self) -> bool {
        matches!(self, FieldValue::Buffer(_))
    }
}

/// Runtime content of a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Float, phase, or time.
    Float(f64),
    /// Two-component vector.
    Vec2([f64; 2]),
    /// Straight-alpha RGBA.
    Color([f64; 4]),
    /// Bool or trigger.
    Bool(bool),
    /// Domain descriptor.
    Domain(DomainKey),
    /// Per-element data.
    Field(FieldValue),
}

impl Value {
    /// Returns the float payload, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Returns the bool payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the domain payload, if any.
    pub fn as_domain(&self) -> Option<DomainKey> {
        match self {
            Value::Domain(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the field payload, if any.
    pub fn as_field(&self) -> Option<&FieldValue> {
        match self {
            Value::Field(f) => Some(f),
            _ => None,
        }
    }

    /// Flattens a non-field value into components (bools become 0/1).
    pub fn components(&self) -> Option<Vec<f64>> {
        match self {
            Value::Float(x) => Some(vec![*x]),
            Value::Vec2(v) => Some(v.to_vec()),
            Value::Color(c) => Some(c.to_vec()),
            Value::Bool(b) => Some(vec![if *b { 1.0 } else { 0.0 }]),
            Value::Domain(d) => Some(vec![f64::from(d.count)]),
            Value::Field(_) => None,
        }
    }

    /// Rebuilds a value of `domain` from components.
    pub fn from_components(domain: Domain, components: &[f64]) -> Value {
        let at = |i: usize| components.get(i).copied().unwrap_or(0.0);
        match domain {
            Domain::Float | Domain::Phase | Domain::Time => Value::Float(at(0)),
            Domain::Vec2 => Value::Vec2([at(0), at(1)]),
            Domain::Color => Value::Color([at(0), at(1), at(2), at(3)]),
            Domain::Bool | Domain::Trigger => Value::Bool(at(0) != 0.0),
            Domain::Domain => Value::Domain(DomainKey::new(at(0).max(0.0) as u32, 0)),
        }
    }

    /// Returns true if this value is a valid payload for a slot of `ty`.
    pub fn fits(&self, ty: TypeDesc) -> bool {
        if ty.world == World::Field {
            return matches!(self, Value::Field(f) if f.stride() == ty.domain.components());
        }
        match ty.domain {
            Domain::Float | Domain::Phase | Domain::Time => matches!(self, Value::Float(_)),
            Domain::Vec2 => matches!(self, Value::Vec2(_)),
            Domain::Color => matches!(self, Value::Color(_)),
            Domain::Bool | Domain::Trigger => matches!(self, Value::Bool(_)),
            Domain::Domain => matches!(self, Value::Domain(_)),
        }
    }

    /// Domain a constant of this value naturally has.
    pub fn natural_domain(&self) -> Domain {
        match self {
            Value::Float(_) => Domain::Float,
            Value::Vec2(_) => Domain::Vec2,
            Value::Color(_) => Domain::Color,
            Value::Bool(_) => Domain::Bool,
            Value::Domain(_) => Domain::Domain,
            Value::Field(f) => match f.stride() {
                2 => Domain::Vec2,
                4 => Domain::Color,
                _ => Domain::Float,
            },
        }
    }

    /// Short name of the payload variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Float(_) => "float",
            Value::Vec2(_) => "vec2",
            Value::Color(_) => "color",
            Value::Bool(_) => "bool",
            Value::Domain(_) => "domain",
            Value::Field(FieldValue::Lazy(_)) => "lazy field",
            Value::Field(FieldValue::Buffer(_)) => "field buffer",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(x) => write!(f, "{x}"),
            Value::Vec2([x, y]) => write!(f, "({x}, {y})"),
            Value::Color([r, g, b, a]) => write!(f, "rgba({r}, {g}, {b}, {a})"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Domain(d) => write!(f, "{d}"),
            Value::Field(field) => {
                let buf = field.materialize();
                write!(f, "[")?;
                for i in 0..buf.len() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let el = buf.element(i);
                    if el.len() == 1 {
                        write!(f, "{}", el[0])?;
                    } else {
                        write!(f, "{el:?}")?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}
