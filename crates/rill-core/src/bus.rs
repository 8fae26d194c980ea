//! Buses: named, typed channels with many publishers and a combine rule.
//!
//! Publishers are ordered by `(sort_key, id)` ascending at compile time, and
//! the [`CombineMode`] folds their values in that order. Commutative modes
//! (`sum`, `max`, `min`) are order independent by construction; `average` is
//! computed from an ordered sum so it is bit-stable; `last` and `layer`
//! depend on the canonical order and nothing else.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::rail::RailId;
use crate::slot::SlotId;
use crate::types::{Domain, TypeDesc, Value, World};

/// Rule for combining the publishers of one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Component-wise sum.
    Sum,
    /// Component-wise mean.
    Average,
    /// Maximum (logical or for booleans).
    Max,
    /// Minimum (logical and for booleans).
    Min,
    /// Highest `(sort_key, id)` wins.
    Last,
    /// Alpha-over compositing in publisher order (colors only).
    Layer,
}

impl CombineMode {
    /// Lowercase name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            CombineMode::Sum => "sum",
            CombineMode::Average => "average",
            CombineMode::Max => "max",
            CombineMode::Min => "min",
            CombineMode::Last => "last",
            CombineMode::Layer => "layer",
        }
    }

    /// Returns true if the result does not depend on publisher order.
    pub const fn is_commutative(self) -> bool {
        matches!(self, CombineMode::Sum | CombineMode::Max | CombineMode::Min)
    }

    /// Returns true if this mode can combine several publishers of `ty`.
    ///
    /// A bus with at most one publisher passes its value through regardless
    /// of mode; this check only matters for multi-publisher buses.
    pub fn supports(self, ty: TypeDesc) -> bool {
        if ty.world == World::Field {
            return self == CombineMode::Last;
        }
        match ty.domain {
            Domain::Float | Domain::Phase | Domain::Time => matches!(
                self,
                CombineMode::Sum
                    | CombineMode::Average
                    | CombineMode::Max
                    | CombineMode::Min
                    | CombineMode::Last
            ),
            Domain::Vec2 => matches!(
                self,
                CombineMode::Sum | CombineMode::Average | CombineMode::Last
            ),
            Domain::Color => matches!(
                self,
                CombineMode::Average | CombineMode::Last | CombineMode::Layer
            ),
            Domain::Bool | Domain::Trigger => {
                matches!(self, CombineMode::Max | CombineMode::Min | CombineMode::Last)
            }
            Domain::Domain => self == CombineMode::Last,
        }
    }

    /// Folds `values` (already in canonical publisher order).
    ///
    /// Returns `None` for an empty input; callers substitute the bus's
    /// silent value. A single value is passed through unchanged.
    pub fn combine(self, values: &[&Value]) -> Option<Value> {
        let (first, rest) = values.split_first()?;
        if rest.is_empty() {
            return Some((*first).clone());
        }
        if self == CombineMode::Last {
            return values.last().map(|v| (*v).clone());
        }

        if let Some(flags) = values
            .iter()
            .map(|v| v.as_bool())
            .collect::<Option<Vec<bool>>>()
        {
            return Some(Value::Bool(match self {
                CombineMode::Min => flags.iter().all(|b| *b),
                _ => flags.iter().any(|b| *b),
            }));
        }

        if self == CombineMode::Layer {
            return Some(layer(values));
        }

        let domain = first.natural_domain();
        let mut acc = first.components()?;
        for value in rest {
            let comps = value.components()?;
            for (a, c) in acc.iter_mut().zip(comps) {
                *a = match self {
                    CombineMode::Sum | CombineMode::Average => *a + c,
                    CombineMode::Max => a.max(c),
                    CombineMode::Min => a.min(c),
                    CombineMode::Last | CombineMode::Layer => c,
                };
            }
        }
        if self == CombineMode::Average {
            let n = values.len() as f64;
            for a in &mut acc {
                *a /= n;
            }
        }
        Some(Value::from_components(domain, &acc))
    }
}

impl fmt::Display for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Straight-alpha "over" compositing, earliest publisher at the bottom.
fn layer(values: &[&Value]) -> Value {
    let mut dst = [0.0f64; 4];
    for value in values {
        let Value::Color(src) = value else { continue };
        let sa = src[3];
        let da = dst[3];
        let out_a = sa + da * (1.0 - sa);
        let mut out = [0.0; 4];
        if out_a > 0.0 {
            for c in 0..3 {
                out[c] = (src[c] * sa + dst[c] * da * (1.0 - sa)) / out_a;
            }
        }
        out[3] = out_a;
        dst = out;
    }
    Value::Color(dst)
}

/// Stable identity of a publisher within its bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublisherId(pub(crate) u32);

impl PublisherId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Stable identity of a bus within one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(pub(crate) u32);

impl BusId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One source feeding a bus.
#[derive(Clone, Debug, PartialEq)]
pub struct Publisher {
    /// Identity used for tie-breaking equal sort keys.
    pub id: PublisherId,
    /// Slot whose value is published.
    pub source: SlotId,
    /// Primary ordering key, ascending.
    pub sort_key: i32,
}

/// Compiled bus declaration.
#[derive(Clone, Debug)]
pub struct BusDecl {
    /// Unique bus name.
    pub name: String,
    /// Type of every publisher and of the combined value.
    pub ty: TypeDesc,
    /// Combine rule.
    pub mode: CombineMode,
    /// Value seen by listeners when nothing publishes.
    pub silent: Value,
    /// Publishers in insertion order.
    pub publishers: Vec<Publisher>,
    /// Set if this bus is the publish side of a rail.
    pub rail: Option<RailId>,
    pub(crate) combined: Option<SlotId>,
    pub(crate) next_publisher: u32,
}

impl BusDecl {
    pub(crate) fn new(name: String, ty: TypeDesc, mode: CombineMode, silent: Value) -> Self {
        Self {
            name,
            ty,
            mode,
            silent,
            publishers: Vec::new(),
            rail: None,
            combined: None,
            next_publisher: 0,
        }
    }

    /// Publishers in canonical `(sort_key, id)` order.
    pub fn sorted_publishers(&self) -> Vec<&Publisher> {
        let mut sorted: Vec<&Publisher> = self.publishers.iter().collect();
        sorted.sort_by_key(|p| (p.sort_key, p.id));
        sorted
    }

    /// Slot that listeners read, if anything listens.
    pub fn combined_slot(&self) -> Option<SlotId> {
        self.combined
    }
}
