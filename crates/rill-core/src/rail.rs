//! Rails: the fixed set of reserved global channels.
//!
//! Each rail has an internal generator driven by the root clock, a type, a
//! combine rule, and a [`DrivePolicy`] deciding whether the generator,
//! external publishers, or both determine its value. Rails are never nodes
//! of the same-frame dependency graph: reads observe the value resolved at
//! the end of the previous frame, so a rail can feed a bus that publishes
//! back into it without creating an instantaneous cycle.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::bus::CombineMode;
use crate::state::Clock;
use crate::types::{Domain, TypeDesc, Value};

/// One of the reserved rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RailId {
    /// Root time in milliseconds.
    Time,
    /// Fast cycle phase.
    PhaseA,
    /// Slow cycle phase.
    PhaseB,
    /// Fires when `phaseA` wraps.
    Pulse,
    /// Summed energy contributions.
    Energy,
    /// Global color, composited from publishers.
    Palette,
}

impl RailId {
    /// Every rail, in resolution order.
    pub const ALL: [RailId; 6] = [
        RailId::Time,
        RailId::PhaseA,
        RailId::PhaseB,
        RailId::Pulse,
        RailId::Energy,
        RailId::Palette,
    ];

    /// Reserved bus name of the rail.
    pub const fn name(self) -> &'static str {
        match self {
            RailId::Time => "time",
            RailId::PhaseA => "phaseA",
            RailId::PhaseB => "phaseB",
            RailId::Pulse => "pulse",
            RailId::Energy => "energy",
            RailId::Palette => "palette",
        }
    }

    /// Looks a rail up by its reserved name.
    pub fn from_name(name: &str) -> Option<RailId> {
        RailId::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Position in [`RailId::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Fixed type of the rail.
    pub const fn ty(self) -> TypeDesc {
        match self {
            RailId::Time => TypeDesc::signal(Domain::Time),
            RailId::PhaseA | RailId::PhaseB => TypeDesc::signal(Domain::Phase),
            RailId::Pulse => TypeDesc::signal(Domain::Trigger),
            RailId::Energy => TypeDesc::signal(Domain::Float),
            RailId::Palette => TypeDesc::signal(Domain::Color),
        }
    }

    /// Combine rule applied to the rail's publishers.
    pub const fn combine(self) -> CombineMode {
        match self {
            RailId::Time | RailId::PhaseA | RailId::PhaseB => CombineMode::Last,
            RailId::Pulse => CombineMode::Max,
            RailId::Energy => CombineMode::Sum,
            RailId::Palette => CombineMode::Layer,
        }
    }

    /// Value of a patched rail with no publishers.
    pub fn silent(self) -> Value {
        match self {
            RailId::Time | RailId::PhaseA | RailId::PhaseB | RailId::Energy => Value::Float(0.0),
            RailId::Pulse => Value::Bool(false),
            RailId::Palette => Value::Color([0.0; 4]),
        }
    }
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who determines a rail's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrivePolicy {
    /// Internal generator only; publishers are ignored (and warned about).
    #[default]
    Normalled,
    /// Publishers only; silent value when nothing publishes.
    Patched,
    /// Internal generator as the lowest-priority publisher, then publishers.
    Mixed,
}

impl DrivePolicy {
    /// Lowercase name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            DrivePolicy::Normalled => "normalled",
            DrivePolicy::Patched => "patched",
            DrivePolicy::Mixed => "mixed",
        }
    }
}

/// Per-rail configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RailConfig {
    /// Drive policy.
    pub policy: DrivePolicy,
    /// User bus that receives the resolved value as its lowest-priority
    /// publisher, visible on the next frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// Policies for all six rails, one field per rail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct RailPolicies {
    /// `time` rail.
    pub time: RailConfig,
    /// `phaseA` rail.
    pub phase_a: RailConfig,
    /// `phaseB` rail.
    pub phase_b: RailConfig,
    /// `pulse` rail.
    pub pulse: RailConfig,
    /// `energy` rail.
    pub energy: RailConfig,
    /// `palette` rail.
    pub palette: RailConfig,
}

impl RailPolicies {
    /// Configuration of `rail`.
    pub fn get(&self, rail: RailId) -> &RailConfig {
        match rail {
            RailId::Time => &self.time,
            RailId::PhaseA => &self.phase_a,
            RailId::PhaseB => &self.phase_b,
            RailId::Pulse => &self.pulse,
            RailId::Energy => &self.energy,
            RailId::Palette => &self.palette,
        }
    }

    /// Mutable configuration of `rail`.
    pub fn get_mut(&mut self, rail: RailId) -> &mut RailConfig {
        match rail {
            RailId::Time => &mut self.time,
            RailId::PhaseA => &mut self.phase_a,
            RailId::PhaseB => &mut self.phase_b,
            RailId::Pulse => &mut self.pulse,
            RailId::Energy => &mut self.energy,
            RailId::Palette => &mut self.palette,
        }
    }
}

/// How root time evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeModel {
    /// Time stops at `duration_ms`.
    Finite {
        /// Length of the timeline.
        duration_ms: f64,
    },
    /// Time grows without bound.
    #[default]
    Infinite,
}

impl TimeModel {
    /// Root time after advancing `time_ms` by `dt_ms`.
    pub fn advance(self, time_ms: f64, dt_ms: f64) -> f64 {
        let next = time_ms + dt_ms;
        match self {
            TimeModel::Finite { duration_ms } => next.min(duration_ms.max(0.0)),
            TimeModel::Infinite => next,
        }
    }
}

fn default_period_a() -> f64 {
    1000.0
}

fn default_period_b() -> f64 {
    4000.0
}

/// Time model, generator periods, and drive policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RailsConfig {
    /// Root time model.
    #[serde(default)]
    pub time_model: TimeModel,
    /// Period of `phaseA` in milliseconds.
    #[serde(default = "default_period_a")]
    pub period_a_ms: f64,
    /// Period of `phaseB` in milliseconds.
    #[serde(default = "default_period_b")]
    pub period_b_ms: f64,
    /// Per-rail drive policies and bus bindings.
    #[serde(default)]
    pub policies: RailPolicies,
}

impl Default for RailsConfig {
    fn default() -> Self {
        Self {
            time_model: TimeModel::default(),
            period_a_ms: default_period_a(),
            period_b_ms: default_period_b(),
            policies: RailPolicies::default(),
        }
    }
}

impl RailsConfig {
    /// Drive policy of `rail`.
    pub fn policy(&self, rail: RailId) -> DrivePolicy {
        self.policies.get(rail).policy
    }

    /// Bus the resolved value is mirrored into, if any.
    pub fn binding(&self, rail: RailId) -> Option<&str> {
        self.policies.get(rail).bus.as_deref()
    }

    /// Sets the drive policy of `rail`.
    pub fn with_policy(mut self, rail: RailId, policy: DrivePolicy) -> Self {
        self.policies.get_mut(rail).policy = policy;
        self
    }

    /// Mirrors the resolved value of `rail` into `bus`.
    pub fn with_binding(mut self, rail: RailId, bus: impl Into<String>) -> Self {
        self.policies.get_mut(rail).bus = Some(bus.into());
        self
    }
}

/// Internal candidate values of every rail, indexed by [`RailId::index`].
pub type RailValues = [Value; 6];

/// Computes the internal generator value of every rail for `clock`.
pub fn generate(config: &RailsConfig, clock: &Clock) -> RailValues {
    let t = clock.time_ms;
    let phase_a = phase(t, config.period_a_ms);
    let phase_b = phase(t, config.period_b_ms);
    let pulse = clock.frame > 0
        && cycles(t, config.period_a_ms) > cycles(clock.prev_time_ms, config.period_a_ms);
    [
        Value::Float(t),
        Value::Float(phase_a),
        Value::Float(phase_b),
        Value::Bool(pulse),
        Value::Float(0.0),
        Value::Color(hue_wheel(phase_b)),
    ]
}

fn phase(t: f64, period: f64) -> f64 {
    if period > 0.0 {
        (t / period).rem_euclid(1.0)
    } else {
        0.0
    }
}

fn cycles(t: f64, period: f64) -> f64 {
    if period > 0.0 { (t / period).floor() } else { 0.0 }
}

/// Fully saturated-ish opaque color at `hue` (0..1) on the color wheel.
fn hue_wheel(hue: f64) -> [f64; 4] {
    const SATURATION: f64 = 0.6;
    let h = hue.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = 1.0 - SATURATION;
    let q = 1.0 - SATURATION * f;
    let r = 1.0 - SATURATION * (1.0 - f);
    let (red, green, blue) = match sector as u8 {
        0 => (1.0, r, p),
        1 => (q, 1.0, p),
        2 => (p, 1.0, r),
        3 => (p, q, 1.0),
        4 => (r, p, 1.0),
        _ => (1.0, p, q),
    };
    [red, green, blue, 1.0]
}

/// Resolves a rail's final value for this frame.
///
/// `published` must already be in canonical publisher order. Returns the
/// value and whether publishers were ignored because the rail is normalled.
pub(crate) fn resolve(
    rail: RailId,
    policy: DrivePolicy,
    internal: &Value,
    published: &[&Value],
) -> (Value, bool) {
    match policy {
        DrivePolicy::Normalled => (internal.clone(), !published.is_empty()),
        DrivePolicy::Patched => (
            rail.combine()
                .combine(published)
                .unwrap_or_else(|| rail.silent()),
            false,
        ),
        DrivePolicy::Mixed => {
            let mut all = Vec::with_capacity(published.len() + 1);
            all.push(internal);
            all.extend_from_slice(published);
            (
                rail.combine()
                    .combine(&all)
                    .unwrap_or_else(|| internal.clone()),
                false,
            )
        }
    }
}
