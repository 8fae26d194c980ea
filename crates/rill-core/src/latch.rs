//! Latches: the only way a value crosses a frame boundary.
//!
//! A latch has an *output* slot, holding the value committed on the previous
//! frame, and an *input* slot, whose value this frame becomes next frame's
//! output. The dependency graph never contains an edge from a latch's input to
//! its output; that missing edge is what legally breaks feedback.
//!
//! Lowering code uses [`StateCell`]: declare the cell, read
//! [`StateCell::prev`], compute the next value with ordinary ops, then hand the
//! cell back to [`ProgramBuilder::commit`](crate::ProgramBuilder::commit).

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::slot::SlotId;
use crate::types::{TypeDesc, Value, World};

/// Stable identity of a latch, used as the state store key.
///
/// Ids survive recompiles: a program that declares the same id with the same
/// kind and type reuses the stored state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatchId(String);

impl LatchId {
    /// Creates a latch id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LatchId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a latch stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchKind {
    /// One value.
    Signal,
    /// One buffer over a domain.
    Field,
}

impl LatchKind {
    /// Kind implied by a value type.
    pub fn of(ty: TypeDesc) -> Self {
        if ty.world == World::Field {
            LatchKind::Field
        } else {
            LatchKind::Signal
        }
    }
}

/// Declaration of one unit of cross-frame memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LatchDecl {
    /// Stable id.
    pub id: LatchId,
    /// Signal or field.
    pub kind: LatchKind,
    /// Declared value type.
    pub value_type: TypeDesc,
    /// Value committed this frame. `None` until the cell is committed.
    pub in_slot: Option<SlotId>,
    /// Previous frame's committed value.
    pub out_slot: SlotId,
    /// Domain the field buffers range over (field latches only).
    pub domain_slot: Option<SlotId>,
    /// Initial value. For field latches this is the per-element value.
    pub init: Value,
}

/// Lowering-time handle to a declared latch.
///
/// The handle must be passed to
/// [`ProgramBuilder::commit`](crate::ProgramBuilder::commit); a cell that is
/// dropped uncommitted fails compilation with
/// [`UncommittedStateCell`](crate::CompileError::UncommittedStateCell).
#[must_use = "a state cell must be committed"]
#[derive(Debug)]
pub struct StateCell {
    pub(crate) latch: usize,
    pub(crate) id: LatchId,
    pub(crate) prev: SlotId,
    pub(crate) value_type: TypeDesc,
}

impl StateCell {
    /// Slot holding the previous frame's value.
    pub fn prev(&self) -> SlotId {
        self.prev
    }

    /// Stable id of the underlying latch.
    pub fn id(&self) -> &LatchId {
        &self.id
    }

    /// Declared value type.
    pub fn value_type(&self) -> TypeDesc {
        self.value_type
    }
}
