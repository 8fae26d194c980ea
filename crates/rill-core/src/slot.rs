//! Type/slot table.
//!
//! Every intermediate value of a program lives in a [`SlotId`]-addressed
//! slot with a fixed [`TypeDesc`]. The table also records which step
//! produces each slot (exactly one) and resolves *placeholder* slots: forward
//! references created before the producing block has been lowered, which is
//! how authored feedback loops are expressed without recursion.

use core::fmt;

use crate::error::CompileError;
use crate::rail::RailId;
use crate::types::TypeDesc;

/// Stable index of a value slot within one compiled program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// How a slot's value is represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Plain value (signals, scalars, domains).
    Inline,
    /// Lazy field expression.
    Lazy,
    /// Materialized field buffer.
    Buffer,
}

/// The step that writes a slot each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Producer {
    Op(usize),
    Combine(usize),
    LatchRead(usize),
    RailRead(RailId),
}

/// Metadata for one slot.
#[derive(Clone, Debug)]
pub struct SlotInfo {
    /// Declared type.
    pub ty: TypeDesc,
    /// Value representation.
    pub storage: Storage,
    /// Human-readable name used in diagnostics.
    pub label: String,
    pub(crate) block: Option<usize>,
    pub(crate) producer: Option<Producer>,
    pub(crate) placeholder: bool,
    pub(crate) alias: Option<SlotId>,
}

impl SlotInfo {
    /// Returns true if this slot is an unresolved forward reference.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

/// Arena of slots for one program.
#[derive(Clone, Debug, Default)]
pub struct SlotTable {
    slots: Vec<SlotInfo>,
}

impl SlotTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, placeholders included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slots were allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Looks up a slot.
    pub fn get(&self, id: SlotId) -> Option<&SlotInfo> {
        self.slots.get(id.0 as usize)
    }

    /// Label of a slot, or its id if unknown.
    pub fn label(&self, id: SlotId) -> String {
        self.get(id)
            .map_or_else(|| id.to_string(), |info| info.label.clone())
    }

    /// Iterates `(id, info)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &SlotInfo)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, info)| (SlotId(i as u32), info))
    }

    pub(crate) fn alloc(
        &mut self,
        ty: TypeDesc,
        storage: Storage,
        label: impl Into<String>,
        block: Option<usize>,
        producer: Producer,
    ) -> SlotId {
        self.push(SlotInfo {
            ty,
            storage,
            label: label.into(),
            block,
            producer: Some(producer),
            placeholder: false,
            alias: None,
        })
    }

    pub(crate) fn placeholder(
        &mut self,
        ty: TypeDesc,
        label: impl Into<String>,
        block: Option<usize>,
    ) -> SlotId {
        self.push(SlotInfo {
            ty,
            storage: Storage::Inline,
            label: label.into(),
            block,
            producer: None,
            placeholder: true,
            alias: None,
        })
    }

    fn push(&mut self, info: SlotInfo) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(info);
        id
    }

    /// Binds a placeholder to the slot that actually produces its value.
    pub(crate) fn bind(&mut self, placeholder: SlotId, target: SlotId) -> Result<(), CompileError> {
        let target_ty = self
            .get(target)
            .map(|t| t.ty)
            .ok_or_else(|| CompileError::UnboundSlot {
                slot: target,
                label: target.to_string(),
            })?;
        let info = self
            .slots
            .get_mut(placeholder.0 as usize)
            .ok_or_else(|| CompileError::UnboundSlot {
                slot: placeholder,
                label: placeholder.to_string(),
            })?;
        if !info.placeholder || info.alias.is_some() {
            return Err(CompileError::MultipleProducers {
                slot: placeholder,
                label: info.label.clone(),
            });
        }
        if !info.ty.accepts(target_ty) {
            return Err(CompileError::TypeMismatch {
                context: format!("binding `{}`", info.label),
                expected: info.ty.to_string(),
                found: target_ty.to_string(),
            });
        }
        info.alias = Some(target);
        Ok(())
    }

    /// Follows placeholder aliases to the producing slot.
    ///
    /// Returns `Err(chain)` with the placeholders forming the loop if the
    /// chain comes back on itself, or `Ok(id)` of the first non-alias slot (which may be
    /// an unbound placeholder; callers check that separately).
    pub(crate) fn resolve(&self, id: SlotId) -> Result<SlotId, Vec<SlotId>> {
        let mut current = id;
        let mut chain = Vec::new();
        while let Some(info) = self.get(current) {
            match info.alias {
                Some(next) => {
                    if let Some(start) = chain.iter().position(|s| *s == current) {
                        return Err(chain.split_off(start));
                    }
                    chain.push(current);
                    current = next;
                }
                None => return Ok(current),
            }
        }
        Ok(current)
    }

    pub(crate) fn producer(&self, id: SlotId) -> Option<Producer> {
        self.get(id).and_then(|info| info.producer)
    }

    pub(crate) fn block_of(&self, id: SlotId) -> Option<usize> {
        self.get(id).and_then(|info| info.block)
    }
}
