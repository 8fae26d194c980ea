//! Compile errors, runtime errors, and non-fatal diagnostic events.
//!
//! Structural problems are always [`CompileError`]s and are accumulated in a
//! [`CompileReport`](crate::CompileReport) rather than failing on the first
//! one. Conditions that must stay visible without halting evaluation are
//! reported per frame as [`DiagnosticEvent`]s.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::CombineMode;
use crate::cycle::CycleDiagnostic;
use crate::latch::LatchId;
use crate::op::OpId;
use crate::rail::RailId;
use crate::slot::SlotId;
use crate::types::DomainKey;

/// Errors detected while building or compiling a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A same-frame cycle with no latch boundary.
    #[error("{0}")]
    InstantCycle(Box<CycleDiagnostic>),

    /// A latch's input, output, or init value disagrees with its declared type.
    #[error("latch `{latch}`: {side} has type {found}, declared {declared}")]
    LatchTypeMismatch {
        /// Offending latch.
        latch: LatchId,
        /// Which side disagrees (`input` or `init`).
        side: &'static str,
        /// Declared value type.
        declared: String,
        /// Type actually connected.
        found: String,
    },

    /// A field latch was declared without a domain slot.
    #[error("field latch `{latch}` has no domain slot")]
    LatchDomainMissing {
        /// Offending latch.
        latch: LatchId,
    },

    /// A field latch commit received a lazy expression.
    #[error("field latch `{latch}` commits `{label}` ({slot}), a lazy expression; materialize it first")]
    LatchCommitNeedsBuffer {
        /// Offending latch.
        latch: LatchId,
        /// Slot passed to the commit.
        slot: SlotId,
        /// Label of that slot.
        label: String,
    },

    /// A multi-publisher bus uses a combine mode its type does not support.
    #[error("bus `{bus}` has {publishers} publishers but combine mode `{mode}` is not defined for {ty}")]
    UnsupportedCombineMode {
        /// Bus name.
        bus: String,
        /// Configured mode.
        mode: CombineMode,
        /// Bus type.
        ty: String,
        /// Publisher count.
        publishers: usize,
    },

    /// An unconnected input has no deterministic fallback value.
    #[error("input `{port}` of `{block}` is unconnected and has no default value")]
    MissingDefaultSource {
        /// Block (or bus) owning the input.
        block: String,
        /// Port name.
        port: String,
    },

    /// Connected types are incompatible, or an op cannot accept its inputs.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Where the mismatch occurred.
        context: String,
        /// Expected type.
        expected: String,
        /// Type found.
        found: String,
    },

    /// A slot was given a second producer.
    #[error("slot {slot} (`{label}`) has more than one producer")]
    MultipleProducers {
        /// Offending slot.
        slot: SlotId,
        /// Its label.
        label: String,
    },

    /// A slot is consumed but nothing produces it.
    #[error("slot {slot} (`{label}`) is read but never produced")]
    UnboundSlot {
        /// Offending slot.
        slot: SlotId,
        /// Its label.
        label: String,
    },

    /// A state cell was read but never committed.
    #[error("state cell `{latch}` is never committed")]
    UncommittedStateCell {
        /// Offending latch.
        latch: LatchId,
    },

    /// A latch id was declared twice.
    #[error("latch `{0}` is declared more than once")]
    DuplicateLatch(LatchId),

    /// Reference to a bus that was never declared.
    #[error("unknown bus `{0}`")]
    UnknownBus(String),

    /// A bus name was declared twice.
    #[error("bus `{0}` is declared more than once")]
    DuplicateBus(String),

    /// A user bus tried to take a rail's name.
    #[error("`{0}` is a reserved rail and cannot be redeclared")]
    ReservedBus(String),

    /// A patch block names a type the library does not provide.
    #[error("block `{block}` has unknown type `{block_type}`")]
    UnknownBlockType {
        /// Block id.
        block: String,
        /// Requested type.
        block_type: String,
    },

    /// A wire, publisher, or output names a block that does not exist.
    #[error("unknown block `{0}`")]
    UnknownBlock(String),

    /// Two blocks share an id.
    #[error("block id `{0}` is used more than once")]
    DuplicateBlock(String),

    /// A port reference names a port the block type does not have.
    #[error("block `{block}` has no port `{port}`")]
    UnknownPort {
        /// Block id.
        block: String,
        /// Port name.
        port: String,
    },

    /// Two wires or listeners drive one input.
    #[error("input `{port}` of `{block}` has more than one driver")]
    MultipleDrivers {
        /// Block id.
        block: String,
        /// Port name.
        port: String,
    },

    /// A lowering function returned the wrong number of outputs.
    #[error("block `{block}` produced {found} outputs, its type declares {expected}")]
    OutputArity {
        /// Block id.
        block: String,
        /// Declared output count.
        expected: usize,
        /// Returned output count.
        found: usize,
    },

    /// A block parameter is missing or malformed.
    #[error("invalid parameter `{param}` for block `{block}`: {reason}")]
    InvalidParam {
        /// Block id.
        block: String,
        /// Parameter name.
        param: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The scheduler could not order every node after the cycle check passed.
    #[error("internal error: {remaining} node(s) could not be scheduled")]
    Unschedulable {
        /// Nodes left unordered.
        remaining: usize,
    },

    /// An output name was used twice.
    #[error("output `{0}` is declared more than once")]
    DuplicateOutput(String),
}

impl CompileError {
    /// Returns the cycle diagnostic if this is an [`InstantCycle`](Self::InstantCycle).
    pub fn as_cycle(&self) -> Option<&CycleDiagnostic> {
        match self {
            CompileError::InstantCycle(diag) => Some(diag),
            _ => None,
        }
    }
}

/// All errors from one failed compile.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", format_errors(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

fn format_errors(errors: &[CompileError]) -> String {
    match errors {
        [] => "compilation failed".to_string(),
        [one] => one.to_string(),
        many => {
            let lines: Vec<String> = many.iter().map(|e| format!("  - {e}")).collect();
            format!("{} compile errors:\n{}", many.len(), lines.join("\n"))
        }
    }
}

/// Compile-time findings that do not prevent a program from running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    /// A normalled rail has publishers; they are ignored at runtime.
    RailDriveConflict {
        /// Affected rail.
        rail: RailId,
        /// Number of ignored publishers.
        publishers: usize,
    },
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileWarning::RailDriveConflict { rail, publishers } => write!(
                f,
                "rail `{rail}` is normalled but has {publishers} publisher(s); \
                 set its policy to `mixed` or `patched` to use them"
            ),
        }
    }
}

/// Errors raised while executing a frame.
///
/// Host inputs can reach [`DomainMismatch`](Self::DomainMismatch) and
/// [`DomainTooLarge`](Self::DomainTooLarge) by reshaping fields; the slot and
/// latch variants only fire for a corrupted schedule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A step read a slot that was not written earlier in the frame.
    #[error("slot {slot} (`{label}`) read before it was written")]
    UninitializedSlot {
        /// Offending slot.
        slot: SlotId,
        /// Its label.
        label: String,
    },

    /// A slot was written twice in one frame.
    #[error("slot {slot} (`{label}`) written twice in one frame")]
    SlotWrittenTwice {
        /// Offending slot.
        slot: SlotId,
        /// Its label.
        label: String,
    },

    /// A kernel received values it cannot evaluate.
    #[error("op {op}: {detail}")]
    Kernel {
        /// Offending op.
        op: OpId,
        /// What went wrong.
        detail: String,
    },

    /// Two fields combined element-wise range over different domains.
    #[error("op {op}: field domains differ ({left} vs {right})")]
    DomainMismatch {
        /// Offending op.
        op: OpId,
        /// Domain of the first field input.
        left: DomainKey,
        /// Domain of the mismatching input.
        right: DomainKey,
    },

    /// A domain asked for more elements than a field may hold.
    #[error("op {op}: domain of {requested} elements exceeds the limit of {max}")]
    DomainTooLarge {
        /// Offending op.
        op: OpId,
        /// Requested element count.
        requested: f64,
        /// Largest allowed element count.
        max: u32,
    },

    /// A latch step found a value it cannot store or resolve against.
    #[error("latch `{latch}`: {detail}")]
    Latch {
        /// Offending latch.
        latch: LatchId,
        /// What went wrong.
        detail: String,
    },

    /// A frame was requested with a negative or non-finite delta.
    #[error("invalid frame delta {0} ms")]
    InvalidDelta(f64),

    /// `set_input` named an input the program does not declare.
    #[error("program has no input `{0}`")]
    UnknownInput(String),

    /// `set_input` supplied a value of the wrong kind.
    #[error("input `{name}` expects {expected}, got {found}")]
    InputType {
        /// Input name.
        name: String,
        /// Declared type.
        expected: String,
        /// Kind of the supplied value.
        found: &'static str,
    },
}

/// Non-fatal runtime condition surfaced to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// A field latch's buffers were cold-reset because its domain changed.
    LatchDomainReset {
        /// Affected latch.
        latch: LatchId,
        /// Domain the stored buffers were built for.
        previous: DomainKey,
        /// Domain resolved this frame.
        current: DomainKey,
    },
    /// Publishers into a normalled rail are being ignored.
    RailDriveConflict {
        /// Affected rail.
        rail: RailId,
        /// Number of ignored publishers.
        publishers: usize,
    },
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::LatchDomainReset {
                latch,
                previous,
                current,
            } => write!(
                f,
                "latch `{latch}` reset: domain changed from {previous} to {current}"
            ),
            DiagnosticEvent::RailDriveConflict { rail, publishers } => write!(
                f,
                "rail `{rail}` is normalled; ignoring {publishers} publisher(s)"
            ),
        }
    }
}
