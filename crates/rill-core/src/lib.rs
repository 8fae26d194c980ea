//! Rill Core - deterministic node-patch evaluation
//!
//! This crate compiles node patches into flat per-frame schedules and runs
//! them against an explicit, serializable state store. Frame `N` depends only
//! on the program, the state after frame `N - 1`, the frame delta, and the
//! host inputs, so live playback, scrubbing, and offline export agree exactly.
//!
//! # Core Abstractions
//!
//! ## Authoring
//!
//! - [`ProgramBuilder`] - Typed slots, pure ops, buses, rails, and state cells
//! - [`Patch`] / [`compile_patch`] - Serializable block graph lowered through a [`BlockLibrary`]
//! - [`BlockSpec`] / [`LowerCtx`] - How a block type emits its ops
//!
//! ## Compilation
//!
//! - [`CompileReport`] - Accumulated errors and warnings, plus the [`Program`] on success
//! - [`CycleDiagnostic`] - Same-frame cycle with ranked latch suggestions
//! - [`Schedule`] - Phased step list (latch read, compute, rail resolve, latch commit)
//!
//! ## Memory
//!
//! - [`StateCell`] - Lowering handle to a latch; must be committed
//! - [`StateStore`] - Every latch value and the root clock, keyed by stable id
//! - [`RailId`] / [`RailsConfig`] - Reserved global buses with drive policies
//!
//! ## Execution
//!
//! - [`Runtime`] - Runs one frame at a time
//! - [`Transport`] - Live playback with exact seeking
//! - [`OfflineExport`] - Batch rendering from a snapshot
//!
//! # Example
//!
//! ```rust
//! use rill_core::{BinaryFn, Domain, ProgramBuilder, Runtime, TypeDesc, Value};
//!
//! let mut b = ProgramBuilder::new();
//! let cell = b.state_cell("acc", TypeDesc::signal(Domain::Float), Value::Float(0.0), None);
//! let dt = b.delta_time();
//! let next = b.binary(BinaryFn::Add, cell.prev(), dt);
//! b.commit(cell, next);
//! b.output("elapsed", next);
//!
//! let mut rt = Runtime::new(b.compile().into_result().unwrap());
//! rt.run_frame(10.0).unwrap();
//! rt.run_frame(10.0).unwrap();
//! assert_eq!(rt.output("elapsed"), Some(&Value::Float(20.0)));
//! ```
//!
//! # Features
//!
//! - `tracing` - Emit compile and frame diagnostics through `tracing`

pub mod bus;
pub mod compile;
pub mod cycle;
pub mod driver;
pub mod error;
pub mod graph;
pub mod latch;
pub mod lower;
pub mod op;
pub mod patch;
pub mod program;
pub mod rail;
pub mod runtime;
pub mod schedule;
pub mod slot;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use bus::{BusDecl, BusId, CombineMode, Publisher, PublisherId};
pub use compile::{CompileReport, Program};
pub use cycle::{CycleDiagnostic, EdgeRef};
pub use driver::{ExportFrame, ExportResult, OfflineExport, Tick, Transport};
pub use error::{CompileError, CompileErrors, CompileWarning, DiagnosticEvent, RuntimeError};
pub use graph::{EdgeKind, NodeRef};
pub use latch::{LatchDecl, LatchId, LatchKind, StateCell};
pub use lower::{
    BlockInputs, BlockLibrary, BlockSpec, DefaultSource, LowerCtx, LowerFn, Param, PortSpec,
};
pub use op::{BinaryFn, CompareFn, OpId, OpKind, OpNode, ReduceFn, UnaryFn};
pub use patch::{
    BlockInstance, BusSpec, ListenerSpec, OutputSpec, Patch, PortRef, PortRefError,
    PublisherSpec, Wire, compile_patch,
};
pub use program::ProgramBuilder;
pub use rail::{DrivePolicy, RailConfig, RailId, RailPolicies, RailsConfig, TimeModel};
pub use runtime::{FrameReport, Runtime};
pub use schedule::{Phase, Schedule, Step};
pub use slot::{SlotId, SlotInfo, SlotTable, Storage};
pub use state::{Clock, StateEntry, StateStore, SwapReport};
pub use types::{
    Domain, DomainKey, FieldBuffer, FieldExpr, FieldValue, MAX_FIELD_ELEMENTS, TypeDesc, Value,
    World,
};
