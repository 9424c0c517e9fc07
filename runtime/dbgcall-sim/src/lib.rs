//! dbgcall-sim - Simulated target for the call injector
//!
//! # Purpose
//! Runs the complete injection protocol without a real runtime or real
//! signals: a dedicated OS thread plays the thread an execution unit is
//! locked to, with a simulated register file, a sparse address space and an
//! emulated call trampoline.
//!
//! # Architecture
//! - [`SimTarget`]: target thread; receives trap signals over a channel,
//!   calls [`Dispatcher::on_trap`](dbgcall::Dispatcher::on_trap), emulates
//!   the trampoline
//! - [`SimSignaler`]: `ThreadSignaler` delivering to one target
//! - [`SimUnit`]: execution unit with scriptable scheduling state
//! - [`SimContext`] / [`SimMemory`]: machine state seen by the trap handler
//!
//! # Testing Strategy
//! - Unit tests: memory, unit and signaler behaviour
//! - Integration tests (`tests/`): end-to-end injections on aarch64 and
//!   ppc64le register conventions

mod context;
mod memory;
mod signaler;
mod target;
mod unit;

pub use context::SimContext;
pub use memory::SimMemory;
pub use signaler::SimSignaler;
pub use target::{
    layout, trampoline, SimCall, SimFn, SimTarget, SimTargetBuilder, TargetReport,
    TrampolineScript,
};
pub use unit::SimUnit;
