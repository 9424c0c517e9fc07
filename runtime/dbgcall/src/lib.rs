//! dbgcall - Debugger call injection for a running execution unit
//!
//! # Purpose
//! Lets a debugger run a function inside a live, thread-locked execution
//! unit of a managed runtime and get its results back, without stopping the
//! process. The target is interrupted with a trap signal, redirected into a
//! runtime-provided trampoline, and walked through a status protocol one
//! trap at a time until its original context is restored.
//!
//! # Integration Points
//! - Depends on: the runtime's scheduler ([`ExecutionUnit`]), a signal
//!   delivery mechanism ([`ThreadSignaler`]), the trap signal handler
//!   ([`ExecutionContext`])
//! - Provides to: debuggers ([`Injector::inject_call`]) and the trap signal
//!   handler ([`Dispatcher::on_trap`])
//!
//! # Architecture
//! - [`Injector`]: orchestrator on the debugger's thread; validates, arms,
//!   signals, sleeps, retries transient states
//! - [`Dispatcher`]: routes traps to the armed injection
//! - `CallHandler`: per-injection state machine run from the trap handler;
//!   never allocates, locks or blocks
//! - [`arch`]: register conventions of each supported architecture, chosen
//!   at build time through the [`Arch`] type parameter
//!
//! # Testing Strategy
//! - Unit tests: per module, over an in-memory flat context
//! - Integration tests: `dbgcall-sim`, a simulated target thread running
//!   the trampoline protocol end to end on both architectures

pub mod arch;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
mod handler;
mod inject;
pub mod marshal;
mod note;
pub mod staging;
pub mod unit;
pub mod value;

#[cfg(all(feature = "native", target_os = "linux"))]
pub mod native;

pub use arch::{Aarch64, Aarch64Registers, Arch, Ppc64le, Ppc64leRegisters};
pub use config::{ConfigError, InjectorConfig, RetryPolicy};
pub use context::{ExecutionContext, MemoryFault, TargetMemory};
pub use dispatch::{Dispatcher, TrampolineRange};
pub use error::{InjectError, Reason, Result, TransientState};
pub use handler::{status, CallOutcome};
pub use inject::{CallRequest, Injector};
pub use marshal::RegArgs;
pub use note::Note;
pub use unit::{ExecutionUnit, ThreadId, ThreadSignaler, UnitStatus};
pub use value::{FramePtr, FuncVal, PanicValue, Value};
