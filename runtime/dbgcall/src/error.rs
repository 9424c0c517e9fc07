//! Error types
//!
//! Two layers:
//! - [`TrapFault`]: recorded by the trap handler. `Copy`, fixed size, never
//!   allocates; unsafe-call reasons are copied into an inline buffer.
//! - [`InjectError`]: returned by the orchestrator after waking, classified
//!   into request errors, transient scheduling states and fatal protocol
//!   errors.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::context::MemoryFault;
use crate::unit::{ThreadId, UnitStatus};

/// Reason strings published by the trampoline at status 8
pub mod reason {
    /// The interrupted pc is not at a safe point
    pub const NOT_AT_SAFE_POINT: &str = "call not at safe point";

    /// The unit is executing runtime-internal code
    pub const RUNTIME_CODE: &str = "call from within the runtime";

    /// The unit is executing on a runtime (non-task) stack
    pub const RUNTIME_STACK: &str = "executing on runtime stack";
}

/// Capacity of the inline reason buffer
pub const REASON_CAPACITY: usize = 128;

/// Unsafe-call reason copied out of target memory, truncated to
/// [`REASON_CAPACITY`] bytes
#[derive(Clone, Copy)]
pub struct Reason {
    bytes: [u8; REASON_CAPACITY],
    len: usize,
}

impl Reason {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; REASON_CAPACITY],
            len: 0,
        }
    }

    pub fn from_bytes(src: &[u8]) -> Self {
        let mut reason = Self::empty();
        let len = src.len().min(REASON_CAPACITY);
        reason.bytes[..len].copy_from_slice(&src[..len]);
        reason.len = len;
        reason
    }

    /// Writable prefix of `len` bytes (clamped to capacity), for copying
    /// straight out of target memory
    pub(crate) fn fill(&mut self, len: usize) -> &mut [u8] {
        self.len = len.min(REASON_CAPACITY);
        &mut self.bytes[..self.len]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl PartialEq for Reason {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Reason {}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reason({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Fault recorded by the trap handler for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapFault {
    /// Unit runnable but not on a thread yet
    Runnable,

    /// Unit in a state the protocol cannot start from
    UnexpectedState(UnitStatus),

    /// Trampoline refused the call (status 8)
    Unsafe(Reason),

    /// Trampoline published an unknown status
    UnexpectedStatus(u64),

    /// Staging memory was not accessible
    Memory(MemoryFault),
}

/// Transient scheduling states the orchestrator retries through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientState {
    /// Runnable, not yet scheduled on its thread
    NotScheduled,

    /// Executing runtime-internal code
    RuntimeCode,

    /// Executing on a runtime stack
    RuntimeStack,

    /// Not at a safe point (retried unless the caller asked to see it)
    NotAtSafePoint,
}

impl TransientState {
    /// Transient state named by an unsafe-call reason, if any
    pub fn from_reason(text: &[u8]) -> Option<Self> {
        match text {
            r if r == reason::RUNTIME_CODE.as_bytes() => Some(TransientState::RuntimeCode),
            r if r == reason::RUNTIME_STACK.as_bytes() => Some(TransientState::RuntimeStack),
            r if r == reason::NOT_AT_SAFE_POINT.as_bytes() => Some(TransientState::NotAtSafePoint),
            _ => None,
        }
    }
}

impl fmt::Display for TransientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TransientState::NotScheduled => "retry runnable",
            TransientState::RuntimeCode => reason::RUNTIME_CODE,
            TransientState::RuntimeStack => reason::RUNTIME_STACK,
            TransientState::NotAtSafePoint => reason::NOT_AT_SAFE_POINT,
        };
        f.write_str(msg)
    }
}

/// Errors returned by [`Injector::inject_call`](crate::Injector::inject_call)
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("execution unit not locked to thread")]
    NotLocked,

    #[error("missing tid")]
    MissingThreadId,

    #[error("fn must be a function (got {kind})")]
    NotAFunction { kind: &'static str },

    #[error("args must be a pointer or nil (got {kind})")]
    InvalidStackArgs { kind: &'static str },

    #[error("dispatcher already armed by another injection")]
    Busy,

    #[error("failed to signal thread {tid}")]
    Signal {
        tid: ThreadId,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Transient(TransientState),

    #[error("call not at safe point")]
    UnsafePoint,

    #[error("{0}")]
    CallUnsafe(String),

    #[error("execution unit in unexpected state {0:?} at call inject")]
    UnexpectedState(UnitStatus),

    #[error("unexpected trampoline status {0}")]
    UnexpectedStatus(u64),

    #[error("target memory fault at {addr:#x}")]
    MemoryFault { addr: u64 },
}

impl InjectError {
    /// Whether the orchestrator retries after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, InjectError::Transient(_))
    }

    /// Classify a fault recorded by the trap handler
    pub(crate) fn from_fault(fault: TrapFault, return_on_unsafe_point: bool) -> Self {
        match fault {
            TrapFault::Runnable => InjectError::Transient(TransientState::NotScheduled),
            TrapFault::UnexpectedState(status) => InjectError::UnexpectedState(status),
            TrapFault::Unsafe(reason) => match TransientState::from_reason(reason.as_bytes()) {
                Some(TransientState::NotAtSafePoint) if return_on_unsafe_point => {
                    InjectError::UnsafePoint
                }
                Some(state) => InjectError::Transient(state),
                None => InjectError::CallUnsafe(reason.to_string_lossy()),
            },
            TrapFault::UnexpectedStatus(status) => InjectError::UnexpectedStatus(status),
            TrapFault::Memory(fault) => InjectError::MemoryFault { addr: fault.addr },
        }
    }
}

pub type Result<T> = core::result::Result<T, InjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_truncates_to_capacity() {
        let long = [b'x'; REASON_CAPACITY + 10];
        let reason = Reason::from_bytes(&long);
        assert_eq!(reason.as_bytes().len(), REASON_CAPACITY);
    }

    #[test]
    fn runnable_is_transient() {
        let err = InjectError::from_fault(TrapFault::Runnable, false);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "retry runnable");
    }

    #[test]
    fn runtime_reasons_are_transient() {
        for (text, state) in [
            (reason::RUNTIME_CODE, TransientState::RuntimeCode),
            (reason::RUNTIME_STACK, TransientState::RuntimeStack),
        ] {
            let fault = TrapFault::Unsafe(Reason::from_bytes(text.as_bytes()));
            match InjectError::from_fault(fault, true) {
                InjectError::Transient(s) => assert_eq!(s, state),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn safe_point_reason_depends_on_request() {
        let fault = TrapFault::Unsafe(Reason::from_bytes(reason::NOT_AT_SAFE_POINT.as_bytes()));

        let surfaced = InjectError::from_fault(fault, true);
        assert!(matches!(surfaced, InjectError::UnsafePoint));
        assert!(!surfaced.is_transient());

        let retried = InjectError::from_fault(fault, false);
        assert!(retried.is_transient());
        assert_eq!(retried.to_string(), "call not at safe point");
    }

    #[test]
    fn unknown_reason_is_terminal() {
        let fault = TrapFault::Unsafe(Reason::from_bytes(b"holding locks"));
        let err = InjectError::from_fault(fault, false);
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "holding locks");
    }

    #[test]
    fn protocol_violations_are_terminal() {
        assert!(!InjectError::from_fault(TrapFault::UnexpectedStatus(7), false).is_transient());
        assert!(!InjectError::from_fault(TrapFault::UnexpectedState(UnitStatus::Other(4)), false)
            .is_transient());
        let err = InjectError::from_fault(TrapFault::Memory(MemoryFault { addr: 0x10 }), false);
        assert_eq!(err.to_string(), "target memory fault at 0x10");
    }
}
