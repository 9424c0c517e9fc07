//! Collaborator interfaces of the target runtime
//!
//! The injector does not own the scheduler. It asks the runtime which OS
//! thread an execution unit is locked to and what state the unit is in, and
//! it asks the embedder to deliver the trap signal to that thread.

use core::fmt;
use std::io;

/// OS-level thread identifier (Linux tid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of an execution unit, as seen from the trap handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Executing on its locked thread
    Running,

    /// Ready to run but not yet placed on a thread
    Runnable,

    /// Any other runtime-specific state (raw state code)
    Other(u32),
}

/// A lightweight task of the target runtime
///
/// `status` is called from the trap handler and must be a plain load: no
/// allocation, no lock, no blocking.
pub trait ExecutionUnit: Sync {
    /// Whether the unit is locked to one OS thread
    fn is_locked(&self) -> bool;

    /// OS thread the unit is locked to, if known
    fn locked_thread(&self) -> Option<ThreadId>;

    /// Current scheduling state
    fn status(&self) -> UnitStatus;
}

/// Delivers the protocol's trap signal to one thread
pub trait ThreadSignaler {
    fn signal(&self, tid: ThreadId) -> io::Result<()>;
}

impl<F> ThreadSignaler for F
where
    F: Fn(ThreadId) -> io::Result<()>,
{
    fn signal(&self, tid: ThreadId) -> io::Result<()> {
        self(tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn closures_are_signalers() {
        let sent = Cell::new(None);
        let signaler = |tid: ThreadId| -> io::Result<()> {
            sent.set(Some(tid));
            Ok(())
        };
        signaler.signal(ThreadId(42)).unwrap();
        assert_eq!(sent.get(), Some(ThreadId(42)));
    }

    #[test]
    fn thread_id_display() {
        assert_eq!(ThreadId(1234).to_string(), "1234");
    }
}
