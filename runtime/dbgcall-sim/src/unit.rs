//! Scriptable execution unit

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use dbgcall::{ExecutionUnit, ThreadId, UnitStatus};

const NO_TID: i32 = 0;
const RUNNING: u32 = 0;

/// Execution unit of the simulated runtime
///
/// Starts running and locked; [`SimTarget`](crate::SimTarget) fills in the
/// thread id when it adopts the unit.
#[derive(Debug)]
pub struct SimUnit {
    locked: AtomicBool,
    /// Never report a thread id, even once adopted
    anonymous: AtomicBool,
    tid: AtomicI32,
    /// Traps still to report `Runnable` for
    runnable: AtomicU32,
    /// Raw state code once no longer runnable (0 = running)
    state: AtomicU32,
}

impl SimUnit {
    pub fn running() -> Self {
        Self {
            locked: AtomicBool::new(true),
            anonymous: AtomicBool::new(false),
            tid: AtomicI32::new(NO_TID),
            runnable: AtomicU32::new(0),
            state: AtomicU32::new(RUNNING),
        }
    }

    /// Report `Runnable` for the next `traps` status queries
    pub fn runnable_for(self, traps: u32) -> Self {
        self.runnable.store(traps, Ordering::Relaxed);
        self
    }

    /// Report a runtime-specific state other than running
    pub fn in_state(self, code: u32) -> Self {
        self.state.store(code, Ordering::Relaxed);
        self
    }

    pub fn unlocked(self) -> Self {
        self.locked.store(false, Ordering::Relaxed);
        self
    }

    /// Locked, but the thread id is forgotten
    pub fn without_tid(self) -> Self {
        self.anonymous.store(true, Ordering::Relaxed);
        self
    }

    pub(crate) fn lock_to(&self, tid: ThreadId) {
        self.tid.store(tid.0, Ordering::Relaxed);
    }
}

impl ExecutionUnit for SimUnit {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn locked_thread(&self) -> Option<ThreadId> {
        if self.anonymous.load(Ordering::Relaxed) {
            return None;
        }
        match self.tid.load(Ordering::Relaxed) {
            NO_TID => None,
            tid => Some(ThreadId(tid)),
        }
    }

    fn status(&self) -> UnitStatus {
        let was_runnable = self
            .runnable
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if was_runnable {
            return UnitStatus::Runnable;
        }
        match self.state.load(Ordering::Relaxed) {
            RUNNING => UnitStatus::Running,
            code => UnitStatus::Other(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runnable_counts_down() {
        let unit = SimUnit::running().runnable_for(2);
        assert_eq!(unit.status(), UnitStatus::Runnable);
        assert_eq!(unit.status(), UnitStatus::Runnable);
        assert_eq!(unit.status(), UnitStatus::Running);
    }

    #[test]
    fn tid_assigned_on_lock() {
        let unit = SimUnit::running();
        assert_eq!(unit.locked_thread(), None);
        unit.lock_to(ThreadId(9));
        assert_eq!(unit.locked_thread(), Some(ThreadId(9)));
    }

    #[test]
    fn anonymous_unit_hides_tid() {
        let unit = SimUnit::running().without_tid();
        unit.lock_to(ThreadId(9));
        assert_eq!(unit.locked_thread(), None);
        assert!(unit.is_locked());
    }
}
