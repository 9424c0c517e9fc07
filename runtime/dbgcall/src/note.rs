//! Note - one-shot completion signal
//!
//! A note is cleared by the orchestrator, woken exactly once by the trap
//! handler, and slept on by the orchestrator until woken.
//!
//! ## Design
//!
//! The note is a single atomic word plus the waiting thread's handle. Waking
//! is a release store followed by `Thread::unpark`, which on Linux is an
//! atomic swap and a futex wake: no allocation and no lock, so it is safe to
//! call from the trap handler. Sleeping parks until the word is observed set
//! with acquire ordering, which makes every write the handler performed
//! before waking visible to the orchestrator.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, Thread};

const CLEAR: u32 = 0;
const WOKEN: u32 = 1;

/// One-shot wait/wake primitive
#[derive(Debug)]
pub struct Note {
    key: AtomicU32,
    waiter: Thread,
}

impl Note {
    /// Create a cleared note owned by the calling thread
    ///
    /// Only the creating thread may [`sleep`](Note::sleep) on it.
    pub fn new() -> Self {
        Self {
            key: AtomicU32::new(CLEAR),
            waiter: thread::current(),
        }
    }

    /// Reset the note so it can be woken again
    pub fn clear(&self) {
        self.key.store(CLEAR, Ordering::Relaxed);
    }

    /// Wake the sleeper
    ///
    /// Async-signal-safe. The waiter handle is cloned before the store: once
    /// the store is visible the orchestrator may return and drop the note.
    /// The clone is never dropped. Its drop could be the last reference to a
    /// waiter that already exited, freeing memory inside a signal handler.
    pub fn wakeup(&self) {
        let waiter = ManuallyDrop::new(self.waiter.clone());
        self.key.store(WOKEN, Ordering::Release);
        waiter.unpark();
    }

    /// Block until woken (no timeout)
    pub fn sleep(&self) {
        debug_assert_eq!(thread::current().id(), self.waiter.id());
        while !self.is_woken() {
            thread::park();
        }
    }

    /// Whether the note has been woken since the last clear
    pub fn is_woken(&self) -> bool {
        self.key.load(Ordering::Acquire) == WOKEN
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn note_create() {
        let note = Note::new();
        assert!(!note.is_woken());
    }

    #[test]
    fn note_wake_before_sleep() {
        let note = Note::new();
        note.wakeup();
        assert!(note.is_woken());
        // Returns immediately
        note.sleep();
    }

    #[test]
    fn note_clear_rearms() {
        let note = Note::new();
        note.wakeup();
        note.clear();
        assert!(!note.is_woken());
    }

    #[test]
    fn note_wake_from_other_thread() {
        let note = Arc::new(Note::new());
        let waker = {
            let note = Arc::clone(&note);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                note.wakeup();
            })
        };
        note.sleep();
        assert!(note.is_woken());
        waker.join().unwrap();
    }

    #[test]
    fn note_wake_after_waiter_exited() {
        let note = thread::spawn(Note::new).join().unwrap();
        note.wakeup();
        assert!(note.is_woken());
        drop(note);
    }
}
