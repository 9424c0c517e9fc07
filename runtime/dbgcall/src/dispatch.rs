//! Trap dispatcher
//!
//! The process-wide entry point of the trap signal handler. At most one
//! injection is armed at a time; the dispatcher routes traps on the target
//! thread to its [`CallHandler`] and declines everything else so the
//! runtime's ordinary trap handling can run.
//!
//! Modes:
//! - `Start`: the next trap on the target thread saves its context and
//!   redirects it into the trampoline.
//! - `Continue`: traps at a trap instruction inside the trampoline advance
//!   the protocol by one status.
//! - `Disarmed`: every trap is declined.

use core::marker::PhantomData;
use core::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU8, Ordering};

use crate::arch::Arch;
use crate::context::ExecutionContext;
use crate::error::{InjectError, Result};
use crate::handler::{CallHandler, Start};
use crate::unit::{ExecutionUnit, ThreadId};

const DISARMED: u8 = 0;
const START: u8 = 1;
const CONTINUE: u8 = 2;

/// Code range of the runtime's call trampoline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrampolineRange {
    /// Address execution is redirected to at start
    pub entry: u64,
    /// First byte of the trampoline
    pub start: u64,
    /// One past the last byte
    pub end: u64,
}

impl TrampolineRange {
    pub const fn new(entry: u64, start: u64, end: u64) -> Self {
        Self { entry, start, end }
    }

    pub const fn contains(&self, pc: u64) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Routes trap signals to the armed injection
///
/// One dispatcher per target runtime, shared between the orchestrator and
/// the signal handler (typically in a `static`).
pub struct Dispatcher<A: Arch, U> {
    trampoline: TrampolineRange,
    handler: AtomicPtr<()>,
    tid: AtomicI32,
    mode: AtomicU8,
    _marker: PhantomData<fn(&U) -> A>,
}

impl<A: Arch, U: ExecutionUnit> Dispatcher<A, U> {
    pub const fn new(trampoline: TrampolineRange) -> Self {
        Self {
            trampoline,
            handler: AtomicPtr::new(ptr::null_mut()),
            tid: AtomicI32::new(0),
            mode: AtomicU8::new(DISARMED),
            _marker: PhantomData,
        }
    }

    pub fn trampoline(&self) -> TrampolineRange {
        self.trampoline
    }

    /// Whether an injection is currently armed
    pub fn is_armed(&self) -> bool {
        !self.handler.load(Ordering::Acquire).is_null()
    }

    /// Arm (or re-arm) the dispatcher for `handler` in start mode
    ///
    /// Fails with [`InjectError::Busy`] while a different injection is armed.
    pub(crate) fn arm(&self, handler: &CallHandler<'_, A, U>) -> Result<()> {
        let this = handler as *const CallHandler<'_, A, U> as *mut ();
        match self
            .handler
            .compare_exchange(ptr::null_mut(), this, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(current) if current == this => {}
            Err(_) => return Err(InjectError::Busy),
        }
        self.tid.store(handler.tid().0, Ordering::Relaxed);
        self.mode.store(START, Ordering::Release);
        Ok(())
    }

    /// Decline traps between attempts while keeping the slot reserved
    pub(crate) fn pause(&self) {
        self.mode.store(DISARMED, Ordering::Release);
    }

    /// Return to disarmed mode, releasing `handler`
    pub(crate) fn disarm(&self, handler: &CallHandler<'_, A, U>) {
        let this = handler as *const CallHandler<'_, A, U> as *mut ();
        self.mode.store(DISARMED, Ordering::Release);
        let _ = self.handler.compare_exchange(
            this,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Handle a trap taken by thread `tid`
    ///
    /// Called from the trap signal handler with the interrupted context.
    /// Returns `true` if the trap belonged to the armed injection and the
    /// context was updated, `false` if the caller should fall through to its
    /// ordinary trap handling.
    pub fn on_trap<C: ExecutionContext<A>>(&self, tid: ThreadId, ctx: &mut C) -> bool {
        let mode = self.mode.load(Ordering::Acquire);
        if mode == DISARMED || self.tid.load(Ordering::Relaxed) != tid.0 {
            return false;
        }
        if mode == CONTINUE && !(self.trampoline.contains(ctx.pc()) && ctx.at_trap_instruction()) {
            return false;
        }

        let raw = self.handler.load(Ordering::Acquire);
        if raw.is_null() {
            return false;
        }
        // SAFETY: the pointer was published by `arm` and stays valid until
        // `disarm`, which the orchestrator only calls after being woken.
        let handler = unsafe { &*(raw as *const CallHandler<'_, A, U>) };

        match mode {
            START => {
                if handler.start(ctx, self.trampoline.entry) == Start::Redirected {
                    self.mode.store(CONTINUE, Ordering::Release);
                }
                true
            }
            _ => {
                handler.step(ctx);
                true
            }
        }
    }
}

/// Disarms the dispatcher when dropped
pub(crate) struct ArmGuard<'d, 'h, 'a, A: Arch, U: ExecutionUnit> {
    dispatcher: &'d Dispatcher<A, U>,
    handler: &'h CallHandler<'a, A, U>,
}

impl<'d, 'h, 'a, A: Arch, U: ExecutionUnit> ArmGuard<'d, 'h, 'a, A, U> {
    pub(crate) fn new(dispatcher: &'d Dispatcher<A, U>, handler: &'h CallHandler<'a, A, U>) -> Self {
        Self { dispatcher, handler }
    }
}

impl<A: Arch, U: ExecutionUnit> Drop for ArmGuard<'_, '_, '_, A, U> {
    fn drop(&mut self) {
        self.dispatcher.disarm(self.handler);
    }
}
