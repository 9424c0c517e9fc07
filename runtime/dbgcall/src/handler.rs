//! Call handler - the injection protocol state machine
//!
//! One [`CallHandler`] exists per in-flight injection. The trap dispatcher
//! drives it from the target thread, one transition per trap:
//!
//! ```text
//!   start ──► status 0 (run) ──► status 1 (returned) ──► status 16 (restore)
//!     │                     └──► status 2 (panicked) ──┘
//!     ├──► status 8 (unsafe) ─────────────────────────► status 16 (restore)
//!     └──► transient / fatal fault (wake, no redirect)
//! ```
//!
//! Every transition runs inside the trap handler: it takes only borrowed
//! references, performs no allocation, takes no lock and never blocks.
//! Results reach the orchestrator through the handler's state, published by
//! the completion [`Note`].

use core::cell::UnsafeCell;

use crate::arch::Arch;
use crate::context::{ExecutionContext, MemoryFault};
use crate::error::{Reason, TrapFault};
use crate::marshal::{load_reg_args, store_reg_args, RegArgs};
use crate::note::Note;
use crate::staging::StagingArea;
use crate::unit::{ExecutionUnit, ThreadId, UnitStatus};
use crate::value::{FramePtr, FuncVal, PanicValue};

/// Protocol status values published by the trampoline
pub mod status {
    /// Frame ready: copy arguments in and jump to the function
    pub const RUN: u64 = 0;
    /// Function returned: copy results out
    pub const RETURNED: u64 = 1;
    /// Function panicked: copy the panic value out
    pub const PANICKED: u64 = 2;
    /// Call is unsafe: copy the reason out
    pub const UNSAFE: u64 = 8;
    /// Trampoline unwound: restore the original registers
    pub const RESTORE: u64 = 16;
}

/// Successful result of an injected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// Panic value, if the call panicked
    pub panic: Option<PanicValue>,

    /// Register results, if register arguments were supplied and the call
    /// returned normally
    pub reg_results: Option<RegArgs>,
}

/// Result of a start-mode trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Start {
    /// Context saved and redirected to the trampoline
    Redirected,
    /// A fault was recorded and the orchestrator woken
    Finished,
}

/// Mutable protocol state, written from the trap handler
struct HandlerState<'a, A: Arch> {
    /// Register bank after the header was staged: stack pointer below the
    /// header, link register holding the interrupted pc
    saved: A::Registers,
    frame: Option<FramePtr<'a>>,
    panic: Option<PanicValue>,
    results: Option<RegArgs>,
    fault: Option<TrapFault>,
}

/// Per-injection protocol state
pub struct CallHandler<'a, A: Arch, U> {
    unit: &'a U,
    tid: ThreadId,
    func: FuncVal,
    reg_args: Option<RegArgs>,
    frame_size: u64,
    state: UnsafeCell<HandlerState<'a, A>>,
    done: Note,
}

// The trap thread touches `state` only between arming and `done.wakeup()`;
// the orchestrator only outside that window. The note orders the two.
// Everything in `state` is `Send`: the frame is an exclusive borrow.
unsafe impl<A: Arch, U: ExecutionUnit> Sync for CallHandler<'_, A, U> {}

impl<'a, A: Arch, U: ExecutionUnit> CallHandler<'a, A, U> {
    /// Create a handler owned by the calling (orchestrator) thread
    pub(crate) fn new(
        unit: &'a U,
        tid: ThreadId,
        func: FuncVal,
        reg_args: Option<RegArgs>,
        frame: Option<FramePtr<'a>>,
    ) -> Self {
        Self {
            unit,
            tid,
            func,
            reg_args,
            frame_size: frame.as_ref().map_or(0, |f| f.size() as u64),
            state: UnsafeCell::new(HandlerState {
                saved: A::Registers::default(),
                frame,
                panic: None,
                results: None,
                fault: None,
            }),
            done: Note::new(),
        }
    }

    pub(crate) fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Argument frame size in bytes
    pub(crate) fn frame_size(&self) -> u64 {
        self.frame_size
    }

    #[allow(clippy::mut_from_ref)]
    fn state(&self) -> &mut HandlerState<'a, A> {
        // SAFETY: see the Sync impl; each side has exclusive access in turn
        unsafe { &mut *self.state.get() }
    }

    // ---- orchestrator side ----

    /// Prepare for a fresh attempt. Only called while no trap can reach the
    /// handler (before arming, or after the note was woken).
    pub(crate) fn reset(&self) {
        let state = self.state();
        state.panic = None;
        state.results = None;
        state.fault = None;
        self.done.clear();
    }

    /// Block until the trap side finishes the attempt
    pub(crate) fn wait(&self) {
        self.done.sleep();
    }

    /// Result of the finished attempt
    pub(crate) fn outcome(&self) -> Result<CallOutcome, TrapFault> {
        let state = self.state();
        match state.fault {
            Some(fault) => Err(fault),
            None => Ok(CallOutcome {
                panic: state.panic,
                reg_results: state.results,
            }),
        }
    }

    // ---- trap side ----

    /// Keep the first fault of the attempt
    fn record(&self, fault: TrapFault) {
        let state = self.state();
        if state.fault.is_none() {
            state.fault = Some(fault);
        }
    }

    /// Record a terminal fault and wake the orchestrator
    fn fail(&self, fault: TrapFault) {
        self.record(fault);
        self.done.wakeup();
    }

    /// Start-mode trap on the locked thread
    pub(crate) fn start<C: ExecutionContext<A>>(&self, ctx: &mut C, entry: u64) -> Start {
        match self.unit.status() {
            UnitStatus::Running => match self.save(ctx) {
                Ok(()) => {
                    ctx.set_pc(entry);
                    Start::Redirected
                }
                Err(fault) => {
                    self.fail(TrapFault::Memory(fault));
                    Start::Finished
                }
            },
            UnitStatus::Runnable => {
                // Ask the orchestrator to pause and try again
                self.fail(TrapFault::Runnable);
                Start::Finished
            }
            other => {
                self.fail(TrapFault::UnexpectedState(other));
                Start::Finished
            }
        }
    }

    /// Continue-mode trap at a trampoline trap instruction
    ///
    /// Only RESTORE and an unknown status wake the orchestrator. A fault
    /// while copying through the staging area is recorded and the trap is
    /// stepped over, so the trampoline still unwinds to RESTORE.
    pub(crate) fn step<C: ExecutionContext<A>>(&self, ctx: &mut C) {
        let trap_pc = ctx.pc();
        let result = match ctx.status() {
            status::RUN => self.run(ctx),
            status::RETURNED => self.returned(ctx),
            status::PANICKED => self.panicked(ctx),
            // Don't wake yet: the trampoline still has to reach RESTORE
            status::UNSAFE => self.unsafe_call(ctx),
            status::RESTORE => {
                self.restore(ctx);
                self.done.wakeup();
                return;
            }
            other => {
                self.fail(TrapFault::UnexpectedStatus(other));
                return;
            }
        };
        if let Err(fault) = result {
            self.record(TrapFault::Memory(fault));
            ctx.set_pc(trap_pc + A::INSTRUCTION_LEN);
        }
    }

    /// Stage the header below sp, then snapshot the registers
    ///
    /// Memory is written before any register changes, so a fault leaves the
    /// interrupted context untouched.
    fn save<C: ExecutionContext<A>>(&self, ctx: &mut C) -> Result<(), MemoryFault> {
        let area = StagingArea::reserve(ctx.sp());
        let link = ctx.link();
        area.write_link(ctx, link)?;
        area.write_frame_size(ctx, self.frame_size)?;

        ctx.set_sp(area.base());
        // The trampoline returns through the link register to the interrupted pc
        ctx.set_link(ctx.pc());
        self.state().saved = *ctx.registers();
        Ok(())
    }

    /// Status 0: copy arguments in and call the function
    fn run<C: ExecutionContext<A>>(&self, ctx: &mut C) -> Result<(), MemoryFault> {
        let area = StagingArea::at(ctx.sp());
        if let Some(frame) = &self.state().frame {
            area.copy_frame_in(ctx, frame.as_bytes())?;
        }
        if let Some(args) = &self.reg_args {
            store_reg_args::<A>(ctx.registers_mut(), args);
        }
        // Return to the instruction after this trap
        ctx.set_link(ctx.pc() + A::INSTRUCTION_LEN);
        ctx.set_pc(self.func.entry);
        ctx.set_context_register(self.func.closure);
        Ok(())
    }

    /// Status 1: copy results out and restore the trampoline's link
    fn returned<C: ExecutionContext<A>>(&self, ctx: &mut C) -> Result<(), MemoryFault> {
        let area = StagingArea::at(ctx.sp());
        let state = self.state();
        // After a failed copy-in the function never ran; keep the caller's frame
        if state.fault.is_none() {
            if let Some(frame) = state.frame.as_mut() {
                area.copy_frame_out(ctx, frame.as_bytes_mut())?;
            }
            if self.reg_args.is_some() {
                let mut results = RegArgs::new();
                load_reg_args::<A>(&mut results, ctx.registers());
                state.results = Some(results);
            }
        }
        let link = area.read_link(ctx)?;
        ctx.set_link(link);
        ctx.set_pc(ctx.pc() + A::INSTRUCTION_LEN);
        Ok(())
    }

    /// Status 2: copy the panic value out
    fn panicked<C: ExecutionContext<A>>(&self, ctx: &mut C) -> Result<(), MemoryFault> {
        let [type_word, data_word] = StagingArea::at(ctx.sp()).read_descriptor(ctx)?;
        self.state().panic = Some(PanicValue::new(type_word, data_word));
        ctx.set_pc(ctx.pc() + A::INSTRUCTION_LEN);
        Ok(())
    }

    /// Status 8: copy the reason string out
    fn unsafe_call<C: ExecutionContext<A>>(&self, ctx: &mut C) -> Result<(), MemoryFault> {
        let [ptr, len] = StagingArea::at(ctx.sp()).read_descriptor(ctx)?;
        let mut reason = Reason::empty();
        ctx.read(ptr, reason.fill(len as usize))?;
        self.record(TrapFault::Unsafe(reason));
        ctx.set_pc(ctx.pc() + A::INSTRUCTION_LEN);
        Ok(())
    }

    /// Status 16: put the saved registers back, keeping pc and sp
    ///
    /// The trampoline continues after this trap with the link register
    /// holding the interrupted pc and the original link in the staged slot
    /// at sp.
    fn restore<C: ExecutionContext<A>>(&self, ctx: &mut C) {
        let (pc, sp) = (ctx.pc(), ctx.sp());
        *ctx.registers_mut() = self.state().saved;
        ctx.set_pc(pc + A::INSTRUCTION_LEN);
        ctx.set_sp(sp);
    }
}
