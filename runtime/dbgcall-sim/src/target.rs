//! Simulated target thread
//!
//! A [`SimTarget`] owns one OS thread standing in for the thread an
//! execution unit is locked to. Trap signals arrive over a channel; each one
//! is handed to the [`Dispatcher`] exactly as a signal handler would. When
//! the dispatcher redirects the thread into the trampoline, the target
//! emulates the runtime's trampoline: it allocates the call frame, raises
//! the protocol's status traps, runs the injected function (a registered
//! Rust closure) and finally jumps back to the interrupted pc.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::{fmt, io};

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};

use dbgcall::staging::{StagingArea, HEADER_SIZE, PAYLOAD_OFFSET};
use dbgcall::{
    status, Arch, Dispatcher, ExecutionContext, FuncVal, MemoryFault, PanicValue, TargetMemory,
    ThreadId, TrampolineRange,
};

use crate::context::SimContext;
use crate::memory::SimMemory;
use crate::signaler::{Event, SimSignaler};
use crate::unit::SimUnit;

/// Address space layout of the simulated target
pub mod layout {
    /// Trampoline code
    pub const TRAMPOLINE_BASE: u64 = 0x1000;
    pub const TRAMPOLINE_SIZE: u64 = 0x100;

    /// Trap instructions inside the trampoline, one per status
    pub const RUN_PC: u64 = TRAMPOLINE_BASE + 0x10;
    pub const RETURN_PC: u64 = TRAMPOLINE_BASE + 0x20;
    pub const PANIC_PC: u64 = TRAMPOLINE_BASE + 0x30;
    pub const UNSAFE_PC: u64 = TRAMPOLINE_BASE + 0x40;
    pub const RESTORE_PC: u64 = TRAMPOLINE_BASE + 0x50;

    /// Read-only data (unsafe-call reasons)
    pub const RODATA_BASE: u64 = 0x8000;
    pub const RODATA_SIZE: usize = 0x1000;

    /// Stack of the target thread
    pub const STACK_BASE: u64 = 0x7f00_0000;
    pub const STACK_SIZE: usize = 0x1_0000;
    pub const INITIAL_SP: u64 = STACK_BASE + STACK_SIZE as u64 - 0x100;

    /// Where the simulated program is "running" when interrupted
    pub const PROGRAM_PC: u64 = 0x40_1000;
    pub const PROGRAM_LR: u64 = 0x40_0800;

    /// Entry points and closure objects of registered functions
    pub const FUNC_BASE: u64 = 0x50_0000;
    pub const FUNC_STRIDE: u64 = 0x100;
    pub const CLOSURE_BASE: u64 = 0x60_0000;
    pub const CLOSURE_STRIDE: u64 = 0x10;
}

/// Code range of the simulated trampoline
pub const fn trampoline() -> TrampolineRange {
    TrampolineRange::new(
        layout::TRAMPOLINE_BASE,
        layout::TRAMPOLINE_BASE,
        layout::TRAMPOLINE_BASE + layout::TRAMPOLINE_SIZE,
    )
}

static NEXT_TID: AtomicI32 = AtomicI32::new(1000);

/// An injected function: a Rust closure run on the target thread
pub type SimFn<A> = Box<dyn FnMut(&mut SimCall<'_, A>) -> Result<(), PanicValue> + Send>;

/// How the trampoline responds on entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrampolineScript {
    /// Entries to refuse (status 8) before running the call
    pub refusals: u32,

    /// Reason published with each refusal
    pub reason: &'static str,

    /// Publish this status on entry instead of following the protocol
    pub bogus_status: Option<u64>,
}

impl TrampolineScript {
    /// Refuse the next `count` entries with `reason`
    pub fn refuse(count: u32, reason: &'static str) -> Self {
        Self {
            refusals: count,
            reason,
            bogus_status: None,
        }
    }
}

/// View of the target handed to an injected function
pub struct SimCall<'c, A: Arch> {
    ctx: &'c mut SimContext<A>,
    frame: u64,
    frame_size: u64,
}

impl<A: Arch> SimCall<'_, A> {
    pub fn int_arg(&self, index: usize) -> u64 {
        A::gpr(&self.ctx.regs, A::INT_ARG_BASE + index)
    }

    pub fn set_int_result(&mut self, index: usize, value: u64) {
        A::set_gpr(&mut self.ctx.regs, A::INT_ARG_BASE + index, value);
    }

    pub fn float_arg(&self, index: usize) -> f64 {
        f64::from_bits(A::fpr(&self.ctx.regs, A::FLOAT_ARG_BASE + index))
    }

    pub fn set_float_result(&mut self, index: usize, value: f64) {
        A::set_fpr(&mut self.ctx.regs, A::FLOAT_ARG_BASE + index, value.to_bits());
    }

    /// Closure context register as set up for the call
    pub fn closure(&self) -> u64 {
        A::context_register(&self.ctx.regs)
    }

    /// Size of the stack argument frame
    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    /// Word `index` of the stack argument frame
    pub fn frame_word(&self, index: u64) -> Result<u64, MemoryFault> {
        self.ctx.read_word(self.frame + 8 * index)
    }

    pub fn set_frame_word(&mut self, index: u64, value: u64) -> Result<(), MemoryFault> {
        self.ctx.write_word(self.frame + 8 * index, value)
    }

    /// Full machine state, for functions that poke at other registers
    pub fn context(&mut self) -> &mut SimContext<A> {
        self.ctx
    }
}

/// Final state of a stopped target
pub struct TargetReport<A: Arch> {
    /// Machine state when the thread stopped
    pub ctx: SimContext<A>,
    /// Registers before the first trap
    pub original: A::Registers,
    /// Traps taken, protocol traps included
    pub traps: u32,
    /// Trap signals the dispatcher declined
    pub declined: u32,
    /// Protocol traps the dispatcher failed to claim
    pub unclaimed: u32,
    /// Injected functions run
    pub calls: u32,
}

impl<A: Arch> fmt::Debug for TargetReport<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetReport")
            .field("traps", &self.traps)
            .field("declined", &self.declined)
            .field("unclaimed", &self.unclaimed)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

/// Configures a target before its thread starts
pub struct SimTargetBuilder<A: Arch> {
    functions: Vec<SimFn<A>>,
    script: TrampolineScript,
    regs: A::Registers,
}

impl<A: Arch> SimTargetBuilder<A> {
    fn new() -> Self {
        let mut regs = A::Registers::default();
        // x0-x30 / r0-r30 and all 32 floating-point registers
        for i in 0..31 {
            A::set_gpr(&mut regs, i, 0xa000 + i as u64);
        }
        for i in 0..32 {
            A::set_fpr(&mut regs, i, (i as f64 + 0.5).to_bits());
        }
        A::set_pc(&mut regs, layout::PROGRAM_PC);
        A::set_sp(&mut regs, layout::INITIAL_SP);
        A::set_link(&mut regs, layout::PROGRAM_LR);
        Self {
            functions: Vec::new(),
            script: TrampolineScript::default(),
            regs,
        }
    }

    /// Register an injectable function
    pub fn function<F>(&mut self, f: F) -> FuncVal
    where
        F: FnMut(&mut SimCall<'_, A>) -> Result<(), PanicValue> + Send + 'static,
    {
        let index = self.functions.len() as u64;
        self.functions.push(Box::new(f));
        FuncVal {
            entry: layout::FUNC_BASE + index * layout::FUNC_STRIDE,
            closure: layout::CLOSURE_BASE + index * layout::CLOSURE_STRIDE,
        }
    }

    pub fn script(&mut self, script: TrampolineScript) -> &mut Self {
        self.script = script;
        self
    }

    /// Adopt `unit` and start the target thread
    pub fn spawn(
        self,
        unit: Arc<SimUnit>,
        dispatcher: Arc<Dispatcher<A, SimUnit>>,
    ) -> io::Result<SimTarget<A>> {
        let tid = ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        unit.lock_to(tid);

        let mut mem = SimMemory::new();
        mem.map(layout::TRAMPOLINE_BASE, layout::TRAMPOLINE_SIZE as usize);
        mem.map(layout::RODATA_BASE, layout::RODATA_SIZE);
        mem.map(layout::STACK_BASE, layout::STACK_SIZE);
        let trap = A::TRAP_INSTRUCTION.to_le_bytes();
        for pc in [
            layout::RUN_PC,
            layout::RETURN_PC,
            layout::PANIC_PC,
            layout::UNSAFE_PC,
            layout::RESTORE_PC,
        ] {
            mem.write(pc, &trap).map_err(fault_to_io)?;
        }

        let mut ctx = SimContext::new(mem);
        ctx.regs = self.regs;
        let target = Target {
            tid,
            ctx,
            original: self.regs,
            trampoline: dispatcher.trampoline(),
            dispatcher,
            _unit: unit,
            functions: self.functions,
            script: self.script,
            traps: 0,
            declined: 0,
            unclaimed: 0,
            calls: 0,
        };

        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(format!("sim-target-{tid}"))
            .spawn(move || target.run(rx))?;
        debug!("{} target thread {tid} started", A::NAME);
        Ok(SimTarget { tid, tx, handle })
    }
}

fn fault_to_io(fault: MemoryFault) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unmapped address {:#x}", fault.addr),
    )
}

/// Handle to a running simulated target thread
pub struct SimTarget<A: Arch> {
    tid: ThreadId,
    tx: Sender<Event>,
    handle: JoinHandle<TargetReport<A>>,
}

impl<A: Arch> SimTarget<A> {
    pub fn builder() -> SimTargetBuilder<A> {
        SimTargetBuilder::new()
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// A signaler that delivers traps to this thread
    pub fn signaler(&self) -> SimSignaler {
        SimSignaler::new(self.tid, self.tx.clone())
    }

    /// Stop the thread and collect its final state
    pub fn stop(self) -> TargetReport<A> {
        // The thread also exits once every sender is gone
        let _ = self.tx.send(Event::Stop);
        match self.handle.join() {
            Ok(report) => report,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// State owned by the target thread
struct Target<A: Arch> {
    tid: ThreadId,
    ctx: SimContext<A>,
    original: A::Registers,
    trampoline: TrampolineRange,
    dispatcher: Arc<Dispatcher<A, SimUnit>>,
    _unit: Arc<SimUnit>,
    functions: Vec<SimFn<A>>,
    script: TrampolineScript,
    traps: u32,
    declined: u32,
    unclaimed: u32,
    calls: u32,
}

impl<A: Arch> Target<A> {
    fn run(mut self, rx: Receiver<Event>) -> TargetReport<A> {
        while let Ok(Event::Trap) = rx.recv() {
            self.take_signal();
        }
        trace!("target thread {} exiting", self.tid);
        TargetReport {
            ctx: self.ctx,
            original: self.original,
            traps: self.traps,
            declined: self.declined,
            unclaimed: self.unclaimed,
            calls: self.calls,
        }
    }

    /// Trap signal interrupted the program
    fn take_signal(&mut self) {
        self.traps += 1;
        if !self.dispatcher.on_trap(self.tid, &mut self.ctx) {
            trace!("thread {}: trap declined", self.tid);
            self.declined += 1;
            return;
        }
        if self.ctx.pc() == self.trampoline.entry {
            self.run_trampoline();
        }
    }

    fn run_trampoline(&mut self) {
        let base = self.ctx.sp();

        if let Some(bogus) = self.script.bogus_status {
            self.status_trap(layout::RUN_PC, bogus);
            return;
        }

        let result = if self.script.refusals > 0 {
            self.script.refusals -= 1;
            self.refuse(base)
        } else {
            self.call(base)
        };
        if let Err(fault) = result {
            warn!("thread {}: trampoline fault at {:#x}", self.tid, fault.addr);
        }

        self.ctx.set_sp(base);
        if !self.status_trap(layout::RESTORE_PC, status::RESTORE) {
            return;
        }
        if let Err(fault) = self.epilogue() {
            warn!("thread {}: trampoline epilogue fault at {:#x}", self.tid, fault.addr);
        }
    }

    /// Unwind from the restored registers alone: the link register holds
    /// the interrupted pc, the staged slot at sp the interrupted link
    fn epilogue(&mut self) -> Result<(), MemoryFault> {
        let area = StagingArea::at(self.ctx.sp());
        let resume = self.ctx.link();
        let link = area.read_link(&self.ctx)?;
        self.ctx.set_link(link);
        self.ctx.set_sp(area.base() + HEADER_SIZE);
        self.ctx.set_pc(resume);
        Ok(())
    }

    /// Publish the refusal reason and report status 8
    fn refuse(&mut self, base: u64) -> Result<(), MemoryFault> {
        let reason = self.script.reason.as_bytes();
        self.ctx.write(layout::RODATA_BASE, reason)?;

        let sp = base - (HEADER_SIZE + 16);
        self.ctx.write_word(sp + PAYLOAD_OFFSET, layout::RODATA_BASE)?;
        self.ctx.write_word(sp + PAYLOAD_OFFSET + 8, reason.len() as u64)?;
        self.ctx.set_sp(sp);
        self.status_trap(layout::UNSAFE_PC, status::UNSAFE);
        Ok(())
    }

    /// Allocate the call frame, run the function, report the outcome
    fn call(&mut self, base: u64) -> Result<(), MemoryFault> {
        let frame_size = StagingArea::at(base).read_frame_size(&self.ctx)?;
        // Room for the frame or a two-word panic value, 16-byte aligned
        let alloc = (HEADER_SIZE + frame_size.max(16) + 15) & !15;
        let sp = base - alloc;
        let link = self.ctx.link();
        StagingArea::at(sp).write_link(&mut self.ctx, link)?;
        self.ctx.set_sp(sp);

        self.status_trap(layout::RUN_PC, status::RUN);
        // Not redirected: execution falls through as if the call returned
        let result = if self.ctx.pc() == layout::RUN_PC + A::INSTRUCTION_LEN {
            Ok(())
        } else {
            self.invoke(sp + PAYLOAD_OFFSET, frame_size)
        };
        self.ctx.set_sp(sp);

        match result {
            Ok(()) => {
                self.status_trap(layout::RETURN_PC, status::RETURNED);
            }
            Err(panic) => {
                self.ctx.write_word(sp + PAYLOAD_OFFSET, panic.type_word())?;
                self.ctx.write_word(sp + PAYLOAD_OFFSET + 8, panic.data_word())?;
                self.status_trap(layout::PANIC_PC, status::PANICKED);
            }
        }
        Ok(())
    }

    /// Run the registered function at the current pc
    fn invoke(&mut self, frame: u64, frame_size: u64) -> Result<(), PanicValue> {
        let entry = self.ctx.pc();
        let offset = entry.wrapping_sub(layout::FUNC_BASE);
        let index = (offset / layout::FUNC_STRIDE) as usize;
        let function = match self.functions.get_mut(index) {
            Some(f) if offset % layout::FUNC_STRIDE == 0 => f,
            // Jumped into unmapped code
            _ => return Err(PanicValue::new(0, entry)),
        };

        self.calls += 1;
        trace!("thread {}: calling {entry:#x}", self.tid);
        let mut call = SimCall {
            ctx: &mut self.ctx,
            frame,
            frame_size,
        };
        function(&mut call)
    }

    /// Stop at a trampoline trap instruction with `value` in the status
    /// register; false if nothing claimed the trap
    fn status_trap(&mut self, pc: u64, value: u64) -> bool {
        self.ctx.set_pc(pc);
        A::set_status(&mut self.ctx.regs, value);
        self.traps += 1;
        let claimed = self.dispatcher.on_trap(self.tid, &mut self.ctx);
        if !claimed {
            warn!("thread {}: status {value} trap at {pc:#x} unclaimed", self.tid);
            self.unclaimed += 1;
        }
        claimed
    }
}
