//! AArch64 Linux signal context
//!
//! The kernel's `mcontext_t` holds x0-x30, sp, pc and pstate, followed by a
//! 4 KiB reserved area of tagged records. The FPSIMD record (v0-v31, fpsr,
//! fpcr) is one of them. [`UcontextAarch64`] copies both into an
//! [`Aarch64Registers`] bank and writes them back on [`commit`].
//!
//! [`commit`]: UcontextAarch64::commit

use core::mem::{offset_of, size_of};
use core::ptr;

use static_assertions::const_assert_eq;

use crate::arch::{Aarch64, Aarch64Registers};
use crate::context::{ExecutionContext, MemoryFault, TargetMemory};

/// Size of `mcontext_t.__reserved`
const RESERVED_SIZE: usize = 4096;

/// Tag of the FPSIMD record
const FPSIMD_MAGIC: u32 = 0x4650_8001;

/// Record header (`struct _aarch64_ctx`)
#[repr(C)]
#[derive(Clone, Copy)]
struct RecordHeader {
    magic: u32,
    size: u32,
}

/// `struct fpsimd_context`
#[repr(C)]
struct FpsimdRecord {
    head: RecordHeader,
    fpsr: u32,
    fpcr: u32,
    vregs: [u128; 32],
}

const_assert_eq!(offset_of!(FpsimdRecord, vregs), 16);
const_assert_eq!(size_of::<FpsimdRecord>(), 528);

/// Execution context of a thread interrupted by a signal
pub struct UcontextAarch64<'a> {
    uc: &'a mut libc::ucontext_t,
    /// Offset of the FPSIMD record in the reserved area
    fpsimd: Option<usize>,
    regs: Aarch64Registers,
}

impl<'a> UcontextAarch64<'a> {
    /// Capture the interrupted registers
    ///
    /// # Safety
    ///
    /// The context reads and writes process memory at whatever addresses the
    /// protocol hands it. `uc` must be the frame of a thread interrupted
    /// inside the runtime's trampoline protocol, so that every staged address
    /// is valid stack or runtime memory for the lifetime of the context.
    pub unsafe fn new(uc: &'a mut libc::ucontext_t) -> Self {
        let mc = &mut uc.uc_mcontext;
        let mut regs = Aarch64Registers::new();
        regs.x = mc.regs;
        regs.sp = mc.sp;
        regs.pc = mc.pc;
        regs.pstate = mc.pstate;

        let fpsimd = find_fpsimd(mc);
        if let Some(offset) = fpsimd {
            // SAFETY: find_fpsimd checked the record fits the reserved area
            let record = unsafe { &*record_at(mc, offset) };
            regs.v = record.vregs;
            regs.fpsr = record.fpsr;
            regs.fpcr = record.fpcr;
        }
        Self { uc, fpsimd, regs }
    }

    /// Capture from the third argument of an `SA_SIGINFO` handler
    ///
    /// # Safety
    ///
    /// `context` must be the `ucontext_t` the kernel passed to the running
    /// signal handler, and the requirements of [`new`](Self::new) hold.
    pub unsafe fn from_raw(context: *mut libc::c_void) -> Option<Self> {
        let uc = (context as *mut libc::ucontext_t).as_mut()?;
        Some(Self::new(uc))
    }

    /// Write the register bank back into the signal frame
    ///
    /// The kernel resumes the thread with these registers when the handler
    /// returns.
    pub fn commit(mut self) {
        let mc = &mut self.uc.uc_mcontext;
        mc.regs = self.regs.x;
        mc.sp = self.regs.sp;
        mc.pc = self.regs.pc;
        mc.pstate = self.regs.pstate;
        if let Some(offset) = self.fpsimd {
            // SAFETY: see `new`
            let record = unsafe { &mut *record_at(mc, offset) };
            record.vregs = self.regs.v;
            record.fpsr = self.regs.fpsr;
            record.fpcr = self.regs.fpcr;
        }
    }
}

/// Start of `mcontext_t.__reserved` (the last field, 16-byte aligned)
fn reserved_area(mc: &mut libc::mcontext_t) -> *mut u8 {
    (mc as *mut libc::mcontext_t as *mut u8)
        .wrapping_add(size_of::<libc::mcontext_t>() - RESERVED_SIZE)
}

fn record_at(mc: &mut libc::mcontext_t, offset: usize) -> *mut FpsimdRecord {
    reserved_area(mc).wrapping_add(offset) as *mut FpsimdRecord
}

/// Walk the reserved area for the FPSIMD record
fn find_fpsimd(mc: &mut libc::mcontext_t) -> Option<usize> {
    let base = reserved_area(mc);
    let mut offset = 0;
    while offset + size_of::<RecordHeader>() <= RESERVED_SIZE {
        // SAFETY: in bounds of __reserved, records are 16-byte aligned
        let head = unsafe { ptr::read(base.add(offset) as *const RecordHeader) };
        match head.magic {
            0 => return None,
            FPSIMD_MAGIC if offset + size_of::<FpsimdRecord>() <= RESERVED_SIZE => {
                return Some(offset);
            }
            _ if head.size == 0 => return None,
            _ => offset += head.size as usize,
        }
    }
    None
}

impl TargetMemory for UcontextAarch64<'_> {
    // The target is this process: addresses are dereferenced directly.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        if addr == 0 {
            return Err(MemoryFault { addr });
        }
        // SAFETY: the contract of `new`: the protocol only hands out
        // addresses on the interrupted thread's stack or in runtime data
        unsafe { ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        if addr == 0 {
            return Err(MemoryFault { addr });
        }
        // SAFETY: as for `read`
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) };
        Ok(())
    }
}

impl ExecutionContext<Aarch64> for UcontextAarch64<'_> {
    fn registers(&self) -> &Aarch64Registers {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut Aarch64Registers {
        &mut self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;

    fn zeroed_ucontext() -> Box<libc::ucontext_t> {
        // SAFETY: ucontext_t is plain data
        Box::new(unsafe { MaybeUninit::zeroed().assume_init() })
    }

    fn reserved(uc: &mut libc::ucontext_t) -> *mut u8 {
        reserved_area(&mut uc.uc_mcontext)
    }

    #[test]
    fn general_registers_roundtrip() {
        let mut uc = zeroed_ucontext();
        uc.uc_mcontext.regs[0] = 10;
        uc.uc_mcontext.sp = 0x7000;
        uc.uc_mcontext.pc = 0x4000;

        let mut ctx = unsafe { UcontextAarch64::new(&mut uc) };
        assert_eq!(ctx.registers().x[0], 10);
        assert_eq!(ctx.sp(), 0x7000);
        ctx.set_pc(0x5000);
        ctx.registers_mut().x[26] = 0x99;
        ctx.commit();

        assert_eq!(uc.uc_mcontext.pc, 0x5000);
        assert_eq!(uc.uc_mcontext.regs[26], 0x99);
    }

    #[test]
    fn fpsimd_record_found_after_other_records() {
        let mut uc = zeroed_ucontext();
        let base = reserved(&mut uc);
        unsafe {
            // An unrelated 32-byte record first
            ptr::write(base as *mut RecordHeader, RecordHeader { magic: 0x1234, size: 32 });
            let record = base.add(32) as *mut FpsimdRecord;
            (*record).head = RecordHeader {
                magic: FPSIMD_MAGIC,
                size: size_of::<FpsimdRecord>() as u32,
            };
            (*record).vregs[2] = 7;
        }

        let mut ctx = unsafe { UcontextAarch64::new(&mut uc) };
        assert_eq!(ctx.registers().v[2], 7);
        ctx.registers_mut().v[0] = 1.5f64.to_bits() as u128;
        ctx.commit();

        let record = unsafe { &*(reserved(&mut uc).add(32) as *const FpsimdRecord) };
        assert_eq!(record.vregs[0], 1.5f64.to_bits() as u128);
    }

    #[test]
    fn missing_fpsimd_record_is_tolerated() {
        let mut uc = zeroed_ucontext();
        let ctx = unsafe { UcontextAarch64::new(&mut uc) };
        assert_eq!(ctx.registers().v, [0; 32]);
        assert_eq!(ctx.fpsimd, None);
    }

    #[test]
    fn memory_is_process_memory() {
        let mut uc = zeroed_ucontext();
        let mut ctx = unsafe { UcontextAarch64::new(&mut uc) };
        let mut cell = [0u8; 8];
        let addr = cell.as_mut_ptr() as u64;
        ctx.write_word(addr, 0xabcd).unwrap();
        assert_eq!(ctx.read_word(addr).unwrap(), 0xabcd);
        assert!(ctx.read_word(0).is_err());
    }
}
