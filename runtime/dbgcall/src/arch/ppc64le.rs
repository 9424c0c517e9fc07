//! ppc64le register bank
//!
//! Mirrors the user-visible part of Linux `pt_regs` plus the FP register
//! file. The link register is a special-purpose register (LR), not a GPR.
//!
//! Calling convention used for injected calls:
//! - r1: stack pointer
//! - r3-r10: integer arguments and results
//! - f1-f12: floating-point arguments and results
//! - r11: closure context pointer
//! - r20: protocol status
//! - `tw 31,0,0` (0x7fe00008): trap instruction

use core::fmt;
use core::mem::offset_of;
use static_assertions::const_assert_eq;

use super::Arch;

/// Stack pointer register index (r1)
pub const SP: usize = 1;

/// Closure context register index (r11)
pub const CONTEXT: usize = 11;

/// Protocol status register index (r20)
pub const STATUS: usize = 20;

/// Saved ppc64le register bank
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ppc64leRegisters {
    /// General purpose registers r0-r31
    pub gpr: [u64; 32],
    /// Next instruction pointer (pc)
    pub nip: u64,
    pub msr: u64,
    pub ctr: u64,
    pub link: u64,
    pub xer: u64,
    pub ccr: u64,
    /// Floating-point registers f0-f31 (raw bits)
    pub fpr: [u64; 32],
    pub fpscr: u64,
}

impl Ppc64leRegisters {
    /// Create a register bank with all registers zeroed
    pub const fn new() -> Self {
        Self {
            gpr: [0; 32],
            nip: 0,
            msr: 0,
            ctr: 0,
            link: 0,
            xer: 0,
            ccr: 0,
            fpr: [0; 32],
            fpscr: 0,
        }
    }
}

impl Default for Ppc64leRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ppc64leRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ppc64leRegisters")
            .field("r1_sp", &format_args!("0x{:016x}", self.gpr[SP]))
            .field("r3", &format_args!("0x{:016x}", self.gpr[3]))
            .field("r4", &format_args!("0x{:016x}", self.gpr[4]))
            .field("r11_ctxt", &format_args!("0x{:016x}", self.gpr[CONTEXT]))
            .field("r20_status", &format_args!("0x{:016x}", self.gpr[STATUS]))
            .field("nip", &format_args!("0x{:016x}", self.nip))
            .field("link", &format_args!("0x{:016x}", self.link))
            .field("ctr", &format_args!("0x{:016x}", self.ctr))
            .field("msr", &format_args!("0x{:016x}", self.msr))
            .finish_non_exhaustive()
    }
}

// pt_regs order: gpr[32] then nip, msr
const_assert_eq!(offset_of!(Ppc64leRegisters, nip), 32 * 8);
const_assert_eq!(offset_of!(Ppc64leRegisters, msr), 33 * 8);

/// Little-endian PowerPC 64 (Linux, internal register ABI)
#[derive(Debug, Clone, Copy)]
pub enum Ppc64le {}

impl Arch for Ppc64le {
    const NAME: &'static str = "ppc64le";
    const TRAP_INSTRUCTION: u32 = 0x7fe0_0008;
    const INT_ARG_BASE: usize = 3;
    const INT_ARG_COUNT: usize = 8;
    const FLOAT_ARG_BASE: usize = 1;
    const FLOAT_ARG_COUNT: usize = 12;

    type Registers = Ppc64leRegisters;

    #[inline]
    fn pc(regs: &Ppc64leRegisters) -> u64 {
        regs.nip
    }

    #[inline]
    fn set_pc(regs: &mut Ppc64leRegisters, pc: u64) {
        regs.nip = pc;
    }

    #[inline]
    fn sp(regs: &Ppc64leRegisters) -> u64 {
        regs.gpr[SP]
    }

    #[inline]
    fn set_sp(regs: &mut Ppc64leRegisters, sp: u64) {
        regs.gpr[SP] = sp;
    }

    #[inline]
    fn link(regs: &Ppc64leRegisters) -> u64 {
        regs.link
    }

    #[inline]
    fn set_link(regs: &mut Ppc64leRegisters, link: u64) {
        regs.link = link;
    }

    #[inline]
    fn status(regs: &Ppc64leRegisters) -> u64 {
        regs.gpr[STATUS]
    }

    #[inline]
    fn set_status(regs: &mut Ppc64leRegisters, status: u64) {
        regs.gpr[STATUS] = status;
    }

    #[inline]
    fn context_register(regs: &Ppc64leRegisters) -> u64 {
        regs.gpr[CONTEXT]
    }

    #[inline]
    fn set_context_register(regs: &mut Ppc64leRegisters, value: u64) {
        regs.gpr[CONTEXT] = value;
    }

    #[inline]
    fn gpr(regs: &Ppc64leRegisters, index: usize) -> u64 {
        regs.gpr[index]
    }

    #[inline]
    fn set_gpr(regs: &mut Ppc64leRegisters, index: usize, value: u64) {
        regs.gpr[index] = value;
    }

    #[inline]
    fn fpr(regs: &Ppc64leRegisters, index: usize) -> u64 {
        regs.fpr[index]
    }

    #[inline]
    fn set_fpr(regs: &mut Ppc64leRegisters, index: usize, bits: u64) {
        regs.fpr[index] = bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_pointer_is_r1() {
        let mut regs = Ppc64leRegisters::new();
        Ppc64le::set_sp(&mut regs, 0x7fff_fff0);
        assert_eq!(regs.gpr[1], 0x7fff_fff0);
    }

    #[test]
    fn link_register_is_not_a_gpr() {
        let mut regs = Ppc64leRegisters::new();
        Ppc64le::set_link(&mut regs, 0x1234);
        assert_eq!(regs.link, 0x1234);
        assert!(regs.gpr.iter().all(|&r| r == 0));
    }
}
