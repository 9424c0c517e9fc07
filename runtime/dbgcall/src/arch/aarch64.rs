//! AArch64 register bank
//!
//! Layout follows the Linux `sigcontext` order for the general registers
//! (x0-x30, sp, pc, pstate) followed by the FPSIMD record (v0-v31, fpsr,
//! fpcr), so a signal frame can be copied in and out field by field.
//!
//! Calling convention used for injected calls:
//! - x0-x15: integer arguments and results
//! - d0-d15: floating-point arguments and results (low 64 bits of v0-v15)
//! - x20: protocol status
//! - x26: closure context pointer
//! - x30: link register
//! - `brk #0` (0xd4200000): trap instruction

use core::fmt;
use core::mem::offset_of;
use static_assertions::const_assert_eq;

use super::Arch;

/// Link register index (x30)
pub const LR: usize = 30;

/// Protocol status register index (x20)
pub const STATUS: usize = 20;

/// Closure context register index (x26)
pub const CONTEXT: usize = 26;

/// Saved AArch64 register bank
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Aarch64Registers {
    /// General purpose registers x0-x30
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
    /// SIMD/FP registers v0-v31
    pub v: [u128; 32],
    pub fpsr: u32,
    pub fpcr: u32,
}

impl Aarch64Registers {
    /// Create a register bank with all registers zeroed
    pub const fn new() -> Self {
        Self {
            x: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
            v: [0; 32],
            fpsr: 0,
            fpcr: 0,
        }
    }
}

impl Default for Aarch64Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Aarch64Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aarch64Registers")
            .field("x0", &format_args!("0x{:016x}", self.x[0]))
            .field("x1", &format_args!("0x{:016x}", self.x[1]))
            .field("x2", &format_args!("0x{:016x}", self.x[2]))
            .field("x3", &format_args!("0x{:016x}", self.x[3]))
            .field("x20_status", &format_args!("0x{:016x}", self.x[STATUS]))
            .field("x26_ctxt", &format_args!("0x{:016x}", self.x[CONTEXT]))
            .field("x29_fp", &format_args!("0x{:016x}", self.x[29]))
            .field("x30_lr", &format_args!("0x{:016x}", self.x[LR]))
            .field("sp", &format_args!("0x{:016x}", self.sp))
            .field("pc", &format_args!("0x{:016x}", self.pc))
            .field("pstate", &format_args!("0x{:016x}", self.pstate))
            .finish_non_exhaustive()
    }
}

// sigcontext order for the general part of the bank
const_assert_eq!(offset_of!(Aarch64Registers, sp), 31 * 8);
const_assert_eq!(offset_of!(Aarch64Registers, pc), 32 * 8);
const_assert_eq!(offset_of!(Aarch64Registers, pstate), 33 * 8);

/// AArch64 (Linux, internal register ABI)
#[derive(Debug, Clone, Copy)]
pub enum Aarch64 {}

impl Arch for Aarch64 {
    const NAME: &'static str = "aarch64";
    const TRAP_INSTRUCTION: u32 = 0xd420_0000;
    const INT_ARG_BASE: usize = 0;
    const INT_ARG_COUNT: usize = 16;
    const FLOAT_ARG_BASE: usize = 0;
    const FLOAT_ARG_COUNT: usize = 16;

    type Registers = Aarch64Registers;

    #[inline]
    fn pc(regs: &Aarch64Registers) -> u64 {
        regs.pc
    }

    #[inline]
    fn set_pc(regs: &mut Aarch64Registers, pc: u64) {
        regs.pc = pc;
    }

    #[inline]
    fn sp(regs: &Aarch64Registers) -> u64 {
        regs.sp
    }

    #[inline]
    fn set_sp(regs: &mut Aarch64Registers, sp: u64) {
        regs.sp = sp;
    }

    #[inline]
    fn link(regs: &Aarch64Registers) -> u64 {
        regs.x[LR]
    }

    #[inline]
    fn set_link(regs: &mut Aarch64Registers, link: u64) {
        regs.x[LR] = link;
    }

    #[inline]
    fn status(regs: &Aarch64Registers) -> u64 {
        regs.x[STATUS]
    }

    #[inline]
    fn set_status(regs: &mut Aarch64Registers, status: u64) {
        regs.x[STATUS] = status;
    }

    #[inline]
    fn context_register(regs: &Aarch64Registers) -> u64 {
        regs.x[CONTEXT]
    }

    #[inline]
    fn set_context_register(regs: &mut Aarch64Registers, value: u64) {
        regs.x[CONTEXT] = value;
    }

    #[inline]
    fn gpr(regs: &Aarch64Registers, index: usize) -> u64 {
        regs.x[index]
    }

    #[inline]
    fn set_gpr(regs: &mut Aarch64Registers, index: usize, value: u64) {
        regs.x[index] = value;
    }

    #[inline]
    fn fpr(regs: &Aarch64Registers, index: usize) -> u64 {
        regs.v[index] as u64
    }

    // Writing a D register clears the upper half of the V register.
    #[inline]
    fn set_fpr(regs: &mut Aarch64Registers, index: usize, bits: u64) {
        regs.v[index] = bits as u128;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_register_is_x30() {
        let mut regs = Aarch64Registers::new();
        Aarch64::set_link(&mut regs, 0xdead_beef);
        assert_eq!(regs.x[30], 0xdead_beef);
    }

    #[test]
    fn fpr_uses_low_half_of_vector_register() {
        let mut regs = Aarch64Registers::new();
        regs.v[3] = u128::MAX;
        assert_eq!(Aarch64::fpr(&regs, 3), u64::MAX);

        Aarch64::set_fpr(&mut regs, 3, 1.5f64.to_bits());
        assert_eq!(regs.v[3], 1.5f64.to_bits() as u128);
        assert_eq!(f64::from_bits(Aarch64::fpr(&regs, 3)), 1.5);
    }
}
