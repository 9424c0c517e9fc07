//! Architecture-specific register access
//!
//! Each supported architecture is a zero-sized type implementing [`Arch`].
//! The trait describes the saved register bank of an interrupted thread and
//! the calling-convention constants the protocol depends on:
//!
//! - where the program counter, stack pointer and link register live
//! - which register carries the protocol status written by the trampoline
//! - which register carries the closure pointer of the injected function
//! - the integer and floating-point argument register windows
//! - the encoding of the trap instruction
//!
//! All protocol code is generic over `A: Arch`, so the architecture is fixed
//! at build time and every accessor compiles down to a field access.
//! Both architectures are always compiled so that either can be exercised
//! against a simulated target on any host.

use core::fmt;

pub mod aarch64;
pub mod ppc64le;

pub use aarch64::{Aarch64, Aarch64Registers};
pub use ppc64le::{Ppc64le, Ppc64leRegisters};

/// The architecture of the host, when it is one the protocol supports.
#[cfg(target_arch = "aarch64")]
pub type Native = Aarch64;

/// The architecture of the host, when it is one the protocol supports.
#[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
pub type Native = Ppc64le;

/// Register layout and calling convention of one architecture.
pub trait Arch: Sized + Send + Sync + 'static {
    /// Human-readable name (for logs)
    const NAME: &'static str;

    /// Encoding of the trap instruction, as stored in memory (little-endian)
    const TRAP_INSTRUCTION: u32;

    /// Width of one instruction in bytes
    const INSTRUCTION_LEN: u64 = 4;

    /// First general register of the integer argument window
    const INT_ARG_BASE: usize;

    /// Number of integer argument registers
    const INT_ARG_COUNT: usize;

    /// First floating-point register of the float argument window
    const FLOAT_ARG_BASE: usize;

    /// Number of floating-point argument registers
    const FLOAT_ARG_COUNT: usize;

    /// Full saved register bank of a suspended thread
    type Registers: Copy + PartialEq + Default + fmt::Debug + Send;

    fn pc(regs: &Self::Registers) -> u64;
    fn set_pc(regs: &mut Self::Registers, pc: u64);

    fn sp(regs: &Self::Registers) -> u64;
    fn set_sp(regs: &mut Self::Registers, sp: u64);

    fn link(regs: &Self::Registers) -> u64;
    fn set_link(regs: &mut Self::Registers, link: u64);

    /// Protocol status register, written by the trampoline before each trap
    fn status(regs: &Self::Registers) -> u64;
    fn set_status(regs: &mut Self::Registers, status: u64);

    /// Register carrying the closure pointer into the injected function
    fn context_register(regs: &Self::Registers) -> u64;
    fn set_context_register(regs: &mut Self::Registers, value: u64);

    /// General register `index`
    fn gpr(regs: &Self::Registers, index: usize) -> u64;
    fn set_gpr(regs: &mut Self::Registers, index: usize, value: u64);

    /// Floating-point register `index`, as raw IEEE-754 double bits
    fn fpr(regs: &Self::Registers, index: usize) -> u64;
    fn set_fpr(regs: &mut Self::Registers, index: usize, bits: u64);

    /// Whether `bytes` (read at the trapping pc) are the trap instruction
    #[inline]
    fn is_trap_instruction(bytes: [u8; 4]) -> bool {
        u32::from_le_bytes(bytes) == Self::TRAP_INSTRUCTION
    }
}
