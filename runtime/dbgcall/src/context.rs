//! Execution context access
//!
//! An [`ExecutionContext`] is the live, mutable machine state of a thread
//! stopped in a trap: its saved register bank plus access to the memory the
//! protocol stages values in (the thread's own stack and the trampoline's
//! code). The context is borrowed from the signal layer for the duration of
//! one trap and never retained.
//!
//! Memory access goes through [`TargetMemory`] so that the same protocol code
//! runs against a real signal frame (plain loads and stores in the current
//! address space) and against a simulated target.

use crate::arch::Arch;

/// A target memory access touched an address that is not mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault {
    pub addr: u64,
}

/// Byte-level access to target memory
///
/// Implementations must not allocate, lock or block: they are called from
/// the trap path.
pub trait TargetMemory {
    /// Copy `buf.len()` bytes starting at `addr` into `buf`
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault>;

    /// Copy `data` to target memory starting at `addr`
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryFault>;

    /// Read one little-endian pointer-sized word
    #[inline]
    fn read_word(&self, addr: u64) -> Result<u64, MemoryFault> {
        let mut word = [0u8; 8];
        self.read(addr, &mut word)?;
        Ok(u64::from_le_bytes(word))
    }

    /// Write one little-endian pointer-sized word
    #[inline]
    fn write_word(&mut self, addr: u64, value: u64) -> Result<(), MemoryFault> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// Saved machine state of a trapped thread
pub trait ExecutionContext<A: Arch>: TargetMemory {
    fn registers(&self) -> &A::Registers;
    fn registers_mut(&mut self) -> &mut A::Registers;

    #[inline]
    fn pc(&self) -> u64 {
        A::pc(self.registers())
    }

    #[inline]
    fn set_pc(&mut self, pc: u64) {
        A::set_pc(self.registers_mut(), pc)
    }

    #[inline]
    fn sp(&self) -> u64 {
        A::sp(self.registers())
    }

    #[inline]
    fn set_sp(&mut self, sp: u64) {
        A::set_sp(self.registers_mut(), sp)
    }

    #[inline]
    fn link(&self) -> u64 {
        A::link(self.registers())
    }

    #[inline]
    fn set_link(&mut self, link: u64) {
        A::set_link(self.registers_mut(), link)
    }

    /// Protocol status published by the trampoline
    #[inline]
    fn status(&self) -> u64 {
        A::status(self.registers())
    }

    #[inline]
    fn set_context_register(&mut self, value: u64) {
        A::set_context_register(self.registers_mut(), value)
    }

    /// Whether the thread stopped exactly on a trap instruction
    fn at_trap_instruction(&self) -> bool {
        let mut insn = [0u8; 4];
        match self.read(self.pc(), &mut insn) {
            Ok(()) => A::is_trap_instruction(insn),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Flat in-memory context for unit tests

    use super::*;

    /// Register bank plus one contiguous memory window at `base`
    pub struct FlatContext<A: Arch> {
        pub regs: A::Registers,
        pub base: u64,
        pub mem: Vec<u8>,
    }

    impl<A: Arch> FlatContext<A> {
        pub fn new(base: u64, size: usize) -> Self {
            Self {
                regs: A::Registers::default(),
                base,
                mem: vec![0; size],
            }
        }

        fn range(&self, addr: u64, len: usize) -> Result<core::ops::Range<usize>, MemoryFault> {
            let start = addr
                .checked_sub(self.base)
                .ok_or(MemoryFault { addr })? as usize;
            let end = start.checked_add(len).ok_or(MemoryFault { addr })?;
            if end > self.mem.len() {
                return Err(MemoryFault { addr });
            }
            Ok(start..end)
        }
    }

    impl<A: Arch> TargetMemory for FlatContext<A> {
        fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
            let range = self.range(addr, buf.len())?;
            buf.copy_from_slice(&self.mem[range]);
            Ok(())
        }

        fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
            let range = self.range(addr, data.len())?;
            self.mem[range].copy_from_slice(data);
            Ok(())
        }
    }

    impl<A: Arch> ExecutionContext<A> for FlatContext<A> {
        fn registers(&self) -> &A::Registers {
            &self.regs
        }

        fn registers_mut(&mut self) -> &mut A::Registers {
            &mut self.regs
        }
    }
}
