//! Simulated register file plus address space

use dbgcall::{Arch, ExecutionContext, MemoryFault, TargetMemory};

use crate::memory::SimMemory;

/// Machine state of the simulated target thread
#[derive(Debug, Clone)]
pub struct SimContext<A: Arch> {
    pub regs: A::Registers,
    pub mem: SimMemory,
}

impl<A: Arch> SimContext<A> {
    pub fn new(mem: SimMemory) -> Self {
        Self {
            regs: A::Registers::default(),
            mem,
        }
    }
}

impl<A: Arch> TargetMemory for SimContext<A> {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        self.mem.read(addr, buf)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        self.mem.write(addr, data)
    }
}

impl<A: Arch> ExecutionContext<A> for SimContext<A> {
    fn registers(&self) -> &A::Registers {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut A::Registers {
        &mut self.regs
    }
}
