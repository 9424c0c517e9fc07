//! Sparse simulated address space

use std::collections::BTreeMap;

use dbgcall::{MemoryFault, TargetMemory};

/// Non-overlapping byte regions keyed by base address
///
/// Accesses must fall entirely inside one mapped region; anything else is a
/// [`MemoryFault`].
#[derive(Debug, Default, Clone)]
pub struct SimMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` zeroed bytes at `base`
    pub fn map(&mut self, base: u64, size: usize) {
        self.regions.insert(base, vec![0; size]);
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.region(addr, 1).is_ok()
    }

    fn region(&self, addr: u64, len: usize) -> Result<(u64, usize), MemoryFault> {
        let (&base, bytes) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or(MemoryFault { addr })?;
        let start = (addr - base) as usize;
        match start.checked_add(len) {
            Some(end) if end <= bytes.len() => Ok((base, start)),
            _ => Err(MemoryFault { addr }),
        }
    }
}

impl TargetMemory for SimMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let (base, start) = self.region(addr, buf.len())?;
        buf.copy_from_slice(&self.regions[&base][start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        let (base, start) = self.region(addr, data.len())?;
        let bytes = self
            .regions
            .get_mut(&base)
            .ok_or(MemoryFault { addr })?;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accesses_stay_inside_one_region() {
        let mut mem = SimMemory::new();
        mem.map(0x1000, 0x10);
        mem.map(0x1010, 0x10);

        mem.write_word(0x1008, 42).unwrap();
        assert_eq!(mem.read_word(0x1008).unwrap(), 42);

        // Straddles two regions
        assert_eq!(mem.read_word(0x100c), Err(MemoryFault { addr: 0x100c }));
        assert!(mem.read_word(0x0ff8).is_err());
        assert!(mem.is_mapped(0x101f));
        assert!(!mem.is_mapped(0x1020));
    }
}
