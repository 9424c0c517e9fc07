//! Stack staging area
//!
//! Values exchanged between the trap handler and the trampoline live on the
//! target's own stack, at the stack pointer of the trapping thread:
//!
//! ```text
//!   sp + 0   link slot        saved link register / trampoline return address
//!   sp + 8   frame size       size in bytes of the argument frame
//!   sp + 16  payload          argument frame        (status 0 and 1)
//!                             panic descriptor      (status 2, two words)
//!                             reason descriptor     (status 8, ptr + len)
//! ```
//!
//! On injection start the handler carves the two-word header out of the
//! interrupted stack by moving the stack pointer down by [`HEADER_SIZE`].
//! The trampoline reads the frame size, allocates a frame large enough for
//! the header plus payload, and re-stages the header at the top of that frame
//! before every subsequent trap, so the same offsets hold at each status.
//! The payload therefore always lies inside the trampoline's frame and never
//! overlaps the frame of the injected call, which is pushed below it.

use static_assertions::const_assert_eq;

use crate::context::{MemoryFault, TargetMemory};

/// Pointer width of every supported target
pub const WORD: u64 = 8;

/// Offset of the link slot
pub const LINK_OFFSET: u64 = 0;

/// Offset of the argument frame size slot
pub const FRAME_SIZE_OFFSET: u64 = WORD;

/// Size of the header reserved below the interrupted stack pointer
pub const HEADER_SIZE: u64 = 2 * WORD;

/// Offset of the payload region
pub const PAYLOAD_OFFSET: u64 = HEADER_SIZE;

// Both targets require a 16-byte aligned stack pointer
const_assert_eq!(HEADER_SIZE % 16, 0);

/// View of the staging header and payload at a given stack pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingArea {
    base: u64,
}

impl StagingArea {
    /// Staging area whose header starts at `sp`
    pub const fn at(sp: u64) -> Self {
        Self { base: sp }
    }

    /// Staging area reserved just below `sp`
    pub const fn reserve(sp: u64) -> Self {
        Self {
            base: sp.wrapping_sub(HEADER_SIZE),
        }
    }

    /// New stack pointer (the header's lowest address)
    pub const fn base(&self) -> u64 {
        self.base
    }

    pub const fn link_slot(&self) -> u64 {
        self.base + LINK_OFFSET
    }

    pub const fn frame_size_slot(&self) -> u64 {
        self.base + FRAME_SIZE_OFFSET
    }

    pub const fn payload(&self) -> u64 {
        self.base + PAYLOAD_OFFSET
    }

    pub fn read_link<M: TargetMemory + ?Sized>(&self, mem: &M) -> Result<u64, MemoryFault> {
        mem.read_word(self.link_slot())
    }

    pub fn write_link<M: TargetMemory + ?Sized>(
        &self,
        mem: &mut M,
        link: u64,
    ) -> Result<(), MemoryFault> {
        mem.write_word(self.link_slot(), link)
    }

    pub fn read_frame_size<M: TargetMemory + ?Sized>(&self, mem: &M) -> Result<u64, MemoryFault> {
        mem.read_word(self.frame_size_slot())
    }

    pub fn write_frame_size<M: TargetMemory + ?Sized>(
        &self,
        mem: &mut M,
        size: u64,
    ) -> Result<(), MemoryFault> {
        mem.write_word(self.frame_size_slot(), size)
    }

    /// Copy the caller's argument frame into the payload region
    pub fn copy_frame_in<M: TargetMemory + ?Sized>(
        &self,
        mem: &mut M,
        frame: &[u8],
    ) -> Result<(), MemoryFault> {
        if frame.is_empty() {
            return Ok(());
        }
        mem.write(self.payload(), frame)
    }

    /// Copy the payload region back out into the caller's argument frame
    pub fn copy_frame_out<M: TargetMemory + ?Sized>(
        &self,
        mem: &M,
        frame: &mut [u8],
    ) -> Result<(), MemoryFault> {
        if frame.is_empty() {
            return Ok(());
        }
        mem.read(self.payload(), frame)
    }

    /// Two-word descriptor at the start of the payload region
    pub fn read_descriptor<M: TargetMemory + ?Sized>(
        &self,
        mem: &M,
    ) -> Result<[u64; 2], MemoryFault> {
        Ok([
            mem.read_word(self.payload())?,
            mem.read_word(self.payload() + WORD)?,
        ])
    }
}
