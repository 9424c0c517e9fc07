//! Register argument marshaling
//!
//! Converts between the runtime's logical register arguments ([`RegArgs`])
//! and the physical register windows of an architecture's saved register
//! bank. Slot `i` of the integer arguments maps to general register
//! `A::INT_ARG_BASE + i`, slot `i` of the float arguments to floating-point
//! register `A::FLOAT_ARG_BASE + i`, for the first `A::INT_ARG_COUNT` and
//! `A::FLOAT_ARG_COUNT` slots respectively.

use static_assertions::const_assert;

use crate::arch::{Aarch64, Arch, Ppc64le};

/// Integer argument slots (large enough for every supported architecture)
pub const MAX_INT_ARGS: usize = 16;

/// Float argument slots (large enough for every supported architecture)
pub const MAX_FLOAT_ARGS: usize = 16;

const_assert!(<Aarch64 as Arch>::INT_ARG_COUNT <= MAX_INT_ARGS);
const_assert!(<Aarch64 as Arch>::FLOAT_ARG_COUNT <= MAX_FLOAT_ARGS);
const_assert!(<Ppc64le as Arch>::INT_ARG_COUNT <= MAX_INT_ARGS);
const_assert!(<Ppc64le as Arch>::FLOAT_ARG_COUNT <= MAX_FLOAT_ARGS);

/// Register-passed arguments or results of an injected call
///
/// Floats are stored as raw IEEE-754 double bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegArgs {
    pub ints: [u64; MAX_INT_ARGS],
    pub floats: [u64; MAX_FLOAT_ARGS],
}

impl RegArgs {
    pub const fn new() -> Self {
        Self {
            ints: [0; MAX_INT_ARGS],
            floats: [0; MAX_FLOAT_ARGS],
        }
    }

    /// Set float slot `index` from a double
    pub fn set_float(&mut self, index: usize, value: f64) {
        self.floats[index] = value.to_bits();
    }

    /// Float slot `index` as a double
    pub fn float(&self, index: usize) -> f64 {
        f64::from_bits(self.floats[index])
    }
}

/// Copy register arguments into the saved register bank
#[inline]
pub fn store_reg_args<A: Arch>(dst: &mut A::Registers, src: &RegArgs) {
    for (i, &value) in src.ints.iter().take(A::INT_ARG_COUNT).enumerate() {
        A::set_gpr(dst, A::INT_ARG_BASE + i, value);
    }
    for (i, &bits) in src.floats.iter().take(A::FLOAT_ARG_COUNT).enumerate() {
        A::set_fpr(dst, A::FLOAT_ARG_BASE + i, bits);
    }
}

/// Copy register results out of the saved register bank
#[inline]
pub fn load_reg_args<A: Arch>(dst: &mut RegArgs, src: &A::Registers) {
    for (i, slot) in dst.ints.iter_mut().take(A::INT_ARG_COUNT).enumerate() {
        *slot = A::gpr(src, A::INT_ARG_BASE + i);
    }
    for (i, slot) in dst.floats.iter_mut().take(A::FLOAT_ARG_COUNT).enumerate() {
        *slot = A::fpr(src, A::FLOAT_ARG_BASE + i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Aarch64, Aarch64Registers, Ppc64le, Ppc64leRegisters};

    fn sample_args() -> RegArgs {
        let mut args = RegArgs::new();
        for i in 0..MAX_INT_ARGS {
            args.ints[i] = 0x100 + i as u64;
        }
        for i in 0..MAX_FLOAT_ARGS {
            args.set_float(i, i as f64 + 0.5);
        }
        args
    }

    #[test]
    fn aarch64_windows() {
        let args = sample_args();
        let mut regs = Aarch64Registers::new();
        store_reg_args::<Aarch64>(&mut regs, &args);

        // x0-x15 carry the integer slots, x16 and up are untouched
        for i in 0..16 {
            assert_eq!(regs.x[i], 0x100 + i as u64);
        }
        assert_eq!(regs.x[16], 0);
        // d0-d15 carry the float slots
        for i in 0..16 {
            assert_eq!(f64::from_bits(regs.v[i] as u64), i as f64 + 0.5);
        }
        assert_eq!(regs.v[16], 0);
    }

    #[test]
    fn ppc64le_windows() {
        let args = sample_args();
        let mut regs = Ppc64leRegisters::new();
        store_reg_args::<Ppc64le>(&mut regs, &args);

        // r3-r10 carry ints 0-7; r2 and r11 stay clear
        assert_eq!(regs.gpr[2], 0);
        for i in 0..8 {
            assert_eq!(regs.gpr[3 + i], 0x100 + i as u64);
        }
        assert_eq!(regs.gpr[11], 0);

        // f1-f12 carry floats 0-11; f0 and f13 stay clear
        assert_eq!(regs.fpr[0], 0);
        for i in 0..12 {
            assert_eq!(f64::from_bits(regs.fpr[1 + i]), i as f64 + 0.5);
        }
        assert_eq!(regs.fpr[13], 0);
    }

    #[test]
    fn load_mirrors_store() {
        let mut regs = Ppc64leRegisters::new();
        for (i, r) in regs.gpr.iter_mut().enumerate() {
            *r = 1000 + i as u64;
        }
        for (i, f) in regs.fpr.iter_mut().enumerate() {
            *f = (i as f64 * 2.0).to_bits();
        }

        let mut out = RegArgs::new();
        load_reg_args::<Ppc64le>(&mut out, &regs);

        assert_eq!(out.ints[0], 1003);
        assert_eq!(out.ints[7], 1010);
        // Slots beyond the window are left alone
        assert_eq!(out.ints[8], 0);
        assert_eq!(out.float(0), 2.0);
        assert_eq!(out.float(11), 24.0);
        assert_eq!(out.floats[12], 0);
    }
}
