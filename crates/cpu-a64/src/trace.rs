//! Trace stream categories.
//!
//! Trace output goes to a caller-supplied byte sink; the categories below
//! select which events are written. The emulated program can flip them at
//! runtime through the `kTrace` host trap.

use bitflags::bitflags;

bitflags! {
    /// Bit-selectable trace categories.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TraceCategories: u32 {
        /// One line per executed instruction (address, raw word, group).
        const DISASM = 1 << 0;
        /// General-purpose register writes.
        const REGS = 1 << 1;
        /// Vector register writes.
        const VREGS = 1 << 2;
        /// Predicate register writes.
        const PREGS = 1 << 3;
        /// System register writes (NZCV, FPCR, ...).
        const SYSREGS = 1 << 4;
        /// Memory writes (address and bytes).
        const WRITE = 1 << 5;
        /// Taken branches.
        const BRANCH = 1 << 6;
        /// Register traffic of every bank.
        const STATE = Self::REGS.bits()
            | Self::VREGS.bits()
            | Self::PREGS.bits()
            | Self::SYSREGS.bits();
        /// Everything.
        const ALL = Self::DISASM.bits() | Self::STATE.bits()
            | Self::WRITE.bits() | Self::BRANCH.bits();
    }
}
