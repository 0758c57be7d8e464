//! Fatal fault taxonomy.
//!
//! Architectural corner cases (division by zero, saturation, FP invalid
//! operations) are part of the instruction semantics and never surface
//! here. A `Fault` terminates the run with enough context for a
//! diagnostic dump: the faulting pc and, where it exists, the raw opcode.

use a64_core::InstructionGroup;
use thiserror::Error;

use crate::registers::BType;

/// A fatal condition that terminates simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// SP was used as a base register while not 16-byte aligned.
    #[error("stack pointer {sp:#018x} not 16-byte aligned at pc {pc:#x}")]
    StackAlignment { pc: u64, sp: u64 },

    /// An atomic access crossed a 16-byte line.
    #[error("atomic access of {len} bytes at {addr:#018x} crosses a 16-byte boundary (pc {pc:#x})")]
    UnalignedAtomic { pc: u64, addr: u64, len: usize },

    /// Execution reached a pointer whose authentication failed earlier.
    #[error("pointer authentication failure: non-canonical target {target:#018x} at pc {pc:#x}")]
    PointerAuth { pc: u64, target: u64 },

    /// An indirect branch landed on an instruction that does not accept
    /// the incoming branch type.
    #[error("BTI violation: {btype:?} branch landed at pc {pc:#x} (opcode {raw:#010x})")]
    BtiViolation { pc: u64, raw: u32, btype: BType },

    /// The decoder dispatched to an undefined slot.
    #[error("unallocated opcode {raw:#010x} at pc {pc:#x}")]
    Unallocated { pc: u64, raw: u32 },

    /// A corner of the architecture the core does not model yet.
    #[error("unimplemented {group:?} opcode {raw:#010x} at pc {pc:#x}")]
    Unimplemented {
        pc: u64,
        raw: u32,
        group: InstructionGroup,
    },

    /// The architected permanently-undefined instruction.
    #[error("UDF (permanently undefined) instruction {raw:#010x} at pc {pc:#x}")]
    Undefined { pc: u64, raw: u32 },

    /// `HLT #kUnreachable`: the emulated program declared this point
    /// unreachable.
    #[error("unreachable code executed at pc {pc:#x}")]
    Unreachable { pc: u64 },

    /// A computed address fell outside the emulated image.
    #[error("memory access of {len} bytes at {addr:#018x} outside the image (pc {pc:#x})")]
    MemoryBounds { pc: u64, addr: u64, len: usize },
}

impl Fault {
    /// The program counter the fault was raised at.
    #[must_use]
    pub fn pc(&self) -> u64 {
        match self {
            Fault::StackAlignment { pc, .. }
            | Fault::UnalignedAtomic { pc, .. }
            | Fault::PointerAuth { pc, .. }
            | Fault::BtiViolation { pc, .. }
            | Fault::Unallocated { pc, .. }
            | Fault::Unimplemented { pc, .. }
            | Fault::Undefined { pc, .. }
            | Fault::Unreachable { pc }
            | Fault::MemoryBounds { pc, .. } => *pc,
        }
    }
}
