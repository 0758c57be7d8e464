//! User-mode A64 execution core.
//!
//! The simulator consumes pre-decoded instructions (an external decoder
//! classifies each word into an [`a64_core::InstructionGroup`]) and emulates
//! their effects on an architecturally defined machine state: general
//! registers, SIMD/SVE vector and predicate registers, condition flags, and
//! a linear byte-addressed memory image.
//!
//! # Usage
//!
//! ```ignore
//! use a64_core::{Decode, LinearMemory};
//! use cpu_a64::{SimConfig, Simulator};
//!
//! let mut sim = Simulator::new(SimConfig::default());
//! sim.mem_mut().load(0x8000, program_bytes);
//! sim.regs.pc = 0x8000;
//! sim.run(&decoder)?;
//! ```
//!
//! Execution ends when the program counter reaches
//! [`a64_core::END_OF_SIM_ADDRESS`] (the reset link-register value, so a
//! final `ret` exits cleanly), or with a [`Fault`] for the fatal
//! categories: misaligned SP, atomics crossing a 16-byte line, pointer
//! authentication failure, BTI violations, and unallocated opcodes.

mod alu;
mod arith;
mod branches;
mod fault;
mod features;
mod flags;
mod fp;
mod fparith;
mod loadstore;
mod logic;
mod monitor;
mod neon;
mod pac;
mod registers;
mod simd;
mod simulator;
mod sve;
mod sve_exec;
mod system;
mod trace;
mod vecfmt;

pub use fault::Fault;
pub use features::{CpuFeature, CpuFeatures};
pub use flags::{FpRounding, Fpcr, Fpsr, Nzcv};
pub use registers::{
    BType, LINK_REGISTER, NUM_PREGISTERS, NUM_VREGISTERS, NUM_XREGISTERS, PRegister, Reg31Mode,
    Registers, VRegister,
};
pub use simulator::{SimConfig, Simulator};
pub use sve::PredicatePattern;
pub use system::{
    DebugHltOpcode, TraceCommand, CONFIGURE_CPU_FEATURES_LIST_OFFSET, PRINTF_ARG_COUNT_OFFSET,
    PRINTF_ARG_PATTERN_LIST_OFFSET, RUNTIME_CALL_FUNCTION_OFFSET, RUNTIME_CALL_WRAPPER_OFFSET,
    TRACE_COMMAND_OFFSET, TRACE_PARAMS_OFFSET,
};
pub use trace::TraceCategories;
pub use vecfmt::VectorFormat;
