//! The simulator core: machine state and the fetch-execute driver loop.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{Ordering, fence};

use a64_core::{
    A64Memory, Decode, END_OF_SIM_ADDRESS, Instruction, InstructionGroup, LinearMemory,
    Observable, OutOfBounds, Scalar, Value,
};

use crate::fault::Fault;
use crate::features::{CpuFeature, CpuFeatures};
use crate::monitor::ExclusiveMonitor;
use crate::pac;
use crate::registers::{BType, REG31, Reg31Mode, Registers};
use crate::trace::TraceCategories;

/// Construction-time configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Base address of the emulated image.
    pub memory_base: u64,
    /// Image size in bytes; the stack lives at the top.
    pub memory_size: usize,
    /// Usable stack size in bytes.
    pub stack_size: usize,
    /// SVE vector length in bits (multiple of 128, up to 2048).
    pub vl_bits: usize,
    /// Optional features the emulated program may use.
    pub features: CpuFeatures,
    /// Initially enabled trace categories.
    pub trace: TraceCategories,
    /// Treat the text as BTI-guarded pages.
    pub guarded_pages: bool,
}

/// Bytes reserved as a protection pad at each end of the stack.
const STACK_GUARD: usize = 256;

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory_base: 0x1_0000,
            memory_size: 4 << 20,
            stack_size: 64 << 10,
            vl_bits: 128,
            features: CpuFeatures::all(),
            trace: TraceCategories::empty(),
            guarded_pages: false,
        }
    }
}

type HostCall<M> = Box<dyn FnMut(&mut Simulator<M>)>;

/// Three 16-bit words of linear-congruential state, fixed-seeded so RNDR
/// draws are reproducible across runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rand48 {
    state: u64,
}

impl Rand48 {
    const A: u64 = 0x5_deec_e66d;
    const C: u64 = 0xb;
    const MASK: u64 = (1 << 48) - 1;

    const fn new() -> Self {
        // Equivalent to the seed words {0x330e, 0xabcd, 0x1234}.
        Self {
            state: 0x1234_abcd_330e,
        }
    }

    fn next_u48(&mut self) -> u64 {
        self.state = (self.state.wrapping_mul(Self::A).wrapping_add(Self::C)) & Self::MASK;
        self.state
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        (self.next_u48() << 16) ^ self.next_u48()
    }
}

/// The A64 execution core.
///
/// Owns every piece of architectural state plus the memory image; the
/// decoder stays outside and is borrowed per run.
pub struct Simulator<M: A64Memory = LinearMemory> {
    /// The architectural register bank.
    pub regs: Registers,
    mem: M,

    trace_sink: Box<dyn Write>,
    trace: TraceCategories,

    features: CpuFeatures,
    feature_stack: Vec<CpuFeatures>,

    pub(crate) local_monitor: ExclusiveMonitor,
    pub(crate) global_monitor: ExclusiveMonitor,

    // One-instruction MOVPRFX latch: `pending` is set by the MOVPRFX
    // visitor, promoted to `active` for exactly the next instruction.
    movprfx_pending: Option<Instruction>,
    movprfx_active: Option<Instruction>,

    btype: BType,
    pub(crate) next_btype: BType,
    pub(crate) pc_modified: bool,

    pub(crate) rng: Rand48,
    host_calls: HashMap<u64, HostCall<M>>,

    guarded_pages: bool,
    instructions_executed: u64,
    has_run: bool,
}

impl Simulator<LinearMemory> {
    /// Create a simulator backed by a fresh linear image.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let mem = LinearMemory::new(config.memory_base, config.memory_size);
        Self::with_memory(config, mem)
    }
}

impl<M: A64Memory> Simulator<M> {
    /// Create a simulator over a host-provided memory image.
    ///
    /// The stack is carved from the top of the image with a guard pad at
    /// both ends; SP starts 16-byte aligned below the top pad.
    pub fn with_memory(config: SimConfig, mem: M) -> Self {
        let vl_bits = if config.features.has(CpuFeature::Sve) {
            config.vl_bits
        } else {
            128
        };
        let mut regs = Registers::new(vl_bits);
        let stack_top = mem.base() + mem.size() - STACK_GUARD as u64;
        regs.set_sp(stack_top & !0xf);

        let mut sim = Self {
            regs,
            mem,
            trace_sink: Box::new(std::io::sink()),
            trace: config.trace,
            features: config.features,
            feature_stack: Vec::new(),
            local_monitor: ExclusiveMonitor::new(),
            global_monitor: ExclusiveMonitor::new(),
            movprfx_pending: None,
            movprfx_active: None,
            btype: BType::Default,
            next_btype: BType::Default,
            pc_modified: false,
            rng: Rand48::new(),
            host_calls: HashMap::new(),
            guarded_pages: config.guarded_pages,
            instructions_executed: 0,
            has_run: false,
        };
        // The construction writes are setup, not traced state changes.
        let _ = sim.regs.take_written();
        sim
    }

    // === Configuration and wiring ===

    #[must_use]
    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    #[must_use]
    pub fn features(&self) -> &CpuFeatures {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut CpuFeatures {
        &mut self.features
    }

    /// Redirect trace output (defaults to a null sink).
    pub fn set_trace_sink(&mut self, sink: Box<dyn Write>) {
        self.trace_sink = sink;
    }

    pub fn set_trace_categories(&mut self, categories: TraceCategories) {
        self.trace = categories;
    }

    #[must_use]
    pub fn trace_categories(&self) -> TraceCategories {
        self.trace
    }

    pub(crate) fn enable_trace(&mut self, categories: TraceCategories) {
        self.trace |= categories;
    }

    pub(crate) fn disable_trace(&mut self, categories: TraceCategories) {
        self.trace &= !categories;
    }

    pub fn set_guarded_pages(&mut self, guarded: bool) {
        self.guarded_pages = guarded;
    }

    #[must_use]
    pub fn guarded_pages(&self) -> bool {
        self.guarded_pages
    }

    /// Change the vector length. Only legal before the first run; resets
    /// the V and P banks.
    ///
    /// # Panics
    /// Panics if the simulator has already executed instructions.
    pub fn set_vector_length_in_bits(&mut self, vl_bits: usize) {
        assert!(!self.has_run, "vector length is fixed once running");
        self.regs.set_vl_bits(vl_bits);
        let _ = self.regs.take_written();
    }

    #[must_use]
    pub fn vl_bits(&self) -> usize {
        self.regs.vl_bits()
    }

    /// Register a host function reachable through the runtime-call trap.
    pub fn register_host_call(&mut self, key: u64, call: impl FnMut(&mut Self) + 'static) {
        self.host_calls.insert(key, Box::new(call));
    }

    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    /// True while a MOVPRFX latch is waiting for its consumer.
    #[must_use]
    pub fn movprfx_latched(&self) -> bool {
        self.movprfx_pending.is_some()
    }

    pub(crate) fn take_movprfx(&mut self) -> Option<Instruction> {
        self.movprfx_active.take()
    }

    pub(crate) fn latch_movprfx(&mut self, instr: Instruction) {
        self.movprfx_pending = Some(instr);
    }

    pub(crate) fn feature_stack_push(&mut self) {
        self.feature_stack.push(self.features);
    }

    pub(crate) fn feature_stack_pop(&mut self) -> bool {
        match self.feature_stack.pop() {
            Some(saved) => {
                self.features = saved;
                true
            }
            None => false,
        }
    }

    pub(crate) fn invoke_host_call(&mut self, key: u64) -> bool {
        match self.host_calls.remove(&key) {
            Some(mut call) => {
                call(self);
                self.host_calls.insert(key, call);
                true
            }
            None => false,
        }
    }

    // === The driver loop ===

    /// Execute until the program counter reaches the end-of-simulation
    /// sentinel.
    pub fn run<D: Decode + ?Sized>(&mut self, decoder: &D) -> Result<(), Fault> {
        while self.regs.pc != END_OF_SIM_ADDRESS {
            self.step(decoder)?;
        }
        Ok(())
    }

    /// Execute one instruction.
    pub fn step<D: Decode + ?Sized>(&mut self, decoder: &D) -> Result<(), Fault> {
        self.has_run = true;
        let pc = self.regs.pc;
        if pac::has_tag_bits(pc) {
            return Err(Fault::PointerAuth { pc, target: pc });
        }
        let raw: u32 = self
            .mem
            .read(pc)
            .map_err(|oob| Fault::MemoryBounds {
                pc,
                addr: oob.addr,
                len: oob.len,
            })?;
        let instr = Instruction::new(raw, pc);
        let group = decoder.decode(&instr);

        if self.trace.contains(TraceCategories::DISASM) {
            self.trace_line(format_args!("0x{pc:016x}  {raw:08x}\t\t({group:?})"));
        }

        self.check_branch_target(group, &instr)?;

        self.pc_modified = false;
        self.next_btype = BType::Default;
        self.movprfx_active = self.movprfx_pending.take();

        self.visit(group, &instr)?;

        // The latch only survives into the immediately following
        // instruction.
        self.movprfx_active = None;
        self.btype = self.next_btype;

        self.print_modified_registers();

        if !self.pc_modified {
            self.regs.pc = instr.next_address();
        }
        self.instructions_executed += 1;
        Ok(())
    }

    /// Enforce Branch Target Identification: after an indirect branch
    /// onto a guarded page, only a compatible BTI hint may execute.
    fn check_branch_target(&self, group: InstructionGroup, instr: &Instruction) -> Result<(), Fault> {
        if !self.guarded_pages || matches!(self.btype, BType::Default) {
            return Ok(());
        }
        let accepted = group == InstructionGroup::Hint
            && match instr.imm_hint() {
                // BTI c: calls (BLR, or BR through x16/x17).
                34 => matches!(
                    self.btype,
                    BType::BranchAndLink | BType::BranchFromUnguardedOrToIp
                ),
                // BTI j: jumps.
                36 => matches!(
                    self.btype,
                    BType::BranchFromGuardedNotToIp | BType::BranchFromUnguardedOrToIp
                ),
                // BTI jc: anything.
                38 => true,
                // Plain BTI guards without accepting indirect entry.
                _ => false,
            };
        if accepted {
            Ok(())
        } else {
            Err(Fault::BtiViolation {
                pc: instr.address(),
                raw: instr.raw(),
                btype: self.btype,
            })
        }
    }

    /// Dispatch one decoded instruction. Exactly one visitor runs per
    /// instruction.
    pub fn visit(&mut self, group: InstructionGroup, instr: &Instruction) -> Result<(), Fault> {
        use InstructionGroup as G;
        match group {
            G::PcRelAddressing => self.visit_pc_rel_addressing(instr),
            G::AddSubImmediate => self.visit_add_sub_immediate(instr),
            G::AddSubShifted => self.visit_add_sub_shifted(instr),
            G::AddSubExtended => self.visit_add_sub_extended(instr),
            G::AddSubWithCarry => self.visit_add_sub_with_carry(instr),
            G::LogicalImmediate => self.visit_logical_immediate(instr),
            G::LogicalShifted => self.visit_logical_shifted(instr),
            G::MoveWideImmediate => self.visit_move_wide_immediate(instr),
            G::Bitfield => self.visit_bitfield(instr),
            G::Extract => self.visit_extract(instr),
            G::DataProcessing1Source => self.visit_data_processing_1_source(instr),
            G::DataProcessing2Source => self.visit_data_processing_2_source(instr),
            G::DataProcessing3Source => self.visit_data_processing_3_source(instr),
            G::ConditionalCompareRegister => self.visit_conditional_compare_register(instr),
            G::ConditionalCompareImmediate => self.visit_conditional_compare_immediate(instr),
            G::ConditionalSelect => self.visit_conditional_select(instr),

            G::UnconditionalBranch => self.visit_unconditional_branch(instr),
            G::UnconditionalBranchToRegister => self.visit_unconditional_branch_to_register(instr),
            G::ConditionalBranch => self.visit_conditional_branch(instr),
            G::CompareBranch => self.visit_compare_branch(instr),
            G::TestBranch => self.visit_test_branch(instr),

            G::LoadStoreUnsignedOffset
            | G::LoadStorePreIndex
            | G::LoadStorePostIndex
            | G::LoadStoreRegisterOffset
            | G::LoadStoreUnscaledOffset => self.visit_load_store(group, instr),
            G::LoadStorePairOffset | G::LoadStorePairPreIndex | G::LoadStorePairPostIndex => {
                self.visit_load_store_pair(group, instr)
            }
            G::LoadLiteral => self.visit_load_literal(instr),
            G::LoadStoreExclusive => self.visit_load_store_exclusive(instr),
            G::AtomicMemory => {
                self.require(CpuFeature::Lse, instr)?;
                self.visit_atomic_memory(instr)
            }
            G::LoadStoreRcpc => {
                self.require(CpuFeature::Rcpc, instr)?;
                self.visit_load_store_rcpc(instr)
            }
            G::LoadStorePac => {
                self.require(CpuFeature::Pauth, instr)?;
                self.visit_load_store_pac(instr)
            }

            G::FpImmediate => self.visit_fp_immediate(instr),
            G::FpIntegerConvert => self.visit_fp_integer_convert(instr),
            G::FpFixedPointConvert => self.visit_fp_fixed_point_convert(instr),
            G::FpCompare => self.visit_fp_compare(instr),
            G::FpConditionalCompare => self.visit_fp_conditional_compare(instr),
            G::FpConditionalSelect => self.visit_fp_conditional_select(instr),
            G::FpDataProcessing1Source => self.visit_fp_data_processing_1_source(instr),
            G::FpDataProcessing2Source => self.visit_fp_data_processing_2_source(instr),
            G::FpDataProcessing3Source => self.visit_fp_data_processing_3_source(instr),

            G::Neon3Same => self.visit_neon_3_same(instr),
            G::Neon3Different => self.visit_neon_3_different(instr),
            G::Neon2RegMisc => self.visit_neon_2_reg_misc(instr),
            G::NeonAcrossLanes => self.visit_neon_across_lanes(instr),
            G::NeonCopy => self.visit_neon_copy(instr),
            G::NeonExtract => self.visit_neon_extract(instr),
            G::NeonPerm => self.visit_neon_perm(instr),
            G::NeonTable => self.visit_neon_table(instr),
            G::NeonShiftImmediate => self.visit_neon_shift_immediate(instr),
            G::NeonModifiedImmediate => self.visit_neon_modified_immediate(instr),

            G::SveIndexGeneration
            | G::SvePredicateInit
            | G::SvePredicateTest
            | G::SvePredicateLogical
            | G::SvePredicateMisc
            | G::SveElementCount
            | G::SveIncDecByPredicateCount
            | G::SveWhile
            | G::SveConditionallyTerminate
            | G::SveIntCompareVectors
            | G::SveIntCompareImm
            | G::SveIntArithmeticPred
            | G::SveIntArithmeticUnpred
            | G::SveBroadcast
            | G::SveMovprfx
            | G::SveLoadStorePredicate
            | G::SveLoadStoreVector
            | G::SveContiguousLoadStore => {
                self.require(CpuFeature::Sve, instr)?;
                self.visit_sve(group, instr)
            }

            G::SystemRegister => self.visit_system_register(instr),
            G::Hint => self.visit_hint(instr),
            G::Barrier => self.visit_barrier(instr),
            G::SystemSys => self.visit_system_sys(instr),
            G::Exception => self.visit_exception(instr),
            G::Udf => Err(Fault::Undefined {
                pc: instr.address(),
                raw: instr.raw(),
            }),

            _ => Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            }),
        }
    }

    /// Feature gate: executing an instruction from a disabled extension
    /// is an unallocated-opcode fault.
    pub(crate) fn require(&self, feature: CpuFeature, instr: &Instruction) -> Result<(), Fault> {
        if self.features.has(feature) {
            Ok(())
        } else {
            Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            })
        }
    }

    // === Branch helpers ===

    /// Redirect execution. The driver loop will not advance pc again
    /// this step.
    pub(crate) fn set_pc(&mut self, target: u64) {
        self.regs.pc = target;
        self.pc_modified = true;
    }

    pub(crate) fn trace_branch(&mut self, from: u64, target: u64) {
        if self.trace.contains(TraceCategories::BRANCH) {
            self.trace_line(format_args!("Branch: 0x{from:016x} -> 0x{target:016x}"));
        }
    }

    // === Memory helpers ===

    pub(crate) fn bounds_fault(&self, oob: OutOfBounds) -> Fault {
        Fault::MemoryBounds {
            pc: self.regs.pc,
            addr: oob.addr,
            len: oob.len,
        }
    }

    /// Plain (non-exclusive) read.
    pub(crate) fn mem_read<T: Scalar>(&self, addr: u64) -> Result<T, Fault> {
        self.mem.read(addr).map_err(|oob| self.bounds_fault(oob))
    }

    /// Plain (non-exclusive) write. Any non-exclusive store may clear
    /// the local monitor; this one always does.
    pub(crate) fn mem_write<T: Scalar>(&mut self, addr: u64, value: T) -> Result<(), Fault> {
        self.local_monitor.clear_on_store();
        self.mem
            .write(addr, value)
            .map_err(|oob| self.bounds_fault(oob))
    }

    /// Resolve a base register, enforcing the SP alignment rule.
    pub(crate) fn base_address(&self, code: usize) -> Result<u64, Fault> {
        let addr = self.regs.x(code, Reg31Mode::StackPointer);
        if code == REG31 && addr % 16 != 0 {
            return Err(Fault::StackAlignment {
                pc: self.regs.pc,
                sp: addr,
            });
        }
        Ok(addr)
    }

    /// Atomics must stay within one 16-byte line.
    pub(crate) fn check_atomic_align(&self, addr: u64, len: usize) -> Result<(), Fault> {
        let last = addr + (len as u64 - 1);
        if addr / 16 != last / 16 {
            return Err(Fault::UnalignedAtomic {
                pc: self.regs.pc,
                addr,
                len,
            });
        }
        Ok(())
    }

    /// Full host fence: load-acquire puts it after the load,
    /// store-release before the store, barriers stand alone.
    pub(crate) fn host_fence() {
        fence(Ordering::SeqCst);
    }

    /// Read a NUL-terminated string out of the image (printf formats).
    pub(crate) fn read_cstring(&mut self, mut addr: u64) -> Result<String, Fault> {
        let mut bytes = Vec::new();
        loop {
            let byte: u8 = self.mem_read(addr)?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            addr += 1;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // === Trace emission ===

    pub(crate) fn trace_line(&mut self, args: std::fmt::Arguments) {
        let _ = writeln!(self.trace_sink, "# {args}");
    }

    pub(crate) fn trace_write_enabled(&self) -> bool {
        self.trace.contains(TraceCategories::WRITE)
    }

    /// Index-mode base writeback: quiet write plus an immediate trace
    /// line, so the update is observably ordered against the access
    /// (before it for pre-index, after it for post-index).
    pub(crate) fn write_back_base(&mut self, code: usize, value: u64) {
        self.regs.set_x_quiet(code, value, Reg31Mode::StackPointer);
        if self.trace.contains(TraceCategories::REGS) {
            let name = if code == REG31 {
                "sp".to_string()
            } else {
                format!("x{code}")
            };
            self.trace_line(format_args!("{name:>4}: 0x{value:016x}"));
        }
    }

    /// Rich load/store line: register, address, raw bytes.
    pub(crate) fn trace_mem_access(&mut self, desc: &str, addr: u64, bytes: &[u8], store: bool) {
        if !self.trace_write_enabled() {
            return;
        }
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes.iter().rev() {
            hex.push_str(&format!("{byte:02x}"));
        }
        let arrow = if store { "->" } else { "<-" };
        self.trace_line(format_args!("{desc}: 0x{hex} {arrow} 0x{addr:016x}"));
    }

    fn print_modified_registers(&mut self) {
        let written = self.regs.take_written();
        if self.trace.contains(TraceCategories::REGS) {
            for code in 0..32 {
                if written.x & (1 << code) != 0 {
                    let value = self.regs.x(code, Reg31Mode::StackPointer);
                    let name = if code == REG31 { "sp".to_string() } else { format!("x{code}") };
                    self.trace_line(format_args!("{name:>4}: 0x{value:016x}"));
                }
            }
        }
        if self.trace.contains(TraceCategories::VREGS) {
            for code in 0..32 {
                if written.v & (1 << code) != 0 {
                    let vreg = self.regs.v(code);
                    let active = self.regs.vl_bits() / 8;
                    let mut hex = String::with_capacity(active * 2);
                    for byte in vreg.bytes()[..active].iter().rev() {
                        hex.push_str(&format!("{byte:02x}"));
                    }
                    self.trace_line(format_args!("  v{code}: 0x{hex}"));
                }
            }
        }
        if self.trace.contains(TraceCategories::PREGS) {
            for code in 0..16 {
                if written.p & (1 << code) != 0 {
                    let preg = self.regs.p(code);
                    let active = self.regs.vl_bits() / 64;
                    let mut hex = String::with_capacity(active * 2);
                    for byte in preg.bytes()[..active].iter().rev() {
                        hex.push_str(&format!("{byte:02x}"));
                    }
                    self.trace_line(format_args!("  p{code}: 0x{hex}"));
                }
            }
        }
        if self.trace.contains(TraceCategories::SYSREGS) {
            if written.nzcv {
                let flags = self.regs.nzcv();
                self.trace_line(format_args!(
                    "nzcv: N:{} Z:{} C:{} V:{}",
                    u8::from(flags.n()),
                    u8::from(flags.z()),
                    u8::from(flags.c()),
                    u8::from(flags.v())
                ));
            }
            if written.fpcr {
                let fpcr = self.regs.fpcr();
                self.trace_line(format_args!(
                    "fpcr: rmode:{:?} dn:{} fz:{} ahp:{}",
                    fpcr.rounding(),
                    u8::from(fpcr.dn()),
                    u8::from(fpcr.fz()),
                    u8::from(fpcr.ahp())
                ));
            }
        }
    }
}

const SIM_QUERY_PATHS: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp", "pc", "lr", "nzcv.n", "nzcv.z", "nzcv.c", "nzcv.v", "fpcr.dn",
    "fpcr.fz", "fpcr.ahp", "vl", "instructions",
];

impl<M: A64Memory> Observable for Simulator<M> {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix('x') {
            if let Ok(code) = rest.parse::<usize>() {
                if code < 31 {
                    return Some(self.regs.x(code, Reg31Mode::ZeroRegister).into());
                }
            }
        }
        match path {
            "sp" => Some(self.regs.sp().into()),
            "pc" => Some(self.regs.pc.into()),
            "lr" => Some(self.regs.lr().into()),
            "nzcv.n" => Some(self.regs.nzcv().n().into()),
            "nzcv.z" => Some(self.regs.nzcv().z().into()),
            "nzcv.c" => Some(self.regs.nzcv().c().into()),
            "nzcv.v" => Some(self.regs.nzcv().v().into()),
            "fpcr.dn" => Some(self.regs.fpcr().dn().into()),
            "fpcr.fz" => Some(self.regs.fpcr().fz().into()),
            "fpcr.ahp" => Some(self.regs.fpcr().ahp().into()),
            "vl" => Some((self.regs.vl_bits() as u64).into()),
            "instructions" => Some(self.instructions_executed.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        SIM_QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand48_is_deterministic() {
        let mut a = Rand48::new();
        let mut b = Rand48::new();
        let first = a.next_u64();
        assert_eq!(first, b.next_u64());
        assert_ne!(first, a.next_u64());
    }

    #[test]
    fn stack_pointer_starts_aligned_below_the_pad() {
        let sim = Simulator::new(SimConfig::default());
        let config = SimConfig::default();
        let top = config.memory_base + config.memory_size as u64;
        assert_eq!(sim.regs.sp() % 16, 0);
        assert!(sim.regs.sp() <= top - STACK_GUARD as u64);
    }

    #[test]
    fn observable_queries() {
        let sim = Simulator::new(SimConfig::default());
        assert_eq!(sim.query("x0"), Some(Value::U64(0x0bad_beef)));
        assert_eq!(sim.query("vl"), Some(Value::U64(128)));
        assert_eq!(sim.query("nzcv.z"), Some(Value::Bool(false)));
        assert!(sim.query("bogus").is_none());
    }

    #[test]
    fn atomic_alignment_rule() {
        let sim = Simulator::new(SimConfig::default());
        assert!(sim.check_atomic_align(0x1_0000, 8).is_ok());
        assert!(sim.check_atomic_align(0x1_0008, 8).is_ok());
        // Unaligned but inside one line is tolerated.
        assert!(sim.check_atomic_align(0x1_0004, 8).is_ok());
        // Crossing a 16-byte line faults.
        assert!(sim.check_atomic_align(0x1_000c, 8).is_err());
        assert!(sim.check_atomic_align(0x1_000f, 2).is_err());
    }
}
