//! System-instruction visitor surface and the host-trap services.
//!
//! `HLT #imm` opcodes carry fixed-size parameter blocks immediately
//! after the 4-byte instruction; the layouts below are part of the ABI
//! between the core and code generators targeting it. Feature lists are
//! terminated by the `CpuFeature::None` id.

use a64_core::{A64Memory, Instruction};

use crate::fault::Fault;
use crate::features::CpuFeature;
use crate::flags::{Fpcr, Fpsr, Nzcv};
use crate::registers::Reg31Mode;
use crate::simulator::Simulator;
use crate::trace::TraceCategories;

/// HLT immediates implementing host-level services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DebugHltOpcode {
    Unreachable = 0xdeb0,
    Printf = 0xdeb1,
    Trace = 0xdeb2,
    Log = 0xdeb3,
    RuntimeCall = 0xdeb4,
    SetCpuFeatures = 0xdeb5,
    EnableCpuFeatures = 0xdeb6,
    DisableCpuFeatures = 0xdeb7,
    SaveCpuFeatures = 0xdeb8,
    RestoreCpuFeatures = 0xdeb9,
}

impl DebugHltOpcode {
    #[must_use]
    pub fn from_imm(imm: u32) -> Option<Self> {
        match imm {
            0xdeb0 => Some(Self::Unreachable),
            0xdeb1 => Some(Self::Printf),
            0xdeb2 => Some(Self::Trace),
            0xdeb3 => Some(Self::Log),
            0xdeb4 => Some(Self::RuntimeCall),
            0xdeb5 => Some(Self::SetCpuFeatures),
            0xdeb6 => Some(Self::EnableCpuFeatures),
            0xdeb7 => Some(Self::DisableCpuFeatures),
            0xdeb8 => Some(Self::SaveCpuFeatures),
            0xdeb9 => Some(Self::RestoreCpuFeatures),
            _ => None,
        }
    }
}

// Printf payload: a u32 argument count and a packed 2-bit-per-argument
// pattern list. The format string pointer arrives in x0; integer
// arguments in x1 upward, double arguments in d0 upward.
pub const PRINTF_ARG_COUNT_OFFSET: u64 = 0;
pub const PRINTF_ARG_PATTERN_LIST_OFFSET: u64 = 4;
pub const PRINTF_LENGTH: u64 = 8;
pub const PRINTF_MAX_ARG_COUNT: u32 = 4;
const PRINTF_ARG_PATTERN_BITS: u32 = 2;
const PRINTF_ARG_W: u32 = 1;
const PRINTF_ARG_X: u32 = 2;
const PRINTF_ARG_D: u32 = 3;

// Trace payload: the category bits and an enable/disable/set command.
pub const TRACE_PARAMS_OFFSET: u64 = 0;
pub const TRACE_COMMAND_OFFSET: u64 = 4;
pub const TRACE_LENGTH: u64 = 8;

/// Commands accepted by the `Trace` host trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TraceCommand {
    Enable = 1,
    Disable = 2,
    Set = 3,
}

// Log payload: the category bits naming register banks to dump.
pub const LOG_PARAMS_OFFSET: u64 = 0;
pub const LOG_LENGTH: u64 = 4;

// Runtime-call payload: the (unused here) trampoline slot and the key of
// a registered host function.
pub const RUNTIME_CALL_WRAPPER_OFFSET: u64 = 0;
pub const RUNTIME_CALL_FUNCTION_OFFSET: u64 = 8;
pub const RUNTIME_CALL_LENGTH: u64 = 16;

// Feature-configuration payload: u8 feature ids terminated by the None
// id, padded to instruction alignment.
pub const CONFIGURE_CPU_FEATURES_LIST_OFFSET: u64 = 0;

// System-register selectors (o0:op1:CRn:CRm:op2).
const SYSREG_NZCV: u32 = 0xda10;
const SYSREG_FPCR: u32 = 0xda20;
const SYSREG_FPSR: u32 = 0xda21;
const SYSREG_RNDR: u32 = 0xd920;
const SYSREG_RNDRRS: u32 = 0xd921;

impl<M: A64Memory> Simulator<M> {
    // MRS/MSR: 1101010100 L 1 o0 op1 CRn CRm op2 Rt.
    pub(crate) fn visit_system_register(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let selector = instr.imm_system_register();
        let rt = instr.rt();
        let is_read = instr.bit(21) == 1;

        if is_read {
            let value = match selector {
                SYSREG_NZCV => u64::from(self.regs.nzcv().raw()),
                SYSREG_FPCR => self.regs.fpcr().raw(),
                SYSREG_FPSR => self.regs.fpsr().raw(),
                SYSREG_RNDR | SYSREG_RNDRRS => {
                    self.require(CpuFeature::Rng, instr)?;
                    // Deterministic draw; never fails, so NZCV clears.
                    self.regs.set_nzcv(Nzcv::new());
                    self.rng.next_u64()
                }
                _ => {
                    return Err(Fault::Unallocated {
                        pc: instr.address(),
                        raw: instr.raw(),
                    });
                }
            };
            self.regs.set_x(rt, value, Reg31Mode::ZeroRegister);
        } else {
            let value = self.regs.x(rt, Reg31Mode::ZeroRegister);
            match selector {
                SYSREG_NZCV => {
                    let mut flags = Nzcv::new();
                    flags.set_raw(value as u32);
                    self.regs.set_nzcv(flags);
                }
                SYSREG_FPCR => {
                    let mut fpcr = Fpcr::new();
                    fpcr.set_raw(value);
                    self.regs.set_fpcr(fpcr);
                }
                SYSREG_FPSR => {
                    let mut fpsr = Fpsr::new();
                    fpsr.set_raw(value);
                    self.regs.set_fpsr(fpsr);
                }
                _ => {
                    return Err(Fault::Unallocated {
                        pc: instr.address(),
                        raw: instr.raw(),
                    });
                }
            }
        }
        Ok(())
    }

    // HINT: NOP, YIELD, ESB, CSDB and the BTI markers. The BType check
    // runs in the driver loop before dispatch; by the time a BTI hint
    // executes it is a no-op.
    pub(crate) fn visit_hint(&mut self, instr: &Instruction) -> Result<(), Fault> {
        match instr.imm_hint() {
            // NOP, YIELD, WFE, WFI, SEV, SEVL.
            0..=5 => Ok(()),
            // ESB, CSDB.
            16 | 20 => Ok(()),
            // BTI, BTI c, BTI j, BTI jc.
            32 | 34 | 36 | 38 => Ok(()),
            // Unrecognised hints execute as NOP by architecture.
            _ => Ok(()),
        }
    }

    // Barriers and CLREX: 1101010100 0 00011 0011 CRm opc Rt.
    pub(crate) fn visit_barrier(&mut self, instr: &Instruction) -> Result<(), Fault> {
        match instr.bits(7, 5) {
            // CLREX: clears only the local monitor.
            0b010 => {
                self.local_monitor.clear();
                Ok(())
            }
            // DSB / DMB / ISB all map to a full host fence.
            0b100 | 0b101 | 0b110 => {
                Self::host_fence();
                Ok(())
            }
            _ => Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            }),
        }
    }

    // SYS/SYSL: cache and TLB maintenance requests are accepted and
    // ignored; there is nothing to maintain.
    pub(crate) fn visit_system_sys(&mut self, _instr: &Instruction) -> Result<(), Fault> {
        Ok(())
    }

    // SVC/BRK/HLT: only HLT carries host services.
    pub(crate) fn visit_exception(&mut self, instr: &Instruction) -> Result<(), Fault> {
        match instr.bits(23, 21) {
            0b010 => self.host_trap(instr),
            _ => Err(Fault::Unimplemented {
                pc: instr.address(),
                raw: instr.raw(),
                group: a64_core::InstructionGroup::Exception,
            }),
        }
    }

    fn host_trap(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let payload = instr.next_address();
        let opcode = DebugHltOpcode::from_imm(instr.imm_exception()).ok_or(Fault::Unallocated {
            pc: instr.address(),
            raw: instr.raw(),
        })?;

        match opcode {
            DebugHltOpcode::Unreachable => Err(Fault::Unreachable {
                pc: instr.address(),
            }),
            DebugHltOpcode::Printf => self.do_printf(payload),
            DebugHltOpcode::Trace => {
                let params: u32 = self.mem_read(payload + TRACE_PARAMS_OFFSET)?;
                let command: u32 = self.mem_read(payload + TRACE_COMMAND_OFFSET)?;
                let categories = TraceCategories::from_bits_truncate(params);
                match command {
                    c if c == TraceCommand::Enable as u32 => self.enable_trace(categories),
                    c if c == TraceCommand::Disable as u32 => self.disable_trace(categories),
                    _ => self.set_trace_categories(categories),
                }
                self.set_pc(payload + TRACE_LENGTH);
                Ok(())
            }
            DebugHltOpcode::Log => {
                let params: u32 = self.mem_read(payload + LOG_PARAMS_OFFSET)?;
                self.dump_registers(TraceCategories::from_bits_truncate(params));
                self.set_pc(payload + LOG_LENGTH);
                Ok(())
            }
            DebugHltOpcode::RuntimeCall => {
                let key: u64 = self.mem_read(payload + RUNTIME_CALL_FUNCTION_OFFSET)?;
                if !self.invoke_host_call(key) {
                    return Err(Fault::Unimplemented {
                        pc: instr.address(),
                        raw: instr.raw(),
                        group: a64_core::InstructionGroup::Exception,
                    });
                }
                self.set_pc(payload + RUNTIME_CALL_LENGTH);
                Ok(())
            }
            DebugHltOpcode::SetCpuFeatures
            | DebugHltOpcode::EnableCpuFeatures
            | DebugHltOpcode::DisableCpuFeatures => self.configure_features(payload, opcode),
            DebugHltOpcode::SaveCpuFeatures => {
                self.feature_stack_push();
                Ok(())
            }
            DebugHltOpcode::RestoreCpuFeatures => {
                self.feature_stack_pop();
                Ok(())
            }
        }
    }

    fn configure_features(&mut self, payload: u64, opcode: DebugHltOpcode) -> Result<(), Fault> {
        let mut features = Vec::new();
        let mut cursor = payload + CONFIGURE_CPU_FEATURES_LIST_OFFSET;
        loop {
            let id: u8 = self.mem_read(cursor)?;
            cursor += 1;
            match CpuFeature::from_id(id) {
                Some(CpuFeature::None) | None => break,
                Some(feature) => features.push(feature),
            }
        }
        // The list (terminator included) pads to instruction alignment.
        let list_len = cursor - payload;
        let padded = list_len.next_multiple_of(4);

        if opcode == DebugHltOpcode::SetCpuFeatures {
            self.features_mut().set_all(crate::features::CpuFeatures::none());
        }
        for feature in features {
            match opcode {
                DebugHltOpcode::DisableCpuFeatures => self.features_mut().disable(feature),
                _ => self.features_mut().enable(feature),
            }
        }
        self.set_pc(payload + padded);
        Ok(())
    }

    /// The printf host service: consume the inline argument pattern and
    /// render the format string from x0 with W/X/D register arguments.
    fn do_printf(&mut self, payload: u64) -> Result<(), Fault> {
        let arg_count: u32 = self.mem_read(payload + PRINTF_ARG_COUNT_OFFSET)?;
        let pattern_list: u32 = self.mem_read(payload + PRINTF_ARG_PATTERN_LIST_OFFSET)?;
        let arg_count = arg_count.min(PRINTF_MAX_ARG_COUNT);

        let format_addr = self.regs.x(0, Reg31Mode::ZeroRegister);
        let format = self.read_cstring(format_addr)?;

        let mut output = String::new();
        let mut x_index = 1_usize; // x0 carries the format string
        let mut d_index = 0_usize;
        let mut arg = 0_u32;
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                output.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                output.push('%');
                continue;
            }
            // Scan to the conversion character, ignoring flags/width.
            let mut conversion = None;
            for spec in chars.by_ref() {
                if spec.is_ascii_alphabetic() {
                    conversion = Some(spec);
                    break;
                }
            }
            let Some(conversion) = conversion else { break };
            if arg >= arg_count {
                break;
            }
            let pattern = (pattern_list >> (arg * PRINTF_ARG_PATTERN_BITS)) & 0b11;
            arg += 1;
            match pattern {
                PRINTF_ARG_W => {
                    let value = self.regs.w(x_index, Reg31Mode::ZeroRegister);
                    x_index += 1;
                    match conversion {
                        'x' | 'X' => output.push_str(&format!("{value:x}")),
                        'u' => output.push_str(&format!("{value}")),
                        'c' => output.push(char::from_u32(value & 0x7f).unwrap_or('?')),
                        _ => output.push_str(&format!("{}", value as i32)),
                    }
                }
                PRINTF_ARG_X => {
                    let value = self.regs.x(x_index, Reg31Mode::ZeroRegister);
                    x_index += 1;
                    match conversion {
                        'x' | 'X' | 'p' => output.push_str(&format!("{value:x}")),
                        'u' => output.push_str(&format!("{value}")),
                        's' => {
                            let text = self.read_cstring(value)?;
                            output.push_str(&text);
                        }
                        _ => output.push_str(&format!("{}", value as i64)),
                    }
                }
                PRINTF_ARG_D => {
                    let value = self.regs.v_ref(d_index).f64_lane(0);
                    d_index += 1;
                    output.push_str(&format!("{value}"));
                }
                _ => {}
            }
        }

        // printf returns the byte count in x0.
        let written = output.len() as u64;
        self.trace_line(format_args!("{output}"));
        self.regs.set_x(0, written, Reg31Mode::ZeroRegister);
        self.set_pc(payload + PRINTF_LENGTH);
        Ok(())
    }

    /// The log host service: dump the selected register banks to the
    /// trace sink regardless of the live trace categories.
    fn dump_registers(&mut self, banks: TraceCategories) {
        if banks.contains(TraceCategories::REGS) {
            for code in 0..31 {
                let value = self.regs.x(code, Reg31Mode::ZeroRegister);
                self.trace_line(format_args!("x{code}: 0x{value:016x}"));
            }
            let sp = self.regs.sp();
            self.trace_line(format_args!("sp: 0x{sp:016x}"));
        }
        if banks.contains(TraceCategories::VREGS) {
            for code in 0..32 {
                let value = self.regs.v_ref(code).u128_value();
                self.trace_line(format_args!("v{code}: 0x{value:032x}"));
            }
        }
        if banks.contains(TraceCategories::PREGS) {
            let bytes = self.vl_bits() / 64;
            for code in 0..16 {
                let preg = self.regs.p(code);
                let mut hex = String::new();
                for byte in preg.bytes()[..bytes].iter().rev() {
                    hex.push_str(&format!("{byte:02x}"));
                }
                self.trace_line(format_args!("p{code}: 0x{hex}"));
            }
        }
        if banks.contains(TraceCategories::SYSREGS) {
            let flags = self.regs.nzcv();
            let fpcr = self.regs.fpcr();
            self.trace_line(format_args!(
                "nzcv: N:{} Z:{} C:{} V:{}",
                u8::from(flags.n()),
                u8::from(flags.z()),
                u8::from(flags.c()),
                u8::from(flags.v())
            ));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimConfig;
    use a64_core::InstructionGroup as G;

    fn sim() -> Simulator {
        Simulator::new(SimConfig::default())
    }

    fn visit(sim: &mut Simulator, group: G, raw: u32) {
        let instr = Instruction::new(raw, 0x1_0000);
        sim.visit(group, &instr).expect("visitor should succeed");
    }

    /// MRS Xt, <reg> / MSR <reg>, Xt.
    fn mrs(selector: u32, rt: u32) -> u32 {
        0xd530_0000 | (selector << 5) | rt
    }

    fn msr(selector: u32, rt: u32) -> u32 {
        0xd510_0000 | (selector << 5) | rt
    }

    #[test]
    fn nzcv_round_trips_through_msr() {
        let mut s = sim();
        s.regs.set_x(1, 0x6000_0000, Reg31Mode::ZeroRegister); // Z and C
        visit(&mut s, G::SystemRegister, msr(SYSREG_NZCV, 1));
        assert!(s.regs.nzcv().z() && s.regs.nzcv().c());
        visit(&mut s, G::SystemRegister, mrs(SYSREG_NZCV, 2));
        assert_eq!(s.regs.x(2, Reg31Mode::ZeroRegister), 0x6000_0000);
    }

    #[test]
    fn fpcr_masks_reserved_bits() {
        let mut s = sim();
        s.regs.set_x(1, u64::MAX, Reg31Mode::ZeroRegister);
        visit(&mut s, G::SystemRegister, msr(SYSREG_FPCR, 1));
        visit(&mut s, G::SystemRegister, mrs(SYSREG_FPCR, 2));
        let read_back = s.regs.x(2, Reg31Mode::ZeroRegister);
        assert_ne!(read_back, u64::MAX);
        assert!(s.regs.fpcr().dn() && s.regs.fpcr().fz() && s.regs.fpcr().ahp());
    }

    #[test]
    fn rndr_is_deterministic_and_clears_flags() {
        let mut s1 = sim();
        let mut s2 = sim();
        s1.regs.set_nzcv(Nzcv::from_flags(true, true, true, true));
        visit(&mut s1, G::SystemRegister, mrs(SYSREG_RNDR, 0));
        visit(&mut s2, G::SystemRegister, mrs(SYSREG_RNDR, 0));
        assert_eq!(
            s1.regs.x(0, Reg31Mode::ZeroRegister),
            s2.regs.x(0, Reg31Mode::ZeroRegister)
        );
        assert_eq!(s1.regs.nzcv(), Nzcv::new());
    }

    #[test]
    fn clrex_clears_local_monitor_only() {
        let mut s = sim();
        s.local_monitor.mark(0x2_0000, 8);
        s.global_monitor.mark(0x2_0000, 8);
        // CLREX -> 0xd503305f
        visit(&mut s, G::Barrier, 0xd503_305f);
        assert!(!s.local_monitor.covers(0x2_0000, 8));
        assert!(s.global_monitor.covers(0x2_0000, 8));
    }

    #[test]
    fn hints_execute_as_nops() {
        let mut s = sim();
        // NOP -> 0xd503201f
        visit(&mut s, G::Hint, 0xd503_201f);
        // BTI c -> 0xd503245f
        visit(&mut s, G::Hint, 0xd503_245f);
    }

    #[test]
    fn unreachable_trap_faults() {
        let mut s = sim();
        // HLT #0xdeb0 -> 0xd45bd600
        let instr = Instruction::new(0xd45b_d600, 0x1_0000);
        let err = s.visit(G::Exception, &instr).unwrap_err();
        assert!(matches!(err, Fault::Unreachable { pc: 0x1_0000 }));
    }

    #[test]
    fn trace_trap_flips_categories() {
        let mut s = sim();
        // Payload: params = REGS|DISASM, command = Enable.
        s.mem_mut().load(0x1_0004, &3_u32.to_le_bytes());
        s.mem_mut().load(0x1_0008, &(TraceCommand::Enable as u32).to_le_bytes());
        // HLT #0xdeb2 -> 0xd45bd640
        let instr = Instruction::new(0xd45b_d640, 0x1_0000);
        s.visit(G::Exception, &instr).expect("trap should succeed");
        assert!(s
            .trace_categories()
            .contains(TraceCategories::REGS | TraceCategories::DISASM));
        assert_eq!(s.regs.pc, 0x1_000c, "pc skips the payload");
    }

    #[test]
    fn feature_trap_enable_disable_and_stack() {
        let mut s = sim();
        // Payload: [Sve, None] padded to 4.
        s.mem_mut().load(0x1_0004, &[4, 0, 0, 0]);
        // HLT #0xdeb7 (disable) -> 0xd45bd6e0
        let instr = Instruction::new(0xd45b_d6e0, 0x1_0000);
        s.visit(G::Exception, &instr).expect("trap should succeed");
        assert!(!s.features().has(CpuFeature::Sve));
        assert_eq!(s.regs.pc, 0x1_0008);

        // Save, enable again, restore: SVE stays disabled after restore.
        let save = Instruction::new(0xd45b_d700, 0x1_0000);
        s.visit(G::Exception, &save).expect("save");
        let enable = Instruction::new(0xd45b_d6c0, 0x1_0000);
        s.visit(G::Exception, &enable).expect("enable");
        assert!(s.features().has(CpuFeature::Sve));
        let restore = Instruction::new(0xd45b_d720, 0x1_0000);
        s.visit(G::Exception, &restore).expect("restore");
        assert!(!s.features().has(CpuFeature::Sve));
    }

    #[test]
    fn runtime_call_reaches_registered_closure() {
        let mut s = sim();
        s.register_host_call(42, |sim| {
            sim.regs.set_x(9, 0xcafe, Reg31Mode::ZeroRegister);
        });
        // Payload: wrapper (ignored), then the key.
        s.mem_mut().load(0x1_0004, &0_u64.to_le_bytes());
        s.mem_mut().load(0x1_000c, &42_u64.to_le_bytes());
        // HLT #0xdeb4 -> 0xd45bd680
        let instr = Instruction::new(0xd45b_d680, 0x1_0000);
        s.visit(G::Exception, &instr).expect("trap should succeed");
        assert_eq!(s.regs.x(9, Reg31Mode::ZeroRegister), 0xcafe);
        assert_eq!(s.regs.pc, 0x1_0014);
    }

    #[test]
    fn printf_formats_register_arguments() {
        let mut s = sim();
        // The byte count lands in x0; asserting on it avoids needing a
        // shared sink buffer.
        // Format string at 0x2_0000.
        s.mem_mut().load(0x2_0000, b"value %d and %x\0");
        s.regs.set_x(0, 0x2_0000, Reg31Mode::ZeroRegister);
        s.regs.set_x(1, 42, Reg31Mode::ZeroRegister);
        s.regs.set_x(2, 0xbeef, Reg31Mode::ZeroRegister);
        // Payload: arg_count=2, patterns = W, X.
        s.mem_mut().load(0x1_0004, &2_u32.to_le_bytes());
        s.mem_mut()
            .load(0x1_0008, &(PRINTF_ARG_W | (PRINTF_ARG_X << 2)).to_le_bytes());
        // HLT #0xdeb1 -> 0xd45bd620
        let instr = Instruction::new(0xd45b_d620, 0x1_0000);
        s.visit(G::Exception, &instr).expect("trap should succeed");
        // "value 42 and beef" is 17 bytes.
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 17);
        assert_eq!(s.regs.pc, 0x1_000c);
    }
}
