//! Arithmetic visitor surface: ADD/SUB in every addressing flavor,
//! move-wide, bitfield, extract, the 1/2/3-source data-processing
//! groups and PC-relative addressing.

use a64_core::{A64Memory, Instruction, ShiftOp};

use crate::alu;
use crate::fault::Fault;
use crate::features::CpuFeature;
use crate::pac::{self, PacKey};
use crate::registers::Reg31Mode;
use crate::simulator::Simulator;

impl<M: A64Memory> Simulator<M> {
    // ================================================================
    // ADD / SUB
    // ================================================================
    //
    // Encoding: sf op S 10001 sh imm12 Rn Rd          (immediate)
    //           sf op S 01011 sh 0 Rm imm6 Rn Rd      (shifted register)
    //           sf op S 01011 001 Rm opt imm3 Rn Rd   (extended register)
    //   op = 1 subtracts (operand 2 inverted, carry-in forced to 1),
    //   S = 1 sets NZCV.

    pub(crate) fn visit_add_sub_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let op2 = instr.imm12() << instr.imm12_shift();
        // Immediate forms address the stack pointer on both sides.
        self.add_sub_common(instr, op2, Reg31Mode::StackPointer, true)
    }

    pub(crate) fn visit_add_sub_shifted(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let op2 = alu::shift_value(reg_size, rm, instr.shift_dp(), instr.imm6());
        self.add_sub_common(instr, op2, Reg31Mode::ZeroRegister, false)
    }

    pub(crate) fn visit_add_sub_extended(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let op2 = alu::extend_value(reg_size, rm, instr.extend_dp(), instr.imm3());
        self.add_sub_common(instr, op2, Reg31Mode::StackPointer, true)
    }

    fn add_sub_common(
        &mut self,
        instr: &Instruction,
        op2: u64,
        rn_mode: Reg31Mode,
        rd_can_be_sp: bool,
    ) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let is_sub = instr.bit(30) == 1;
        let set_flags = instr.bit(29) == 1;

        let left = self.regs.x(instr.rn(), rn_mode);
        let (right, carry_in) = if is_sub { (!op2, true) } else { (op2, false) };
        let result = alu::add_with_carry(reg_size, left, right, carry_in);

        if set_flags {
            self.regs.set_nzcv(result.nzcv);
        }
        // ADDS/SUBS write the zero register; the plain forms write SP.
        let rd_mode = if rd_can_be_sp && !set_flags {
            Reg31Mode::StackPointer
        } else {
            Reg31Mode::ZeroRegister
        };
        self.regs.set_xw(instr.rd(), result.value, reg_size, rd_mode);
        Ok(())
    }

    // ADC/SBC: sf op S 11010000 Rm 000000 Rn Rd
    pub(crate) fn visit_add_sub_with_carry(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let is_sub = instr.bit(30) == 1;
        let set_flags = instr.bit(29) == 1;

        let left = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let right = if is_sub { !rm } else { rm };
        let result = alu::add_with_carry(reg_size, left, right, self.regs.nzcv().c());

        if set_flags {
            self.regs.set_nzcv(result.nzcv);
        }
        self.regs
            .set_xw(instr.rd(), result.value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // MOVZ / MOVN / MOVK
    // ================================================================
    //
    // Encoding: sf opc 100101 hw imm16 Rd

    pub(crate) fn visit_move_wide_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let shift = instr.hw() * 16;
        let imm = instr.imm16() << shift;
        let value = match instr.bits(30, 29) {
            0b00 => !imm, // MOVN
            0b10 => imm,  // MOVZ
            0b11 => {
                // MOVK keeps the other halfwords.
                let old = self.regs.x(instr.rd(), Reg31Mode::ZeroRegister);
                (old & !(0xffff_u64 << shift)) | imm
            }
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // SBFM / BFM / UBFM
    // ================================================================
    //
    // Encoding: sf opc 100110 N immr imms Rn Rd

    pub(crate) fn visit_bitfield(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let src = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let dst = self.regs.x(instr.rd(), Reg31Mode::ZeroRegister);
        let (in_zero, extend_sign) = match instr.bits(30, 29) {
            0b00 => (true, true),  // SBFM
            0b01 => (false, false), // BFM
            0b10 => (true, false), // UBFM
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        let value = alu::bitfield(
            reg_size,
            src,
            dst,
            instr.immr(),
            instr.imms(),
            in_zero,
            extend_sign,
        );
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // EXTR: sf 00 100111 N 0 Rm imms Rn Rd
    pub(crate) fn visit_extract(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let lsb = instr.imms();
        let low = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let high = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let value = if lsb == 0 {
            low
        } else {
            let mask = alu::reg_mask(reg_size);
            (((low & mask) >> lsb) | (high << (reg_size - lsb))) & mask
        };
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // Data processing, 1 source
    // ================================================================
    //
    // Encoding: sf 1 S 11010110 opcode2 opcode Rn Rd
    //   opcode2 = 00000: RBIT/REV16/REV32/REV/CLZ/CLS
    //   opcode2 = 00001: PAC add/auth/strip family

    pub(crate) fn visit_data_processing_1_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let opcode = instr.bits(15, 10);
        let opcode2 = instr.bits(20, 16);

        if opcode2 == 0b00001 {
            return self.pac_1_source(instr, opcode);
        }

        let src = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let value = match opcode {
            0b000000 => alu::rbit(reg_size, src),
            0b000001 => alu::rev_bytes(reg_size, src, 2),
            0b000010 => {
                if reg_size == 64 {
                    alu::rev_bytes(64, src, 4) // REV32
                } else {
                    alu::rev_bytes(32, src, 4) // REV (W form)
                }
            }
            0b000011 => alu::rev_bytes(64, src, 8), // REV (X form)
            0b000100 => alu::clz(reg_size, src),
            0b000101 => alu::cls(reg_size, src),
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    fn pac_1_source(&mut self, instr: &Instruction, opcode: u32) -> Result<(), Fault> {
        self.require(CpuFeature::Pauth, instr)?;
        let rd = instr.rd();
        let ptr = self.regs.x(rd, Reg31Mode::ZeroRegister);
        // The Z variants (opcode bit 3) use a zero modifier and encode
        // Rn = 31.
        let zero_modifier = opcode & 0b001000 != 0;
        let modifier = if zero_modifier {
            0
        } else {
            self.regs.x(instr.rn(), Reg31Mode::StackPointer)
        };
        let value = match opcode & 0b000111 {
            0b000 if opcode & 0b010000 != 0 => pac::strip_pac(ptr), // XPACI
            0b001 if opcode & 0b010000 != 0 => pac::strip_pac(ptr), // XPACD
            0b000 => pac::add_pac(ptr, modifier, PacKey::Ia),
            0b001 => pac::add_pac(ptr, modifier, PacKey::Ib),
            0b010 => pac::add_pac(ptr, modifier, PacKey::Da),
            0b011 => pac::add_pac(ptr, modifier, PacKey::Db),
            0b100 => pac::auth_pac(ptr, modifier, PacKey::Ia),
            0b101 => pac::auth_pac(ptr, modifier, PacKey::Ib),
            0b110 => pac::auth_pac(ptr, modifier, PacKey::Da),
            _ => pac::auth_pac(ptr, modifier, PacKey::Db),
        };
        self.regs.set_x(rd, value, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // Data processing, 2 sources
    // ================================================================
    //
    // Encoding: sf 0 S 11010110 Rm opcode Rn Rd
    //   UDIV/SDIV, variable shifts, CRC32(C), PACGA.

    pub(crate) fn visit_data_processing_2_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rn = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let opcode = instr.bits(15, 10);

        let value = match opcode {
            // UDIV: division by zero yields zero, no exception.
            0b000010 => {
                let mask = alu::reg_mask(reg_size);
                let (n, m) = (rn & mask, rm & mask);
                if m == 0 { 0 } else { n / m }
            }
            // SDIV: INT_MIN / -1 yields INT_MIN.
            0b000011 => {
                let shift = 64 - reg_size;
                let n = ((rn << shift) as i64) >> shift;
                let m = ((rm << shift) as i64) >> shift;
                if m == 0 {
                    0
                } else {
                    (n.wrapping_div(m) as u64) & alu::reg_mask(reg_size)
                }
            }
            0b001000 => {
                let amount = (rm as u32) & (reg_size - 1);
                alu::shift_value(reg_size, rn, ShiftOp::Lsl, amount)
            }
            0b001001 => {
                let amount = (rm as u32) & (reg_size - 1);
                alu::shift_value(reg_size, rn, ShiftOp::Lsr, amount)
            }
            0b001010 => {
                let amount = (rm as u32) & (reg_size - 1);
                alu::shift_value(reg_size, rn, ShiftOp::Asr, amount)
            }
            0b001011 => {
                let amount = (rm as u32) & (reg_size - 1);
                alu::shift_value(reg_size, rn, ShiftOp::Ror, amount)
            }
            // PACGA packs the generic code into bits 63:32.
            0b001100 => {
                self.require(CpuFeature::PauthGeneric, instr)?;
                let modifier = self.regs.x(instr.rm(), Reg31Mode::StackPointer);
                pac::pacga(rn, modifier)
            }
            // CRC32B/H/W/X then the CRC32C variants.
            0b010000..=0b010111 => {
                self.require(CpuFeature::Crc32, instr)?;
                let size_bytes = 1 << (opcode & 0b11);
                let poly = if opcode & 0b100 == 0 {
                    alu::CRC32_POLY
                } else {
                    alu::CRC32C_POLY
                };
                u64::from(alu::crc32(rn as u32, rm, size_bytes, poly))
            }
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        // CRC32 and PACGA results are fixed-width regardless of sf.
        let out_size = match opcode {
            0b001100 => 64,
            0b010000..=0b010111 => 32,
            _ => reg_size,
        };
        self.regs
            .set_xw(instr.rd(), value, out_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // Data processing, 3 sources
    // ================================================================
    //
    // Encoding: sf op54 11011 op31 Rm o0 Ra Rn Rd
    //   MADD/MSUB, the widening multiply-accumulates, SMULH/UMULH.

    pub(crate) fn visit_data_processing_3_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rn = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let ra = self.regs.x(instr.ra(), Reg31Mode::ZeroRegister);
        let op31 = instr.bits(23, 21);
        let negate = instr.bit(15) == 1;

        // The widening forms sign- or zero-extend 32-bit sources to 64
        // bits before multiplying.
        let sext = |v: u64| (v as u32 as i32 as i64) as u64;
        let zext = |v: u64| u64::from(v as u32);

        let value = match (op31, negate) {
            (0b000, false) => ra.wrapping_add(rn.wrapping_mul(rm)), // MADD
            (0b000, true) => ra.wrapping_sub(rn.wrapping_mul(rm)),  // MSUB
            (0b001, false) => ra.wrapping_add(sext(rn).wrapping_mul(sext(rm))), // SMADDL
            (0b001, true) => ra.wrapping_sub(sext(rn).wrapping_mul(sext(rm))),  // SMSUBL
            (0b010, false) => {
                // SMULH
                let product = i128::from(rn as i64) * i128::from(rm as i64);
                (product >> 64) as u64
            }
            (0b101, false) => ra.wrapping_add(zext(rn).wrapping_mul(zext(rm))), // UMADDL
            (0b101, true) => ra.wrapping_sub(zext(rn).wrapping_mul(zext(rm))),  // UMSUBL
            (0b110, false) => {
                // UMULH
                let product = u128::from(rn) * u128::from(rm);
                (product >> 64) as u64
            }
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ADR / ADRP: op immlo 10000 immhi Rd
    pub(crate) fn visit_pc_rel_addressing(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let offset = instr.imm_pcrel();
        let value = if instr.bit(31) == 1 {
            // ADRP: page-scaled from a page-aligned pc.
            let base = instr.address() & !0xfff;
            base.wrapping_add((offset << 12) as u64)
        } else {
            instr.address().wrapping_add(offset as u64)
        };
        self.regs.set_x(instr.rd(), value, Reg31Mode::ZeroRegister);
        Ok(())
    }
}

// Reg31-polymorphism corner worth pinning down in one place: an
// ADD (immediate) with Rd = 31 writes SP, an ADDS never does.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimConfig;

    fn sim() -> Simulator {
        Simulator::new(SimConfig::default())
    }

    fn visit(sim: &mut Simulator, group: a64_core::InstructionGroup, raw: u32) {
        let instr = Instruction::new(raw, 0x1_0000);
        sim.visit(group, &instr).expect("visitor should succeed");
    }

    #[test]
    fn add_immediate_to_sp() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        s.regs.set_sp(0x8000);
        // ADD sp, sp, #32 -> 0x910083ff
        visit(&mut s, G::AddSubImmediate, 0x9100_83ff);
        assert_eq!(s.regs.sp(), 0x8020);
        // ADDS xzr, sp, #0 (CMN) must not write SP.
        visit(&mut s, G::AddSubImmediate, 0xb100_03ff);
        assert_eq!(s.regs.sp(), 0x8020);
    }

    #[test]
    fn adds_sets_carry_on_wrap() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        s.regs.set_w(0, 0xffff_ffff, Reg31Mode::ZeroRegister);
        // ADDS w0, w0, #1 -> 0x31000400
        visit(&mut s, G::AddSubImmediate, 0x3100_0400);
        assert_eq!(s.regs.w(0, Reg31Mode::ZeroRegister), 0);
        let flags = s.regs.nzcv();
        assert!(!flags.n() && flags.z() && flags.c() && !flags.v());
    }

    #[test]
    fn movk_preserves_other_halfwords() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        s.regs.set_x(5, 0x1111_2222_3333_4444, Reg31Mode::ZeroRegister);
        // MOVK x5, #0xbeef, lsl #16 -> 0xf2b7_dde5
        visit(&mut s, G::MoveWideImmediate, 0xf2b7_dde5);
        assert_eq!(
            s.regs.x(5, Reg31Mode::ZeroRegister),
            0x1111_2222_beef_4444
        );
    }

    #[test]
    fn sdiv_corner_cases() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        s.regs.set_x(1, i64::MIN as u64, Reg31Mode::ZeroRegister);
        s.regs.set_x(2, (-1_i64) as u64, Reg31Mode::ZeroRegister);
        // SDIV x0, x1, x2 -> 0x9ac20c20
        visit(&mut s, G::DataProcessing2Source, 0x9ac2_0c20);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), i64::MIN as u64);
        // x2 = 0: division by zero yields zero.
        s.regs.set_x(2, 0, Reg31Mode::ZeroRegister);
        visit(&mut s, G::DataProcessing2Source, 0x9ac2_0c20);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 0);
    }

    #[test]
    fn umulh_smulh() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        s.regs.set_x(1, u64::MAX, Reg31Mode::ZeroRegister);
        s.regs.set_x(2, u64::MAX, Reg31Mode::ZeroRegister);
        // UMULH x0, x1, x2 -> 0x9bc27c20
        visit(&mut s, G::DataProcessing3Source, 0x9bc2_7c20);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 0xffff_ffff_ffff_fffe);
        // SMULH x0, x1, x2: (-1) * (-1) -> high half 0.
        visit(&mut s, G::DataProcessing3Source, 0x9b42_7c20);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 0);
    }

    #[test]
    fn pac_add_auth_strip_round_trip() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        let ptr = 0x0000_7fff_1234_5678_u64;
        s.regs.set_x(0, ptr, Reg31Mode::ZeroRegister);
        s.regs.set_x(1, 42, Reg31Mode::ZeroRegister);
        // PACIA x0, x1 -> 0xdac10020
        visit(&mut s, G::DataProcessing1Source, 0xdac1_0020);
        let signed = s.regs.x(0, Reg31Mode::ZeroRegister);
        assert_ne!(signed, ptr);
        // AUTIA x0, x1 -> 0xdac11020
        visit(&mut s, G::DataProcessing1Source, 0xdac1_1020);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), ptr);
    }

    #[test]
    fn adr_and_adrp() {
        use a64_core::InstructionGroup as G;
        let mut s = sim();
        // ADR x0, #8 -> 0x10000040 at pc 0x10000.
        visit(&mut s, G::PcRelAddressing, 0x1000_0040);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 0x1_0008);
        // ADRP x0, #0x1000 (page 1) -> immhi:immlo = 1.
        visit(&mut s, G::PcRelAddressing, 0xb000_0000);
        assert_eq!(s.regs.x(0, Reg31Mode::ZeroRegister), 0x1_1000);
    }
}
