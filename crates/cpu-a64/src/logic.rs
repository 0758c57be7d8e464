//! Logical and conditional visitor surface: AND/ORR/EOR families,
//! conditional compare and conditional select.

use a64_core::{A64Memory, Condition, Instruction};

use crate::alu;
use crate::fault::Fault;
use crate::flags::Nzcv;
use crate::registers::Reg31Mode;
use crate::simulator::Simulator;

impl<M: A64Memory> Simulator<M> {
    // ================================================================
    // Logical (shifted register)
    // ================================================================
    //
    // Encoding: sf opc 01010 shift N Rm imm6 Rn Rd
    //   opc: 00=AND 01=ORR 10=EOR 11=ANDS; N inverts operand 2
    //   (BIC/ORN/EON/BICS).

    pub(crate) fn visit_logical_shifted(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        let mut op2 = alu::shift_value(reg_size, rm, instr.shift_dp(), instr.imm6());
        if instr.bit(21) == 1 {
            op2 = !op2 & alu::reg_mask(reg_size);
        }
        self.logical_common(instr, op2, Reg31Mode::ZeroRegister)
    }

    // Logical (immediate): sf opc 100100 N immr imms Rn Rd. The
    // non-flag-setting forms may write SP.
    pub(crate) fn visit_logical_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let imm = instr.imm_logical().ok_or(Fault::Unallocated {
            pc: instr.address(),
            raw: instr.raw(),
        })?;
        self.logical_common(instr, imm, Reg31Mode::StackPointer)
    }

    fn logical_common(
        &mut self,
        instr: &Instruction,
        op2: u64,
        rd_mode: Reg31Mode,
    ) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let rn = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let opc = instr.bits(30, 29);
        let value = match opc {
            0b00 | 0b11 => rn & op2,
            0b01 => rn | op2,
            _ => rn ^ op2,
        } & alu::reg_mask(reg_size);

        let rd_mode = if opc == 0b11 {
            // ANDS/BICS: set N and Z, clear C and V; destination is ZR.
            self.regs.set_nzcv(Nzcv::from_flags(
                alu::sign_bit(reg_size, value),
                value == 0,
                false,
                false,
            ));
            Reg31Mode::ZeroRegister
        } else {
            rd_mode
        };
        self.regs.set_xw(instr.rd(), value, reg_size, rd_mode);
        Ok(())
    }

    // ================================================================
    // Conditional compare
    // ================================================================
    //
    // Encoding: sf op S 11010010 Rm cond 0 0 Rn 0 nzcv    (register)
    //           sf op S 11010010 imm5 cond 1 0 Rn 0 nzcv  (immediate)
    //   If the condition holds, perform CMP/CMN; otherwise load NZCV
    //   from the immediate.

    pub(crate) fn visit_conditional_compare_register(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let op2 = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
        self.conditional_compare_common(instr, op2)
    }

    pub(crate) fn visit_conditional_compare_immediate(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        self.conditional_compare_common(instr, instr.imm5())
    }

    fn conditional_compare_common(&mut self, instr: &Instruction, op2: u64) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let cond = Condition::from_bits(instr.condition());
        if self.regs.nzcv().holds(cond) {
            let rn = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
            let is_cmp = instr.bit(30) == 1;
            let (right, carry_in) = if is_cmp { (!op2, true) } else { (op2, false) };
            let result = alu::add_with_carry(reg_size, rn, right, carry_in);
            self.regs.set_nzcv(result.nzcv);
        } else {
            self.regs.set_nzcv(Nzcv::from_imm(instr.nzcv_imm()));
        }
        Ok(())
    }

    // ================================================================
    // Conditional select
    // ================================================================
    //
    // Encoding: sf op 0 11010100 Rm cond op2 Rn Rd
    //   (op, op2): (0,00)=CSEL (0,01)=CSINC (1,00)=CSINV (1,01)=CSNEG.
    //   The transform applies to the not-taken operand.

    pub(crate) fn visit_conditional_select(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let reg_size = instr.reg_size();
        let cond = Condition::from_bits(instr.condition());
        let rn = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
        let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);

        let value = if self.regs.nzcv().holds(cond) {
            rn
        } else {
            match (instr.bit(30), instr.bits(11, 10)) {
                (0, 0b00) => rm,
                (0, 0b01) => rm.wrapping_add(1),
                (1, 0b00) => !rm,
                (1, 0b01) => rm.wrapping_neg(),
                _ => {
                    return Err(Fault::Unallocated {
                        pc: instr.address(),
                        raw: instr.raw(),
                    });
                }
            }
        };
        self.regs
            .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
        Ok(())
    }
}
