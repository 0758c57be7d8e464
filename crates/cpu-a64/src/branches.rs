//! Branch visitor surface: direct, conditional, compare-and-branch,
//! test-and-branch, and indirect branches with optional pointer
//! authentication.

use a64_core::{A64Memory, Condition, Instruction};

use crate::fault::Fault;
use crate::features::CpuFeature;
use crate::pac::{self, PacKey};
use crate::registers::{BType, LINK_REGISTER, Reg31Mode};
use crate::simulator::Simulator;

impl<M: A64Memory> Simulator<M> {
    // B / BL: op 00101 imm26
    pub(crate) fn visit_unconditional_branch(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let target = instr.address().wrapping_add(instr.imm26_offset() as u64);
        if instr.bit(31) == 1 {
            self.regs
                .set_x(LINK_REGISTER, instr.next_address(), Reg31Mode::ZeroRegister);
        }
        self.trace_branch(instr.address(), target);
        self.set_pc(target);
        Ok(())
    }

    // BR / BLR / RET and their authenticated variants:
    // 1101011 opc 11111 0000 A M Rn op4
    pub(crate) fn visit_unconditional_branch_to_register(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let opc = instr.bits(24, 21);
        let rn = instr.rn();
        let authenticate = instr.bit(11) == 1;
        let mut target = self.regs.x(rn, Reg31Mode::ZeroRegister);

        if authenticate {
            self.require(CpuFeature::Pauth, instr)?;
            let key = if instr.bit(10) == 1 { PacKey::Ib } else { PacKey::Ia };
            // RETA* authenticate against SP; the BRA/BLRA register forms
            // carry the modifier in the Rd slot, with 31 meaning zero.
            let modifier = if opc == 0b0010 {
                self.regs.sp()
            } else if instr.rd() == 31 {
                0
            } else {
                self.regs.x(instr.rd(), Reg31Mode::ZeroRegister)
            };
            // RET authenticates LR, not Rn.
            let ptr = if opc == 0b0010 && rn == 31 {
                self.regs.lr()
            } else {
                target
            };
            // A failed authentication leaves diagnostic bits in the
            // target; the next fetch faults on them.
            target = pac::auth_pac(ptr, modifier, key);
        } else if opc == 0b0010 {
            // Plain RET defaults to the link register encoding (Rn=30).
            target = self.regs.x(rn, Reg31Mode::ZeroRegister);
        }

        self.next_btype = match opc {
            0b0001 => {
                self.regs
                    .set_x(LINK_REGISTER, instr.next_address(), Reg31Mode::ZeroRegister);
                BType::BranchAndLink
            }
            0b0000 => {
                if rn == 16 || rn == 17 {
                    BType::BranchFromUnguardedOrToIp
                } else {
                    BType::BranchFromGuardedNotToIp
                }
            }
            0b0010 => BType::Default,
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };

        self.trace_branch(instr.address(), target);
        self.set_pc(target);
        Ok(())
    }

    // B.cond: 0101010 0 imm19 0 cond
    pub(crate) fn visit_conditional_branch(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let cond = Condition::from_bits(instr.condition_branch());
        if self.regs.nzcv().holds(cond) {
            let target = instr.address().wrapping_add(instr.imm19_offset() as u64);
            self.trace_branch(instr.address(), target);
            self.set_pc(target);
        }
        Ok(())
    }

    // CBZ / CBNZ: sf 011010 op imm19 Rt
    pub(crate) fn visit_compare_branch(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let value = if instr.sf() {
            self.regs.x(instr.rt(), Reg31Mode::ZeroRegister)
        } else {
            u64::from(self.regs.w(instr.rt(), Reg31Mode::ZeroRegister))
        };
        let branch_if_nonzero = instr.bit(24) == 1;
        if (value != 0) == branch_if_nonzero {
            let target = instr.address().wrapping_add(instr.imm19_offset() as u64);
            self.trace_branch(instr.address(), target);
            self.set_pc(target);
        }
        Ok(())
    }

    // TBZ / TBNZ: b5 011011 op b40 imm14 Rt
    pub(crate) fn visit_test_branch(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let bit = instr.tb_bit();
        let value = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
        let set = (value >> bit) & 1 == 1;
        let branch_if_set = instr.bit(24) == 1;
        if set == branch_if_set {
            let target = instr.address().wrapping_add(instr.imm14_offset() as u64);
            self.trace_branch(instr.address(), target);
            self.set_pc(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Nzcv;
    use crate::simulator::SimConfig;
    use a64_core::InstructionGroup as G;

    fn sim() -> Simulator {
        Simulator::new(SimConfig::default())
    }

    fn visit_at(sim: &mut Simulator, group: G, raw: u32, pc: u64) {
        let instr = Instruction::new(raw, pc);
        sim.regs.pc = pc;
        sim.visit(group, &instr).expect("visitor should succeed");
    }

    #[test]
    fn bl_links_and_branches() {
        let mut s = sim();
        // BL #+16 -> 0x94000004
        visit_at(&mut s, G::UnconditionalBranch, 0x9400_0004, 0x1_0000);
        assert_eq!(s.regs.pc, 0x1_0010);
        assert_eq!(s.regs.lr(), 0x1_0004);
    }

    #[test]
    fn b_cond_taken_and_not() {
        let mut s = sim();
        s.regs.set_nzcv(Nzcv::from_flags(false, true, false, false));
        // B.EQ #+8 -> 0x54000040
        visit_at(&mut s, G::ConditionalBranch, 0x5400_0040, 0x1_0000);
        assert_eq!(s.regs.pc, 0x1_0008);
        // B.NE #+8 at the new pc: not taken, pc is advanced by the
        // driver loop, so the visitor leaves it alone.
        visit_at(&mut s, G::ConditionalBranch, 0x5400_0041, 0x1_0008);
        assert_eq!(s.regs.pc, 0x1_0008);
    }

    #[test]
    fn cbz_w_form_ignores_high_bits() {
        let mut s = sim();
        s.regs.set_x(3, 0xffff_ffff_0000_0000, Reg31Mode::ZeroRegister);
        // CBZ w3, #+8 -> 0x34000043
        visit_at(&mut s, G::CompareBranch, 0x3400_0043, 0x1_0000);
        assert_eq!(s.regs.pc, 0x1_0008, "w view of x3 is zero");
    }

    #[test]
    fn tbnz_tests_the_named_bit() {
        let mut s = sim();
        s.regs.set_x(1, 1 << 33, Reg31Mode::ZeroRegister);
        // TBNZ x1, #33, #+8 -> b5=1 b40=00001 -> 0xb70800 41
        visit_at(&mut s, G::TestBranch, 0xb708_0041, 0x1_0000);
        assert_eq!(s.regs.pc, 0x1_0008);
    }

    #[test]
    fn br_sets_btype_by_register() {
        let mut s = sim();
        s.regs.set_x(16, 0x2_0000, Reg31Mode::ZeroRegister);
        // BR x16 -> 0xd61f0200
        visit_at(&mut s, G::UnconditionalBranchToRegister, 0xd61f_0200, 0x1_0000);
        assert_eq!(s.regs.pc, 0x2_0000);

        s.regs.set_x(5, 0x3_0000, Reg31Mode::ZeroRegister);
        // BR x5 -> 0xd61f00a0
        visit_at(&mut s, G::UnconditionalBranchToRegister, 0xd61f_00a0, 0x1_0000);
        assert_eq!(s.regs.pc, 0x3_0000);
    }

    #[test]
    fn ret_goes_to_lr() {
        let mut s = sim();
        s.regs.set_x(30, 0x4_0000, Reg31Mode::ZeroRegister);
        // RET -> 0xd65f03c0
        visit_at(&mut s, G::UnconditionalBranchToRegister, 0xd65f_03c0, 0x1_0000);
        assert_eq!(s.regs.pc, 0x4_0000);
    }

    #[test]
    fn blr_authenticated_poisons_on_bad_pac() {
        let mut s = sim();
        // An unsigned pointer fails authentication; the target keeps
        // diagnostic tag bits so the next fetch faults.
        s.regs.set_x(2, 0x2_0000, Reg31Mode::ZeroRegister);
        // BLRAAZ x2 -> 0xd63f085f
        visit_at(&mut s, G::UnconditionalBranchToRegister, 0xd63f_085f, 0x1_0000);
        assert!(crate::pac::has_tag_bits(s.regs.pc));
    }
}
