//! Scalar floating-point visitor surface.
//!
//! All instructions here run under the current FPCR (rounding mode, DN,
//! FZ, AHP) with exceptions accumulating in FPSR. Scalar writes clear
//! the unused upper lanes of the destination vector register.

use a64_core::{A64Memory, Condition, Instruction};

use crate::fault::Fault;
use crate::features::CpuFeature;
use crate::flags::{FpRounding, Nzcv};
use crate::fp;
use crate::registers::{Reg31Mode, VRegister};
use crate::simd::{self, FpBinOp, FpUnOp, SimdCtx};
use crate::simulator::Simulator;
use crate::vecfmt::VectorFormat;

/// Scalar precision from the type field (23:22).
fn scalar_format(instr: &Instruction) -> Option<VectorFormat> {
    match instr.bits(23, 22) {
        0b00 => Some(VectorFormat::S),
        0b01 => Some(VectorFormat::D),
        0b11 => Some(VectorFormat::H),
        _ => None,
    }
}

impl<M: A64Memory> Simulator<M> {
    fn scalar_format_checked(&self, instr: &Instruction) -> Result<VectorFormat, Fault> {
        let vform = scalar_format(instr).ok_or(Fault::Unallocated {
            pc: instr.address(),
            raw: instr.raw(),
        })?;
        if vform == VectorFormat::H {
            self.require(CpuFeature::Fp16, instr)?;
        }
        Ok(vform)
    }

    fn scalar_ctx(&self, vform: VectorFormat) -> SimdCtx {
        SimdCtx::new(vform, self.vl_bits())
    }

    /// Read the scalar lane as raw bits.
    fn scalar_bits(&self, vform: VectorFormat, code: usize) -> u64 {
        self.regs.v_ref(code).u64_lane(vform.lane_bytes(), 0)
    }

    /// Scalar write: target lane plus cleared upper lanes.
    pub(crate) fn write_scalar(&mut self, vform: VectorFormat, code: usize, bits: u64) {
        let mut vreg = VRegister::zeroed();
        vreg.set_u64_lane(vform.lane_bytes(), 0, bits);
        self.regs.set_v(code, vreg);
    }

    /// Widen the scalar lane to f64 for compares and conversions.
    fn scalar_as_f64(&self, vform: VectorFormat, code: usize) -> f64 {
        let bits = self.scalar_bits(vform, code);
        match vform {
            VectorFormat::H => fp::f16_to_f64(bits as u16, false),
            VectorFormat::S => f64::from(f32::from_bits(bits as u32)),
            _ => f64::from_bits(bits),
        }
    }

    // FMOV (scalar, immediate): M 0 S 11110 type 1 imm8 100 00000 Rd
    pub(crate) fn visit_fp_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let bits = match vform {
            VectorFormat::H => u64::from(instr.imm_fp16_bits()),
            VectorFormat::S => u64::from(instr.imm_fp32().to_bits()),
            _ => instr.imm_fp64().to_bits(),
        };
        self.write_scalar(vform, instr.rd(), bits);
        Ok(())
    }

    // FCMP/FCMPE: opcode2 selects the E form and the #0.0 variant.
    pub(crate) fn visit_fp_compare(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let a = self.scalar_as_f64(vform, instr.rn());
        let compare_zero = instr.bit(3) == 1;
        let b = if compare_zero {
            0.0
        } else {
            self.scalar_as_f64(vform, instr.rm())
        };
        let signal_all = instr.bit(4) == 1;

        let mut fpsr = self.regs.fpsr();
        let flags = fp::fp_compare(&mut fpsr, a, b, signal_all);
        self.regs.set_fpsr(fpsr);
        self.regs.set_nzcv(flags);
        Ok(())
    }

    // FCCMP/FCCMPE: compare when the condition holds, otherwise load
    // NZCV from the immediate.
    pub(crate) fn visit_fp_conditional_compare(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let cond = Condition::from_bits(instr.condition());
        if self.regs.nzcv().holds(cond) {
            let a = self.scalar_as_f64(vform, instr.rn());
            let b = self.scalar_as_f64(vform, instr.rm());
            let signal_all = instr.bit(4) == 1;
            let mut fpsr = self.regs.fpsr();
            let flags = fp::fp_compare(&mut fpsr, a, b, signal_all);
            self.regs.set_fpsr(fpsr);
            self.regs.set_nzcv(flags);
        } else {
            self.regs.set_nzcv(Nzcv::from_imm(instr.nzcv_imm()));
        }
        Ok(())
    }

    // FCSEL.
    pub(crate) fn visit_fp_conditional_select(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let cond = Condition::from_bits(instr.condition());
        let source = if self.regs.nzcv().holds(cond) {
            instr.rn()
        } else {
            instr.rm()
        };
        let bits = self.scalar_bits(vform, source);
        self.write_scalar(vform, instr.rd(), bits);
        Ok(())
    }

    // ================================================================
    // FP data processing, 1 source
    // ================================================================
    //
    // Encoding: M 0 S 11110 type 1 opcode 10000 Rn Rd.

    pub(crate) fn visit_fp_data_processing_1_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let ctx = self.scalar_ctx(vform);
        let opcode = instr.bits(20, 15);
        let src = self.regs.v(instr.rn());
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();

        let result = match opcode {
            0b000000 => {
                // FMOV: a plain lane copy.
                let bits = self.scalar_bits(vform, instr.rn());
                self.write_scalar(vform, instr.rd(), bits);
                return Ok(());
            }
            0b000001 => simd::fp_unary(ctx, FpUnOp::Abs, fpcr, &mut fpsr, &src),
            0b000010 => simd::fp_unary(ctx, FpUnOp::Neg, fpcr, &mut fpsr, &src),
            0b000011 => simd::fp_unary(ctx, FpUnOp::Sqrt, fpcr, &mut fpsr, &src),
            // FCVT to the precision named by bits 16:15.
            0b000100 | 0b000101 | 0b000111 => {
                let dst_form = match opcode & 0b11 {
                    0b00 => VectorFormat::S,
                    0b01 => VectorFormat::D,
                    _ => VectorFormat::H,
                };
                if dst_form == VectorFormat::H {
                    self.require(CpuFeature::Fp16, instr)?;
                }
                let bits = self.convert_precision(vform, dst_form, instr.rn(), &mut fpsr);
                self.regs.set_fpsr(fpsr);
                self.write_scalar(dst_form, instr.rd(), bits);
                return Ok(());
            }
            // FRINT family.
            0b001000..=0b001111 => {
                let (mode, exact) = match opcode & 0b111 {
                    0b000 => (FpRounding::TieEven, false),      // FRINTN
                    0b001 => (FpRounding::PlusInfinity, false), // FRINTP
                    0b010 => (FpRounding::MinusInfinity, false), // FRINTM
                    0b011 => (FpRounding::Zero, false),         // FRINTZ
                    0b100 => (FpRounding::TieAway, false),      // FRINTA
                    0b110 => (fpcr.rounding(), true),           // FRINTX
                    _ => (fpcr.rounding(), false),              // FRINTI
                };
                let bits = match vform {
                    VectorFormat::H => {
                        let wide = fp::f16_to_f64(self.scalar_bits(vform, instr.rn()) as u16, false);
                        let rounded = fp::fp_round_int(fpcr, &mut fpsr, wide, mode, exact);
                        u64::from(fp::f64_to_f16(&mut fpsr, rounded, FpRounding::TieEven, false))
                    }
                    VectorFormat::S => {
                        let value = f32::from_bits(self.scalar_bits(vform, instr.rn()) as u32);
                        u64::from(fp::fp_round_int(fpcr, &mut fpsr, value, mode, exact).to_bits())
                    }
                    _ => {
                        let value = f64::from_bits(self.scalar_bits(vform, instr.rn()));
                        fp::fp_round_int(fpcr, &mut fpsr, value, mode, exact).to_bits()
                    }
                };
                self.regs.set_fpsr(fpsr);
                self.write_scalar(vform, instr.rd(), bits);
                return Ok(());
            }
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        self.regs.set_fpsr(fpsr);
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    /// FCVT between precisions, honoring NaN quieting and AHP.
    fn convert_precision(
        &mut self,
        src_form: VectorFormat,
        dst_form: VectorFormat,
        rn: usize,
        fpsr: &mut crate::flags::Fpsr,
    ) -> u64 {
        let fpcr = self.regs.fpcr();
        let src_bits = self.scalar_bits(src_form, rn);

        // NaNs convert to NaNs: quieted, payload left-aligned, IOC on
        // signalling inputs, default NaN under DN.
        let wide = match src_form {
            VectorFormat::H => fp::f16_to_f64(src_bits as u16, fpcr.ahp()),
            VectorFormat::S => f64::from(f32::from_bits(src_bits as u32)),
            _ => f64::from_bits(src_bits),
        };
        let is_snan = match src_form {
            VectorFormat::H => fp::f16_is_signalling(src_bits as u16),
            VectorFormat::S => {
                let f = f32::from_bits(src_bits as u32);
                f.is_nan() && (src_bits >> 22) & 1 == 0
            }
            _ => wide.is_nan() && (src_bits >> 51) & 1 == 0,
        };
        if is_snan {
            fpsr.set_ioc();
        }
        let wide = if wide.is_nan() && fpcr.dn() {
            f64::from_bits(0x7ff8_0000_0000_0000)
        } else if wide.is_nan() {
            f64::from_bits(wide.to_bits() | (1 << 51))
        } else {
            wide
        };

        match dst_form {
            VectorFormat::H => u64::from(fp::f64_to_f16(fpsr, wide, fpcr.rounding(), fpcr.ahp())),
            VectorFormat::S => u64::from(fp::round_f64_to_f32(wide, fpcr.rounding()).to_bits()),
            _ => wide.to_bits(),
        }
    }

    // ================================================================
    // FP data processing, 2 sources
    // ================================================================
    //
    // Encoding: M 0 S 11110 type 1 Rm opcode 10 Rn Rd.

    pub(crate) fn visit_fp_data_processing_2_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let ctx = self.scalar_ctx(vform);
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();
        let a = self.regs.v(instr.rn());
        let b = self.regs.v(instr.rm());

        let op = match instr.bits(15, 12) {
            0b0000 => FpBinOp::Mul,
            0b0001 => FpBinOp::Div,
            0b0010 => FpBinOp::Add,
            0b0011 => FpBinOp::Sub,
            0b0100 => FpBinOp::Max,
            0b0101 => FpBinOp::Min,
            0b0110 => FpBinOp::Maxnm,
            0b0111 => FpBinOp::Minnm,
            0b1000 => {
                // FNMUL: negate the product.
                let mut result = simd::fp_binary(ctx, FpBinOp::Mul, fpcr, &mut fpsr, &a, &b);
                let bits = result.u64_lane(vform.lane_bytes(), 0);
                let sign = 1_u64 << (vform.lane_bits() - 1);
                result.set_u64_lane(vform.lane_bytes(), 0, bits ^ sign);
                self.regs.set_fpsr(fpsr);
                self.regs.set_v(instr.rd(), result);
                return Ok(());
            }
            _ => {
                return Err(Fault::Unallocated {
                    pc: instr.address(),
                    raw: instr.raw(),
                });
            }
        };
        let result = simd::fp_binary(ctx, op, fpcr, &mut fpsr, &a, &b);
        self.regs.set_fpsr(fpsr);
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    // ================================================================
    // FP data processing, 3 sources
    // ================================================================
    //
    // Encoding: M 0 S 11111 type o1 Rm o0 Ra Rn Rd.
    //   FMADD/FMSUB/FNMADD/FNMSUB, all fused.

    pub(crate) fn visit_fp_data_processing_3_source(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();
        // o1 selects the negated accumulator, o0 flips the product:
        // FMADD (0,0), FMSUB (0,1), FNMADD (1,0), FNMSUB (1,1).
        let negate_acc = instr.bit(21) == 1;
        let flip_product = instr.bit(15) == 1;

        let bits = match vform {
            VectorFormat::S => {
                let n = f32::from_bits(self.scalar_bits(vform, instr.rn()) as u32);
                let m = f32::from_bits(self.scalar_bits(vform, instr.rm()) as u32);
                let acc = f32::from_bits(self.scalar_bits(vform, instr.ra()) as u32);
                let acc = if negate_acc { fp::fp_neg(acc) } else { acc };
                let n = if flip_product != negate_acc { fp::fp_neg(n) } else { n };
                u64::from(fp::fp_mul_add(fpcr, &mut fpsr, acc, n, m).to_bits())
            }
            VectorFormat::D => {
                let n = f64::from_bits(self.scalar_bits(vform, instr.rn()));
                let m = f64::from_bits(self.scalar_bits(vform, instr.rm()));
                let acc = f64::from_bits(self.scalar_bits(vform, instr.ra()));
                let acc = if negate_acc { fp::fp_neg(acc) } else { acc };
                let n = if flip_product != negate_acc { fp::fp_neg(n) } else { n };
                fp::fp_mul_add(fpcr, &mut fpsr, acc, n, m).to_bits()
            }
            _ => {
                let n = fp::f16_to_f64(self.scalar_bits(vform, instr.rn()) as u16, false);
                let m = fp::f16_to_f64(self.scalar_bits(vform, instr.rm()) as u16, false);
                let acc = fp::f16_to_f64(self.scalar_bits(vform, instr.ra()) as u16, false);
                let acc = if negate_acc { -acc } else { acc };
                let n = if flip_product != negate_acc { -n } else { n };
                let wide = fp::fp_mul_add(fpcr, &mut fpsr, acc, n, m);
                u64::from(fp::f64_to_f16(&mut fpsr, wide, fpcr.rounding(), false))
            }
        };
        self.regs.set_fpsr(fpsr);
        self.write_scalar(vform, instr.rd(), bits);
        Ok(())
    }

    // ================================================================
    // FP <-> integer conversions and FMOV (general)
    // ================================================================
    //
    // Encoding: sf 0 S 11110 type 1 rmode opcode 000000 Rn Rd.

    pub(crate) fn visit_fp_integer_convert(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let rmode = instr.bits(20, 19);
        let opcode = instr.bits(18, 16);
        let reg_size = instr.reg_size();
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();

        // FJCVTZS: D source, W destination, Z flag result.
        if instr.bits(23, 22) == 0b01 && rmode == 0b11 && opcode == 0b110 {
            self.require(CpuFeature::JsCvt, instr)?;
            let value = self.scalar_as_f64(VectorFormat::D, instr.rn());
            let (result, flags) = fp::fjcvtzs(&mut fpsr, value);
            self.regs.set_fpsr(fpsr);
            self.regs.set_nzcv(flags);
            self.regs.set_w(instr.rd(), result, Reg31Mode::ZeroRegister);
            return Ok(());
        }

        // FMOV between register files.
        if opcode == 0b110 || opcode == 0b111 {
            return self.fmov_general(instr, rmode, opcode);
        }

        let vform = self.scalar_format_checked(instr)?;
        match opcode {
            // Float to integer, rounding per (rmode, opcode).
            0b000 | 0b001 | 0b100 | 0b101 => {
                let mode = match (rmode, opcode & 0b100 != 0) {
                    (0b00, false) => FpRounding::TieEven, // FCVTN*
                    (0b00, true) => FpRounding::TieAway,  // FCVTA*
                    (0b01, _) => FpRounding::PlusInfinity, // FCVTP*
                    (0b10, _) => FpRounding::MinusInfinity, // FCVTM*
                    _ => FpRounding::Zero,                // FCVTZ*
                };
                let signed = opcode & 1 == 0;
                let value = self.scalar_as_f64(vform, instr.rn());
                let result = fp::fp_to_int(&mut fpsr, value, reg_size, signed, mode);
                self.regs.set_fpsr(fpsr);
                self.regs
                    .set_xw(instr.rd(), result, reg_size, Reg31Mode::ZeroRegister);
                Ok(())
            }
            // SCVTF / UCVTF.
            0b010 | 0b011 => {
                let signed = opcode == 0b010;
                let raw = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                let raw = if reg_size == 32 {
                    if signed {
                        (raw as u32 as i32 as i64) as u64
                    } else {
                        u64::from(raw as u32)
                    }
                } else {
                    raw
                };
                let bits = self.int_to_scalar(vform, raw, signed, 0, fpcr.rounding(), &mut fpsr);
                self.regs.set_fpsr(fpsr);
                self.write_scalar(vform, instr.rd(), bits);
                Ok(())
            }
            _ => Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            }),
        }
    }

    fn int_to_scalar(
        &self,
        vform: VectorFormat,
        raw: u64,
        signed: bool,
        fbits: u32,
        mode: FpRounding,
        fpsr: &mut crate::flags::Fpsr,
    ) -> u64 {
        match vform {
            VectorFormat::H => {
                let wide: f64 = fp::int_to_fp(raw, signed, fbits, FpRounding::Odd);
                u64::from(fp::f64_to_f16(fpsr, wide, mode, false))
            }
            VectorFormat::S => {
                let value: f32 = fp::int_to_fp(raw, signed, fbits, mode);
                u64::from(value.to_bits())
            }
            _ => {
                let value: f64 = fp::int_to_fp(raw, signed, fbits, mode);
                value.to_bits()
            }
        }
    }

    fn fmov_general(&mut self, instr: &Instruction, rmode: u32, opcode: u32) -> Result<(), Fault> {
        let to_fp = opcode == 0b111;
        let type_bits = instr.bits(23, 22);
        match (instr.sf(), type_bits, rmode) {
            // W <-> S, W <-> H, X <-> D, X <-> H, X <-> V.D[1].
            (false, 0b00, 0b00) | (false, 0b11, 0b00) | (true, 0b01, 0b00) | (true, 0b11, 0b00) => {
                let vform = if type_bits == 0b11 {
                    self.require(CpuFeature::Fp16, instr)?;
                    VectorFormat::H
                } else if instr.sf() {
                    VectorFormat::D
                } else {
                    VectorFormat::S
                };
                if to_fp {
                    let raw = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                    let mask = simd::mask_bits(vform.lane_bits());
                    self.write_scalar(vform, instr.rd(), raw & mask);
                } else {
                    let bits = self.scalar_bits(vform, instr.rn());
                    self.regs.set_xw(
                        instr.rd(),
                        bits,
                        instr.reg_size(),
                        Reg31Mode::ZeroRegister,
                    );
                }
                Ok(())
            }
            // FMOV Xd, Vn.D[1] and FMOV Vd.D[1], Xn.
            (true, 0b10, 0b01) => {
                if to_fp {
                    let raw = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                    let mut vreg = self.regs.v(instr.rd());
                    vreg.set_u64_lane(8, 1, raw);
                    self.regs.set_v(instr.rd(), vreg);
                } else {
                    let bits = self.regs.v_ref(instr.rn()).u64_lane(8, 1);
                    self.regs.set_x(instr.rd(), bits, Reg31Mode::ZeroRegister);
                }
                Ok(())
            }
            _ => Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            }),
        }
    }

    // ================================================================
    // FP <-> fixed point
    // ================================================================
    //
    // Encoding: sf 0 S 11110 type 0 rmode opcode scale Rn Rd,
    // fbits = 64 - scale.

    pub(crate) fn visit_fp_fixed_point_convert(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = self.scalar_format_checked(instr)?;
        let reg_size = instr.reg_size();
        let fbits = 64 - instr.bits(15, 10);
        let opcode = instr.bits(18, 16);
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();

        match opcode {
            // FCVTZS/FCVTZU (fixed): scale up, then convert toward zero.
            0b000 | 0b001 => {
                let signed = opcode == 0b000;
                let value = self.scalar_as_f64(vform, instr.rn());
                let scaled = value * f64::powi(2.0, fbits as i32);
                let result = fp::fp_to_int(&mut fpsr, scaled, reg_size, signed, FpRounding::Zero);
                self.regs.set_fpsr(fpsr);
                self.regs
                    .set_xw(instr.rd(), result, reg_size, Reg31Mode::ZeroRegister);
                Ok(())
            }
            // SCVTF/UCVTF (fixed): convert, then scale down by 2^fbits.
            0b010 | 0b011 => {
                let signed = opcode == 0b010;
                let raw = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                let raw = if reg_size == 32 {
                    if signed {
                        (raw as u32 as i32 as i64) as u64
                    } else {
                        u64::from(raw as u32)
                    }
                } else {
                    raw
                };
                let bits = self.int_to_scalar(vform, raw, signed, fbits, fpcr.rounding(), &mut fpsr);
                self.regs.set_fpsr(fpsr);
                self.write_scalar(vform, instr.rd(), bits);
                Ok(())
            }
            _ => Err(Fault::Unallocated {
                pc: instr.address(),
                raw: instr.raw(),
            }),
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

    fn set_d(sim: &mut Simulator, code: usize, value: f64) {
        sim.write_scalar(VectorFormat::D, code, value.to_bits());
    }

    fn get_d(sim: &Simulator, code: usize) -> f64 {
        sim.regs.v_ref(code).f64_lane(0)
    }

    #[test]
    fn fmov_immediate() {
        let mut s = sim();
        // FMOV d0, #1.0 -> 0x1e6e1000
        visit(&mut s, G::FpImmediate, 0x1e6e_1000);
        assert_eq!(get_d(&s, 0), 1.0);
        // Upper lanes cleared.
        assert_eq!(s.regs.v_ref(0).u64_lane(8, 1), 0);
    }

    #[test]
    fn fadd_fdiv_double() {
        let mut s = sim();
        set_d(&mut s, 1, 2.5);
        set_d(&mut s, 2, 0.5);
        // FADD d0, d1, d2 -> 0x1e622820
        visit(&mut s, G::FpDataProcessing2Source, 0x1e62_2820);
        assert_eq!(get_d(&s, 0), 3.0);
        // FDIV d0, d1, d2 -> 0x1e621820
        visit(&mut s, G::FpDataProcessing2Source, 0x1e62_1820);
        assert_eq!(get_d(&s, 0), 5.0);
    }

    #[test]
    fn fmadd_family_signs() {
        let mut s = sim();
        set_d(&mut s, 1, 3.0); // n
        set_d(&mut s, 2, 4.0); // m
        set_d(&mut s, 3, 10.0); // a
        // FMADD d0, d1, d2, d3 -> 0x1f420c20
        visit(&mut s, G::FpDataProcessing3Source, 0x1f42_0c20);
        assert_eq!(get_d(&s, 0), 22.0);
        // FMSUB d0, d1, d2, d3 -> 0x1f428c20
        visit(&mut s, G::FpDataProcessing3Source, 0x1f42_8c20);
        assert_eq!(get_d(&s, 0), -2.0);
        // FNMADD d0, d1, d2, d3 -> 0x1f620c20
        visit(&mut s, G::FpDataProcessing3Source, 0x1f62_0c20);
        assert_eq!(get_d(&s, 0), -22.0);
        // FNMSUB d0, d1, d2, d3 -> 0x1f628c20
        visit(&mut s, G::FpDataProcessing3Source, 0x1f62_8c20);
        assert_eq!(get_d(&s, 0), 2.0);
    }

    #[test]
    fn fcmp_sets_flags() {
        let mut s = sim();
        set_d(&mut s, 1, 1.0);
        set_d(&mut s, 2, 2.0);
        // FCMP d1, d2 -> 0x1e622020
        visit(&mut s, G::FpCompare, 0x1e62_2020);
        let flags = s.regs.nzcv();
        assert!(flags.n() && !flags.z() && !flags.c() && !flags.v());

        // FCMP d1, #0.0 -> 0x1e602028
        set_d(&mut s, 1, 0.0);
        visit(&mut s, G::FpCompare, 0x1e60_2028);
        let flags = s.regs.nzcv();
        assert!(!flags.n() && flags.z() && flags.c() && !flags.v());

        // Unordered: NaN input.
        set_d(&mut s, 1, f64::NAN);
        visit(&mut s, G::FpCompare, 0x1e62_2020);
        let flags = s.regs.nzcv();
        assert!(!flags.n() && !flags.z() && flags.c() && flags.v());
    }

    #[test]
    fn fcvtzs_saturates() {
        let mut s = sim();
        set_d(&mut s, 1, 1e30);
        // FCVTZS w0, d1 -> 0x1e780020
        visit(&mut s, G::FpIntegerConvert, 0x1e78_0020);
        assert_eq!(s.regs.w(0, Reg31Mode::ZeroRegister), 0x7fff_ffff);
        assert!(s.regs.fpsr().ioc());

        set_d(&mut s, 1, -2.9);
        visit(&mut s, G::FpIntegerConvert, 0x1e78_0020);
        assert_eq!(s.regs.w(0, Reg31Mode::ZeroRegister) as i32, -2);
    }

    #[test]
    fn scvtf_and_back() {
        let mut s = sim();
        s.regs.set_x(1, (-7_i64) as u64, Reg31Mode::ZeroRegister);
        // SCVTF d0, x1 -> 0x9e620020
        visit(&mut s, G::FpIntegerConvert, 0x9e62_0020);
        assert_eq!(get_d(&s, 0), -7.0);
    }

    #[test]
    fn fmov_general_round_trip() {
        let mut s = sim();
        s.regs.set_x(1, 0x4045_0000_0000_0000, Reg31Mode::ZeroRegister);
        // FMOV d0, x1 -> 0x9e670020
        visit(&mut s, G::FpIntegerConvert, 0x9e67_0020);
        assert_eq!(get_d(&s, 0), 42.0);
        // FMOV x2, d0 -> 0x9e660002
        visit(&mut s, G::FpIntegerConvert, 0x9e66_0002);
        assert_eq!(s.regs.x(2, Reg31Mode::ZeroRegister), 0x4045_0000_0000_0000);
    }

    #[test]
    fn fcvt_between_precisions() {
        let mut s = sim();
        set_d(&mut s, 1, 1.5);
        // FCVT s0, d1 -> 0x1e624020
        visit(&mut s, G::FpDataProcessing1Source, 0x1e62_4020);
        assert_eq!(s.regs.v_ref(0).f32_lane(0), 1.5);
        // FCVT h0, d1 -> 0x1e63c020
        visit(&mut s, G::FpDataProcessing1Source, 0x1e63_c020);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 0), 0x3e00);
    }

    #[test]
    fn frint_modes() {
        let mut s = sim();
        set_d(&mut s, 1, 2.5);
        // FRINTN d0, d1 -> 0x1e644020
        visit(&mut s, G::FpDataProcessing1Source, 0x1e64_4020);
        assert_eq!(get_d(&s, 0), 2.0);
        // FRINTA d0, d1 -> 0x1e664020
        visit(&mut s, G::FpDataProcessing1Source, 0x1e66_4020);
        assert_eq!(get_d(&s, 0), 3.0);
        // FRINTM d0, d1 with -0.4 rounds to -1.
        set_d(&mut s, 1, -0.4);
        visit(&mut s, G::FpDataProcessing1Source, 0x1e65_4020);
        assert_eq!(get_d(&s, 0), -1.0);
    }

    #[test]
    fn fixed_point_convert() {
        let mut s = sim();
        s.regs.set_x(1, 0x10, Reg31Mode::ZeroRegister);
        // SCVTF d0, x1, #4 -> fbits=4: scale=60 -> 0x9e42f020
        visit(&mut s, G::FpFixedPointConvert, 0x9e42_f020);
        assert_eq!(get_d(&s, 0), 1.0);
        // FCVTZS x2, d0, #4 -> 0x9e58f002
        visit(&mut s, G::FpFixedPointConvert, 0x9e58_f002);
        assert_eq!(s.regs.x(2, Reg31Mode::ZeroRegister), 0x10);
    }
}
