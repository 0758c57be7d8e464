//! Advanced SIMD visitor surface.
//!
//! Each visitor decodes the arrangement (and the scalar forms, which
//! share encodings with bit 28 set), then drives the per-lane kernels.
//! Scalar results clear the unused upper lanes; 64-bit arrangements
//! clear the upper half of the register.

use a64_core::{A64Memory, Instruction};

use crate::fault::Fault;
use crate::flags::FpRounding;
use crate::fp;
use crate::registers::{Reg31Mode, VRegister};
use crate::simd::{self, CmpOp, FpBinOp, FpCmpOp, FpUnOp, NarrowMode, SimdCtx};
use crate::simulator::Simulator;
use crate::vecfmt::VectorFormat;

fn unallocated(instr: &Instruction) -> Fault {
    Fault::Unallocated {
        pc: instr.address(),
        raw: instr.raw(),
    }
}

fn unimplemented(instr: &Instruction, group: a64_core::InstructionGroup) -> Fault {
    Fault::Unimplemented {
        pc: instr.address(),
        raw: instr.raw(),
        group,
    }
}

/// Arrangement for the 3Same/2RegMisc integer space.
fn int_vform(instr: &Instruction) -> VectorFormat {
    let size = instr.bits(23, 22);
    if instr.bit(28) == 1 {
        VectorFormat::scalar_from_size(size)
    } else {
        VectorFormat::neon_from_size_q(size, instr.bit(30))
    }
}

/// Arrangement for the FP subfamily (sz selects S/D).
fn fp_vform(instr: &Instruction) -> VectorFormat {
    let sz = instr.bit(22);
    if instr.bit(28) == 1 {
        if sz == 1 { VectorFormat::D } else { VectorFormat::S }
    } else {
        match (sz, instr.bit(30)) {
            (0, 0) => VectorFormat::V2S,
            (0, 1) => VectorFormat::V4S,
            (1, 1) => VectorFormat::V2D,
            _ => VectorFormat::V1D,
        }
    }
}

impl<M: A64Memory> Simulator<M> {
    fn ctx(&self, vform: VectorFormat) -> SimdCtx {
        SimdCtx::new(vform, self.vl_bits())
    }

    fn finish_fp(&mut self, rd: usize, result: VRegister, fpsr: crate::flags::Fpsr) {
        self.regs.set_fpsr(fpsr);
        self.regs.set_v(rd, result);
    }

    // ================================================================
    // NEON 3 same
    // ================================================================
    //
    // Encoding: 0 Q U 01110 size 1 Rm opcode 1 Rn Rd (vector) and the
    // scalar twin with bit 28 set.

    pub(crate) fn visit_neon_3_same(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let u = instr.bit(29) == 1;
        let opcode = instr.bits(15, 11);
        let a = self.regs.v(instr.rn());
        let b = self.regs.v(instr.rm());
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();

        // The FP subfamily occupies opcodes 11000 and up (except the
        // logic ops at 00011).
        if opcode >= 0b11000 {
            let vform = fp_vform(instr);
            let ctx = self.ctx(vform);
            let e = instr.bit(23) == 1;
            let result = match (u, e, opcode) {
                (false, false, 0b11000) => {
                    simd::fp_binary(ctx, FpBinOp::Maxnm, fpcr, &mut fpsr, &a, &b)
                }
                (false, true, 0b11000) => {
                    simd::fp_binary(ctx, FpBinOp::Minnm, fpcr, &mut fpsr, &a, &b)
                }
                (false, _, 0b11001) => {
                    let acc = self.regs.v(instr.rd());
                    simd::fp_mla(ctx, fpcr, &mut fpsr, &acc, &a, &b, e)
                }
                (false, false, 0b11010) => {
                    simd::fp_binary(ctx, FpBinOp::Add, fpcr, &mut fpsr, &a, &b)
                }
                (false, true, 0b11010) => {
                    simd::fp_binary(ctx, FpBinOp::Sub, fpcr, &mut fpsr, &a, &b)
                }
                (false, false, 0b11011) => {
                    simd::fp_binary(ctx, FpBinOp::Mulx, fpcr, &mut fpsr, &a, &b)
                }
                (false, false, 0b11100) => simd::fp_cmp(ctx, FpCmpOp::Eq, fpcr, &mut fpsr, &a, &b),
                (false, false, 0b11110) => {
                    simd::fp_binary(ctx, FpBinOp::Max, fpcr, &mut fpsr, &a, &b)
                }
                (false, true, 0b11110) => {
                    simd::fp_binary(ctx, FpBinOp::Min, fpcr, &mut fpsr, &a, &b)
                }
                (false, false, 0b11111) => {
                    simd::fp_binary(ctx, FpBinOp::Recps, fpcr, &mut fpsr, &a, &b)
                }
                (false, true, 0b11111) => {
                    simd::fp_binary(ctx, FpBinOp::Rsqrts, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11000) => {
                    simd::fp_pairwise(ctx, FpBinOp::Maxnm, fpcr, &mut fpsr, &a, &b)
                }
                (true, true, 0b11000) => {
                    simd::fp_pairwise(ctx, FpBinOp::Minnm, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11010) => {
                    simd::fp_pairwise(ctx, FpBinOp::Add, fpcr, &mut fpsr, &a, &b)
                }
                (true, true, 0b11010) => {
                    simd::fp_binary(ctx, FpBinOp::Abd, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11011) => {
                    simd::fp_binary(ctx, FpBinOp::Mul, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11100) => simd::fp_cmp(ctx, FpCmpOp::Ge, fpcr, &mut fpsr, &a, &b),
                (true, true, 0b11100) => simd::fp_cmp(ctx, FpCmpOp::Gt, fpcr, &mut fpsr, &a, &b),
                (true, false, 0b11101) => {
                    simd::fp_cmp(ctx, FpCmpOp::AbsGe, fpcr, &mut fpsr, &a, &b)
                }
                (true, true, 0b11101) => {
                    simd::fp_cmp(ctx, FpCmpOp::AbsGt, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11110) => {
                    simd::fp_pairwise(ctx, FpBinOp::Max, fpcr, &mut fpsr, &a, &b)
                }
                (true, true, 0b11110) => {
                    simd::fp_pairwise(ctx, FpBinOp::Min, fpcr, &mut fpsr, &a, &b)
                }
                (true, false, 0b11111) => {
                    simd::fp_binary(ctx, FpBinOp::Div, fpcr, &mut fpsr, &a, &b)
                }
                _ => return Err(unallocated(instr)),
            };
            self.finish_fp(instr.rd(), result, fpsr);
            return Ok(());
        }

        // Bitwise ops ignore the arrangement beyond the active width.
        if opcode == 0b00011 {
            let active = if instr.bit(30) == 1 { 16 } else { 8 };
            let dst_in = self.regs.v(instr.rd());
            let result = if u {
                match instr.bits(23, 22) {
                    0b00 => simd::bytewise(active, &a, &b, |x, y| x ^ y), // EOR
                    0b01 => simd::bit_select(active, &dst_in, &a, &b),    // BSL
                    0b10 => simd::bit_select(active, &b, &a, &dst_in),    // BIT
                    _ => simd::bit_select(active, &b, &dst_in, &a),       // BIF
                }
            } else {
                match instr.bits(23, 22) {
                    0b00 => simd::bytewise(active, &a, &b, |x, y| x & y), // AND
                    0b01 => simd::bytewise(active, &a, &b, |x, y| x & !y), // BIC
                    0b10 => simd::bytewise(active, &a, &b, |x, y| x | y), // ORR
                    _ => simd::bytewise(active, &a, &b, |x, y| x | !y),   // ORN
                }
            };
            self.regs.set_v(instr.rd(), result);
            return Ok(());
        }

        let vform = int_vform(instr);
        let ctx = self.ctx(vform);
        let result = match opcode {
            0b00000 => simd::halving_add(ctx, &a, &b, !u, false),
            0b00001 => simd::sat_add(ctx, &mut fpsr, &a, &b, !u),
            0b00010 => simd::halving_add(ctx, &a, &b, !u, true),
            0b00100 => simd::halving_sub(ctx, &a, &b, !u),
            0b00101 => simd::sat_sub(ctx, &mut fpsr, &a, &b, !u),
            0b00110 => simd::cmp(ctx, if u { CmpOp::Hi } else { CmpOp::Gt }, &a, &b),
            0b00111 => simd::cmp(ctx, if u { CmpOp::Hs } else { CmpOp::Ge }, &a, &b),
            0b01000 => simd::shl_var(ctx, &a, &b, !u, false),
            0b01001 => simd::sat_shl_var(ctx, &mut fpsr, &a, &b, !u, false),
            0b01010 => simd::shl_var(ctx, &a, &b, !u, true),
            0b01011 => simd::sat_shl_var(ctx, &mut fpsr, &a, &b, !u, true),
            0b01100 => {
                if u {
                    simd::umax(ctx, &a, &b)
                } else {
                    simd::smax(ctx, &a, &b)
                }
            }
            0b01101 => {
                if u {
                    simd::umin(ctx, &a, &b)
                } else {
                    simd::smin(ctx, &a, &b)
                }
            }
            0b01110 => simd::abd(ctx, &a, &b, !u),
            0b01111 => {
                // SABA/UABA: accumulate the absolute difference.
                let diff = simd::abd(ctx, &a, &b, !u);
                let acc = self.regs.v(instr.rd());
                simd::add(ctx, &acc, &diff)
            }
            0b10000 => {
                if u {
                    simd::sub(ctx, &a, &b)
                } else {
                    simd::add(ctx, &a, &b)
                }
            }
            0b10001 => {
                if u {
                    simd::cmp(ctx, CmpOp::Eq, &a, &b)
                } else {
                    simd::cmtst(ctx, &a, &b)
                }
            }
            0b10010 => {
                let acc = self.regs.v(instr.rd());
                simd::mla(ctx, &acc, &a, &b, u)
            }
            0b10011 => {
                if u {
                    simd::pmul(ctx, &a, &b)
                } else {
                    simd::mul(ctx, &a, &b)
                }
            }
            0b10100 => simd::pairwise(ctx, &a, &b, |x, y| if u {
                (x as u64 as i128).max(y as u64 as i128)
            } else {
                x.max(y)
            }),
            0b10101 => simd::pairwise(ctx, &a, &b, |x, y| if u {
                (x as u64 as i128).min(y as u64 as i128)
            } else {
                x.min(y)
            }),
            0b10110 => simd::sqdmulh(ctx, &mut fpsr, &a, &b, u),
            0b10111 if !u => simd::pairwise(ctx, &a, &b, |x, y| x + y), // ADDP
            _ => return Err(unallocated(instr)),
        };
        self.finish_fp(instr.rd(), result, fpsr);
        Ok(())
    }

    // ================================================================
    // NEON 3 different (widening / narrowing)
    // ================================================================
    //
    // Encoding: 0 Q U 01110 size 1 Rm opcode 00 Rn Rd. Q selects the
    // second-part variants.

    pub(crate) fn visit_neon_3_different(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let u = instr.bit(29) == 1;
        let part = instr.bit(30) as usize;
        let size = instr.bits(23, 22);
        let opcode = instr.bits(15, 12);
        if size == 0b11 {
            return Err(unallocated(instr));
        }
        let narrow = VectorFormat::neon_from_size_q(size, 0);
        let wide = narrow.double_lane_size();
        let ctx = self.ctx(wide);
        let a = self.regs.v(instr.rn());
        let b = self.regs.v(instr.rm());
        let mut fpsr = self.regs.fpsr();

        // Wide forms read operand 1 at full width.
        let wide_lane_a = |reg: &VRegister, i: usize| {
            if u {
                reg.u64_lane(ctx.lane_bytes(), i) as i128
            } else {
                i128::from(reg.i64_lane(ctx.lane_bytes(), i))
            }
        };

        let result = match opcode {
            0b0000 => simd::widen2(ctx, &a, &b, part, !u, |x, y| x + y), // SADDL/UADDL
            0b0001 => {
                // SADDW/UADDW.
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let y = if u {
                        simd::narrow_lane_u(ctx, &b, part, i) as i128
                    } else {
                        simd::narrow_lane_s(ctx, &b, part, i)
                    };
                    ctx.write(&mut dst, i, (wide_lane_a(&a, i) + y) as u64);
                }
                dst
            }
            0b0010 => simd::widen2(ctx, &a, &b, part, !u, |x, y| x - y), // SSUBL/USUBL
            0b0011 => {
                // SSUBW/USUBW.
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let y = if u {
                        simd::narrow_lane_u(ctx, &b, part, i) as i128
                    } else {
                        simd::narrow_lane_s(ctx, &b, part, i)
                    };
                    ctx.write(&mut dst, i, (wide_lane_a(&a, i) - y) as u64);
                }
                dst
            }
            0b0100 | 0b0110 => {
                // ADDHN/SUBHN (+rounding with U): narrow the high half
                // of the double-width sum/difference.
                let shift = wide.lane_bits() / 2;
                let rounding = if u { 1_i128 << (shift - 1) } else { 0 };
                let mut values = Vec::with_capacity(ctx.lanes());
                for i in 0..ctx.lanes() {
                    let x = i128::from(a.i64_lane(ctx.lane_bytes(), i));
                    let y = i128::from(b.i64_lane(ctx.lane_bytes(), i));
                    let wide_val = if opcode == 0b0100 { x + y } else { x - y };
                    let narrowed = ((wide_val + rounding) >> shift) as u64
                        & simd::mask_bits(shift);
                    values.push(narrowed);
                }
                let narrow_full = VectorFormat::neon_from_size_q(size, 1);
                let dst_in = self.regs.v(instr.rd());
                simd::narrow_into(self.ctx(narrow_full), &dst_in, part, &values)
            }
            0b0101 => {
                // SABAL/UABAL.
                let diff = simd::widen2(ctx, &a, &b, part, !u, |x, y| (x - y).abs());
                let acc = self.regs.v(instr.rd());
                simd::add(ctx, &acc, &diff)
            }
            0b0111 => simd::widen2(ctx, &a, &b, part, !u, |x, y| (x - y).abs()), // SABDL/UABDL
            0b1000 | 0b1010 => {
                // SMLAL/UMLAL / SMLSL/UMLSL.
                let product = simd::widen2(ctx, &a, &b, part, !u, |x, y| x * y);
                let acc = self.regs.v(instr.rd());
                if opcode == 0b1000 {
                    simd::add(ctx, &acc, &product)
                } else {
                    simd::sub(ctx, &acc, &product)
                }
            }
            0b1100 => simd::widen2(ctx, &a, &b, part, !u, |x, y| x * y), // SMULL/UMULL
            0b1001 | 0b1011 | 0b1101 => {
                // SQDMLAL/SQDMLSL/SQDMULL: doubling product with
                // saturation at both steps.
                let bits = ctx.lane_bits();
                let mut dst = VRegister::zeroed();
                let acc = self.regs.v(instr.rd());
                for i in 0..ctx.lanes() {
                    let x = simd::narrow_lane_s(ctx, &a, part, i);
                    let y = simd::narrow_lane_s(ctx, &b, part, i);
                    let sat = simd::saturate_signed(&mut fpsr, 2 * x * y, bits);
                    let product = i128::from(((sat << (64 - bits)) as i64) >> (64 - bits));
                    let value = match opcode {
                        0b1001 => simd::saturate_signed(
                            &mut fpsr,
                            i128::from(acc.i64_lane(ctx.lane_bytes(), i)) + product,
                            bits,
                        ),
                        0b1011 => simd::saturate_signed(
                            &mut fpsr,
                            i128::from(acc.i64_lane(ctx.lane_bytes(), i)) - product,
                            bits,
                        ),
                        _ => (product as u64) & simd::mask_bits(bits),
                    };
                    ctx.write(&mut dst, i, value);
                }
                dst
            }
            0b1110 if !u && size == 0b00 => {
                // PMULL: polynomial widening multiply of byte lanes.
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let x = simd::narrow_lane_u(ctx, &a, part, i);
                    let y = simd::narrow_lane_u(ctx, &b, part, i);
                    let mut acc = 0_u128;
                    for bit in 0..8 {
                        if (y >> bit) & 1 == 1 {
                            acc ^= x << bit;
                        }
                    }
                    ctx.write(&mut dst, i, acc as u64);
                }
                dst
            }
            _ => return Err(unallocated(instr)),
        };
        self.finish_fp(instr.rd(), result, fpsr);
        Ok(())
    }

    // ================================================================
    // NEON 2-register miscellaneous
    // ================================================================

    pub(crate) fn visit_neon_2_reg_misc(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let group = a64_core::InstructionGroup::Neon2RegMisc;
        let u = instr.bit(29) == 1;
        let size = instr.bits(23, 22);
        let opcode = instr.bits(16, 12);
        let a = self.regs.v(instr.rn());
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();
        let vform = int_vform(instr);
        let ctx = self.ctx(vform);

        // Integer subfamily.
        let result = match (u, opcode) {
            (false, 0b00000) => simd::rev_lanes(ctx, &a, 8),
            (true, 0b00000) => simd::rev_lanes(ctx, &a, 4),
            (false, 0b00001) => simd::rev_lanes(ctx, &a, 2),
            (false, 0b00100) => simd::cls_lanes(ctx, &a),
            (true, 0b00100) => simd::clz_lanes(ctx, &a),
            (false, 0b00101) => simd::cnt_lanes(ctx, &a),
            (true, 0b00101) => {
                // NOT (size 00) / RBIT (size 01); both act on byte lanes.
                if size == 0b00 {
                    let active = if instr.bit(30) == 1 { 16 } else { 8 };
                    simd::bytewise(active, &a, &a, |x, _| !x)
                } else {
                    let byte_form = if instr.bit(30) == 1 {
                        VectorFormat::V16B
                    } else {
                        VectorFormat::V8B
                    };
                    simd::rbit_lanes(self.ctx(byte_form), &a)
                }
            }
            (false, 0b00111) => simd::sqabs(ctx, &mut fpsr, &a),
            (true, 0b00111) => simd::sqneg(ctx, &mut fpsr, &a),
            (false, 0b01000) => {
                let zero = VRegister::zeroed();
                simd::cmp(ctx, CmpOp::Gt, &a, &zero)
            }
            (true, 0b01000) => {
                let zero = VRegister::zeroed();
                simd::cmp(ctx, CmpOp::Ge, &a, &zero)
            }
            (false, 0b01001) => {
                let zero = VRegister::zeroed();
                simd::cmp(ctx, CmpOp::Eq, &a, &zero)
            }
            (true, 0b01001) => {
                let zero = VRegister::zeroed();
                simd::cmp(ctx, CmpOp::Le, &a, &zero)
            }
            (false, 0b01010) => {
                let zero = VRegister::zeroed();
                simd::cmp(ctx, CmpOp::Lt, &a, &zero)
            }
            (false, 0b01011) => simd::abs(ctx, &a),
            (true, 0b01011) => simd::neg(ctx, &a),
            (false, 0b10010) | (false, 0b10100) | (true, 0b10010) | (true, 0b10100) => {
                // XTN / SQXTN / SQXTUN / UQXTN.
                return self.neon_narrow(instr, u, opcode, &mut fpsr);
            }
            _ => {
                // FP subfamily (and a few corners the core does not
                // model: SUQADD/USQADD, the pairwise-long adds, and the
                // integer estimate ops).
                return self.neon_2_reg_misc_fp(instr, u, size, opcode, &mut fpsr)
                    .map_err(|fault| match fault {
                        Fault::Unallocated { .. } => unimplemented(instr, group),
                        other => other,
                    });
            }
        };
        self.finish_fp(instr.rd(), result, fpsr);
        Ok(())
    }

    fn neon_narrow(
        &mut self,
        instr: &Instruction,
        u: bool,
        opcode: u32,
        fpsr: &mut crate::flags::Fpsr,
    ) -> Result<(), Fault> {
        let part = instr.bit(30) as usize;
        let size = instr.bits(23, 22);
        if size == 0b11 {
            return Err(unallocated(instr));
        }
        let narrow = VectorFormat::neon_from_size_q(size, 0);
        let wide_ctx = self.ctx(narrow.double_lane_size());
        let mode = match (u, opcode) {
            (false, 0b10010) => NarrowMode::Truncate,        // XTN
            (false, 0b10100) => NarrowMode::SignedToSigned,  // SQXTN
            (true, 0b10010) => NarrowMode::SignedToUnsigned, // SQXTUN
            _ => NarrowMode::UnsignedToUnsigned,             // UQXTN
        };
        let a = self.regs.v(instr.rn());
        let bits = narrow.lane_bits();
        let mut values = Vec::with_capacity(wide_ctx.lanes());
        for i in 0..wide_ctx.lanes() {
            let wide_val = if mode == NarrowMode::UnsignedToUnsigned {
                wide_ctx.u(&a, i) as i128
            } else {
                wide_ctx.s(&a, i)
            };
            values.push(simd::narrow_value(fpsr, wide_val, bits, mode));
        }
        let dst_in = self.regs.v(instr.rd());
        let narrow_full = VectorFormat::neon_from_size_q(size, 1);
        let result = simd::narrow_into(self.ctx(narrow_full), &dst_in, part, &values);
        self.regs.set_fpsr(*fpsr);
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    fn neon_2_reg_misc_fp(
        &mut self,
        instr: &Instruction,
        u: bool,
        size: u32,
        opcode: u32,
        fpsr: &mut crate::flags::Fpsr,
    ) -> Result<(), Fault> {
        let fpcr = self.regs.fpcr();
        let vform = fp_vform(instr);
        let ctx = self.ctx(vform);
        let a = self.regs.v(instr.rn());
        let sz_high = size & 0b10 != 0;

        let result = match (u, sz_high, opcode) {
            (false, true, 0b01100) => {
                let zero = VRegister::zeroed();
                simd::fp_cmp(ctx, FpCmpOp::Gt, fpcr, fpsr, &a, &zero)
            }
            (false, true, 0b01101) => {
                let zero = VRegister::zeroed();
                simd::fp_cmp(ctx, FpCmpOp::Eq, fpcr, fpsr, &a, &zero)
            }
            (false, true, 0b01110) => {
                let zero = VRegister::zeroed();
                simd::fp_cmp(ctx, FpCmpOp::Lt, fpcr, fpsr, &a, &zero)
            }
            (true, true, 0b01100) => {
                let zero = VRegister::zeroed();
                simd::fp_cmp(ctx, FpCmpOp::Ge, fpcr, fpsr, &a, &zero)
            }
            (true, true, 0b01101) => {
                let zero = VRegister::zeroed();
                simd::fp_cmp(ctx, FpCmpOp::Le, fpcr, fpsr, &a, &zero)
            }
            (false, true, 0b01111) => simd::fp_unary(ctx, FpUnOp::Abs, fpcr, fpsr, &a),
            (true, true, 0b01111) => simd::fp_unary(ctx, FpUnOp::Neg, fpcr, fpsr, &a),
            (true, true, 0b11111) => simd::fp_unary(ctx, FpUnOp::Sqrt, fpcr, fpsr, &a),
            (false, true, 0b11101) => simd::fp_unary(ctx, FpUnOp::RecipEstimate, fpcr, fpsr, &a),
            (true, true, 0b11101) => simd::fp_unary(ctx, FpUnOp::RsqrtEstimate, fpcr, fpsr, &a),
            // FRINT family.
            (false, false, 0b11000) => self.frint_lanes(ctx, &a, FpRounding::TieEven, false, fpsr),
            (false, false, 0b11001) => {
                self.frint_lanes(ctx, &a, FpRounding::MinusInfinity, false, fpsr)
            }
            (false, true, 0b11000) => {
                self.frint_lanes(ctx, &a, FpRounding::PlusInfinity, false, fpsr)
            }
            (false, true, 0b11001) => self.frint_lanes(ctx, &a, FpRounding::Zero, false, fpsr),
            (true, false, 0b11000) => self.frint_lanes(ctx, &a, FpRounding::TieAway, false, fpsr),
            (true, false, 0b11001) => self.frint_lanes(ctx, &a, fpcr.rounding(), true, fpsr),
            (true, true, 0b11001) => self.frint_lanes(ctx, &a, fpcr.rounding(), false, fpsr),
            // Lane conversions to integer. (11100 with the high size is
            // URECPE/URSQRTE, which the core does not model.)
            (_, false, 0b11100) => self.fcvt_lanes(ctx, &a, !u, FpRounding::TieAway, fpsr),
            (_, _, 0b11010) | (_, _, 0b11011) => {
                let mode = match (sz_high, opcode) {
                    (false, 0b11010) => FpRounding::TieEven,
                    (false, 0b11011) => FpRounding::MinusInfinity,
                    (true, 0b11010) => FpRounding::PlusInfinity,
                    _ => FpRounding::Zero,
                };
                self.fcvt_lanes(ctx, &a, !u, mode, fpsr)
            }
            // SCVTF/UCVTF (vector, integer).
            (_, false, 0b11101) => {
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let raw = if u {
                        ctx.u(&a, i) as u64
                    } else {
                        ctx.s(&a, i) as u64
                    };
                    let bits = match ctx.lane_bits() {
                        32 => {
                            let raw32 = if u {
                                u64::from(raw as u32)
                            } else {
                                (raw as u32 as i32 as i64) as u64
                            };
                            let value: f32 = fp::int_to_fp(raw32, !u, 0, fpcr.rounding());
                            u64::from(value.to_bits())
                        }
                        _ => {
                            let value: f64 = fp::int_to_fp(raw, !u, 0, fpcr.rounding());
                            value.to_bits()
                        }
                    };
                    ctx.write(&mut dst, i, bits);
                }
                dst
            }
            // FCVTL / FCVTN: precision widen/narrow between S and D (and
            // H and S).
            (false, _, 0b10111) => return self.fcvtl(instr),
            (false, _, 0b10110) => return self.fcvtn(instr, fpsr),
            _ => return Err(unallocated(instr)),
        };
        self.finish_fp(instr.rd(), result, *fpsr);
        Ok(())
    }

    fn frint_lanes(
        &self,
        ctx: SimdCtx,
        a: &VRegister,
        mode: FpRounding,
        exact: bool,
        fpsr: &mut crate::flags::Fpsr,
    ) -> VRegister {
        let fpcr = self.regs.fpcr();
        let mut dst = VRegister::zeroed();
        for i in 0..ctx.lanes() {
            let bits = match ctx.lane_bits() {
                32 => u64::from(
                    fp::fp_round_int(fpcr, fpsr, a.f32_lane(i), mode, exact).to_bits(),
                ),
                _ => fp::fp_round_int(fpcr, fpsr, a.f64_lane(i), mode, exact).to_bits(),
            };
            ctx.write(&mut dst, i, bits);
        }
        dst
    }

    fn fcvt_lanes(
        &self,
        ctx: SimdCtx,
        a: &VRegister,
        signed: bool,
        mode: FpRounding,
        fpsr: &mut crate::flags::Fpsr,
    ) -> VRegister {
        let mut dst = VRegister::zeroed();
        for i in 0..ctx.lanes() {
            let wide = match ctx.lane_bits() {
                32 => f64::from(a.f32_lane(i)),
                _ => a.f64_lane(i),
            };
            let value = fp::fp_to_int(fpsr, wide, ctx.lane_bits(), signed, mode);
            ctx.write(&mut dst, i, value);
        }
        dst
    }

    fn fcvtl(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let part = instr.bit(30) as usize;
        let sz = instr.bit(22);
        let mut dst = VRegister::zeroed();
        let a = self.regs.v(instr.rn());
        if sz == 1 {
            // 2S -> 2D.
            for i in 0..2 {
                let value = f64::from(a.f32_lane(part * 2 + i));
                dst.set_u64_lane(8, i, value.to_bits());
            }
        } else {
            // 4H -> 4S.
            for i in 0..4 {
                let half = a.u64_lane(2, part * 4 + i) as u16;
                let value = fp::f16_to_f64(half, false) as f32;
                dst.set_u64_lane(4, i, u64::from(value.to_bits()));
            }
        }
        self.regs.set_v(instr.rd(), dst);
        Ok(())
    }

    fn fcvtn(&mut self, instr: &Instruction, fpsr: &mut crate::flags::Fpsr) -> Result<(), Fault> {
        let part = instr.bit(30) as usize;
        let sz = instr.bit(22);
        let fpcr = self.regs.fpcr();
        let a = self.regs.v(instr.rn());
        let dst_in = self.regs.v(instr.rd());
        let mut values = Vec::new();
        if sz == 1 {
            // 2D -> 2S.
            for i in 0..2 {
                let narrowed = fp::round_f64_to_f32(a.f64_lane(i), fpcr.rounding());
                values.push(u64::from(narrowed.to_bits()));
            }
            let result = simd::narrow_into(self.ctx(VectorFormat::V4S), &dst_in, part, &values);
            self.finish_fp(instr.rd(), result, *fpsr);
        } else {
            // 4S -> 4H.
            for i in 0..4 {
                let narrowed =
                    fp::f64_to_f16(fpsr, f64::from(a.f32_lane(i)), fpcr.rounding(), fpcr.ahp());
                values.push(u64::from(narrowed));
            }
            let result = simd::narrow_into(self.ctx(VectorFormat::V8H), &dst_in, part, &values);
            self.finish_fp(instr.rd(), result, *fpsr);
        }
        Ok(())
    }

    // ================================================================
    // NEON across lanes
    // ================================================================
    //
    // Encoding: 0 Q U 01110 size 11000 opcode 10 Rn Rd.

    pub(crate) fn visit_neon_across_lanes(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let u = instr.bit(29) == 1;
        let size = instr.bits(23, 22);
        let opcode = instr.bits(16, 12);
        let vform = VectorFormat::neon_from_size_q(size, instr.bit(30));
        let ctx = self.ctx(vform);
        let a = self.regs.v(instr.rn());
        let fpcr = self.regs.fpcr();
        let mut fpsr = self.regs.fpsr();

        // FP reductions live at sz-dependent opcodes with size 0x/1x.
        if opcode == 0b01100 || opcode == 0b01111 {
            let fp_form = if instr.bit(30) == 1 {
                VectorFormat::V4S
            } else {
                return Err(unallocated(instr));
            };
            let fp_ctx = self.ctx(fp_form);
            let op = match (instr.bit(23) == 1, opcode) {
                (false, 0b01100) => FpBinOp::Maxnm,
                (true, 0b01100) => FpBinOp::Minnm,
                (false, 0b01111) => FpBinOp::Max,
                _ => FpBinOp::Min,
            };
            let value = simd::fp_reduce(fp_ctx, op, fpcr, &mut fpsr, &a);
            self.regs.set_fpsr(fpsr);
            self.write_scalar(VectorFormat::S, instr.rd(), value);
            return Ok(());
        }

        let (value, dst_form) = match opcode {
            0b00011 => (
                simd::reduce_addl(ctx, &a, !u),
                vform.scalar().double_lane_size(),
            ), // SADDLV/UADDLV
            0b01010 => (simd::reduce_minmax(ctx, &a, !u, true), vform.scalar()), // SMAXV/UMAXV
            0b11010 => (simd::reduce_minmax(ctx, &a, !u, false), vform.scalar()), // SMINV/UMINV
            0b11011 if !u => (simd::reduce_add(ctx, &a), vform.scalar()),        // ADDV
            _ => return Err(unallocated(instr)),
        };
        self.write_scalar(dst_form, instr.rd(), value);
        Ok(())
    }

    // ================================================================
    // Copy, extract, permute, table
    // ================================================================

    // Encoding: 0 Q op 01110000 imm5 0 imm4 1 Rn Rd.
    pub(crate) fn visit_neon_copy(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let q = instr.bit(30);
        let op = instr.bit(29);
        let imm5 = instr.bits(20, 16);
        let imm4 = instr.bits(14, 11);
        let lane_bytes = 1_usize << imm5.trailing_zeros().min(3);
        let index = (imm5 >> (lane_bytes.trailing_zeros() + 1)) as usize;

        if op == 1 {
            // INS (element): dst[imm4-index] = src[imm5-index].
            let src_index = (imm4 >> lane_bytes.trailing_zeros()) as usize;
            let value = self.regs.v_ref(instr.rn()).u64_lane(lane_bytes, src_index);
            let mut dst = self.regs.v(instr.rd());
            dst.set_u64_lane(lane_bytes, index, value);
            self.regs.set_v(instr.rd(), dst);
            return Ok(());
        }

        match imm4 {
            0b0000 => {
                // DUP (element).
                let vform = match (lane_bytes, q) {
                    (1, 0) => VectorFormat::V8B,
                    (1, 1) => VectorFormat::V16B,
                    (2, 0) => VectorFormat::V4H,
                    (2, 1) => VectorFormat::V8H,
                    (4, 0) => VectorFormat::V2S,
                    (4, 1) => VectorFormat::V4S,
                    (8, 1) => VectorFormat::V2D,
                    _ => return Err(unallocated(instr)),
                };
                let src = self.regs.v(instr.rn());
                let result = simd::dup_lane(self.ctx(vform), &src, index);
                self.regs.set_v(instr.rd(), result);
                Ok(())
            }
            0b0001 => {
                // DUP (general).
                let vform = match (lane_bytes, q) {
                    (1, 0) => VectorFormat::V8B,
                    (1, 1) => VectorFormat::V16B,
                    (2, 0) => VectorFormat::V4H,
                    (2, 1) => VectorFormat::V8H,
                    (4, 0) => VectorFormat::V2S,
                    (4, 1) => VectorFormat::V4S,
                    (8, 1) => VectorFormat::V2D,
                    _ => return Err(unallocated(instr)),
                };
                let value = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                let result = simd::dup_imm(self.ctx(vform), value);
                self.regs.set_v(instr.rd(), result);
                Ok(())
            }
            0b0011 => {
                // INS (general).
                let value = self.regs.x(instr.rn(), Reg31Mode::ZeroRegister);
                let mut dst = self.regs.v(instr.rd());
                dst.set_u64_lane(lane_bytes, index, value);
                self.regs.set_v(instr.rd(), dst);
                Ok(())
            }
            0b0101 => {
                // SMOV.
                let value = self.regs.v_ref(instr.rn()).i64_lane(lane_bytes, index);
                let reg_size = if q == 1 { 64 } else { 32 };
                self.regs
                    .set_xw(instr.rd(), value as u64, reg_size, Reg31Mode::ZeroRegister);
                Ok(())
            }
            0b0111 => {
                // UMOV.
                let value = self.regs.v_ref(instr.rn()).u64_lane(lane_bytes, index);
                let reg_size = if q == 1 { 64 } else { 32 };
                self.regs
                    .set_xw(instr.rd(), value, reg_size, Reg31Mode::ZeroRegister);
                Ok(())
            }
            _ => Err(unallocated(instr)),
        }
    }

    // EXT: 0 Q 101110 000 Rm 0 imm4 0 Rn Rd.
    pub(crate) fn visit_neon_extract(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let active = if instr.bit(30) == 1 { 16 } else { 8 };
        let index = instr.bits(14, 11) as usize;
        if index >= active {
            return Err(unallocated(instr));
        }
        let a = self.regs.v(instr.rn());
        let b = self.regs.v(instr.rm());
        let result = simd::ext(active, &a, &b, index);
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    // ZIP/UZP/TRN: 0 Q 001110 size 0 Rm 0 opcode 10 Rn Rd.
    pub(crate) fn visit_neon_perm(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let vform = VectorFormat::neon_from_size_q(instr.bits(23, 22), instr.bit(30));
        let ctx = self.ctx(vform);
        let a = self.regs.v(instr.rn());
        let b = self.regs.v(instr.rm());
        let result = match instr.bits(14, 12) {
            0b001 => simd::uzp(ctx, &a, &b, 0),
            0b010 => simd::trn(ctx, &a, &b, 0),
            0b011 => simd::zip(ctx, &a, &b, 0),
            0b101 => simd::uzp(ctx, &a, &b, 1),
            0b110 => simd::trn(ctx, &a, &b, 1),
            0b111 => simd::zip(ctx, &a, &b, 1),
            _ => return Err(unallocated(instr)),
        };
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    // TBL/TBX: 0 Q 001110 000 Rm 0 len op 00 Rn Rd.
    pub(crate) fn visit_neon_table(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let active = if instr.bit(30) == 1 { 16 } else { 8 };
        let len = instr.bits(14, 13) as usize + 1;
        let is_tbx = instr.bit(12) == 1;

        let mut table = Vec::with_capacity(len);
        for offset in 0..len {
            table.push(self.regs.v((instr.rn() + offset) % 32));
        }
        let indices = self.regs.v(instr.rm());
        let fill = if is_tbx {
            self.regs.v(instr.rd())
        } else {
            VRegister::zeroed()
        };
        let mut result = simd::table_lookup(active, &table, &indices, &fill);
        if active == 8 {
            result.clear_above(8);
        }
        self.regs.set_v(instr.rd(), result);
        Ok(())
    }

    // ================================================================
    // Shift by immediate
    // ================================================================
    //
    // Encoding: 0 Q U 011110 immh immb opcode 1 Rn Rd. immh names the
    // lane size; right shifts encode 2*esize - imm, left shifts
    // imm - esize.

    pub(crate) fn visit_neon_shift_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let u = instr.bit(29) == 1;
        let q = instr.bit(30);
        let scalar = instr.bit(28) == 1;
        let immh = instr.bits(22, 19);
        let immb = instr.bits(18, 16);
        let opcode = instr.bits(15, 11);
        if immh == 0 {
            return Err(unallocated(instr));
        }
        let lane_bits = 8 << (31 - immh.leading_zeros());
        let imm = (immh << 3) | immb;
        let right_shift = 2 * lane_bits - imm;
        let left_shift = imm.wrapping_sub(lane_bits);

        let vform = if scalar {
            VectorFormat::scalar_from_size(lane_bits.trailing_zeros() - 3)
        } else {
            VectorFormat::neon_from_size_q(lane_bits.trailing_zeros() - 3, q)
        };
        let ctx = self.ctx(vform);
        let a = self.regs.v(instr.rn());
        let mut fpsr = self.regs.fpsr();

        let result = match opcode {
            0b00000 => simd::shr_imm(ctx, &a, right_shift, !u, false), // SSHR/USHR
            0b00010 => {
                // SSRA/USRA.
                let shifted = simd::shr_imm(ctx, &a, right_shift, !u, false);
                let acc = self.regs.v(instr.rd());
                simd::add(ctx, &acc, &shifted)
            }
            0b00100 => simd::shr_imm(ctx, &a, right_shift, !u, true), // SRSHR/URSHR
            0b00110 => {
                // SRSRA/URSRA.
                let shifted = simd::shr_imm(ctx, &a, right_shift, !u, true);
                let acc = self.regs.v(instr.rd());
                simd::add(ctx, &acc, &shifted)
            }
            0b01010 if !u => simd::shl_imm(ctx, &a, left_shift), // SHL
            0b01110 => {
                // SQSHL/UQSHL (immediate).
                simd::sat_shl_imm(ctx, &mut fpsr, &a, left_shift, !u, !u)
            }
            0b01100 if u => {
                // SQSHLU.
                simd::sat_shl_imm(ctx, &mut fpsr, &a, left_shift, true, false)
            }
            0b10000 | 0b10001 | 0b10010 | 0b10011 => {
                // The narrowing right shifts.
                return self.neon_shift_narrow(instr, u, opcode, right_shift, &mut fpsr);
            }
            0b10100 => {
                // SSHLL/USHLL: widen then shift left.
                let size = lane_bits.trailing_zeros() - 3;
                let narrow = VectorFormat::neon_from_size_q(size, 0);
                let wide_ctx = self.ctx(narrow.double_lane_size());
                let part = q as usize;
                simd::widen2(wide_ctx, &a, &a, part, !u, |x, _| x << left_shift)
            }
            0b11100 => {
                // SCVTF/UCVTF (fixed-point, vector).
                let fbits = right_shift;
                let fpcr = self.regs.fpcr();
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let bits = match ctx.lane_bits() {
                        32 => {
                            let raw = if u {
                                ctx.u(&a, i) as u64
                            } else {
                                ctx.s(&a, i) as i64 as u64
                            };
                            let value: f32 = fp::int_to_fp(raw, !u, fbits, fpcr.rounding());
                            u64::from(value.to_bits())
                        }
                        _ => {
                            let raw = ctx.u(&a, i) as u64;
                            let value: f64 = fp::int_to_fp(raw, !u, fbits, fpcr.rounding());
                            value.to_bits()
                        }
                    };
                    ctx.write(&mut dst, i, bits);
                }
                dst
            }
            0b11111 => {
                // FCVTZS/FCVTZU (fixed-point, vector): scale by 2^fbits
                // then convert toward zero.
                let fbits = right_shift;
                let mut dst = VRegister::zeroed();
                for i in 0..ctx.lanes() {
                    let wide = match ctx.lane_bits() {
                        32 => f64::from(a.f32_lane(i)),
                        _ => a.f64_lane(i),
                    } * f64::powi(2.0, fbits as i32);
                    let value =
                        fp::fp_to_int(&mut fpsr, wide, ctx.lane_bits(), !u, FpRounding::Zero);
                    ctx.write(&mut dst, i, value);
                }
                dst
            }
            _ => return Err(unallocated(instr)),
        };
        self.finish_fp(instr.rd(), result, fpsr);
        Ok(())
    }

    fn neon_shift_narrow(
        &mut self,
        instr: &Instruction,
        u: bool,
        opcode: u32,
        shift: u32,
        fpsr: &mut crate::flags::Fpsr,
    ) -> Result<(), Fault> {
        let part = instr.bit(30) as usize;
        let immh = instr.bits(22, 19);
        let narrow_bits: u32 = 8 << (31 - immh.leading_zeros());
        // immh names the narrow lane size for these.
        let size = narrow_bits.trailing_zeros() - 3;
        if size > 2 {
            return Err(unallocated(instr));
        }
        let narrow = VectorFormat::neon_from_size_q(size, 0);
        let wide_ctx = self.ctx(narrow.double_lane_size());
        let round = opcode & 1 == 1;
        let mode = match (u, opcode & 0b10 != 0) {
            (false, false) => NarrowMode::Truncate,        // SHRN/RSHRN
            (false, true) => NarrowMode::SignedToSigned,   // SQSHRN/SQRSHRN
            (true, false) => NarrowMode::SignedToUnsigned, // SQSHRUN/SQRSHRUN
            (true, true) => NarrowMode::UnsignedToUnsigned, // UQSHRN/UQRSHRN
        };

        let a = self.regs.v(instr.rn());
        let mut values = Vec::with_capacity(wide_ctx.lanes());
        for i in 0..wide_ctx.lanes() {
            let wide_val = if mode == NarrowMode::UnsignedToUnsigned {
                wide_ctx.u(&a, i) as i128
            } else {
                wide_ctx.s(&a, i)
            };
            let rounding = if round { 1_i128 << (shift - 1) } else { 0 };
            let shifted = (wide_val + rounding) >> shift;
            values.push(simd::narrow_value(fpsr, shifted, narrow_bits, mode));
        }
        let dst_in = self.regs.v(instr.rd());
        let narrow_full = VectorFormat::neon_from_size_q(size, 1);
        let result = simd::narrow_into(self.ctx(narrow_full), &dst_in, part, &values);
        self.finish_fp(instr.rd(), result, *fpsr);
        Ok(())
    }

    // ================================================================
    // Modified immediate: MOVI/MVNI/ORR/BIC/FMOV (vector, immediate)
    // ================================================================
    //
    // Encoding: 0 Q op 01111 00000 abc cmode 01 defgh Rd.

    pub(crate) fn visit_neon_modified_immediate(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let q = instr.bit(30);
        let op = instr.bit(29);
        let cmode = instr.bits(15, 12);
        let abc = instr.bits(18, 16);
        let defgh = instr.bits(9, 5);
        let imm8 = u64::from((abc << 5) | defgh);

        let (imm64, lane_bytes, is_orr, invert) = match cmode {
            0b0000 | 0b0010 | 0b0100 | 0b0110 => {
                let shift = 8 * ((cmode >> 1) & 0b11);
                (imm8 << shift, 4, false, op == 1)
            }
            0b0001 | 0b0011 | 0b0101 | 0b0111 => {
                let shift = 8 * ((cmode >> 1) & 0b11);
                (imm8 << shift, 4, true, op == 1)
            }
            0b1000 | 0b1010 => {
                let shift = 8 * ((cmode >> 1) & 1);
                (imm8 << shift, 2, false, op == 1)
            }
            0b1001 | 0b1011 => {
                let shift = 8 * ((cmode >> 1) & 1);
                (imm8 << shift, 2, true, op == 1)
            }
            0b1100 => ((imm8 << 8) | 0xff, 4, false, op == 1), // shifting ones
            0b1101 => ((imm8 << 16) | 0xffff, 4, false, op == 1),
            0b1110 => {
                if op == 0 {
                    (imm8, 1, false, false) // MOVI byte
                } else {
                    // MOVI 64-bit: each imm8 bit expands to a byte.
                    let mut expanded = 0_u64;
                    for bit in 0..8 {
                        if (imm8 >> bit) & 1 == 1 {
                            expanded |= 0xff << (8 * bit);
                        }
                    }
                    (expanded, 8, false, false)
                }
            }
            0b1111 => {
                // FMOV (vector, immediate): expand abc:defgh into f32 or
                // f64 lanes.
                let sign = (imm8 >> 7) & 1;
                let b6 = (imm8 >> 6) & 1;
                let frac = imm8 & 0x3f;
                if op == 1 {
                    let exp = if b6 == 1 { 0x0ff_u64 } else { 0x100 };
                    ((sign << 63) | (exp << 54) | (frac << 48), 8, false, false)
                } else {
                    let exp = if b6 == 1 { 0x1f_u64 } else { 0x20 };
                    ((sign << 31) | (exp << 25) | (frac << 19), 4, false, false)
                }
            }
            _ => return Err(unallocated(instr)),
        };

        let vform = match (lane_bytes, q) {
            (1, 0) => VectorFormat::V8B,
            (1, 1) => VectorFormat::V16B,
            (2, 0) => VectorFormat::V4H,
            (2, 1) => VectorFormat::V8H,
            (4, 0) => VectorFormat::V2S,
            (4, 1) => VectorFormat::V4S,
            (8, 0) => VectorFormat::V1D,
            _ => VectorFormat::V2D,
        };
        let ctx = self.ctx(vform);

        let result = if is_orr {
            // ORR/BIC (vector, immediate) read-modify-write the
            // destination.
            let dst = self.regs.v(instr.rd());
            let mut out = VRegister::zeroed();
            for i in 0..ctx.lanes() {
                let old = dst.u64_lane(ctx.lane_bytes(), i);
                let value = if invert { old & !imm64 } else { old | imm64 };
                ctx.write(&mut out, i, value);
            }
            out
        } else {
            let value = if invert {
                !imm64 & simd::mask_bits(ctx.lane_bits())
            } else {
                imm64
            };
            simd::dup_imm(ctx, value)
        };
        self.regs.set_v(instr.rd(), result);
        Ok(())
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

    fn v_bytes(sim: &mut Simulator, code: usize, bytes: &[u8]) {
        let mut v = VRegister::zeroed();
        v.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        sim.regs.set_v(code, v);
    }

    #[test]
    fn add_16b() {
        let mut s = sim();
        v_bytes(&mut s, 1, &[1; 16]);
        v_bytes(&mut s, 2, &[2; 16]);
        // ADD v0.16b, v1.16b, v2.16b -> 0x4e228420
        visit(&mut s, G::Neon3Same, 0x4e22_8420);
        assert_eq!(s.regs.v_ref(0).bytes()[..16], [3; 16]);
    }

    #[test]
    fn sqadd_saturates_and_sets_qc() {
        let mut s = sim();
        let mut v = VRegister::zeroed();
        for i in 0..8 {
            v.set_u64_lane(2, i, 0x7fff);
        }
        s.regs.set_v(1, v);
        s.regs.set_v(2, v);
        // SQADD v0.8h, v1.8h, v2.8h -> 0x4e620c20
        visit(&mut s, G::Neon3Same, 0x4e62_0c20);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 0), 0x7fff);
        assert!(s.regs.fpsr().qc());
    }

    #[test]
    fn cmeq_masks() {
        let mut s = sim();
        v_bytes(&mut s, 1, &[1, 2, 3, 4, 5, 6, 7, 8]);
        v_bytes(&mut s, 2, &[1, 0, 3, 0, 5, 0, 7, 0]);
        // CMEQ v0.8b, v1.8b, v2.8b -> 0x2e228c20
        visit(&mut s, G::Neon3Same, 0x2e22_8c20);
        let got = s.regs.v_ref(0);
        assert_eq!(got.u64_lane(1, 0), 0xff);
        assert_eq!(got.u64_lane(1, 1), 0);
        // 64-bit form clears the upper half.
        assert_eq!(got.u64_lane(8, 1), 0);
    }

    #[test]
    fn fadd_4s() {
        let mut s = sim();
        let mut v = VRegister::zeroed();
        for i in 0..4 {
            v.set_u64_lane(4, i, u64::from((i as f32).to_bits()));
        }
        s.regs.set_v(1, v);
        let mut w = VRegister::zeroed();
        for i in 0..4 {
            w.set_u64_lane(4, i, u64::from(1.0_f32.to_bits()));
        }
        s.regs.set_v(2, w);
        // FADD v0.4s, v1.4s, v2.4s -> 0x4e22d420
        visit(&mut s, G::Neon3Same, 0x4e22_d420);
        assert_eq!(s.regs.v_ref(0).f32_lane(0), 1.0);
        assert_eq!(s.regs.v_ref(0).f32_lane(3), 4.0);
    }

    #[test]
    fn saddl_widens() {
        let mut s = sim();
        v_bytes(&mut s, 1, &[0x7f; 16]);
        v_bytes(&mut s, 2, &[0x7f; 16]);
        // SADDL v0.8h, v1.8b, v2.8b -> 0x0e220020
        visit(&mut s, G::Neon3Different, 0x0e22_0020);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 0), 0xfe);
        // SADDL2 v0.8h, v1.16b, v2.16b -> 0x4e220020
        visit(&mut s, G::Neon3Different, 0x4e22_0020);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 7), 0xfe);
    }

    #[test]
    fn xtn_and_sqxtn() {
        let mut s = sim();
        let mut v = VRegister::zeroed();
        v.set_u64_lane(4, 0, 0x1_0001);
        v.set_u64_lane(4, 1, 0xffff_8000);
        v.set_u64_lane(4, 2, 0x7fff_0000);
        v.set_u64_lane(4, 3, 3);
        s.regs.set_v(1, v);
        // XTN v0.4h, v1.4s -> 0x0e612820
        visit(&mut s, G::Neon2RegMisc, 0x0e61_2820);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 0), 0x0001);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 1), 0x8000);
        // SQXTN v0.4h, v1.4s -> 0x0e614820
        visit(&mut s, G::Neon2RegMisc, 0x0e61_4820);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 0), 0x7fff, "65537 saturates");
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 1), 0x8000, "-32768 is exact");
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 2), 0x7fff);
    }

    #[test]
    fn addv_reduces() {
        let mut s = sim();
        v_bytes(&mut s, 1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        // ADDV b0, v1.16b -> 0x4e31b820
        visit(&mut s, G::NeonAcrossLanes, 0x4e31_b820);
        assert_eq!(s.regs.v_ref(0).u64_lane(1, 0), 136);
        assert_eq!(s.regs.v_ref(0).u64_lane(1, 1), 0, "scalar write clears");
    }

    #[test]
    fn dup_and_umov() {
        let mut s = sim();
        s.regs.set_x(1, 0xabcd, Reg31Mode::ZeroRegister);
        // DUP v0.8h, w1 -> 0x4e020c20
        visit(&mut s, G::NeonCopy, 0x4e02_0c20);
        assert_eq!(s.regs.v_ref(0).u64_lane(2, 7), 0xabcd);
        // UMOV w2, v0.h[3] -> 0x0e0e3c02
        visit(&mut s, G::NeonCopy, 0x0e0e_3c02);
        assert_eq!(s.regs.w(2, Reg31Mode::ZeroRegister), 0xabcd);
    }

    #[test]
    fn ext_concatenates() {
        let mut s = sim();
        v_bytes(&mut s, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        v_bytes(&mut s, 2, &[16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31]);
        // EXT v0.16b, v1.16b, v2.16b, #4 -> 0x6e022020
        visit(&mut s, G::NeonExtract, 0x6e02_2020);
        assert_eq!(s.regs.v_ref(0).bytes()[0], 4);
        assert_eq!(s.regs.v_ref(0).bytes()[12], 16);
    }

    #[test]
    fn tbl_and_tbx() {
        let mut s = sim();
        v_bytes(&mut s, 1, &(0x40..0x50_u8).collect::<Vec<u8>>());
        v_bytes(&mut s, 2, &[0, 15, 16, 2, 0, 0, 0, 0]);
        v_bytes(&mut s, 0, &[0xaa; 16]);
        // TBX v0.8b, {v1.16b}, v2.8b -> 0x0e021020
        visit(&mut s, G::NeonTable, 0x0e02_1020);
        let got = s.regs.v_ref(0);
        assert_eq!(got.bytes()[0], 0x40);
        assert_eq!(got.bytes()[1], 0x4f);
        assert_eq!(got.bytes()[2], 0xaa, "out of range keeps dst for TBX");
    }

    #[test]
    fn shift_immediates() {
        let mut s = sim();
        let mut v = VRegister::zeroed();
        v.set_u64_lane(4, 0, 0x80);
        v.set_u64_lane(4, 1, 0x101);
        s.regs.set_v(1, v);
        // SSHR v0.2s, v1.2s, #4 -> immh:immb = 0111100 (64-4=60)
        // -> 0x0f3c0420
        visit(&mut s, G::NeonShiftImmediate, 0x0f3c_0420);
        assert_eq!(s.regs.v_ref(0).u64_lane(4, 0), 0x8);
        assert_eq!(s.regs.v_ref(0).u64_lane(4, 1), 0x10);
        // SHL v0.2s, v1.2s, #8 -> imm = 32+8 -> immh:immb = 0101000
        // -> 0x0f285420
        visit(&mut s, G::NeonShiftImmediate, 0x0f28_5420);
        assert_eq!(s.regs.v_ref(0).u64_lane(4, 0), 0x8000);
    }

    #[test]
    fn movi_and_fmov_vector() {
        let mut s = sim();
        // MOVI v0.4s, #0x55 -> 0x4f02a4a0? Use cmode 0000, abc:defgh.
        // imm8 = 0x55: abc = 010, defgh = 10101.
        // MOVI v0.4s, #0x55 -> 0x4f0206a0
        visit(&mut s, G::NeonModifiedImmediate, 0x4f02_06a0);
        assert_eq!(s.regs.v_ref(0).u64_lane(4, 3), 0x55);
        // FMOV v1.2d, #1.0 -> op=1 cmode=1111 imm8=0x70 -> 0x6f03f601
        visit(&mut s, G::NeonModifiedImmediate, 0x6f03_f601);
        assert_eq!(s.regs.v_ref(1).f64_lane(1), 1.0);
    }
}
