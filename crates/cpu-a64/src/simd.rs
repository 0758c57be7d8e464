//! The per-lane SIMD engine.
//!
//! Every kernel is `op(ctx, srcs…) -> VRegister` where the context names
//! the lane format and the configured vector length. Kernels iterate
//! lanes, compute in a double-width intermediate, then apply the
//! post-processing steps in their fixed order: primary arithmetic,
//! rounding, halving, saturation. Results come back in a fresh register,
//! so lanes above the active width are already clear; SVE callers merge
//! under their governing predicate instead of using the result directly.

use crate::flags::{Fpcr, Fpsr};
use crate::fp::{self, FpNum};
use crate::registers::VRegister;
use crate::vecfmt::VectorFormat;

/// Lane geometry for one operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimdCtx {
    pub vform: VectorFormat,
    pub vl_bits: usize,
}

impl SimdCtx {
    pub(crate) const fn new(vform: VectorFormat, vl_bits: usize) -> Self {
        Self { vform, vl_bits }
    }

    pub(crate) const fn lanes(&self) -> usize {
        self.vform.lane_count(self.vl_bits)
    }

    pub(crate) const fn lane_bytes(&self) -> usize {
        self.vform.lane_bytes()
    }

    pub(crate) const fn lane_bits(&self) -> u32 {
        self.vform.lane_bits()
    }

    /// Signed lane value, widened.
    pub(crate) fn s(&self, r: &VRegister, i: usize) -> i128 {
        i128::from(r.i64_lane(self.lane_bytes(), i))
    }

    /// Unsigned lane value, widened.
    pub(crate) fn u(&self, r: &VRegister, i: usize) -> u128 {
        u128::from(r.u64_lane(self.lane_bytes(), i))
    }

    pub(crate) fn write(&self, dst: &mut VRegister, i: usize, value: u64) {
        dst.set_u64_lane(self.lane_bytes(), i, value);
    }

    /// All-ones / all-zeroes comparison mask for one lane.
    pub(crate) const fn mask(&self, on: bool) -> u64 {
        if on { mask_bits(self.lane_bits()) } else { 0 }
    }
}

pub(crate) const fn mask_bits(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1 << bits) - 1 }
}

pub(crate) const fn int_min(bits: u32) -> i128 {
    -(1_i128 << (bits - 1))
}

pub(crate) const fn int_max(bits: u32) -> i128 {
    (1_i128 << (bits - 1)) - 1
}

pub(crate) const fn uint_max(bits: u32) -> i128 {
    (1_i128 << bits) - 1
}

/// Clamp to the signed lane range, accumulating QC.
pub(crate) fn saturate_signed(fpsr: &mut Fpsr, value: i128, bits: u32) -> u64 {
    if value < int_min(bits) {
        fpsr.set_qc();
        (int_min(bits) as u64) & mask_bits(bits)
    } else if value > int_max(bits) {
        fpsr.set_qc();
        int_max(bits) as u64
    } else {
        (value as u64) & mask_bits(bits)
    }
}

/// Clamp to the unsigned lane range, accumulating QC.
pub(crate) fn saturate_unsigned(fpsr: &mut Fpsr, value: i128, bits: u32) -> u64 {
    if value < 0 {
        fpsr.set_qc();
        0
    } else if value > uint_max(bits) {
        fpsr.set_qc();
        mask_bits(bits)
    } else {
        value as u64
    }
}

// === Generic lane maps ===

pub(crate) fn map1_s(
    ctx: SimdCtx,
    a: &VRegister,
    f: impl Fn(i128) -> i128,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, f(ctx.s(a, i)) as u64);
    }
    dst
}

pub(crate) fn map2_s(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    f: impl Fn(i128, i128) -> i128,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, f(ctx.s(a, i), ctx.s(b, i)) as u64);
    }
    dst
}

pub(crate) fn map2_u(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    f: impl Fn(u128, u128) -> u128,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, f(ctx.u(a, i), ctx.u(b, i)) as u64);
    }
    dst
}

// === Integer arithmetic ===

pub(crate) fn add(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_s(ctx, a, b, |x, y| x + y)
}

pub(crate) fn sub(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_s(ctx, a, b, |x, y| x - y)
}

pub(crate) fn mul(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_s(ctx, a, b, |x, y| x * y)
}

/// MLA/MLS: accumulate a product into the destination.
pub(crate) fn mla(ctx: SimdCtx, acc: &VRegister, a: &VRegister, b: &VRegister, negate: bool) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let product = ctx.s(a, i) * ctx.s(b, i);
        let value = if negate {
            ctx.s(acc, i) - product
        } else {
            ctx.s(acc, i) + product
        };
        ctx.write(&mut dst, i, value as u64);
    }
    dst
}

pub(crate) fn neg(ctx: SimdCtx, a: &VRegister) -> VRegister {
    map1_s(ctx, a, |x| -x)
}

pub(crate) fn abs(ctx: SimdCtx, a: &VRegister) -> VRegister {
    map1_s(ctx, a, i128::abs)
}

/// SQABS/SQNEG: INT_MIN saturates.
pub(crate) fn sqabs(ctx: SimdCtx, fpsr: &mut Fpsr, a: &VRegister) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = saturate_signed(fpsr, ctx.s(a, i).abs(), ctx.lane_bits());
        ctx.write(&mut dst, i, value);
    }
    dst
}

pub(crate) fn sqneg(ctx: SimdCtx, fpsr: &mut Fpsr, a: &VRegister) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = saturate_signed(fpsr, -ctx.s(a, i), ctx.lane_bits());
        ctx.write(&mut dst, i, value);
    }
    dst
}

pub(crate) fn sat_add(
    ctx: SimdCtx,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = if signed {
            saturate_signed(fpsr, ctx.s(a, i) + ctx.s(b, i), ctx.lane_bits())
        } else {
            saturate_unsigned(fpsr, (ctx.u(a, i) + ctx.u(b, i)) as i128, ctx.lane_bits())
        };
        ctx.write(&mut dst, i, value);
    }
    dst
}

pub(crate) fn sat_sub(
    ctx: SimdCtx,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = if signed {
            saturate_signed(fpsr, ctx.s(a, i) - ctx.s(b, i), ctx.lane_bits())
        } else {
            saturate_unsigned(
                fpsr,
                ctx.u(a, i) as i128 - ctx.u(b, i) as i128,
                ctx.lane_bits(),
            )
        };
        ctx.write(&mut dst, i, value);
    }
    dst
}

/// Halving add/sub: arithmetic shift of the double-width result, with
/// optional rounding (+1 before the halving shift).
pub(crate) fn halving_add(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
    round: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let sum = if signed {
            ctx.s(a, i) + ctx.s(b, i)
        } else {
            (ctx.u(a, i) + ctx.u(b, i)) as i128
        };
        let value = (sum + i128::from(round)) >> 1;
        ctx.write(&mut dst, i, value as u64);
    }
    dst
}

pub(crate) fn halving_sub(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let diff = if signed {
            ctx.s(a, i) - ctx.s(b, i)
        } else {
            ctx.u(a, i) as i128 - ctx.u(b, i) as i128
        };
        ctx.write(&mut dst, i, (diff >> 1) as u64);
    }
    dst
}

/// Absolute difference.
pub(crate) fn abd(ctx: SimdCtx, a: &VRegister, b: &VRegister, signed: bool) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let diff = if signed {
            (ctx.s(a, i) - ctx.s(b, i)).abs()
        } else {
            (ctx.u(a, i) as i128 - ctx.u(b, i) as i128).abs()
        };
        ctx.write(&mut dst, i, diff as u64);
    }
    dst
}

pub(crate) fn smax(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_s(ctx, a, b, i128::max)
}

pub(crate) fn smin(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_s(ctx, a, b, i128::min)
}

pub(crate) fn umax(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_u(ctx, a, b, u128::max)
}

pub(crate) fn umin(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_u(ctx, a, b, u128::min)
}

/// Polynomial (carryless) multiply of the low 8 bits per lane.
pub(crate) fn pmul(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    map2_u(ctx, a, b, |x, y| {
        let mut acc = 0_u128;
        for bit in 0..8 {
            if (y >> bit) & 1 == 1 {
                acc ^= x << bit;
            }
        }
        acc
    })
}

/// Saturating doubling multiply returning the high half, with optional
/// rounding.
pub(crate) fn sqdmulh(
    ctx: SimdCtx,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
    round: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    let bits = ctx.lane_bits();
    for i in 0..ctx.lanes() {
        let mut product = 2 * ctx.s(a, i) * ctx.s(b, i);
        if round {
            product += 1 << (bits - 1);
        }
        let value = saturate_signed(fpsr, product >> bits, bits);
        ctx.write(&mut dst, i, value);
    }
    dst
}

// === Comparisons ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ge,
    Gt,
    Hi,
    Hs,
    Le,
    Lt,
    Ne,
    Lo,
    Ls,
}

/// Per-lane comparison producing an all-ones/all-zeroes mask.
pub(crate) fn cmp(ctx: SimdCtx, op: CmpOp, a: &VRegister, b: &VRegister) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let hit = cmp_lane(ctx, op, a, b, i);
        ctx.write(&mut dst, i, ctx.mask(hit));
    }
    dst
}

pub(crate) fn cmp_lane(ctx: SimdCtx, op: CmpOp, a: &VRegister, b: &VRegister, i: usize) -> bool {
    let (sa, sb) = (ctx.s(a, i), ctx.s(b, i));
    let (ua, ub) = (ctx.u(a, i), ctx.u(b, i));
    match op {
        CmpOp::Eq => sa == sb,
        CmpOp::Ne => sa != sb,
        CmpOp::Ge => sa >= sb,
        CmpOp::Gt => sa > sb,
        CmpOp::Le => sa <= sb,
        CmpOp::Lt => sa < sb,
        CmpOp::Hi => ua > ub,
        CmpOp::Hs => ua >= ub,
        CmpOp::Lo => ua < ub,
        CmpOp::Ls => ua <= ub,
    }
}

/// CMTST: test bits in common.
pub(crate) fn cmtst(ctx: SimdCtx, a: &VRegister, b: &VRegister) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, ctx.mask(ctx.u(a, i) & ctx.u(b, i) != 0));
    }
    dst
}

// === Shifts ===

/// SSHL/USHL: per-lane shift by the signed low byte of the shift
/// operand; negative amounts shift right. `round` adds the rounding
/// constant on right shifts (SRSHL/URSHL).
pub(crate) fn shl_var(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
    round: bool,
) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let amount = b.i64_lane(ctx.lane_bytes(), i) as i8 as i32;
        let value = if signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
        let shifted = shift_lane(value, amount, bits, round);
        ctx.write(&mut dst, i, shifted as u64);
    }
    dst
}

fn shift_lane(value: i128, amount: i32, bits: u32, round: bool) -> i128 {
    if amount >= 0 {
        if amount as u32 >= bits { 0 } else { value << amount }
    } else {
        let shift = (-amount) as u32;
        if shift > bits {
            0
        } else {
            let rounding = if round && shift >= 1 {
                1_i128 << (shift - 1)
            } else {
                0
            };
            (value + rounding) >> shift
        }
    }
}

/// Immediate left shift.
pub(crate) fn shl_imm(ctx: SimdCtx, a: &VRegister, shift: u32) -> VRegister {
    map2_u(ctx, a, a, |x, _| x << shift)
}

/// SQSHL/UQSHL/SQRSHL/UQRSHL (register): variable shift with
/// saturation on the left-shift overflow.
pub(crate) fn sat_shl_var(
    ctx: SimdCtx,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
    signed: bool,
    round: bool,
) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let amount = b.i64_lane(ctx.lane_bytes(), i) as i8 as i32;
        let value = if signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
        let shifted = shift_lane(value, amount, bits, round);
        let out = if signed {
            saturate_signed(fpsr, shifted, bits)
        } else {
            saturate_unsigned(fpsr, shifted, bits)
        };
        ctx.write(&mut dst, i, out);
    }
    dst
}

/// Immediate right shift with optional rounding; signed or logical.
pub(crate) fn shr_imm(
    ctx: SimdCtx,
    a: &VRegister,
    shift: u32,
    signed: bool,
    round: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = if signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
        let rounding = if round { 1_i128 << (shift - 1) } else { 0 };
        ctx.write(&mut dst, i, ((value + rounding) >> shift) as u64);
    }
    dst
}

/// Saturating immediate left shift: SQSHL (signed), UQSHL (unsigned),
/// SQSHLU (signed source, unsigned saturation).
pub(crate) fn sat_shl_imm(
    ctx: SimdCtx,
    fpsr: &mut Fpsr,
    a: &VRegister,
    shift: u32,
    src_signed: bool,
    dst_signed: bool,
) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = if src_signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
        let shifted = value << shift;
        let out = if dst_signed {
            saturate_signed(fpsr, shifted, bits)
        } else {
            saturate_unsigned(fpsr, shifted, bits)
        };
        ctx.write(&mut dst, i, out);
    }
    dst
}

// === Widening and narrowing support ===

/// Read a source lane for a widening op: lane `i` of the `part`-half of
/// `src`, viewed at half the context's lane width.
pub(crate) fn narrow_lane_s(ctx: SimdCtx, src: &VRegister, part: usize, i: usize) -> i128 {
    let half_bytes = ctx.lane_bytes() / 2;
    let base = part * ctx.lanes();
    i128::from(src.i64_lane(half_bytes, base + i))
}

pub(crate) fn narrow_lane_u(ctx: SimdCtx, src: &VRegister, part: usize, i: usize) -> u128 {
    let half_bytes = ctx.lane_bytes() / 2;
    let base = part * ctx.lanes();
    u128::from(src.u64_lane(half_bytes, base + i))
}

/// Generic widening binary op: `ctx` names the double-width result
/// format, sources are read at half width from the selected half.
pub(crate) fn widen2(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    part: usize,
    signed: bool,
    f: impl Fn(i128, i128) -> i128,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let (x, y) = if signed {
            (narrow_lane_s(ctx, a, part, i), narrow_lane_s(ctx, b, part, i))
        } else {
            (
                narrow_lane_u(ctx, a, part, i) as i128,
                narrow_lane_u(ctx, b, part, i) as i128,
            )
        };
        ctx.write(&mut dst, i, f(x, y) as u64);
    }
    dst
}

/// How a narrowing kernel treats the double-width value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NarrowMode {
    /// Plain truncation (XTN, SHRN).
    Truncate,
    /// Signed saturation of a signed source (SQXTN, SQSHRN).
    SignedToSigned,
    /// Unsigned saturation of a signed source (SQXTUN, SQSHRUN).
    SignedToUnsigned,
    /// Unsigned saturation of an unsigned source (UQXTN, UQSHRN).
    UnsignedToUnsigned,
}

/// Narrow `wide` (already shifted) into a lane of `narrow_bits`.
pub(crate) fn narrow_value(
    fpsr: &mut Fpsr,
    wide: i128,
    narrow_bits: u32,
    mode: NarrowMode,
) -> u64 {
    match mode {
        NarrowMode::Truncate => (wide as u64) & mask_bits(narrow_bits),
        NarrowMode::SignedToSigned => saturate_signed(fpsr, wide, narrow_bits),
        NarrowMode::SignedToUnsigned | NarrowMode::UnsignedToUnsigned => {
            saturate_unsigned(fpsr, wide, narrow_bits)
        }
    }
}

/// Write a narrowed result register: lanes land in the selected half of
/// `dst_in`; part 0 clears the upper half, part 1 preserves the lower.
pub(crate) fn narrow_into(
    ctx_narrow: SimdCtx,
    dst_in: &VRegister,
    part: usize,
    values: &[u64],
) -> VRegister {
    let mut dst = if part == 0 {
        VRegister::zeroed()
    } else {
        *dst_in
    };
    let base = part * values.len();
    for (i, &value) in values.iter().enumerate() {
        ctx_narrow.write(&mut dst, base + i, value);
    }
    dst
}

// === Bitwise ===

pub(crate) fn bytewise(
    active_bytes: usize,
    a: &VRegister,
    b: &VRegister,
    f: impl Fn(u8, u8) -> u8,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..active_bytes {
        dst.bytes_mut()[i] = f(a.bytes()[i], b.bytes()[i]);
    }
    dst
}

/// BSL/BIT/BIF family: bitwise select with the destination as the mask
/// or data operand.
pub(crate) fn bit_select(
    active_bytes: usize,
    mask: &VRegister,
    if_set: &VRegister,
    if_clear: &VRegister,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..active_bytes {
        let m = mask.bytes()[i];
        dst.bytes_mut()[i] = (if_set.bytes()[i] & m) | (if_clear.bytes()[i] & !m);
    }
    dst
}

// === Lane-unary bit ops ===

pub(crate) fn clz_lanes(ctx: SimdCtx, a: &VRegister) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = ctx.u(a, i) as u64;
        let count = if value == 0 {
            u64::from(bits)
        } else {
            u64::from(value.leading_zeros() - (64 - bits))
        };
        ctx.write(&mut dst, i, count);
    }
    dst
}

pub(crate) fn cls_lanes(ctx: SimdCtx, a: &VRegister) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = ctx.u(a, i) as u64;
        ctx.write(&mut dst, i, crate::alu::cls(bits, value));
    }
    dst
}

pub(crate) fn cnt_lanes(ctx: SimdCtx, a: &VRegister) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, u64::from((ctx.u(a, i) as u64).count_ones()));
    }
    dst
}

pub(crate) fn rbit_lanes(ctx: SimdCtx, a: &VRegister) -> VRegister {
    let bits = ctx.lane_bits();
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = (ctx.u(a, i) as u64).reverse_bits() >> (64 - bits);
        ctx.write(&mut dst, i, value);
    }
    dst
}

/// REV16/REV32/REV64: reverse the lane order inside each
/// `group_bytes`-sized container.
pub(crate) fn rev_lanes(ctx: SimdCtx, a: &VRegister, group_bytes: usize) -> VRegister {
    let lane_bytes = ctx.lane_bytes();
    let active = ctx.lanes() * lane_bytes;
    let elems = group_bytes / lane_bytes;
    let mut dst = VRegister::zeroed();
    for group in (0..active).step_by(group_bytes) {
        for e in 0..elems {
            let src = group + e * lane_bytes;
            let out = group + (elems - 1 - e) * lane_bytes;
            for b in 0..lane_bytes {
                dst.bytes_mut()[out + b] = a.bytes()[src + b];
            }
        }
    }
    dst
}

// === Permutes ===

/// EXT: concatenate and extract bytes starting at `index`.
pub(crate) fn ext(active_bytes: usize, a: &VRegister, b: &VRegister, index: usize) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..active_bytes {
        let src = index + i;
        dst.bytes_mut()[i] = if src < active_bytes {
            a.bytes()[src]
        } else {
            b.bytes()[src - active_bytes]
        };
    }
    dst
}

pub(crate) fn zip(ctx: SimdCtx, a: &VRegister, b: &VRegister, part: usize) -> VRegister {
    let lanes = ctx.lanes();
    let half = lanes / 2;
    let base = part * half;
    let mut dst = VRegister::zeroed();
    for i in 0..half {
        ctx.write(&mut dst, 2 * i, a.u64_lane(ctx.lane_bytes(), base + i));
        ctx.write(&mut dst, 2 * i + 1, b.u64_lane(ctx.lane_bytes(), base + i));
    }
    dst
}

pub(crate) fn uzp(ctx: SimdCtx, a: &VRegister, b: &VRegister, part: usize) -> VRegister {
    let lanes = ctx.lanes();
    let mut dst = VRegister::zeroed();
    for i in 0..lanes {
        let src = 2 * i + part;
        let value = if src < lanes {
            a.u64_lane(ctx.lane_bytes(), src)
        } else {
            b.u64_lane(ctx.lane_bytes(), src - lanes)
        };
        ctx.write(&mut dst, i, value);
    }
    dst
}

pub(crate) fn trn(ctx: SimdCtx, a: &VRegister, b: &VRegister, part: usize) -> VRegister {
    let lanes = ctx.lanes();
    let mut dst = VRegister::zeroed();
    for i in 0..lanes / 2 {
        ctx.write(&mut dst, 2 * i, a.u64_lane(ctx.lane_bytes(), 2 * i + part));
        ctx.write(&mut dst, 2 * i + 1, b.u64_lane(ctx.lane_bytes(), 2 * i + part));
    }
    dst
}

/// DUP: broadcast one source lane (or a general register value).
pub(crate) fn dup_lane(ctx: SimdCtx, a: &VRegister, index: usize) -> VRegister {
    let value = a.u64_lane(ctx.lane_bytes(), index);
    dup_imm(ctx, value)
}

pub(crate) fn dup_imm(ctx: SimdCtx, value: u64) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        ctx.write(&mut dst, i, value);
    }
    dst
}

/// TBL/TBX: byte table lookup across 1-4 consecutive table registers.
pub(crate) fn table_lookup(
    active_bytes: usize,
    table: &[VRegister],
    indices: &VRegister,
    fill: &VRegister,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    let table_len = table.len() * 16;
    for i in 0..active_bytes {
        let index = indices.bytes()[i] as usize;
        dst.bytes_mut()[i] = if index < table_len {
            table[index / 16].bytes()[index % 16]
        } else {
            fill.bytes()[i]
        };
    }
    dst
}

// === Reductions and pairwise ===

/// ADDV and friends: sum every lane, truncated to the lane width.
pub(crate) fn reduce_add(ctx: SimdCtx, a: &VRegister) -> u64 {
    let mut acc = 0_i128;
    for i in 0..ctx.lanes() {
        acc += ctx.s(a, i);
    }
    (acc as u64) & mask_bits(ctx.lane_bits())
}

/// SADDLV/UADDLV: double-width sum.
pub(crate) fn reduce_addl(ctx: SimdCtx, a: &VRegister, signed: bool) -> u64 {
    let mut acc = 0_i128;
    for i in 0..ctx.lanes() {
        acc += if signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
    }
    (acc as u64) & mask_bits(2 * ctx.lane_bits())
}

pub(crate) fn reduce_minmax(ctx: SimdCtx, a: &VRegister, signed: bool, max: bool) -> u64 {
    let mut acc = if signed {
        ctx.s(a, 0)
    } else {
        ctx.u(a, 0) as i128
    };
    for i in 1..ctx.lanes() {
        let value = if signed { ctx.s(a, i) } else { ctx.u(a, i) as i128 };
        acc = if max { acc.max(value) } else { acc.min(value) };
    }
    (acc as u64) & mask_bits(ctx.lane_bits())
}

/// ADDP and integer pairwise min/max: lanes of the result come from
/// adjacent pairs of the concatenation a:b.
pub(crate) fn pairwise(
    ctx: SimdCtx,
    a: &VRegister,
    b: &VRegister,
    f: impl Fn(i128, i128) -> i128,
) -> VRegister {
    let lanes = ctx.lanes();
    let mut dst = VRegister::zeroed();
    let read = |r: &VRegister, i: usize| ctx.s(r, i);
    for i in 0..lanes {
        let (lo, hi) = if 2 * i < lanes {
            (read(a, 2 * i), read(a, 2 * i + 1))
        } else {
            (read(b, 2 * i - lanes), read(b, 2 * i + 1 - lanes))
        };
        ctx.write(&mut dst, i, f(lo, hi) as u64);
    }
    dst
}

// === Floating-point lane kernels ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FpBinOp {
    Add,
    Sub,
    Mul,
    Mulx,
    Div,
    Max,
    Min,
    Maxnm,
    Minnm,
    Abd,
    Recps,
    Rsqrts,
}

fn fp_bin<T: FpNum>(op: FpBinOp, fpcr: Fpcr, fpsr: &mut Fpsr, a: T, b: T) -> T {
    match op {
        FpBinOp::Add => fp::fp_add(fpcr, fpsr, a, b),
        FpBinOp::Sub => fp::fp_sub(fpcr, fpsr, a, b),
        FpBinOp::Mul => fp::fp_mul(fpcr, fpsr, a, b),
        FpBinOp::Mulx => fp::fp_mulx(fpcr, fpsr, a, b),
        FpBinOp::Div => fp::fp_div(fpcr, fpsr, a, b),
        FpBinOp::Max => fp::fp_max(fpcr, fpsr, a, b),
        FpBinOp::Min => fp::fp_min(fpcr, fpsr, a, b),
        FpBinOp::Maxnm => fp::fp_maxnm(fpcr, fpsr, a, b),
        FpBinOp::Minnm => fp::fp_minnm(fpcr, fpsr, a, b),
        FpBinOp::Abd => fp::fp_abd(fpcr, fpsr, a, b),
        FpBinOp::Recps => fp::fp_recip_step(fpcr, fpsr, a, b),
        FpBinOp::Rsqrts => fp::fp_rsqrt_step(fpcr, fpsr, a, b),
    }
}

fn fp_bin_lane(
    ctx: SimdCtx,
    op: FpBinOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
    i: usize,
) -> u64 {
    match ctx.lane_bits() {
        16 => {
            let (x, y) = (
                a.u64_lane(2, i) as u16,
                b.u64_lane(2, i) as u16,
            );
            u64::from(fp::f16_binary(fpcr, fpsr, x, y, |c, s, wx, wy| {
                fp_bin::<f64>(op, c, s, wx, wy)
            }))
        }
        32 => {
            let value = fp_bin::<f32>(op, fpcr, fpsr, a.f32_lane(i), b.f32_lane(i));
            u64::from(value.to_bits())
        }
        _ => fp_bin::<f64>(op, fpcr, fpsr, a.f64_lane(i), b.f64_lane(i)).to_bits(),
    }
}

pub(crate) fn fp_binary(
    ctx: SimdCtx,
    op: FpBinOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = fp_bin_lane(ctx, op, fpcr, fpsr, a, b, i);
        ctx.write(&mut dst, i, value);
    }
    dst
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FpUnOp {
    Abs,
    Neg,
    Sqrt,
    RecipEstimate,
    RsqrtEstimate,
}

fn fp_un<T: FpNum>(op: FpUnOp, fpcr: Fpcr, fpsr: &mut Fpsr, a: T) -> T {
    match op {
        FpUnOp::Abs => fp::fp_abs(a),
        FpUnOp::Neg => fp::fp_neg(a),
        FpUnOp::Sqrt => fp::fp_sqrt(fpcr, fpsr, a),
        FpUnOp::RecipEstimate => fp::fp_recip_estimate(fpcr, fpsr, a),
        FpUnOp::RsqrtEstimate => fp::fp_rsqrt_estimate(fpcr, fpsr, a),
    }
}

pub(crate) fn fp_unary(
    ctx: SimdCtx,
    op: FpUnOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = match ctx.lane_bits() {
            16 => {
                let x = a.u64_lane(2, i) as u16;
                // Sign ops act on the bit pattern; the rest widen.
                match op {
                    FpUnOp::Abs => u64::from(x & 0x7fff),
                    FpUnOp::Neg => u64::from(x ^ 0x8000),
                    _ => {
                        let wide = fp::f16_to_f64(x, false);
                        let result = fp_un::<f64>(op, fpcr, fpsr, wide);
                        u64::from(fp::f64_to_f16(fpsr, result, fpcr.rounding(), false))
                    }
                }
            }
            32 => u64::from(fp_un::<f32>(op, fpcr, fpsr, a.f32_lane(i)).to_bits()),
            _ => fp_un::<f64>(op, fpcr, fpsr, a.f64_lane(i)).to_bits(),
        };
        ctx.write(&mut dst, i, value);
    }
    dst
}

/// FMLA/FMLS: fused per-lane multiply-accumulate.
pub(crate) fn fp_mla(
    ctx: SimdCtx,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    acc: &VRegister,
    a: &VRegister,
    b: &VRegister,
    negate_product: bool,
) -> VRegister {
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let value = match ctx.lane_bits() {
            32 => {
                let n = if negate_product {
                    fp::fp_neg(a.f32_lane(i))
                } else {
                    a.f32_lane(i)
                };
                u64::from(
                    fp::fp_mul_add(fpcr, fpsr, acc.f32_lane(i), n, b.f32_lane(i)).to_bits(),
                )
            }
            _ => {
                let n = if negate_product {
                    fp::fp_neg(a.f64_lane(i))
                } else {
                    a.f64_lane(i)
                };
                fp::fp_mul_add(fpcr, fpsr, acc.f64_lane(i), n, b.f64_lane(i)).to_bits()
            }
        };
        ctx.write(&mut dst, i, value);
    }
    dst
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FpCmpOp {
    Eq,
    Ge,
    Gt,
    AbsGe,
    AbsGt,
    Le,
    Lt,
}

/// FP lane compares producing all-ones masks. Unordered compares are
/// false.
pub(crate) fn fp_cmp(
    ctx: SimdCtx,
    op: FpCmpOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
) -> VRegister {
    let _ = fpcr;
    let mut dst = VRegister::zeroed();
    for i in 0..ctx.lanes() {
        let (x, y) = match ctx.lane_bits() {
            16 => (
                fp::f16_to_f64(a.u64_lane(2, i) as u16, false),
                fp::f16_to_f64(b.u64_lane(2, i) as u16, false),
            ),
            32 => (f64::from(a.f32_lane(i)), f64::from(b.f32_lane(i))),
            _ => (a.f64_lane(i), b.f64_lane(i)),
        };
        let (x, y) = match op {
            FpCmpOp::AbsGe | FpCmpOp::AbsGt => (x.abs(), y.abs()),
            _ => (x, y),
        };
        if (x.is_nan() || y.is_nan()) && matches!(op, FpCmpOp::AbsGe | FpCmpOp::AbsGt) {
            fpsr.set_ioc();
        }
        let hit = match op {
            FpCmpOp::Eq => x == y,
            FpCmpOp::Ge | FpCmpOp::AbsGe => x >= y,
            FpCmpOp::Gt | FpCmpOp::AbsGt => x > y,
            FpCmpOp::Le => x <= y,
            FpCmpOp::Lt => x < y,
        };
        ctx.write(&mut dst, i, ctx.mask(hit));
    }
    dst
}

/// FADDP/FMAXP/FMINP and the NM variants: pairwise over a:b.
pub(crate) fn fp_pairwise(
    ctx: SimdCtx,
    op: FpBinOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
    b: &VRegister,
) -> VRegister {
    let lanes = ctx.lanes();
    let lane_bytes = ctx.lane_bytes();
    let mut dst = VRegister::zeroed();
    // Materialize the concatenation, then reuse the binary kernel on
    // even/odd shuffles.
    let mut evens = VRegister::zeroed();
    let mut odds = VRegister::zeroed();
    for i in 0..lanes {
        let (lo_reg, lo_index) = if 2 * i < lanes { (a, 2 * i) } else { (b, 2 * i - lanes) };
        let (hi_reg, hi_index) = if 2 * i + 1 < lanes {
            (a, 2 * i + 1)
        } else {
            (b, 2 * i + 1 - lanes)
        };
        evens.set_u64_lane(lane_bytes, i, lo_reg.u64_lane(lane_bytes, lo_index));
        odds.set_u64_lane(lane_bytes, i, hi_reg.u64_lane(lane_bytes, hi_index));
    }
    for i in 0..lanes {
        let value = fp_bin_lane(ctx, op, fpcr, fpsr, &evens, &odds, i);
        ctx.write(&mut dst, i, value);
    }
    dst
}

/// FMAXV/FMINV and the NM variants.
pub(crate) fn fp_reduce(
    ctx: SimdCtx,
    op: FpBinOp,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
    a: &VRegister,
) -> u64 {
    let mut acc = a.u64_lane(ctx.lane_bytes(), 0);
    let lane_bytes = ctx.lane_bytes();
    for i in 1..ctx.lanes() {
        let mut lhs = VRegister::zeroed();
        let mut rhs = VRegister::zeroed();
        lhs.set_u64_lane(lane_bytes, 0, acc);
        rhs.set_u64_lane(lane_bytes, 0, a.u64_lane(lane_bytes, i));
        acc = fp_bin_lane(ctx, op, fpcr, fpsr, &lhs, &rhs, 0);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v_with(lane_bytes: usize, values: &[u64]) -> VRegister {
        let mut v = VRegister::zeroed();
        for (i, &value) in values.iter().enumerate() {
            v.set_u64_lane(lane_bytes, i, value);
        }
        v
    }

    #[test]
    fn lane_add_wraps() {
        let ctx = SimdCtx::new(VectorFormat::V8B, 128);
        let a = v_with(1, &[0xff, 1, 2, 3, 4, 5, 6, 7]);
        let b = v_with(1, &[1; 8]);
        let sum = add(ctx, &a, &b);
        assert_eq!(sum.u64_lane(1, 0), 0); // wrapped
        assert_eq!(sum.u64_lane(1, 7), 8);
        // Upper half of the 128-bit register stays clear for 64-bit forms.
        assert_eq!(sum.u64_lane(8, 1), 0);
    }

    #[test]
    fn saturating_add_sets_qc() {
        let ctx = SimdCtx::new(VectorFormat::V8H, 128);
        let mut fpsr = Fpsr::new();
        let a = v_with(2, &[0x7fff; 8]);
        let b = v_with(2, &[1; 8]);
        let sat = sat_add(ctx, &mut fpsr, &a, &b, true);
        assert_eq!(sat.u64_lane(2, 0), 0x7fff);
        assert!(fpsr.qc());

        let mut fpsr = Fpsr::new();
        let sat = sat_add(ctx, &mut fpsr, &a, &b, false);
        assert_eq!(sat.u64_lane(2, 0), 0x8000);
        assert!(!fpsr.qc());
    }

    #[test]
    fn rounding_halving_add() {
        let ctx = SimdCtx::new(VectorFormat::V4S, 128);
        let a = v_with(4, &[1, 2, 3, 0xffff_ffff]);
        let b = v_with(4, &[2, 2, 4, 0xffff_ffff]);
        // URHADD: (a + b + 1) >> 1.
        let r = halving_add(ctx, &a, &b, false, true);
        assert_eq!(r.u64_lane(4, 0), 2);
        assert_eq!(r.u64_lane(4, 1), 2);
        assert_eq!(r.u64_lane(4, 2), 4);
        assert_eq!(r.u64_lane(4, 3), 0xffff_ffff);
    }

    #[test]
    fn variable_shift_negative_goes_right() {
        let ctx = SimdCtx::new(VectorFormat::V2D, 128);
        let a = v_with(8, &[0x100, 0x100]);
        let b = v_with(8, &[4, (-4_i64) as u64 & 0xff]);
        let r = shl_var(ctx, &a, &b, false, false);
        assert_eq!(r.u64_lane(8, 0), 0x1000);
        assert_eq!(r.u64_lane(8, 1), 0x10);
    }

    #[test]
    fn compare_masks() {
        let ctx = SimdCtx::new(VectorFormat::V4H, 128);
        let a = v_with(2, &[1, 2, 0x8000, 4]);
        let b = v_with(2, &[1, 3, 1, 3]);
        let eq = cmp(ctx, CmpOp::Eq, &a, &b);
        assert_eq!(eq.u64_lane(2, 0), 0xffff);
        assert_eq!(eq.u64_lane(2, 1), 0);
        // 0x8000 is negative signed, large unsigned.
        let gt = cmp(ctx, CmpOp::Gt, &a, &b);
        assert_eq!(gt.u64_lane(2, 2), 0);
        let hi = cmp(ctx, CmpOp::Hi, &a, &b);
        assert_eq!(hi.u64_lane(2, 2), 0xffff);
    }

    #[test]
    fn table_lookup_out_of_range() {
        let table = [v_with(1, &(0..16_u64).map(|i| i + 0x40).collect::<Vec<_>>())];
        let indices = v_with(1, &[0, 15, 16, 2, 0, 0, 0, 0]);
        let fill = v_with(1, &[0xaa; 8]);
        // TBL: out of range reads zero.
        let tbl = table_lookup(8, &table, &indices, &VRegister::zeroed());
        assert_eq!(tbl.u64_lane(1, 0), 0x40);
        assert_eq!(tbl.u64_lane(1, 1), 0x4f);
        assert_eq!(tbl.u64_lane(1, 2), 0);
        // TBX: out of range keeps the destination.
        let tbx = table_lookup(8, &table, &indices, &fill);
        assert_eq!(tbx.u64_lane(1, 2), 0xaa);
    }

    #[test]
    fn zip_interleaves() {
        let ctx = SimdCtx::new(VectorFormat::V4S, 128);
        let a = v_with(4, &[1, 2, 3, 4]);
        let b = v_with(4, &[5, 6, 7, 8]);
        let z1 = zip(ctx, &a, &b, 0);
        assert_eq!(
            (0..4).map(|i| z1.u64_lane(4, i)).collect::<Vec<_>>(),
            vec![1, 5, 2, 6]
        );
        let z2 = zip(ctx, &a, &b, 1);
        assert_eq!(
            (0..4).map(|i| z2.u64_lane(4, i)).collect::<Vec<_>>(),
            vec![3, 7, 4, 8]
        );
    }

    #[test]
    fn pairwise_add() {
        let ctx = SimdCtx::new(VectorFormat::V4S, 128);
        let a = v_with(4, &[1, 2, 3, 4]);
        let b = v_with(4, &[10, 20, 30, 40]);
        let p = pairwise(ctx, &a, &b, |x, y| x + y);
        assert_eq!(
            (0..4).map(|i| p.u64_lane(4, i)).collect::<Vec<_>>(),
            vec![3, 7, 30, 70]
        );
    }

    #[test]
    fn reductions() {
        let ctx = SimdCtx::new(VectorFormat::V8B, 128);
        let a = v_with(1, &[1, 2, 3, 4, 5, 6, 7, 0xff]);
        assert_eq!(reduce_add(ctx, &a), (28 + 0xff) as u64 & 0xff);
        assert_eq!(reduce_addl(ctx, &a, false), 28 + 0xff);
        // Signed: 0xff is -1.
        assert_eq!(reduce_addl(ctx, &a, true), 27);
        assert_eq!(reduce_minmax(ctx, &a, false, true), 0xff);
        assert_eq!(reduce_minmax(ctx, &a, true, false), 0xff); // -1 is minimum
    }

    #[test]
    fn sqdmulh_saturates() {
        let ctx = SimdCtx::new(VectorFormat::V4H, 128);
        let mut fpsr = Fpsr::new();
        let a = v_with(2, &[0x8000, 0x4000, 0, 0]);
        let b = v_with(2, &[0x8000, 0x4000, 0, 0]);
        let r = sqdmulh(ctx, &mut fpsr, &a, &b, false);
        // (-32768)^2 * 2 >> 16 saturates to 0x7fff.
        assert_eq!(r.u64_lane(2, 0), 0x7fff);
        assert!(fpsr.qc());
        // 0.5 * 0.5 * 2 = 0.5 -> 0x2000.
        assert_eq!(r.u64_lane(2, 1), 0x2000);
    }

    #[test]
    fn fp_lane_binary_and_compare() {
        let ctx = SimdCtx::new(VectorFormat::V4S, 128);
        let fpcr = Fpcr::new();
        let mut fpsr = Fpsr::new();
        let mut a = VRegister::zeroed();
        let mut b = VRegister::zeroed();
        for i in 0..4 {
            a.set_u64_lane(4, i, u64::from((i as f32 + 1.0).to_bits()));
            b.set_u64_lane(4, i, u64::from(2.0_f32.to_bits()));
        }
        let sum = fp_binary(ctx, FpBinOp::Add, fpcr, &mut fpsr, &a, &b);
        assert_eq!(sum.f32_lane(0), 3.0);
        assert_eq!(sum.f32_lane(3), 6.0);

        let ge = fp_cmp(ctx, FpCmpOp::Ge, fpcr, &mut fpsr, &a, &b);
        assert_eq!(ge.u64_lane(4, 0), 0); // 1.0 < 2.0
        assert_eq!(ge.u64_lane(4, 1), 0xffff_ffff);
    }

    #[test]
    fn fp_pairwise_and_reduce() {
        let ctx = SimdCtx::new(VectorFormat::V4S, 128);
        let fpcr = Fpcr::new();
        let mut fpsr = Fpsr::new();
        let mut a = VRegister::zeroed();
        for (i, v) in [1.0_f32, 4.0, 2.0, 8.0].iter().enumerate() {
            a.set_u64_lane(4, i, u64::from(v.to_bits()));
        }
        let p = fp_pairwise(ctx, FpBinOp::Add, fpcr, &mut fpsr, &a, &a);
        assert_eq!(p.f32_lane(0), 5.0);
        assert_eq!(p.f32_lane(1), 10.0);
        let max = fp_reduce(ctx, FpBinOp::Max, fpcr, &mut fpsr, &a);
        assert_eq!(f32::from_bits(max as u32), 8.0);
    }
}
