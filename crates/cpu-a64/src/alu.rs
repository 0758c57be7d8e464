//! Integer arithmetic helpers.
//!
//! Pure functions over 32- or 64-bit register values. Results are always
//! returned in the low `reg_size` bits of a `u64`; W-width zero-extension
//! is the register file's concern, not the ALU's.

use a64_core::{ExtendOp, ShiftOp};

use crate::flags::Nzcv;

/// A computed value together with the flags the operation would set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlaggedResult {
    pub value: u64,
    pub nzcv: Nzcv,
}

/// Mask selecting the low `reg_size` bits.
#[inline]
pub(crate) const fn reg_mask(reg_size: u32) -> u64 {
    if reg_size == 64 {
        u64::MAX
    } else {
        (1 << reg_size) - 1
    }
}

/// Sign bit of a `reg_size`-wide value.
#[inline]
pub(crate) const fn sign_bit(reg_size: u32, value: u64) -> bool {
    (value >> (reg_size - 1)) & 1 == 1
}

/// `left + right + carry_in` modulo `2^reg_size`, with the NZCV recipe:
/// N from the result sign, Z from a zero result, C from unsigned
/// overflow, V from signed overflow.
pub(crate) fn add_with_carry(reg_size: u32, left: u64, right: u64, carry_in: bool) -> FlaggedResult {
    let mask = reg_mask(reg_size);
    let l = left & mask;
    let r = right & mask;
    let carry = u64::from(carry_in);

    let wide = u128::from(l) + u128::from(r) + u128::from(carry);
    let value = (wide as u64) & mask;

    let n = sign_bit(reg_size, value);
    let z = value == 0;
    let c = wide > u128::from(mask);
    // Signed overflow: operands agree in sign and the result disagrees.
    let v = sign_bit(reg_size, l) == sign_bit(reg_size, r) && sign_bit(reg_size, l) != n;

    FlaggedResult {
        value,
        nzcv: Nzcv::from_flags(n, z, c, v),
    }
}

/// Apply a shift operation within `reg_size` bits. Amount 0 is the
/// identity for every mode.
pub(crate) fn shift_value(reg_size: u32, value: u64, op: ShiftOp, amount: u32) -> u64 {
    let mask = reg_mask(reg_size);
    let value = value & mask;
    if amount == 0 {
        return value;
    }
    debug_assert!(amount < reg_size);
    match op {
        ShiftOp::Lsl => (value << amount) & mask,
        ShiftOp::Lsr => value >> amount,
        ShiftOp::Asr => {
            // Sign-fill only within the register width.
            let shifted = value >> amount;
            if sign_bit(reg_size, value) {
                let fill = mask & !(mask >> amount);
                shifted | fill
            } else {
                shifted
            }
        }
        ShiftOp::Ror => ((value >> amount) | (value << (reg_size - amount))) & mask,
    }
}

/// Apply an extend-then-shift operand transform: mask to the extend
/// width, sign-fill for the S variants, then LSL by `left_shift`.
pub(crate) fn extend_value(reg_size: u32, value: u64, op: ExtendOp, left_shift: u32) -> u64 {
    let extended = match op {
        ExtendOp::Uxtb => value & 0xff,
        ExtendOp::Uxth => value & 0xffff,
        ExtendOp::Uxtw => value & 0xffff_ffff,
        ExtendOp::Uxtx => value,
        ExtendOp::Sxtb => (value as u8 as i8 as i64) as u64,
        ExtendOp::Sxth => (value as u16 as i16 as i64) as u64,
        ExtendOp::Sxtw => (value as u32 as i32 as i64) as u64,
        ExtendOp::Sxtx => value,
    };
    (extended << left_shift) & reg_mask(reg_size)
}

/// Count leading zero bits of a `reg_size`-wide value.
pub(crate) fn clz(reg_size: u32, value: u64) -> u64 {
    let value = value & reg_mask(reg_size);
    if value == 0 {
        u64::from(reg_size)
    } else {
        u64::from(value.leading_zeros() - (64 - reg_size))
    }
}

/// Count leading sign bits (excluding the sign bit itself).
pub(crate) fn cls(reg_size: u32, value: u64) -> u64 {
    let value = value & reg_mask(reg_size);
    // XOR with a copy shifted by one turns a sign-run into a zero-run.
    let diff = (value ^ (value >> 1)) & reg_mask(reg_size - 1);
    clz(reg_size - 1, diff)
}

/// Reverse the bit order of a `reg_size`-wide value.
pub(crate) fn rbit(reg_size: u32, value: u64) -> u64 {
    (value & reg_mask(reg_size)).reverse_bits() >> (64 - reg_size)
}

/// Reverse bytes within each `group_bytes`-sized chunk (REV16/REV32/REV64).
pub(crate) fn rev_bytes(reg_size: u32, value: u64, group_bytes: u32) -> u64 {
    let mut result = 0_u64;
    let groups = reg_size / 8 / group_bytes;
    for g in 0..groups {
        for b in 0..group_bytes {
            let src = (g * group_bytes + b) * 8;
            let dst = (g * group_bytes + (group_bytes - 1 - b)) * 8;
            result |= ((value >> src) & 0xff) << dst;
        }
    }
    result
}

/// CRC32 polynomial (CRC32B/H/W/X).
pub(crate) const CRC32_POLY: u32 = 0x04c1_1db7;
/// CRC32C (Castagnoli) polynomial (CRC32CB/H/W/X).
pub(crate) const CRC32C_POLY: u32 = 0x1edc_6f41;

/// Accumulate `size_bytes` of `value` into a reflected CRC32 checksum by
/// bit-serial polynomial long division. No initial or final inversion:
/// the accumulator is exactly the architectural register value.
pub(crate) fn crc32(acc: u32, value: u64, size_bytes: u32, poly: u32) -> u32 {
    let reflected_poly = poly.reverse_bits();
    let mut crc = acc;
    for byte_index in 0..size_bytes {
        let byte = (value >> (byte_index * 8)) as u8;
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ reflected_poly;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// The BFM/SBFM/UBFM kernel.
///
/// `wmask` selects which bits of the rotated source land in the result;
/// `tmask` bounds the destination field (S−R+1 bits, wrapping when
/// S < R). SBFM replicates the sign of the selected region above the
/// field; UBFM/SBFM start from a zeroed destination.
pub(crate) fn bitfield(
    reg_size: u32,
    src: u64,
    dst: u64,
    immr: u32,
    imms: u32,
    in_zero: bool,
    extend_sign: bool,
) -> u64 {
    let mask = reg_mask(reg_size);
    let src = src & mask;
    let dst = dst & mask;

    let ones = |n: u32| -> u64 {
        if n >= 64 { u64::MAX } else { (1 << n) - 1 }
    };

    let wmask = shift_value(reg_size, ones(imms + 1), ShiftOp::Ror, immr);
    let diff = imms.wrapping_sub(immr) & (reg_size - 1);
    let tmask = ones(diff + 1);

    let rotated = shift_value(reg_size, src, ShiftOp::Ror, immr);
    let bot = if in_zero {
        rotated & wmask
    } else {
        (dst & !wmask) | (rotated & wmask)
    };
    let top = if extend_sign {
        if (src >> imms) & 1 == 1 { mask } else { 0 }
    } else if in_zero {
        0
    } else {
        dst
    };

    ((top & !tmask) | (bot & tmask)) & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn add_with_carry_basics() {
        // 0xFFFFFFFF + 1 wraps with carry out, no signed overflow.
        let r = add_with_carry(32, 0xffff_ffff, 1, false);
        assert_eq!(r.value, 0);
        assert!(!r.nzcv.n() && r.nzcv.z() && r.nzcv.c() && !r.nzcv.v());

        // 0x80000000 - 1 (as add of NOT + carry) overflows signed.
        let r = add_with_carry(32, 0x8000_0000, !1_u64, true);
        assert_eq!(r.value, 0x7fff_ffff);
        assert!(!r.nzcv.n() && !r.nzcv.z() && r.nzcv.c() && r.nzcv.v());
    }

    #[test]
    fn asr_sign_fills_within_width_only() {
        assert_eq!(shift_value(32, 0x8000_0000, ShiftOp::Asr, 4), 0xf800_0000);
        assert_eq!(shift_value(64, 0x8000_0000, ShiftOp::Asr, 4), 0x0800_0000);
    }

    #[test]
    fn ror_wraps_within_width() {
        assert_eq!(shift_value(32, 0x0000_0001, ShiftOp::Ror, 1), 0x8000_0000);
        assert_eq!(shift_value(64, 1, ShiftOp::Ror, 1), 0x8000_0000_0000_0000);
    }

    #[test]
    fn extend_masks_then_shifts() {
        assert_eq!(extend_value(64, 0x1ff, ExtendOp::Uxtb, 4), 0xff0);
        assert_eq!(
            extend_value(64, 0x80, ExtendOp::Sxtb, 0),
            0xffff_ffff_ffff_ff80
        );
        assert_eq!(extend_value(32, 0x8000, ExtendOp::Sxth, 1), 0xffff_0000);
    }

    #[test]
    fn leading_counts() {
        assert_eq!(clz(32, 0), 32);
        assert_eq!(clz(32, 1), 31);
        assert_eq!(clz(64, 1 << 63), 0);
        assert_eq!(cls(32, 0), 31);
        assert_eq!(cls(32, 0xffff_ffff), 31);
        assert_eq!(cls(32, 0xf000_0000), 3);
        assert_eq!(cls(64, 0x00ff_ffff_ffff_ffff), 7);
    }

    #[test]
    fn byte_reversal() {
        assert_eq!(rev_bytes(32, 0x1122_3344, 4), 0x4433_2211);
        assert_eq!(rev_bytes(32, 0x1122_3344, 2), 0x2211_4433);
        assert_eq!(
            rev_bytes(64, 0x0102_0304_0506_0708, 8),
            0x0807_0605_0403_0201
        );
    }

    #[test]
    fn crc32_known_vectors() {
        // CRC32 of "123456789" with standard init/final handling applied
        // externally: acc starts at !0, finishes with inversion.
        let mut acc = !0_u32;
        for &b in b"123456789" {
            acc = crc32(acc, u64::from(b), 1, CRC32_POLY);
        }
        assert_eq!(!acc, 0xcbf4_3926);

        let mut acc = !0_u32;
        for &b in b"123456789" {
            acc = crc32(acc, u64::from(b), 1, CRC32C_POLY);
        }
        assert_eq!(!acc, 0xe306_9283);
    }

    #[test]
    fn bitfield_ubfx_and_sbfx() {
        // UBFX x, src, lsb=24, width=8 -> immr=24, imms=31, in_zero, no sign.
        assert_eq!(bitfield(64, 0x0000_cafe_0000, 0, 24, 31, true, false), 0xca);
        // SBFX with a set top bit sign-extends.
        assert_eq!(
            bitfield(64, 0x8000, 0, 8, 15, true, true),
            0xffff_ffff_ffff_ff80
        );
    }

    #[test]
    fn bitfield_bfi_merges() {
        // BFI dst[15:8] <- src[7:0]: immr = 64-8 = 56, imms = 7.
        let merged = bitfield(64, 0xab, 0x1111_1111_1111_1111, 56, 7, false, false);
        assert_eq!(merged, 0x1111_1111_1111_ab11);
    }

    proptest! {
        #[test]
        fn add_with_carry_matches_reference(l in any::<u64>(), r in any::<u64>(), c: bool) {
            for reg_size in [32_u32, 64] {
                let mask = reg_mask(reg_size);
                let got = add_with_carry(reg_size, l, r, c);

                let wide = u128::from(l & mask) + u128::from(r & mask) + u128::from(c);
                prop_assert_eq!(got.value, (wide as u64) & mask);
                prop_assert_eq!(got.nzcv.z(), got.value == 0);
                prop_assert_eq!(got.nzcv.n(), sign_bit(reg_size, got.value));
                prop_assert_eq!(got.nzcv.c(), wide > u128::from(mask));

                // Signed reference: widen to i128 and compare.
                let sl = ((l & mask) << (64 - reg_size)) as i64 >> (64 - reg_size);
                let sr = ((r & mask) << (64 - reg_size)) as i64 >> (64 - reg_size);
                let signed = i128::from(sl) + i128::from(sr) + i128::from(c);
                let min = -(1_i128 << (reg_size - 1));
                let max = (1_i128 << (reg_size - 1)) - 1;
                prop_assert_eq!(got.nzcv.v(), signed < min || signed > max);
            }
        }

        #[test]
        fn ror_is_a_bijection(v in any::<u64>(), amount in 1_u32..32) {
            let rotated = shift_value(32, v, ShiftOp::Ror, amount);
            let back = shift_value(32, rotated, ShiftOp::Ror, 32 - amount);
            prop_assert_eq!(back, v & 0xffff_ffff);
        }

        #[test]
        fn shift_amount_zero_is_identity(v in any::<u64>()) {
            for op in [ShiftOp::Lsl, ShiftOp::Lsr, ShiftOp::Asr, ShiftOp::Ror] {
                prop_assert_eq!(shift_value(64, v, op, 0), v);
            }
        }

        #[test]
        fn rbit_is_involutive(v in any::<u64>()) {
            prop_assert_eq!(rbit(64, rbit(64, v)), v);
            prop_assert_eq!(rbit(32, rbit(32, v & 0xffff_ffff)), v & 0xffff_ffff);
        }
    }
}
