//! SVE predicate algebra.
//!
//! Pure helpers over predicate registers: the PTRUE pattern constants,
//! the PTEST flag recipe, active-lane counting and the saturating
//! increment/decrement arithmetic used by the predicate-count forms.

use crate::flags::Nzcv;
use crate::registers::PRegister;

/// PTRUE/INC/DEC element-count patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicatePattern {
    Pow2,
    Vl1,
    Vl2,
    Vl3,
    Vl4,
    Vl5,
    Vl6,
    Vl7,
    Vl8,
    Vl16,
    Vl32,
    Vl64,
    Vl128,
    Vl256,
    Mul4,
    Mul3,
    All,
}

impl PredicatePattern {
    /// Decode the 5-bit pattern field. Unallocated encodings predicate
    /// zero elements and decode to `None`.
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits & 0x1f {
            0b00000 => Some(Self::Pow2),
            0b00001 => Some(Self::Vl1),
            0b00010 => Some(Self::Vl2),
            0b00011 => Some(Self::Vl3),
            0b00100 => Some(Self::Vl4),
            0b00101 => Some(Self::Vl5),
            0b00110 => Some(Self::Vl6),
            0b00111 => Some(Self::Vl7),
            0b01000 => Some(Self::Vl8),
            0b01001 => Some(Self::Vl16),
            0b01010 => Some(Self::Vl32),
            0b01011 => Some(Self::Vl64),
            0b01100 => Some(Self::Vl128),
            0b01101 => Some(Self::Vl256),
            0b11101 => Some(Self::Mul4),
            0b11110 => Some(Self::Mul3),
            0b11111 => Some(Self::All),
            _ => None,
        }
    }

    /// Number of predicated elements out of `available` lanes.
    #[must_use]
    pub fn element_count(self, available: usize) -> usize {
        let fixed = |n: usize| if n <= available { n } else { 0 };
        match self {
            Self::Pow2 => {
                let mut n = 1;
                while n * 2 <= available {
                    n *= 2;
                }
                if available == 0 { 0 } else { n }
            }
            Self::Vl1 => fixed(1),
            Self::Vl2 => fixed(2),
            Self::Vl3 => fixed(3),
            Self::Vl4 => fixed(4),
            Self::Vl5 => fixed(5),
            Self::Vl6 => fixed(6),
            Self::Vl7 => fixed(7),
            Self::Vl8 => fixed(8),
            Self::Vl16 => fixed(16),
            Self::Vl32 => fixed(32),
            Self::Vl64 => fixed(64),
            Self::Vl128 => fixed(128),
            Self::Vl256 => fixed(256),
            Self::Mul4 => available - available % 4,
            Self::Mul3 => available - available % 3,
            Self::All => available,
        }
    }
}

/// The PTEST flag recipe over governing predicate `pg` and tested
/// predicate `pn`: N is the first active bit, Z is "no active true bit",
/// C is the inverse of the last active bit, V is zero.
pub(crate) fn ptest_flags(vl_bits: usize, pg: &PRegister, pn: &PRegister) -> Nzcv {
    let total_bits = vl_bits / 8;
    let mut first = None;
    let mut last = None;
    let mut any = false;
    for i in 0..total_bits {
        if pg.bit(i) {
            let active = pn.bit(i);
            if first.is_none() {
                first = Some(active);
            }
            last = Some(active);
            any |= active;
        }
    }
    Nzcv::from_flags(first.unwrap_or(false), !any, !last.unwrap_or(false), false)
}

/// Count lanes active in both `pg` and `pn` at the given element size.
pub(crate) fn count_active(
    vl_bits: usize,
    lane_bytes: usize,
    pg: &PRegister,
    pn: &PRegister,
) -> u64 {
    let lanes = vl_bits / 8 / lane_bytes;
    let mut count = 0;
    for k in 0..lanes {
        if pg.lane_active(lane_bytes, k) && pn.lane_active(lane_bytes, k) {
            count += 1;
        }
    }
    count
}

/// Adjust `acc` by `delta` with optional saturation at the W or X range.
///
/// Signed saturation: overflow occurs when the operands share a sign
/// that differs from the result's. Unsigned: a decrement that moves the
/// value up, or an increment that moves it down, has wrapped.
pub(crate) fn saturating_adjust(reg_size: u32, signed: bool, acc: u64, delta: i64) -> u64 {
    let mask = if reg_size == 64 {
        u64::MAX
    } else {
        (1 << reg_size) - 1
    };
    if signed {
        let shift = 64 - reg_size;
        let value = i128::from((((acc & mask) << shift) as i64) >> shift) + i128::from(delta);
        let min = -(1_i128 << (reg_size - 1));
        let max = (1_i128 << (reg_size - 1)) - 1;
        (value.clamp(min, max) as u64) & mask
    } else {
        let value = i128::from(acc & mask) + i128::from(delta);
        let max = i128::from(mask);
        value.clamp(0, max) as u64
    }
}

/// Unsaturated wrap-around adjust (the plain INC/DEC forms).
pub(crate) fn wrapping_adjust(reg_size: u32, acc: u64, delta: i64) -> u64 {
    let mask = if reg_size == 64 {
        u64::MAX
    } else {
        (1 << reg_size) - 1
    };
    acc.wrapping_add(delta as u64) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_counts() {
        assert_eq!(PredicatePattern::All.element_count(4), 4);
        assert_eq!(PredicatePattern::Vl4.element_count(4), 4);
        assert_eq!(PredicatePattern::Vl5.element_count(4), 0);
        assert_eq!(PredicatePattern::Pow2.element_count(7), 4);
        assert_eq!(PredicatePattern::Mul3.element_count(8), 6);
        assert_eq!(PredicatePattern::Mul4.element_count(7), 4);
        assert_eq!(PredicatePattern::from_bits(0b10000), None);
    }

    #[test]
    fn ptest_recipe() {
        let vl = 128;
        let mut pg = PRegister::zeroed();
        let mut pn = PRegister::zeroed();
        for k in 0..4 {
            pg.set_lane(4, k, true);
        }
        // No active true bits.
        let flags = ptest_flags(vl, &pg, &pn);
        assert!(!flags.n() && flags.z() && flags.c() && !flags.v());

        // First and last active.
        for k in 0..4 {
            pn.set_lane(4, k, true);
        }
        let flags = ptest_flags(vl, &pg, &pn);
        assert!(flags.n() && !flags.z() && !flags.c() && !flags.v());

        // First inactive, last active.
        pn.set_lane(4, 0, false);
        let flags = ptest_flags(vl, &pg, &pn);
        assert!(!flags.n() && !flags.z() && !flags.c());
    }

    #[test]
    fn count_active_lanes() {
        let mut pg = PRegister::zeroed();
        let mut pn = PRegister::zeroed();
        for k in 0..4 {
            pg.set_lane(4, k, true);
        }
        pn.set_lane(4, 1, true);
        pn.set_lane(4, 3, true);
        assert_eq!(count_active(128, 4, &pg, &pn), 2);
    }

    #[test]
    fn saturating_adjustments() {
        // Unsigned decrement below zero pins at zero.
        assert_eq!(saturating_adjust(32, false, 1, -4), 0);
        // Unsigned increment pins at UINT32_MAX.
        assert_eq!(saturating_adjust(32, false, 0xffff_fffe, 4), 0xffff_ffff);
        // Signed increment pins at INT32_MAX.
        assert_eq!(saturating_adjust(32, true, 0x7fff_fffe, 4), 0x7fff_ffff);
        // Signed decrement pins at INT32_MIN.
        assert_eq!(saturating_adjust(32, true, 0x8000_0001, -4), 0x8000_0000);
        // In-range adjustments are exact.
        assert_eq!(saturating_adjust(64, true, 100, -4), 96);
        assert_eq!(wrapping_adjust(32, 0, -1), 0xffff_ffff);
    }
}
