//! Pointer authentication.
//!
//! A placeholder MAC over {pointer, modifier, key} with a stable bit
//! layout: the code lives in the tag region (bits 63:48, excluding the
//! address-space selector at bit 55). `auth` recomputes and strips on
//! success; on failure it plants a non-zero diagnostic pattern in the tag
//! so the next use of the pointer faults.

/// Authentication keys. Instruction keys A/B, data keys A/B, and the
/// generic key used by PACGA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacKey {
    Ia,
    Ib,
    Da,
    Db,
    Ga,
}

impl PacKey {
    /// Fixed key material; the simulator models one immutable key set.
    const fn material(self) -> u64 {
        match self {
            PacKey::Ia => 0x4d79_5143_7565_6431,
            PacKey::Ib => 0x7072_6f74_6563_7432,
            PacKey::Da => 0x6461_7461_6b65_7933,
            PacKey::Db => 0x6b65_7964_6174_6134,
            PacKey::Ga => 0x6765_6e65_7269_6335,
        }
    }
}

/// Bits 63:48 form the tag region; bit 55 stays with the address (it
/// selects the high/low half of the virtual address space).
const TAG_SHIFT: u32 = 48;
const ADDRESS_SELECT_BIT: u64 = 1 << 55;
const TAG_MASK: u64 = (0xffff_u64 << TAG_SHIFT) & !ADDRESS_SELECT_BIT;

/// Diagnostic pattern planted on authentication failure.
const POISON: u64 = 0x0020_u64 << TAG_SHIFT;

/// The placeholder MAC: a few xor-multiply-rotate mixing rounds. Not
/// cryptographic; stable across runs so tests can assert on layouts.
pub(crate) fn compute_pac(data: u64, modifier: u64, key: PacKey) -> u64 {
    let mut state = data ^ key.material();
    state = state.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    state ^= modifier;
    state = state.rotate_left(23);
    state = state.wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    state ^= state >> 29;
    state
}

/// True when the pointer carries anything in the tag region: either a
/// PAC code or the poison pattern. Canonical user-space pointers have a
/// zero tag.
pub(crate) fn has_tag_bits(ptr: u64) -> bool {
    ptr & TAG_MASK != 0
}

/// Remove the tag region, keeping the address-select bit replicated the
/// way XPAC does (sign-extend from bit 55).
pub(crate) fn strip_pac(ptr: u64) -> u64 {
    if ptr & ADDRESS_SELECT_BIT != 0 {
        ptr | TAG_MASK
    } else {
        ptr & !TAG_MASK
    }
}

/// Insert a PAC over {ptr, modifier} into the tag region.
pub(crate) fn add_pac(ptr: u64, modifier: u64, key: PacKey) -> u64 {
    let stripped = strip_pac(ptr);
    let pac = compute_pac(stripped, modifier, key) & TAG_MASK;
    (stripped & !TAG_MASK) | pac | (ptr & ADDRESS_SELECT_BIT)
}

/// Authenticate: recompute the MAC and strip on a match. On mismatch,
/// return the stripped pointer with the poison pattern planted.
pub(crate) fn auth_pac(ptr: u64, modifier: u64, key: PacKey) -> u64 {
    let stripped = strip_pac(ptr);
    let expected = compute_pac(stripped, modifier, key) & TAG_MASK;
    if (ptr & TAG_MASK) == expected {
        stripped
    } else {
        (stripped & !TAG_MASK) | POISON
    }
}

/// PACGA: the generic 32-bit code packed into bits 63:32 of the result.
pub(crate) fn pacga(data: u64, modifier: u64) -> u64 {
    compute_pac(data, modifier, PacKey::Ga) & 0xffff_ffff_0000_0000
}
