//! Optional-feature bookkeeping.
//!
//! The feature set gates what the emulated program may execute: SVE for
//! the Z/P instruction space, LSE for the atomic family, and so on. Host
//! traps can mutate the set mid-run and snapshot/restore it.

use std::fmt;

use bitflags::bitflags;

/// An optional A64 feature id, as it travels in host-trap payloads.
///
/// Payload lists are sequences of these ids terminated by `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuFeature {
    /// Terminator for feature lists in host-trap payloads.
    None = 0,
    /// Scalar floating point (half/single/double).
    Fp = 1,
    /// Half-precision arithmetic.
    Fp16 = 2,
    /// Advanced SIMD.
    Neon = 3,
    /// Scalable Vector Extension.
    Sve = 4,
    /// Large System Extensions: CAS/SWP/LD<op> atomics.
    Lse = 5,
    /// Release-consistent processor-consistent loads (LDAPR/LDAPUR).
    Rcpc = 6,
    /// Pointer authentication, address keys.
    Pauth = 7,
    /// Pointer authentication, generic key (PACGA).
    PauthGeneric = 8,
    /// CRC32 checksum instructions.
    Crc32 = 9,
    /// RNDR/RNDRRS random-number registers.
    Rng = 10,
    /// Branch Target Identification.
    Bti = 11,
    /// Flag-manipulation helpers (AXFLAG and friends); reserved.
    FlagM = 12,
    /// FJCVTZS.
    JsCvt = 13,
}

impl CpuFeature {
    /// Number of modeled features, `None` included.
    pub const COUNT: u8 = 14;

    /// Decode a feature id from a host-trap payload.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Fp),
            2 => Some(Self::Fp16),
            3 => Some(Self::Neon),
            4 => Some(Self::Sve),
            5 => Some(Self::Lse),
            6 => Some(Self::Rcpc),
            7 => Some(Self::Pauth),
            8 => Some(Self::PauthGeneric),
            9 => Some(Self::Crc32),
            10 => Some(Self::Rng),
            11 => Some(Self::Bti),
            12 => Some(Self::FlagM),
            13 => Some(Self::JsCvt),
            _ => None,
        }
    }

    /// The set member for this feature. `None` maps to the empty set.
    #[must_use]
    pub fn flag(self) -> CpuFeatures {
        match self {
            Self::None => CpuFeatures::empty(),
            Self::Fp => CpuFeatures::FP,
            Self::Fp16 => CpuFeatures::FP16,
            Self::Neon => CpuFeatures::NEON,
            Self::Sve => CpuFeatures::SVE,
            Self::Lse => CpuFeatures::LSE,
            Self::Rcpc => CpuFeatures::RCPC,
            Self::Pauth => CpuFeatures::PAUTH,
            Self::PauthGeneric => CpuFeatures::PAUTH_GENERIC,
            Self::Crc32 => CpuFeatures::CRC32,
            Self::Rng => CpuFeatures::RNG,
            Self::Bti => CpuFeatures::BTI,
            Self::FlagM => CpuFeatures::FLAGM,
            Self::JsCvt => CpuFeatures::JSCVT,
        }
    }
}

impl fmt::Display for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Fp => "FP",
            Self::Fp16 => "FPHP",
            Self::Neon => "NEON",
            Self::Sve => "SVE",
            Self::Lse => "LSE",
            Self::Rcpc => "RCpc",
            Self::Pauth => "PAuth",
            Self::PauthGeneric => "PAuthGeneric",
            Self::Crc32 => "CRC32",
            Self::Rng => "RNG",
            Self::Bti => "BTI",
            Self::FlagM => "FlagM",
            Self::JsCvt => "JSCVT",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// A mutable set of [`CpuFeature`]s. Bit positions mirror the
    /// payload ids.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CpuFeatures: u64 {
        const FP = 1 << 1;
        const FP16 = 1 << 2;
        const NEON = 1 << 3;
        const SVE = 1 << 4;
        const LSE = 1 << 5;
        const RCPC = 1 << 6;
        const PAUTH = 1 << 7;
        const PAUTH_GENERIC = 1 << 8;
        const CRC32 = 1 << 9;
        const RNG = 1 << 10;
        const BTI = 1 << 11;
        const FLAGM = 1 << 12;
        const JSCVT = 1 << 13;
    }
}

impl CpuFeatures {
    /// The empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::empty()
    }

    #[must_use]
    pub fn has(&self, feature: CpuFeature) -> bool {
        feature != CpuFeature::None && self.contains(feature.flag())
    }

    /// Add one feature; `None` is not a member and is ignored.
    pub fn enable(&mut self, feature: CpuFeature) {
        self.insert(feature.flag());
    }

    pub fn disable(&mut self, feature: CpuFeature) {
        self.remove(feature.flag());
    }

    /// Replace the whole set.
    pub fn set_all(&mut self, other: Self) {
        *self = other;
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in 1..CpuFeature::COUNT {
            if let Some(feature) = CpuFeature::from_id(id) {
                if self.has(feature) {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{feature}")?;
                    first = false;
                }
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_disable_has() {
        let mut set = CpuFeatures::none();
        assert!(!set.has(CpuFeature::Sve));
        set.enable(CpuFeature::Sve);
        set.enable(CpuFeature::Lse);
        assert!(set.has(CpuFeature::Sve) && set.has(CpuFeature::Lse));
        set.disable(CpuFeature::Sve);
        assert!(!set.has(CpuFeature::Sve) && set.has(CpuFeature::Lse));
    }

    #[test]
    fn none_is_never_a_member() {
        let mut set = CpuFeatures::none();
        set.enable(CpuFeature::None);
        assert_eq!(set, CpuFeatures::none());
        assert!(!CpuFeatures::all().has(CpuFeature::None));
    }

    #[test]
    fn all_covers_every_real_feature() {
        let all = CpuFeatures::all();
        for id in 1..CpuFeature::COUNT {
            let feature = CpuFeature::from_id(id).expect("id in range");
            assert!(all.has(feature), "{feature} missing from all()");
        }
    }

    #[test]
    fn ids_round_trip() {
        for id in 0..CpuFeature::COUNT {
            let feature = CpuFeature::from_id(id).expect("id in range");
            assert_eq!(feature as u8, id);
        }
        assert!(CpuFeature::from_id(CpuFeature::COUNT).is_none());
    }
}
