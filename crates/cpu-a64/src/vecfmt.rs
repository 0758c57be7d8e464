//! Vector formats: the (element-count, element-width) descriptor every
//! SIMD and SVE kernel is parameterized by.

/// Lane layout of a SIMD/SVE operation.
///
/// `V*` forms are the fixed 64/128-bit advanced-SIMD arrangements, the
/// bare letters are scalar forms (one lane, upper lanes cleared), and the
/// `Vn*` forms are SVE arrangements whose lane count depends on the
/// configured vector length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    V8B,
    V16B,
    V4H,
    V8H,
    V2S,
    V4S,
    V1D,
    V2D,
    B,
    H,
    S,
    D,
    VnB,
    VnH,
    VnS,
    VnD,
}

impl VectorFormat {
    /// Element width in bits.
    #[must_use]
    pub const fn lane_bits(self) -> u32 {
        match self {
            Self::V8B | Self::V16B | Self::B | Self::VnB => 8,
            Self::V4H | Self::V8H | Self::H | Self::VnH => 16,
            Self::V2S | Self::V4S | Self::S | Self::VnS => 32,
            Self::V1D | Self::V2D | Self::D | Self::VnD => 64,
        }
    }

    /// Element width in bytes.
    #[must_use]
    pub const fn lane_bytes(self) -> usize {
        (self.lane_bits() / 8) as usize
    }

    /// Number of lanes; SVE forms need the configured vector length.
    #[must_use]
    pub const fn lane_count(self, vl_bits: usize) -> usize {
        match self {
            Self::V8B => 8,
            Self::V16B => 16,
            Self::V4H => 4,
            Self::V8H => 8,
            Self::V2S => 2,
            Self::V4S => 4,
            Self::V1D => 1,
            Self::V2D => 2,
            Self::B | Self::H | Self::S | Self::D => 1,
            Self::VnB | Self::VnH | Self::VnS | Self::VnD => {
                vl_bits / self.lane_bits() as usize
            }
        }
    }

    /// Bytes actually written by an operation in this format; everything
    /// above gets cleared on a SIMD write.
    #[must_use]
    pub const fn active_bytes(self, vl_bits: usize) -> usize {
        self.lane_count(vl_bits) * self.lane_bytes()
    }

    /// Scalar (single-lane, clear-the-rest) form?
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Self::B | Self::H | Self::S | Self::D)
    }

    /// Scalable form?
    #[must_use]
    pub const fn is_sve(self) -> bool {
        matches!(self, Self::VnB | Self::VnH | Self::VnS | Self::VnD)
    }

    /// Same lane count, doubled lane width (long/widening operations).
    ///
    /// For the 128-bit arrangements this names the format of the result
    /// built from one half of the inputs (e.g. 16B halves widen to 8H).
    #[must_use]
    pub const fn double_lane_size(self) -> Self {
        match self {
            Self::V8B | Self::V16B => Self::V8H,
            Self::V4H | Self::V8H => Self::V4S,
            Self::V2S | Self::V4S => Self::V2D,
            Self::B => Self::H,
            Self::H => Self::S,
            Self::S => Self::D,
            Self::VnB => Self::VnH,
            Self::VnH => Self::VnS,
            Self::VnS => Self::VnD,
            Self::V1D | Self::V2D | Self::D | Self::VnD => self,
        }
    }

    /// Halved lane width (narrowing operations).
    #[must_use]
    pub const fn half_lane_size(self) -> Self {
        match self {
            Self::V8H => Self::V8B,
            Self::V4S => Self::V4H,
            Self::V2D => Self::V2S,
            Self::H => Self::B,
            Self::S => Self::H,
            Self::D => Self::S,
            Self::VnH => Self::VnB,
            Self::VnS => Self::VnH,
            Self::VnD => Self::VnS,
            other => other,
        }
    }

    /// Scalar form with this lane width.
    #[must_use]
    pub const fn scalar(self) -> Self {
        match self.lane_bits() {
            8 => Self::B,
            16 => Self::H,
            32 => Self::S,
            _ => Self::D,
        }
    }

    /// SVE arrangement from a two-bit size field.
    #[must_use]
    pub const fn sve_from_size(size: u32) -> Self {
        match size & 3 {
            0 => Self::VnB,
            1 => Self::VnH,
            2 => Self::VnS,
            _ => Self::VnD,
        }
    }

    /// Advanced-SIMD arrangement from the size:Q fields.
    #[must_use]
    pub const fn neon_from_size_q(size: u32, q: u32) -> Self {
        match (size & 3, q & 1) {
            (0, 0) => Self::V8B,
            (0, 1) => Self::V16B,
            (1, 0) => Self::V4H,
            (1, 1) => Self::V8H,
            (2, 0) => Self::V2S,
            (2, 1) => Self::V4S,
            (3, 0) => Self::V1D,
            _ => Self::V2D,
        }
    }

    /// Scalar arrangement from a two-bit size field.
    #[must_use]
    pub const fn scalar_from_size(size: u32) -> Self {
        match size & 3 {
            0 => Self::B,
            1 => Self::H,
            2 => Self::S,
            _ => Self::D,
        }
    }
}
