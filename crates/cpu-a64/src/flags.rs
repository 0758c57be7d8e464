//! Condition flags and floating-point control/status registers.

use a64_core::Condition;

/// The N/Z/C/V condition flag bank.
///
/// Stored in the MRS/MSR layout (N at bit 31 down to V at bit 28); the
/// reserved bits ignore writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nzcv {
    bits: u32,
}

const N_BIT: u32 = 1 << 31;
const Z_BIT: u32 = 1 << 30;
const C_BIT: u32 = 1 << 29;
const V_BIT: u32 = 1 << 28;
const NZCV_MASK: u32 = N_BIT | Z_BIT | C_BIT | V_BIT;

impl Nzcv {
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Build from the four flag bits.
    #[must_use]
    pub fn from_flags(n: bool, z: bool, c: bool, v: bool) -> Self {
        let mut flags = Self::new();
        flags.set_n(n);
        flags.set_z(z);
        flags.set_c(c);
        flags.set_v(v);
        flags
    }

    /// Build from a 4-bit immediate in instruction order (n:z:c:v).
    #[must_use]
    pub const fn from_imm(imm: u32) -> Self {
        Self {
            bits: (imm & 0xf) << 28,
        }
    }

    /// The MRS view.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.bits
    }

    /// The MSR write: reserved bits are dropped.
    pub const fn set_raw(&mut self, value: u32) {
        self.bits = value & NZCV_MASK;
    }

    #[must_use]
    pub const fn n(&self) -> bool {
        self.bits & N_BIT != 0
    }

    #[must_use]
    pub const fn z(&self) -> bool {
        self.bits & Z_BIT != 0
    }

    #[must_use]
    pub const fn c(&self) -> bool {
        self.bits & C_BIT != 0
    }

    #[must_use]
    pub const fn v(&self) -> bool {
        self.bits & V_BIT != 0
    }

    pub const fn set_n(&mut self, on: bool) {
        self.set(N_BIT, on);
    }

    pub const fn set_z(&mut self, on: bool) {
        self.set(Z_BIT, on);
    }

    pub const fn set_c(&mut self, on: bool) {
        self.set(C_BIT, on);
    }

    pub const fn set_v(&mut self, on: bool) {
        self.set(V_BIT, on);
    }

    const fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    /// True when `cond` holds for these flags.
    #[must_use]
    pub fn holds(&self, cond: Condition) -> bool {
        match cond {
            Condition::Eq => self.z(),
            Condition::Ne => !self.z(),
            Condition::Hs => self.c(),
            Condition::Lo => !self.c(),
            Condition::Mi => self.n(),
            Condition::Pl => !self.n(),
            Condition::Vs => self.v(),
            Condition::Vc => !self.v(),
            Condition::Hi => self.c() && !self.z(),
            Condition::Ls => !self.c() || self.z(),
            Condition::Ge => self.n() == self.v(),
            Condition::Lt => self.n() != self.v(),
            Condition::Gt => !self.z() && (self.n() == self.v()),
            Condition::Le => self.z() || (self.n() != self.v()),
            // AL and NV both execute unconditionally.
            Condition::Al | Condition::Nv => true,
        }
    }
}

/// Rounding modes. The first four are encodable in FPCR.RMode; TieAway
/// and Odd only appear as explicit conversion modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpRounding {
    TieEven,
    PlusInfinity,
    MinusInfinity,
    Zero,
    TieAway,
    Odd,
}

/// Floating-point control register.
///
/// Carries the rounding mode plus the FZ (flush-to-zero), DN (default
/// NaN) and AHP (alternative half-precision) bits. Trapping exception
/// enables are not modeled; FP exceptions only accumulate in [`Fpsr`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fpcr {
    bits: u64,
}

const FPCR_RMODE_SHIFT: u64 = 22;
const FPCR_FZ: u64 = 1 << 24;
const FPCR_DN: u64 = 1 << 25;
const FPCR_AHP: u64 = 1 << 26;
// RMode, FZ, DN, AHP plus FZ16 are the bits an MSR may set here.
const FPCR_MASK: u64 = (0b11 << FPCR_RMODE_SHIFT) | FPCR_FZ | FPCR_DN | FPCR_AHP | (1 << 19);

impl Fpcr {
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.bits
    }

    pub const fn set_raw(&mut self, value: u64) {
        self.bits = value & FPCR_MASK;
    }

    /// The RMode field.
    #[must_use]
    pub const fn rounding(&self) -> FpRounding {
        match (self.bits >> FPCR_RMODE_SHIFT) & 0b11 {
            0b00 => FpRounding::TieEven,
            0b01 => FpRounding::PlusInfinity,
            0b10 => FpRounding::MinusInfinity,
            _ => FpRounding::Zero,
        }
    }

    pub const fn set_rounding(&mut self, mode: FpRounding) {
        let field: u64 = match mode {
            FpRounding::TieEven => 0b00,
            FpRounding::PlusInfinity => 0b01,
            FpRounding::MinusInfinity => 0b10,
            FpRounding::Zero => 0b11,
            // Not encodable in FPCR; explicit-mode conversions only.
            FpRounding::TieAway | FpRounding::Odd => 0b00,
        };
        self.bits = (self.bits & !(0b11 << FPCR_RMODE_SHIFT)) | (field << FPCR_RMODE_SHIFT);
    }

    /// Flush-to-zero for single/double inputs and outputs.
    #[must_use]
    pub const fn fz(&self) -> bool {
        self.bits & FPCR_FZ != 0
    }

    pub const fn set_fz(&mut self, on: bool) {
        self.set(FPCR_FZ, on);
    }

    /// Default-NaN: propagate the default quiet NaN instead of operands.
    #[must_use]
    pub const fn dn(&self) -> bool {
        self.bits & FPCR_DN != 0
    }

    pub const fn set_dn(&mut self, on: bool) {
        self.set(FPCR_DN, on);
    }

    /// Alternative half-precision format (no infinities or NaNs).
    #[must_use]
    pub const fn ahp(&self) -> bool {
        self.bits & FPCR_AHP != 0
    }

    pub const fn set_ahp(&mut self, on: bool) {
        self.set(FPCR_AHP, on);
    }

    const fn set(&mut self, bit: u64, on: bool) {
        if on {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }
}

/// Floating-point status register: the cumulative exception bits the
/// core actually raises. Nothing ever traps; consumers read these after
/// a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fpsr {
    bits: u64,
}

const FPSR_IOC: u64 = 1 << 0;
const FPSR_DZC: u64 = 1 << 1;
const FPSR_OFC: u64 = 1 << 2;
const FPSR_UFC: u64 = 1 << 3;
const FPSR_IXC: u64 = 1 << 4;
const FPSR_IDC: u64 = 1 << 7;
const FPSR_QC: u64 = 1 << 27;
const FPSR_MASK: u64 = FPSR_IOC | FPSR_DZC | FPSR_OFC | FPSR_UFC | FPSR_IXC | FPSR_IDC | FPSR_QC;

impl Fpsr {
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.bits
    }

    pub const fn set_raw(&mut self, value: u64) {
        self.bits = value & FPSR_MASK;
    }

    /// Invalid-operation cumulative bit (signalling NaNs, ∞−∞, ...).
    #[must_use]
    pub const fn ioc(&self) -> bool {
        self.bits & FPSR_IOC != 0
    }

    pub const fn set_ioc(&mut self) {
        self.bits |= FPSR_IOC;
    }

    /// Division-by-zero cumulative bit.
    #[must_use]
    pub const fn dzc(&self) -> bool {
        self.bits & FPSR_DZC != 0
    }

    pub const fn set_dzc(&mut self) {
        self.bits |= FPSR_DZC;
    }

    /// Input-denormal cumulative bit (set when FZ flushes an input).
    #[must_use]
    pub const fn idc(&self) -> bool {
        self.bits & FPSR_IDC != 0
    }

    pub const fn set_idc(&mut self) {
        self.bits |= FPSR_IDC;
    }

    /// Overflow cumulative bit.
    #[must_use]
    pub const fn ofc(&self) -> bool {
        self.bits & FPSR_OFC != 0
    }

    pub const fn set_ofc(&mut self) {
        self.bits |= FPSR_OFC;
    }

    /// Underflow cumulative bit.
    #[must_use]
    pub const fn ufc(&self) -> bool {
        self.bits & FPSR_UFC != 0
    }

    pub const fn set_ufc(&mut self) {
        self.bits |= FPSR_UFC;
    }

    /// Inexact cumulative bit.
    #[must_use]
    pub const fn ixc(&self) -> bool {
        self.bits & FPSR_IXC != 0
    }

    pub const fn set_ixc(&mut self) {
        self.bits |= FPSR_IXC;
    }

    /// Saturation cumulative bit (SIMD/SVE saturating arithmetic).
    #[must_use]
    pub const fn qc(&self) -> bool {
        self.bits & FPSR_QC != 0
    }

    pub const fn set_qc(&mut self) {
        self.bits |= FPSR_QC;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nzcv_round_trips_through_raw() {
        let mut flags = Nzcv::new();
        flags.set_raw(0xffff_ffff);
        assert_eq!(flags.raw(), 0xf000_0000);
        assert!(flags.n() && flags.z() && flags.c() && flags.v());
    }

    #[test]
    fn condition_table() {
        let flags = Nzcv::from_flags(false, true, true, false);
        assert!(flags.holds(Condition::Eq));
        assert!(flags.holds(Condition::Hs));
        assert!(!flags.holds(Condition::Hi)); // C && !Z fails
        assert!(flags.holds(Condition::Ls));
        assert!(flags.holds(Condition::Ge)); // N == V
        assert!(flags.holds(Condition::Al));
        assert!(flags.holds(Condition::Nv)); // NV still executes
    }

    #[test]
    fn fpcr_rounding_field() {
        let mut fpcr = Fpcr::new();
        assert_eq!(fpcr.rounding(), FpRounding::TieEven);
        fpcr.set_rounding(FpRounding::MinusInfinity);
        assert_eq!(fpcr.rounding(), FpRounding::MinusInfinity);
        fpcr.set_rounding(FpRounding::Zero);
        assert_eq!(fpcr.rounding(), FpRounding::Zero);
        fpcr.set_dn(true);
        assert!(fpcr.dn());
    }
}
