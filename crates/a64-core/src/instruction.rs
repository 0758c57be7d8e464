//! A64 instruction word wrapper and decoder-facing vocabulary.
//!
//! An [`Instruction`] is a raw 32-bit word plus the address it was fetched
//! from. The accessors pull out the architecturally named fields (Rd, Rn,
//! imm12, cond, ...) so the execution core never does ad-hoc bit surgery.
//! Classification of a word into an [`InstructionGroup`] is the decoder's
//! job; the core only dispatches on the tag it is handed.

/// The sentinel "return address" that terminates simulation.
///
/// Architecturally null: branching here ends the run loop cleanly.
pub const END_OF_SIM_ADDRESS: u64 = 0;

/// A fetched A64 instruction: raw word plus fetch address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    raw: u32,
    address: u64,
}

impl Instruction {
    /// Instruction size in bytes. Every A64 instruction is one word.
    pub const SIZE: u64 = 4;

    #[must_use]
    pub const fn new(raw: u32, address: u64) -> Self {
        Self { raw, address }
    }

    /// The raw 32-bit encoding.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// The address this word was fetched from.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Address of the sequentially next instruction.
    #[must_use]
    pub const fn next_address(&self) -> u64 {
        self.address.wrapping_add(Self::SIZE)
    }

    /// Extract a single bit.
    #[must_use]
    pub const fn bit(&self, n: u32) -> u32 {
        (self.raw >> n) & 1
    }

    /// Extract bits `hi:lo` inclusive.
    #[must_use]
    pub const fn bits(&self, hi: u32, lo: u32) -> u32 {
        (self.raw >> lo) & ((1 << (hi - lo + 1)) - 1)
    }

    /// Extract bits `hi:lo` inclusive, sign-extended.
    #[must_use]
    pub const fn signed_bits(&self, hi: u32, lo: u32) -> i64 {
        let width = hi - lo + 1;
        let field = (self.raw >> lo) as i64 & ((1 << width) - 1);
        (field << (64 - width)) >> (64 - width)
    }

    // === Register fields ===

    #[must_use]
    pub const fn rd(&self) -> usize {
        self.bits(4, 0) as usize
    }

    #[must_use]
    pub const fn rn(&self) -> usize {
        self.bits(9, 5) as usize
    }

    #[must_use]
    pub const fn rm(&self) -> usize {
        self.bits(20, 16) as usize
    }

    #[must_use]
    pub const fn ra(&self) -> usize {
        self.bits(14, 10) as usize
    }

    /// Transfer register for loads/stores (same field as Rd).
    #[must_use]
    pub const fn rt(&self) -> usize {
        self.bits(4, 0) as usize
    }

    /// Second transfer register for pair accesses.
    #[must_use]
    pub const fn rt2(&self) -> usize {
        self.bits(14, 10) as usize
    }

    /// Status register for store-exclusive / operand for atomics.
    #[must_use]
    pub const fn rs(&self) -> usize {
        self.bits(20, 16) as usize
    }

    /// Predicate register in the usual Pd slot.
    #[must_use]
    pub const fn pd(&self) -> usize {
        self.bits(3, 0) as usize
    }

    /// Predicate register in the Pn slot.
    #[must_use]
    pub const fn pn(&self) -> usize {
        self.bits(8, 5) as usize
    }

    /// Predicate register in the Pm slot.
    #[must_use]
    pub const fn pm(&self) -> usize {
        self.bits(19, 16) as usize
    }

    /// Governing predicate in the 3-bit Pg slot (predicated SVE forms).
    #[must_use]
    pub const fn pg_low(&self) -> usize {
        self.bits(12, 10) as usize
    }

    /// Governing predicate in the 4-bit Pg slot (predicate ops).
    #[must_use]
    pub const fn pg_wide(&self) -> usize {
        self.bits(13, 10) as usize
    }

    // === Common selectors ===

    /// The sf bit: true selects the 64-bit X view.
    #[must_use]
    pub const fn sf(&self) -> bool {
        self.bit(31) == 1
    }

    /// Operand register size in bits, from sf.
    #[must_use]
    pub const fn reg_size(&self) -> u32 {
        if self.sf() { 64 } else { 32 }
    }

    /// The two-bit size field of load/store and SIMD encodings (31:30).
    #[must_use]
    pub const fn size_ls(&self) -> u32 {
        self.bits(31, 30)
    }

    /// The opc field of load/store encodings (23:22).
    #[must_use]
    pub const fn opc_ls(&self) -> u32 {
        self.bits(23, 22)
    }

    /// Condition in the data-processing slot (15:12).
    #[must_use]
    pub const fn condition(&self) -> u32 {
        self.bits(15, 12)
    }

    /// Condition in the branch slot (3:0).
    #[must_use]
    pub const fn condition_branch(&self) -> u32 {
        self.bits(3, 0)
    }

    // === Immediates ===

    #[must_use]
    pub const fn imm12(&self) -> u64 {
        self.bits(21, 10) as u64
    }

    /// Shift selector for ADD/SUB (immediate): 0 or 12.
    #[must_use]
    pub const fn imm12_shift(&self) -> u32 {
        self.bits(23, 22) * 12
    }

    #[must_use]
    pub const fn imm16(&self) -> u64 {
        self.bits(20, 5) as u64
    }

    /// Halfword selector for MOVZ/MOVK/MOVN: shift = hw * 16.
    #[must_use]
    pub const fn hw(&self) -> u32 {
        self.bits(22, 21)
    }

    /// Signed 9-bit offset (unscaled and pre/post-index loads/stores).
    #[must_use]
    pub const fn imm9(&self) -> i64 {
        self.signed_bits(20, 12)
    }

    /// Signed 7-bit offset for pair accesses, unscaled.
    #[must_use]
    pub const fn imm7(&self) -> i64 {
        self.signed_bits(21, 15)
    }

    /// Branch offset in bytes for B/BL.
    #[must_use]
    pub const fn imm26_offset(&self) -> i64 {
        self.signed_bits(25, 0) * 4
    }

    /// Branch offset in bytes for B.cond/CBZ/CBNZ and literal loads.
    #[must_use]
    pub const fn imm19_offset(&self) -> i64 {
        self.signed_bits(23, 5) * 4
    }

    /// Branch offset in bytes for TBZ/TBNZ.
    #[must_use]
    pub const fn imm14_offset(&self) -> i64 {
        self.signed_bits(18, 5) * 4
    }

    /// Combined immhi:immlo byte offset for ADR (page-scaled by the ADRP
    /// visitor).
    #[must_use]
    pub const fn imm_pcrel(&self) -> i64 {
        let immlo = self.bits(30, 29) as i64;
        let immhi = self.signed_bits(23, 5);
        (immhi << 2) | immlo
    }

    /// Bit number for TBZ/TBNZ: b5:b40.
    #[must_use]
    pub const fn tb_bit(&self) -> u32 {
        (self.bit(31) << 5) | self.bits(23, 19)
    }

    #[must_use]
    pub const fn immr(&self) -> u32 {
        self.bits(21, 16)
    }

    #[must_use]
    pub const fn imms(&self) -> u32 {
        self.bits(15, 10)
    }

    #[must_use]
    pub const fn bitn(&self) -> u32 {
        self.bit(22)
    }

    /// Shift amount for shifted-register forms.
    #[must_use]
    pub const fn imm6(&self) -> u32 {
        self.bits(15, 10)
    }

    /// Shift type for shifted-register forms (23:22).
    #[must_use]
    pub fn shift_dp(&self) -> ShiftOp {
        ShiftOp::from_bits(self.bits(23, 22))
    }

    /// Extend mode for extended-register forms (15:13).
    #[must_use]
    pub fn extend_dp(&self) -> ExtendOp {
        ExtendOp::from_bits(self.bits(15, 13))
    }

    /// Left shift for extended-register forms (12:10).
    #[must_use]
    pub const fn imm3(&self) -> u32 {
        self.bits(12, 10)
    }

    /// NZCV immediate for conditional compare.
    #[must_use]
    pub const fn nzcv_imm(&self) -> u32 {
        self.bits(3, 0)
    }

    /// 5-bit comparison immediate for CCMP/CCMN (immediate form).
    #[must_use]
    pub const fn imm5(&self) -> u64 {
        self.bits(20, 16) as u64
    }

    /// Payload immediate of HLT/BRK/SVC.
    #[must_use]
    pub const fn imm_exception(&self) -> u32 {
        self.bits(20, 5)
    }

    /// CRm:op2 selector of HINT instructions.
    #[must_use]
    pub const fn imm_hint(&self) -> u32 {
        self.bits(11, 5)
    }

    /// o0:op1:CRn:CRm:op2 system-register selector of MRS/MSR.
    #[must_use]
    pub const fn imm_system_register(&self) -> u32 {
        self.bits(20, 5)
    }

    /// CRm field of barriers (the barrier domain/type immediate).
    #[must_use]
    pub const fn crm(&self) -> u32 {
        self.bits(11, 8)
    }

    // === Bitmask immediates ===

    /// Decode the N:immr:imms logical bitmask immediate.
    ///
    /// Returns `None` for the reserved encodings.
    #[must_use]
    pub fn imm_logical(&self) -> Option<u64> {
        decode_bitmask(self.reg_size(), self.bitn(), self.immr(), self.imms())
    }

    // === FP immediates ===

    /// The 8-bit FP literal field (20:13).
    #[must_use]
    pub const fn imm8_fp(&self) -> u32 {
        self.bits(20, 13)
    }

    /// Expand imm8 to a double-precision value.
    #[must_use]
    pub fn imm_fp64(&self) -> f64 {
        let imm8 = u64::from(self.imm8_fp());
        let sign = (imm8 >> 7) & 1;
        let b6 = (imm8 >> 6) & 1;
        let exp = if b6 == 1 { 0x0ff_u64 } else { 0x100 };
        let frac = imm8 & 0x3f;
        f64::from_bits((sign << 63) | (exp << 54) | (frac << 48))
    }

    /// Expand imm8 to a single-precision value.
    #[must_use]
    pub fn imm_fp32(&self) -> f32 {
        let imm8 = u32::from(self.imm8_fp());
        let sign = (imm8 >> 7) & 1;
        let b6 = (imm8 >> 6) & 1;
        let exp = if b6 == 1 { 0x1f_u32 } else { 0x20 };
        let frac = imm8 & 0x3f;
        f32::from_bits((sign << 31) | (exp << 25) | (frac << 19))
    }

    /// Expand imm8 to a half-precision bit pattern.
    #[must_use]
    pub fn imm_fp16_bits(&self) -> u16 {
        let imm8 = u32::from(self.imm8_fp());
        let sign = (imm8 >> 7) & 1;
        let b6 = (imm8 >> 6) & 1;
        let exp = if b6 == 1 { 0x3_u32 } else { 0x4 };
        let frac = imm8 & 0x3f;
        ((sign << 15) | (exp << 12) | (frac << 6)) as u16
    }
}

/// Decode an A64 logical bitmask immediate for the given register size.
///
/// The encoding names a repeating element of 2/4/8/16/32/64 bits holding
/// `imms+1` set bits rotated right by `immr`, replicated across the
/// register. Reserved encodings decode to `None`.
#[must_use]
pub(crate) fn decode_bitmask(reg_size: u32, n: u32, immr: u32, imms: u32) -> Option<u64> {
    // len is the index of the highest set bit in N:NOT(imms).
    let composite = (n << 6) | (!imms & 0x3f);
    if composite == 0 {
        return None;
    }
    let len = 31 - composite.leading_zeros();
    let esize = 1_u32 << len;
    if esize > reg_size {
        return None;
    }
    let s = imms & (esize - 1);
    let r = immr & (esize - 1);
    if s == esize - 1 {
        return None;
    }

    let welem: u64 = (1_u64 << (s + 1)) - 1;
    let rotated = if r == 0 {
        welem
    } else {
        let mask = if esize == 64 { u64::MAX } else { (1 << esize) - 1 };
        ((welem >> r) | (welem << (esize - r))) & mask
    };

    // Replicate the element across the register width.
    let mut result = 0_u64;
    let mut shift = 0;
    while shift < reg_size {
        result |= rotated << shift;
        shift += esize;
    }
    if reg_size == 64 {
        Some(result)
    } else {
        Some(result & ((1 << reg_size) - 1))
    }
}

/// A64 condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
    Nv = 15,
}

impl Condition {
    /// Decode a 4-bit condition field.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0xf {
            0 => Self::Eq,
            1 => Self::Ne,
            2 => Self::Hs,
            3 => Self::Lo,
            4 => Self::Mi,
            5 => Self::Pl,
            6 => Self::Vs,
            7 => Self::Vc,
            8 => Self::Hi,
            9 => Self::Ls,
            10 => Self::Ge,
            11 => Self::Lt,
            12 => Self::Gt,
            13 => Self::Le,
            14 => Self::Al,
            _ => Self::Nv,
        }
    }

    /// The inverted condition (EQ ↔ NE, ...). AL and NV invert to each
    /// other, matching the encoding's bit-0 flip.
    #[must_use]
    pub const fn invert(self) -> Self {
        Self::from_bits(self as u32 ^ 1)
    }
}

/// Shift operations for shifted-register operands and variable shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftOp {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Extend operations for extended-register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOp {
    Uxtb,
    Uxth,
    Uxtw,
    Uxtx,
    Sxtb,
    Sxth,
    Sxtw,
    Sxtx,
}

impl ExtendOp {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            0 => Self::Uxtb,
            1 => Self::Uxth,
            2 => Self::Uxtw,
            3 => Self::Uxtx,
            4 => Self::Sxtb,
            5 => Self::Sxth,
            6 => Self::Sxtw,
            _ => Self::Sxtx,
        }
    }
}

/// Top-level instruction groups, as classified by the external decoder.
///
/// The decoder guarantees exactly one group per word; the execution core
/// dispatches on the tag once and reads the fields it needs through the
/// [`Instruction`] accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum InstructionGroup {
    // Data processing (immediate)
    PcRelAddressing,
    AddSubImmediate,
    LogicalImmediate,
    MoveWideImmediate,
    Bitfield,
    Extract,

    // Data processing (register)
    AddSubShifted,
    AddSubExtended,
    AddSubWithCarry,
    LogicalShifted,
    ConditionalCompareRegister,
    ConditionalCompareImmediate,
    ConditionalSelect,
    DataProcessing1Source,
    DataProcessing2Source,
    DataProcessing3Source,

    // Branches
    UnconditionalBranch,
    UnconditionalBranchToRegister,
    ConditionalBranch,
    CompareBranch,
    TestBranch,

    // Loads and stores
    LoadStoreUnsignedOffset,
    LoadStorePreIndex,
    LoadStorePostIndex,
    LoadStoreRegisterOffset,
    LoadStoreUnscaledOffset,
    LoadStorePairOffset,
    LoadStorePairPreIndex,
    LoadStorePairPostIndex,
    LoadLiteral,
    LoadStoreExclusive,
    AtomicMemory,
    LoadStoreRcpc,
    LoadStorePac,

    // Scalar floating point
    FpImmediate,
    FpIntegerConvert,
    FpFixedPointConvert,
    FpCompare,
    FpConditionalCompare,
    FpConditionalSelect,
    FpDataProcessing1Source,
    FpDataProcessing2Source,
    FpDataProcessing3Source,

    // Advanced SIMD
    Neon3Same,
    Neon3Different,
    Neon2RegMisc,
    NeonAcrossLanes,
    NeonCopy,
    NeonExtract,
    NeonPerm,
    NeonTable,
    NeonShiftImmediate,
    NeonModifiedImmediate,

    // SVE
    SveIndexGeneration,
    SvePredicateInit,
    SvePredicateTest,
    SvePredicateLogical,
    SvePredicateMisc,
    SveElementCount,
    SveIncDecByPredicateCount,
    SveWhile,
    SveConditionallyTerminate,
    SveIntCompareVectors,
    SveIntCompareImm,
    SveIntArithmeticPred,
    SveIntArithmeticUnpred,
    SveBroadcast,
    SveMovprfx,
    SveLoadStorePredicate,
    SveLoadStoreVector,
    SveContiguousLoadStore,

    // System
    SystemRegister,
    Hint,
    Barrier,
    SystemSys,
    Exception,
    Udf,

    /// Decoder dispatched to an undefined slot.
    Unallocated,
}

/// The external decoder: classifies one word into exactly one group.
///
/// The decoder outlives the simulator and is never owned by it; the driver
/// loop borrows it for the duration of a run.
pub trait Decode {
    fn decode(&self, instr: &Instruction) -> InstructionGroup;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_fields() {
        // ADD x3, x7, #42  ->  sf=1, imm12=42, rn=7, rd=3
        let instr = Instruction::new(0x9100_a8e3, 0x1000);
        assert!(instr.sf());
        assert_eq!(instr.imm12(), 42);
        assert_eq!(instr.rn(), 7);
        assert_eq!(instr.rd(), 3);
    }

    #[test]
    fn signed_fields_extend() {
        // imm26 = -1 (all ones) -> byte offset -4
        let instr = Instruction::new(0x17ff_ffff, 0);
        assert_eq!(instr.imm26_offset(), -4);
    }

    #[test]
    fn bitmask_immediates() {
        // Canonical examples from the bitmask construction.
        assert_eq!(decode_bitmask(64, 0, 0, 0b111100), Some(0x5555_5555_5555_5555));
        assert_eq!(decode_bitmask(32, 0, 0, 0b000000), Some(1));
        assert_eq!(decode_bitmask(64, 1, 0, 0b000000), Some(1));
        // All-ones element is reserved.
        assert_eq!(decode_bitmask(64, 1, 0, 0b111111), None);
        assert_eq!(decode_bitmask(32, 0, 0, 0b111111), None);
    }

    #[test]
    fn fp_immediates() {
        // imm8 = 0b01110000 encodes 1.0.
        let one = Instruction::new(0x70 << 13, 0);
        assert_eq!(one.imm_fp64(), 1.0);
        assert_eq!(one.imm_fp32(), 1.0);
        assert_eq!(one.imm_fp16_bits(), 0x3c00);
    }

    #[test]
    fn condition_inversion() {
        assert_eq!(Condition::Eq.invert(), Condition::Ne);
        assert_eq!(Condition::Lt.invert(), Condition::Ge);
        assert_eq!(Condition::Al.invert(), Condition::Nv);
    }
}
