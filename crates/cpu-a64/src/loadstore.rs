//! Load/store visitor surface: single registers, pairs, literals,
//! exclusives, atomics, RCpc accesses and PAC-authenticated loads.
//!
//! Loads and stores write their registers without the generic trace line
//! and emit a richer one instead: register, raw bytes and the memory
//! address touched.

use a64_core::{A64Memory, Instruction, InstructionGroup};

use crate::alu;
use crate::fault::Fault;
use crate::pac::{self, PacKey};
use crate::registers::{Reg31Mode, VRegister};
use crate::simulator::Simulator;

/// One decoded single-register access.
#[derive(Debug, Clone, Copy)]
struct Access {
    store: bool,
    size_bytes: usize,
    /// Sign-extend the loaded value.
    signed: bool,
    /// Destination width for sign extension (32 or 64).
    dst_size: u32,
    /// FP/SIMD register file.
    simd: bool,
    /// PRFM: address formed, nothing transferred.
    prefetch: bool,
}

fn decode_single(instr: &Instruction) -> Access {
    let size = instr.size_ls();
    let opc = instr.opc_ls();
    if instr.bit(26) == 1 {
        // SIMD&FP: opc<1> extends the size to reach Q.
        let scale = ((opc >> 1) << 2) | size;
        Access {
            store: opc & 1 == 0,
            size_bytes: 1 << scale,
            signed: false,
            dst_size: 64,
            simd: true,
            prefetch: false,
        }
    } else {
        let prefetch = size == 0b11 && opc == 0b10;
        Access {
            store: opc == 0b00,
            size_bytes: 1 << size,
            signed: opc >= 0b10,
            dst_size: if opc == 0b11 { 32 } else { 64 },
            simd: false,
            prefetch,
        }
    }
}

impl<M: A64Memory> Simulator<M> {
    // ================================================================
    // Single register
    // ================================================================
    //
    // Encoding: size 111 V 0x opc ... Rn Rt, with the addressing mode
    // selecting unsigned-scaled, unscaled, pre/post-index or
    // register-offset operand forms.

    pub(crate) fn visit_load_store(
        &mut self,
        group: InstructionGroup,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let access = decode_single(instr);
        let base = self.base_address(instr.rn())?;

        use InstructionGroup as G;
        let (addr, writeback) = match group {
            G::LoadStoreUnsignedOffset => {
                let scale = access.size_bytes.trailing_zeros();
                (base.wrapping_add(instr.imm12() << scale), None)
            }
            G::LoadStoreUnscaledOffset => (base.wrapping_add(instr.imm9() as u64), None),
            G::LoadStorePreIndex => {
                let addr = base.wrapping_add(instr.imm9() as u64);
                // Pre-index: the base updates before the access and is
                // logged first.
                self.write_back_base(instr.rn(), addr);
                (addr, None)
            }
            G::LoadStorePostIndex => (base, Some(base.wrapping_add(instr.imm9() as u64))),
            _ => {
                // Register offset: extend, then scale by the access size
                // when the S bit is set.
                let rm = self.regs.x(instr.rm(), Reg31Mode::ZeroRegister);
                let amount = if instr.bit(12) == 1 {
                    access.size_bytes.trailing_zeros()
                } else {
                    0
                };
                let offset = alu::extend_value(64, rm, instr.extend_dp(), amount);
                (base.wrapping_add(offset), None)
            }
        };

        if !access.prefetch {
            self.single_access(instr.rt(), access, addr)?;
        }

        if let Some(new_base) = writeback {
            self.write_back_base(instr.rn(), new_base);
        }
        Ok(())
    }

    fn single_access(&mut self, rt: usize, access: Access, addr: u64) -> Result<(), Fault> {
        if access.simd {
            return self.simd_access(rt, access, addr);
        }
        if access.store {
            let value = self.regs.x(rt, Reg31Mode::ZeroRegister);
            self.store_int(rt, addr, value, access.size_bytes)
        } else {
            self.load_int(rt, addr, access.size_bytes, access.signed, access.dst_size)
        }
    }

    fn load_int(
        &mut self,
        rt: usize,
        addr: u64,
        size_bytes: usize,
        signed: bool,
        dst_size: u32,
    ) -> Result<(), Fault> {
        let mut bytes = [0_u8; 8];
        self.mem()
            .read_bytes(addr, &mut bytes[..size_bytes])
            .map_err(|oob| self.bounds_fault(oob))?;
        let raw = u64::from_le_bytes(bytes);
        let value = if signed {
            let bits = 8 * size_bytes as u32;
            let extended = (((raw << (64 - bits)) as i64) >> (64 - bits)) as u64;
            extended & alu::reg_mask(dst_size)
        } else {
            raw
        };
        self.regs.set_x_quiet(rt, value, Reg31Mode::ZeroRegister);
        let name = reg_name(rt, if dst_size == 32 { 32 } else { 64 });
        self.trace_mem_access(&name, addr, &bytes[..size_bytes], false);
        Ok(())
    }

    fn store_int(&mut self, rt: usize, addr: u64, value: u64, size_bytes: usize) -> Result<(), Fault> {
        let bytes = value.to_le_bytes();
        self.local_monitor.clear_on_store();
        self.mem_mut()
            .write_bytes(addr, &bytes[..size_bytes])
            .map_err(|oob| self.bounds_fault(oob))?;
        let name = reg_name(rt, 8 * size_bytes as u32);
        self.trace_mem_access(&name, addr, &bytes[..size_bytes], true);
        Ok(())
    }

    fn simd_access(&mut self, rt: usize, access: Access, addr: u64) -> Result<(), Fault> {
        let size = access.size_bytes;
        let mut bytes = [0_u8; 16];
        if access.store {
            let vreg = self.regs.v(rt);
            bytes[..size].copy_from_slice(&vreg.bytes()[..size]);
            self.local_monitor.clear_on_store();
            self.mem_mut()
                .write_bytes(addr, &bytes[..size])
                .map_err(|oob| self.bounds_fault(oob))?;
            self.trace_mem_access(&vreg_name(rt, size), addr, &bytes[..size], true);
        } else {
            self.mem()
                .read_bytes(addr, &mut bytes[..size])
                .map_err(|oob| self.bounds_fault(oob))?;
            let mut vreg = VRegister::zeroed();
            vreg.bytes_mut()[..size].copy_from_slice(&bytes[..size]);
            self.regs.set_v_quiet(rt, vreg);
            self.trace_mem_access(&vreg_name(rt, size), addr, &bytes[..size], false);
        }
        Ok(())
    }

    // ================================================================
    // Pairs
    // ================================================================
    //
    // Encoding: opc 101 V 0 mode L imm7 Rt2 Rn Rt. Stores permit
    // Rt == Rt2; LDPSW sign-extends both words.

    pub(crate) fn visit_load_store_pair(
        &mut self,
        group: InstructionGroup,
        instr: &Instruction,
    ) -> Result<(), Fault> {
        let opc = instr.bits(31, 30);
        let simd = instr.bit(26) == 1;
        let load = instr.bit(22) == 1;
        let (size_bytes, signed) = if simd {
            (4_usize << opc, false)
        } else {
            match opc {
                0b00 => (4, false),
                0b01 => (4, true), // LDPSW
                0b10 => (8, false),
                _ => {
                    return Err(Fault::Unallocated {
                        pc: instr.address(),
                        raw: instr.raw(),
                    });
                }
            }
        };

        let base = self.base_address(instr.rn())?;
        let scale = size_bytes.trailing_zeros();
        let offset = (instr.imm7() << scale) as u64;

        use InstructionGroup as G;
        let (addr, writeback) = match group {
            G::LoadStorePairOffset => (base.wrapping_add(offset), None),
            G::LoadStorePairPreIndex => {
                let addr = base.wrapping_add(offset);
                self.write_back_base(instr.rn(), addr);
                (addr, None)
            }
            _ => (base, Some(base.wrapping_add(offset))),
        };

        let second = addr.wrapping_add(size_bytes as u64);
        for (reg, element_addr) in [(instr.rt(), addr), (instr.rt2(), second)] {
            let access = Access {
                store: !load,
                size_bytes,
                signed,
                dst_size: 64,
                simd,
                prefetch: false,
            };
            self.single_access(reg, access, element_addr)?;
        }

        if let Some(new_base) = writeback {
            self.write_back_base(instr.rn(), new_base);
        }
        Ok(())
    }

    // Literal loads: opc 011 V 00 imm19 Rt, pc-relative.
    pub(crate) fn visit_load_literal(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let addr = instr.address().wrapping_add(instr.imm19_offset() as u64);
        let opc = instr.bits(31, 30);
        if instr.bit(26) == 1 {
            let access = Access {
                store: false,
                size_bytes: 4 << opc,
                signed: false,
                dst_size: 64,
                simd: true,
                prefetch: false,
            };
            return self.simd_access(instr.rt(), access, addr);
        }
        match opc {
            0b00 => self.load_int(instr.rt(), addr, 4, false, 64),
            0b01 => self.load_int(instr.rt(), addr, 8, false, 64),
            0b10 => self.load_int(instr.rt(), addr, 4, true, 64), // LDRSW
            _ => Ok(()), // PRFM (literal): address formed, no transfer
        }
    }

    // ================================================================
    // Exclusives, CAS, ordered accesses
    // ================================================================
    //
    // Encoding: size 001000 o2 L o1 Rs o0 Rt2 Rn Rt.

    pub(crate) fn visit_load_store_exclusive(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let o2 = instr.bit(23);
        let l = instr.bit(22);
        let o1 = instr.bit(21);
        let o0 = instr.bit(15);

        if o1 == 1 {
            if o2 == 1 {
                return self.compare_and_swap(instr, 1 << instr.size_ls(), l == 1, o0 == 1);
            }
            if instr.bit(31) == 0 {
                // CASP: a pair of W or X elements.
                let size = if instr.bit(30) == 1 { 8 } else { 4 };
                return self.compare_and_swap_pair(instr, size, l == 1, o0 == 1);
            }
            return self.exclusive_pair(instr, l == 1, o0 == 1);
        }

        let size = 1_usize << instr.size_ls();
        let rn = instr.rn();
        let addr = self.base_address(rn)?;
        self.check_atomic_align(addr, size)?;

        if o2 == 1 {
            // Ordered plain accesses: LDAR / STLR.
            if l == 1 {
                self.load_int(instr.rt(), addr, size, false, 64)?;
                Self::host_fence();
            } else {
                Self::host_fence();
                let value = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
                self.store_int(instr.rt(), addr, value, size)?;
            }
            return Ok(());
        }

        if l == 1 {
            // LDXR / LDAXR: mark both monitors.
            self.local_monitor.mark(addr, size);
            self.global_monitor.mark(addr, size);
            self.load_int(instr.rt(), addr, size, false, 64)?;
            if o0 == 1 {
                Self::host_fence();
            }
        } else {
            // STXR / STLXR: succeed only when both monitors still cover
            // the store. Status goes to Rs: 0 on success, 1 on failure.
            let success =
                self.local_monitor.covers(addr, size) && self.global_monitor.covers(addr, size);
            if success {
                if o0 == 1 {
                    Self::host_fence();
                }
                let value = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
                let bytes = value.to_le_bytes();
                self.mem_mut()
                    .write_bytes(addr, &bytes[..size])
                    .map_err(|oob| self.bounds_fault(oob))?;
                self.trace_mem_access(&reg_name(instr.rt(), 8 * size as u32), addr, &bytes[..size], true);
                self.global_monitor.clear();
            }
            self.local_monitor.clear();
            self.regs
                .set_w(instr.rs(), u32::from(!success), Reg31Mode::ZeroRegister);
        }
        Ok(())
    }

    fn exclusive_pair(&mut self, instr: &Instruction, load: bool, ordered: bool) -> Result<(), Fault> {
        let size = if instr.bit(30) == 1 { 8_usize } else { 4 };
        let rn = instr.rn();
        let addr = self.base_address(rn)?;
        self.check_atomic_align(addr, size * 2)?;

        if load {
            self.local_monitor.mark(addr, size * 2);
            self.global_monitor.mark(addr, size * 2);
            self.load_int(instr.rt(), addr, size, false, 64)?;
            self.load_int(instr.rt2(), addr + size as u64, size, false, 64)?;
            if ordered {
                Self::host_fence();
            }
        } else {
            let success = self.local_monitor.covers(addr, size * 2)
                && self.global_monitor.covers(addr, size * 2);
            if success {
                if ordered {
                    Self::host_fence();
                }
                let first = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
                let second = self.regs.x(instr.rt2(), Reg31Mode::ZeroRegister);
                self.store_int(instr.rt(), addr, first, size)?;
                self.store_int(instr.rt2(), addr + size as u64, second, size)?;
                self.global_monitor.clear();
            }
            self.local_monitor.clear();
            self.regs
                .set_w(instr.rs(), u32::from(!success), Reg31Mode::ZeroRegister);
        }
        Ok(())
    }

    fn compare_and_swap(
        &mut self,
        instr: &Instruction,
        size: usize,
        acquire: bool,
        release: bool,
    ) -> Result<(), Fault> {
        let addr = self.base_address(instr.rn())?;
        self.check_atomic_align(addr, size)?;
        let mask = alu::reg_mask(8 * size as u32);

        let mut bytes = [0_u8; 8];
        self.mem()
            .read_bytes(addr, &mut bytes[..size])
            .map_err(|oob| self.bounds_fault(oob))?;
        if acquire {
            Self::host_fence();
        }
        let observed = u64::from_le_bytes(bytes);
        let expected = self.regs.x(instr.rs(), Reg31Mode::ZeroRegister) & mask;

        if observed == expected {
            if release {
                Self::host_fence();
            }
            let new = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
            self.store_int(instr.rt(), addr, new, size)?;
        }
        // Rs always receives the observed value.
        self.regs
            .set_x_quiet(instr.rs(), observed, Reg31Mode::ZeroRegister);
        self.trace_mem_access(&reg_name(instr.rs(), 8 * size as u32), addr, &bytes[..size], false);
        Ok(())
    }

    fn compare_and_swap_pair(
        &mut self,
        instr: &Instruction,
        size: usize,
        acquire: bool,
        release: bool,
    ) -> Result<(), Fault> {
        let addr = self.base_address(instr.rn())?;
        self.check_atomic_align(addr, size * 2)?;
        let rs = instr.rs();
        let rt = instr.rt();

        let lo: u64 = self.read_sized(addr, size)?;
        let hi: u64 = self.read_sized(addr + size as u64, size)?;
        if acquire {
            Self::host_fence();
        }
        let mask = alu::reg_mask(8 * size as u32);
        let expected_lo = self.regs.x(rs, Reg31Mode::ZeroRegister) & mask;
        let expected_hi = self.regs.x(rs + 1, Reg31Mode::ZeroRegister) & mask;

        if lo == expected_lo && hi == expected_hi {
            if release {
                Self::host_fence();
            }
            let new_lo = self.regs.x(rt, Reg31Mode::ZeroRegister);
            let new_hi = self.regs.x(rt + 1, Reg31Mode::ZeroRegister);
            self.store_int(rt, addr, new_lo, size)?;
            self.store_int(rt + 1, addr + size as u64, new_hi, size)?;
        }
        self.regs.set_x_quiet(rs, lo, Reg31Mode::ZeroRegister);
        self.regs.set_x_quiet(rs + 1, hi, Reg31Mode::ZeroRegister);
        Ok(())
    }

    fn read_sized(&self, addr: u64, size: usize) -> Result<u64, Fault> {
        let mut bytes = [0_u8; 8];
        self.mem()
            .read_bytes(addr, &mut bytes[..size])
            .map_err(|oob| self.bounds_fault(oob))?;
        Ok(u64::from_le_bytes(bytes))
    }

    // ================================================================
    // Atomic read-modify-write (LSE)
    // ================================================================
    //
    // Encoding: size 111000 A R 1 Rs o3 opc 00 Rn Rt. Rt receives the
    // pre-value; Rs contributes the operand.

    pub(crate) fn visit_atomic_memory(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let size = 1_usize << instr.size_ls();
        let bits = 8 * size as u32;
        let acquire = instr.bit(23) == 1;
        let release = instr.bit(22) == 1;
        let o3 = instr.bit(15);
        let opc = instr.bits(14, 12);

        let addr = self.base_address(instr.rn())?;
        self.check_atomic_align(addr, size)?;

        let old = self.read_sized(addr, size)?;
        if acquire {
            Self::host_fence();
        }
        let operand = self.regs.x(instr.rs(), Reg31Mode::ZeroRegister) & alu::reg_mask(bits);

        let sext = |v: u64| (((v << (64 - bits)) as i64) >> (64 - bits));
        let new = if o3 == 1 {
            // SWP.
            operand
        } else {
            match opc {
                0b000 => old.wrapping_add(operand), // LDADD
                0b001 => old & !operand,            // LDCLR
                0b010 => old ^ operand,             // LDEOR
                0b011 => old | operand,             // LDSET
                0b100 => sext(old).max(sext(operand)) as u64, // LDSMAX
                0b101 => sext(old).min(sext(operand)) as u64, // LDSMIN
                0b110 => old.max(operand),          // LDUMAX
                _ => old.min(operand),              // LDUMIN
            }
        } & alu::reg_mask(bits);

        if release {
            Self::host_fence();
        }
        let bytes = new.to_le_bytes();
        self.local_monitor.clear_on_store();
        self.mem_mut()
            .write_bytes(addr, &bytes[..size])
            .map_err(|oob| self.bounds_fault(oob))?;
        self.trace_mem_access(&reg_name(instr.rs(), bits), addr, &bytes[..size], true);

        self.regs
            .set_x_quiet(instr.rt(), old, Reg31Mode::ZeroRegister);
        Ok(())
    }

    // ================================================================
    // RCpc: LDAPR and the unscaled LDAPUR/STLUR forms
    // ================================================================

    pub(crate) fn visit_load_store_rcpc(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let size = 1_usize << instr.size_ls();
        if instr.bits(29, 24) == 0b011001 {
            // LDAPUR / STLUR / LDAPURS*: unscaled signed offset.
            let addr = self
                .base_address(instr.rn())?
                .wrapping_add(instr.imm9() as u64);
            self.check_atomic_align(addr, size)?;
            let opc = instr.opc_ls();
            match opc {
                0b00 => {
                    Self::host_fence();
                    let value = self.regs.x(instr.rt(), Reg31Mode::ZeroRegister);
                    self.store_int(instr.rt(), addr, value, size)
                }
                0b01 => {
                    self.load_int(instr.rt(), addr, size, false, 64)?;
                    Self::host_fence();
                    Ok(())
                }
                _ => {
                    let dst_size = if opc == 0b11 { 32 } else { 64 };
                    self.load_int(instr.rt(), addr, size, true, dst_size)?;
                    Self::host_fence();
                    Ok(())
                }
            }
        } else {
            // LDAPR [Rn].
            let addr = self.base_address(instr.rn())?;
            self.check_atomic_align(addr, size)?;
            self.load_int(instr.rt(), addr, size, false, 64)?;
            Self::host_fence();
            Ok(())
        }
    }

    // ================================================================
    // PAC-authenticated loads: LDRAA / LDRAB
    // ================================================================
    //
    // Encoding: 11 111000 M S 1 imm9 W 1 Rn Rt. The base authenticates
    // with the data key before the offset applies.

    pub(crate) fn visit_load_store_pac(&mut self, instr: &Instruction) -> Result<(), Fault> {
        let key = if instr.bit(23) == 1 { PacKey::Db } else { PacKey::Da };
        let base = self.regs.x(instr.rn(), Reg31Mode::StackPointer);
        let authed = pac::auth_pac(base, 0, key);
        if pac::has_tag_bits(authed) {
            return Err(Fault::PointerAuth {
                pc: instr.address(),
                target: authed,
            });
        }
        // 10-bit signed offset (S:imm9), scaled by 8.
        let imm10 = (i64::from(instr.bit(22)) << 9) | instr.bits(20, 12) as i64;
        let offset = ((imm10 << 54) >> 54) * 8;
        let addr = authed.wrapping_add(offset as u64);

        self.load_int(instr.rt(), addr, 8, false, 64)?;
        if instr.bit(11) == 1 {
            self.write_back_base(instr.rn(), addr);
        }
        Ok(())
    }
}

fn reg_name(code: usize, bits: u32) -> String {
    if bits == 32 {
        format!("w{code}")
    } else {
        format!("x{code}")
    }
}

fn vreg_name(code: usize, size_bytes: usize) -> String {
    let prefix = match size_bytes {
        1 => 'b',
        2 => 'h',
        4 => 's',
        8 => 'd',
        _ => 'q',
    };
    format!("{prefix}{code}")
}
