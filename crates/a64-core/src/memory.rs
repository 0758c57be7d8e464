//! Typed little-endian access over a flat, host-provided byte store.
//!
//! The execution core computes absolute 64-bit addresses and reads and
//! writes through [`A64Memory`]. [`LinearMemory`] is the standard backing:
//! one contiguous region at a configurable base address.

/// An access that fell outside the emulated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    /// First byte of the failed access.
    pub addr: u64,
    /// Access length in bytes.
    pub len: usize,
}

mod sealed {
    pub trait Sealed {}
}

/// A scalar that can cross the memory interface.
///
/// Implemented for the unsigned and signed integer widths, `f32`/`f64`,
/// and `u128` (the 16-byte quad view). Sealed: the set of memory-visible
/// types is part of the interface contract.
pub trait Scalar: Copy + sealed::Sealed {
    /// Width in bytes.
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
    fn write_le_slice(self, bytes: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            const SIZE: usize = size_of::<$t>();

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0_u8; size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn write_le_slice(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

impl_scalar!(u8, u16, u32, u64, u128, i8, i16, i32, i64, f32, f64);

/// The byte store the execution core runs against.
///
/// Addresses are absolute; accesses are little-endian and may be unaligned
/// (alignment rules for atomics are enforced by the core, not the store).
pub trait A64Memory {
    /// Lowest valid address.
    fn base(&self) -> u64;

    /// Size of the image in bytes.
    fn size(&self) -> u64;

    /// Copy `buf.len()` bytes starting at `addr` into `buf`.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), OutOfBounds>;

    /// Copy `data` into the image starting at `addr`.
    fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), OutOfBounds>;

    /// Typed little-endian read.
    fn read<T: Scalar>(&self, addr: u64) -> Result<T, OutOfBounds> {
        let mut buf = [0_u8; 16];
        self.read_bytes(addr, &mut buf[..T::SIZE])?;
        Ok(T::from_le_slice(&buf[..T::SIZE]))
    }

    /// Typed little-endian write.
    fn write<T: Scalar>(&mut self, addr: u64, value: T) -> Result<(), OutOfBounds> {
        let mut buf = [0_u8; 16];
        value.write_le_slice(&mut buf[..T::SIZE]);
        self.write_bytes(addr, &buf[..T::SIZE])
    }
}

/// A flat byte image at a fixed base address.
#[derive(Debug, Clone)]
pub struct LinearMemory {
    base: u64,
    data: Vec<u8>,
}

impl LinearMemory {
    /// Create a zero-filled image of `size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    /// Load a byte slice into the image (program text, test data).
    ///
    /// # Panics
    /// Panics if the slice does not fit; loading is a harness-setup
    /// operation, not an emulated access.
    pub fn load(&mut self, addr: u64, bytes: &[u8]) {
        let offset = usize::try_from(addr - self.base).expect("load address before base");
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Inspect one byte without going through the access interface.
    #[must_use]
    pub fn peek(&self, addr: u64) -> u8 {
        self.data[(addr - self.base) as usize]
    }

    fn span(&self, addr: u64, len: usize) -> Result<usize, OutOfBounds> {
        let oob = OutOfBounds { addr, len };
        let offset = addr.checked_sub(self.base).ok_or(oob)?;
        let end = offset.checked_add(len as u64).ok_or(oob)?;
        if end > self.data.len() as u64 {
            return Err(oob);
        }
        Ok(offset as usize)
    }
}

impl A64Memory for LinearMemory {
    fn base(&self) -> u64 {
        self.base
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        let offset = self.span(addr, buf.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), OutOfBounds> {
        let offset = self.span(addr, data.len())?;
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
