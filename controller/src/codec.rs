//! Opinionated BLE codec
//!
//! Assumes little endian for all types

pub trait FixedSize: Sized {
    const SIZE: usize;
}

pub trait Type: Sized {
    fn size(&self) -> usize;
}

pub trait Encode: Type {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error>;
}

pub trait Decode<'d>: Type {
    fn decode(src: &'d [u8]) -> Result<Self, Error>;
}

impl<T: FixedSize> Type for T {
    fn size(&self) -> usize {
        Self::SIZE
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InsufficientSpace,
    InvalidValue,
}

pub(crate) fn take<const N: usize>(src: &[u8]) -> Result<[u8; N], Error> {
    let bytes = src.get(..N).ok_or(Error::InsufficientSpace)?;
    bytes.try_into().map_err(|_| Error::InvalidValue)
}

pub(crate) fn place<'a>(dest: &'a mut [u8], n: usize) -> Result<&'a mut [u8], Error> {
    dest.get_mut(..n).ok_or(Error::InsufficientSpace)
}

//
// Implementations for primitives
//
impl FixedSize for u8 {
    const SIZE: usize = 1;
}

impl FixedSize for i8 {
    const SIZE: usize = 1;
}

impl FixedSize for u16 {
    const SIZE: usize = 2;
}

impl FixedSize for u32 {
    const SIZE: usize = 4;
}

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;
}

impl Decode<'_> for u8 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        Ok(take::<1>(src)?[0])
    }
}

impl Decode<'_> for i8 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        Ok(take::<1>(src)?[0] as i8)
    }
}

impl Decode<'_> for u16 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        Ok(u16::from_le_bytes(take(src)?))
    }
}

impl Decode<'_> for u32 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        Ok(u32::from_le_bytes(take(src)?))
    }
}

impl<const N: usize> Decode<'_> for [u8; N] {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        take(src)
    }
}

impl Encode for u8 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        place(dest, 1)?[0] = *self;
        Ok(())
    }
}

impl Encode for i8 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        place(dest, 1)?[0] = *self as u8;
        Ok(())
    }
}

impl Encode for u16 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        place(dest, 2)?.copy_from_slice(&self.to_le_bytes()[..]);
        Ok(())
    }
}

impl Encode for u32 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        place(dest, 4)?.copy_from_slice(&self.to_le_bytes()[..]);
        Ok(())
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        place(dest, N)?.copy_from_slice(&self[..]);
        Ok(())
    }
}
