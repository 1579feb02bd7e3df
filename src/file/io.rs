//! Little-endian field accessors over raw image bytes.
//!
//! Every PE structure this crate touches is read and written through these helpers
//! instead of overlaying language-level structs onto the buffer. Each access names an
//! explicit byte offset and width, is bounds checked, and never depends on the host's
//! alignment or endianness.
//!
//! # Key Components
//!
//! - [`crate::file::io::PeIO`] - Trait implemented by the primitive field types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Bounds-checked reads
//! - [`crate::file::io::write_le`] / [`crate::file::io::write_le_at`] - Bounds-checked writes
//!
//! # Usage Examples
//!
//! ```rust
//! use gpuhint::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x5A4Du16)?;
//! write_le_at(&mut data, &mut offset, 0x0000_4550u32)?;
//! assert_eq!(data, [0x4D, 0x5A, 0x50, 0x45, 0x00, 0x00]);
//!
//! let mut offset = 2;
//! let signature: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(signature, 0x4550);
//! assert_eq!(offset, 6);
//! # Ok::<(), gpuhint::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All functions return [`crate::Error::OutOfBounds`] if the buffer does not hold enough
//! bytes at the requested offset. Offsets are only advanced on success.

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be stored as little-endian fields inside a PE image.
pub trait PeIO: Sized + Copy {
    /// Width of the encoded field in bytes.
    const SIZE: usize;

    /// Decodes a value from exactly [`PeIO::SIZE`] little-endian bytes.
    fn decode_le(bytes: &[u8]) -> Self;

    /// Encodes the value into exactly [`PeIO::SIZE`] little-endian bytes.
    fn encode_le(self, bytes: &mut [u8]);
}

macro_rules! impl_pe_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PeIO for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn encode_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_pe_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Returns the exclusive end of a `len` byte field at `offset`, if it fits in `data_len`.
fn field_end(offset: usize, len: usize, data_len: usize) -> Result<usize> {
    match offset.checked_add(len) {
        Some(end) if end <= data_len => Ok(end),
        _ => Err(OutOfBounds),
    }
}

/// Reads a value of type `T` from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: PeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the field does not fit; `offset` is left
/// unchanged in that case.
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let end = field_end(*offset, T::SIZE, data.len())?;
    let value = T::decode_le(&data[*offset..end]);
    *offset = end;
    Ok(value)
}

/// Writes `value` at the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn write_le<T: PeIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes `value` at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the field does not fit; neither `data` nor
/// `offset` are modified in that case.
pub fn write_le_at<T: PeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let end = field_end(*offset, T::SIZE, data.len())?;
    value.encode_le(&mut data[*offset..end]);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_widths() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_signed() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(read_le::<i8>(&data).unwrap(), -1);
        assert_eq!(read_le::<i16>(&data).unwrap(), -1);
        assert_eq!(read_le::<i32>(&data).unwrap(), -1);
        assert_eq!(read_le::<i64>(&data).unwrap(), -1);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let value: u16 = read_le_at(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0403);
        assert_eq!(offset, 4);

        let value: u32 = read_le_at(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0807_0605);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_out_of_bounds_leaves_offset() {
        let mut offset = 6;
        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset);
        assert!(matches!(result, Err(Error::OutOfBounds)));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn write_le_at_advances() {
        let mut data = [0u8; 8];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0x0201u16).unwrap();
        write_le_at(&mut data, &mut offset, 0x0605_0403u32).unwrap();
        write_le_at(&mut data, &mut offset, -1i16).unwrap();
        assert_eq!(data, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xFF, 0xFF]);
        assert_eq!(offset, 8);
    }

    #[test]
    fn write_out_of_bounds_is_untouched() {
        let mut data = [0u8; 4];
        let mut offset = 1;
        let result = write_le_at(&mut data, &mut offset, 0xAABB_CCDDu32);
        assert!(matches!(result, Err(Error::OutOfBounds)));
        assert_eq!(data, [0u8; 4]);
        assert_eq!(offset, 1);

        assert!(write_le(&mut data, 0u64).is_err());
    }
}
