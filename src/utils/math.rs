//! Mathematical utility functions.

use crate::{Error, Result};

/// Rounds `value` up to the next multiple of `alignment`.
///
/// Values that already sit on an alignment boundary are returned unchanged. The
/// alignment does not need to be a power of two; PE alignment values always are,
/// but that is validated where the headers are parsed, not here.
///
/// # Errors
///
/// Returns [`Error::InvalidAlignment`] if `alignment` is zero, or
/// [`Error::Malformed`] if the rounded value does not fit into a `u32`.
///
/// # Examples
///
/// ```rust
/// use gpuhint::utils::round_up_to_alignment;
///
/// assert_eq!(round_up_to_alignment(0x1001, 0x1000)?, 0x2000);
/// assert_eq!(round_up_to_alignment(0x400, 0x200)?, 0x400);
/// # Ok::<(), gpuhint::Error>(())
/// ```
pub fn round_up_to_alignment(value: u32, alignment: u32) -> Result<u32> {
    if alignment == 0 {
        return Err(Error::InvalidAlignment(alignment));
    }

    let over = value % alignment;
    if over == 0 {
        return Ok(value);
    }

    value
        .checked_add(alignment - over)
        .ok_or_else(|| malformed_error!("Aligning 0x{:x} to 0x{:x} overflows", value, alignment))
}

/// Converts a `usize` to `u32` for PE serialization, returning an error if the value
/// exceeds `u32::MAX`. RVAs, file offsets and table sizes are all 32-bit in PE32+.
///
/// # Errors
///
/// Returns an error if `value` exceeds `u32::MAX`.
pub fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| malformed_error!("PE serialization value {value} exceeds u32::MAX"))
}
