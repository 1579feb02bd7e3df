//! Bounds-checked byte cursor.
//!
//! [`crate::file::parser::Parser`] walks a byte slice sequentially. It is used for the
//! variable-length structures this crate has to step over: the single-file bundle
//! manifest (7-bit length-prefixed strings, version-dependent records) and NUL
//! terminated names inside the export directory.
//!
//! # Usage Examples
//!
//! ```rust
//! use gpuhint::file::parser::Parser;
//!
//! let data = [0x02, 0x00, 0x00, 0x00, 0x03, b'a', b'p', b'p', b'x', 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u32>()?, 2);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "app");
//! assert_eq!(parser.read_string_utf8()?, "x");
//! assert_eq!(parser.pos(), data.len());
//! # Ok::<(), gpuhint::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, PeIO},
    Error::OutOfBounds,
    Result,
};

/// A cursor over a borrowed byte slice.
///
/// All reads are bounds checked and advance the cursor only when they succeed.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Moves the cursor to `pos`. Seeking to the very end of the data is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Moves the cursor forward by `step` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if that would leave the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let target = self.position.checked_add(step).ok_or(OutOfBounds)?;
        self.seek(target)
    }

    /// Returns the current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Reads a little-endian value and advances past it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_le<T: PeIO>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.position)
    }

    /// Reads `length` raw bytes and advances past them.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or(OutOfBounds)?;

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads a 7-bit encoded unsigned integer (the length prefix used by .NET
    /// `BinaryWriter` strings).
    ///
    /// Each byte contributes its low 7 bits, least significant group first; the high bit
    /// flags a continuation byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] on truncated input, or
    /// [`crate::Error::Malformed`] if the encoding does not fit into a `u32`.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let start = self.position;
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let Some(&byte) = self.data.get(self.position) else {
                self.position = start;
                return Err(OutOfBounds);
            };
            self.position += 1;

            value |= u32::from(byte & 0x7F) << shift;
            if (byte & 0x80) == 0 {
                return Ok(value);
            }

            shift += 7;
            if shift >= 32 {
                self.position = start;
                return Err(malformed_error!(
                    "7-bit encoded integer at offset {} exceeds u32",
                    start
                ));
            }
        }
    }

    /// Reads a UTF-8 string prefixed by its 7-bit encoded byte length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] on truncated input, or
    /// [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let length = self.read_7bit_encoded_int()? as usize;
        let bytes = match self.read_bytes(length) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.position = start;
                return Err(error);
            }
        };

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}: {}",
                start,
                e.utf8_error()
            )
        })
    }

    /// Reads a NUL terminated UTF-8 string and advances past the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found before the end of
    /// the data, or [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let length = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(OutOfBounds)?;

        let string_data = &self.data[start..start + length];
        self.position = start + length + 1;

        String::from_utf8(string_data.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }
}
