//! Staging buffer for a section appended to an image.
//!
//! A [`crate::file::section::SectionBuilder`] owns the bytes of one new section while it is
//! being filled. Its placement (RVA and file offset) is fixed when it is created by
//! [`crate::file::PeImage::append_section`]; the caller then writes sequentially and may seek
//! back to patch an earlier, reserved region once the values for it are known.
//!
//! ```rust
//! use gpuhint::file::section::SectionBuilder;
//! use gpuhint::file::headers::SectionCharacteristics;
//!
//! let mut section = SectionBuilder::new(
//!     *b".nvpatch",
//!     0x3000,
//!     0x600,
//!     0x200,
//!     SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
//! );
//!
//! let header_at = section.reserve(8)?;
//! let value_rva = section.write_u32(1)?;
//! assert_eq!(value_rva, 0x3008);
//!
//! section.seek(header_at)?;
//! section.write_u32(value_rva)?;
//!
//! section.close();
//! assert_eq!(section.size()?, 12);
//! assert_eq!(section.size_on_disk()?, 0x200);
//! # Ok::<(), gpuhint::Error>(())
//! ```

use crate::{
    file::headers::{SectionCharacteristics, SectionHeader},
    utils::{round_up_to_alignment, to_u32},
    Error::{OutOfBounds, SectionClosed},
    Result,
};

/// Bytes and placement of one section that will be appended on serialization.
#[derive(Debug, Clone)]
pub struct SectionBuilder {
    name: [u8; 8],
    virtual_address: u32,
    file_offset: u32,
    file_alignment: u32,
    characteristics: SectionCharacteristics,
    data: Vec<u8>,
    cursor: usize,
    closed: bool,
}

impl SectionBuilder {
    /// Creates an empty, open section at the given placement.
    ///
    /// Callers are expected to pass an RVA aligned to the image's section alignment and a
    /// file offset aligned to `file_alignment`; [`crate::file::PeImage::append_section`]
    /// computes both.
    #[must_use]
    pub fn new(
        name: [u8; 8],
        virtual_address: u32,
        file_offset: u32,
        file_alignment: u32,
        characteristics: SectionCharacteristics,
    ) -> Self {
        SectionBuilder {
            name,
            virtual_address,
            file_offset,
            file_alignment,
            characteristics,
            data: Vec::new(),
            cursor: 0,
            closed: false,
        }
    }

    /// Packed section name.
    #[must_use]
    pub fn name(&self) -> &[u8; 8] {
        &self.name
    }

    /// RVA of the first byte of the section.
    #[must_use]
    pub fn virtual_address(&self) -> u32 {
        self.virtual_address
    }

    /// File offset of the first byte of the section.
    #[must_use]
    pub fn file_offset(&self) -> u32 {
        self.file_offset
    }

    /// Section characteristics.
    #[must_use]
    pub fn characteristics(&self) -> SectionCharacteristics {
        self.characteristics
    }

    /// Bytes written so far.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Write position relative to the section start.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Write position expressed as an RVA.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the section has grown past the 32-bit
    /// address space.
    pub fn current_rva(&self) -> Result<u32> {
        self.rva_of(self.cursor)
    }

    /// Returns `true` once [`SectionBuilder::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Moves the write position to `pos`, which must not lie past the written data.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close, or [`crate::Error::OutOfBounds`]
    /// if `pos` is past the end of the written data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if self.closed {
            return Err(SectionClosed);
        }
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.cursor = pos;
        Ok(())
    }

    /// Writes `bytes` at the current position, overwriting or extending the buffer, and
    /// returns the RVA they were written at.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<u32> {
        if self.closed {
            return Err(SectionClosed);
        }

        let rva = self.current_rva()?;
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;

        Ok(rva)
    }

    /// Writes a little-endian `u16` and returns its RVA.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close.
    pub fn write_u16(&mut self, value: u16) -> Result<u32> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `u32` and returns its RVA.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close.
    pub fn write_u32(&mut self, value: u32) -> Result<u32> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes `value` followed by a NUL terminator and returns the RVA of its first byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close.
    pub fn write_cstr(&mut self, value: &str) -> Result<u32> {
        let rva = self.write_bytes(value.as_bytes())?;
        self.write_bytes(&[0])?;
        Ok(rva)
    }

    /// Writes `len` zero bytes and returns the section-relative position they start at.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] after close.
    pub fn reserve(&mut self, len: usize) -> Result<usize> {
        let start = self.cursor;
        self.write_bytes(&vec![0u8; len])?;
        Ok(start)
    }

    /// Freezes the section. Closing an already closed section has no effect.
    pub fn close(&mut self) {
        self.cursor = self.data.len();
        self.closed = true;
    }

    /// Raw size of the section content.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the content exceeds 4 GiB.
    pub fn size(&self) -> Result<u32> {
        to_u32(self.data.len())
    }

    /// Size of the section on disk, the raw size rounded up to the file alignment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidAlignment`] if the file alignment is zero.
    pub fn size_on_disk(&self) -> Result<u32> {
        round_up_to_alignment(self.size()?, self.file_alignment)
    }

    /// Builds the section table entry for this section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidAlignment`] if the file alignment is zero.
    pub fn header(&self) -> Result<SectionHeader> {
        Ok(SectionHeader {
            name: self.name,
            virtual_size: self.size()?,
            virtual_address: self.virtual_address,
            size_of_raw_data: self.size_on_disk()?,
            pointer_to_raw_data: self.file_offset,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: self.characteristics,
        })
    }

    fn rva_of(&self, pos: usize) -> Result<u32> {
        to_u32(pos)?
            .checked_add(self.virtual_address)
            .ok_or_else(|| {
                malformed_error!(
                    "Section at RVA 0x{:x} overflows the address space",
                    self.virtual_address
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn builder() -> SectionBuilder {
        SectionBuilder::new(
            *b".nvpatch",
            0x4000,
            0x800,
            0x200,
            SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
        )
    }

    #[test]
    fn test_sequential_writes_report_rvas() {
        let mut section = builder();
        assert_eq!(section.current_rva().unwrap(), 0x4000);
        assert_eq!(section.write_u32(7).unwrap(), 0x4000);
        assert_eq!(section.write_u16(3).unwrap(), 0x4004);
        assert_eq!(section.write_cstr("Foo").unwrap(), 0x4006);
        assert_eq!(section.current_rva().unwrap(), 0x400A);
        assert_eq!(section.data(), &[7, 0, 0, 0, 3, 0, b'F', b'o', b'o', 0]);
    }

    #[test]
    fn test_seek_back_overwrites_in_place() {
        let mut section = builder();
        let reserved = section.reserve(4).unwrap();
        section.write_u32(0xAAAA_AAAA).unwrap();
        section.seek(reserved).unwrap();
        section.write_u32(0x1122_3344).unwrap();
        assert_eq!(section.position(), 4);
        section.seek(8).unwrap();
        assert_eq!(section.position(), 8);
        assert_eq!(section.data()[..4], 0x1122_3344u32.to_le_bytes());
        assert_eq!(section.data().len(), 8);

        assert!(matches!(section.seek(9), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_close_freezes() {
        let mut section = builder();
        section.write_u32(1).unwrap();
        section.close();
        section.close();

        assert!(section.is_closed());
        assert!(matches!(section.write_u32(2), Err(Error::SectionClosed)));
        assert!(matches!(section.seek(0), Err(Error::SectionClosed)));
        assert_eq!(section.size().unwrap(), 4);
        assert_eq!(section.size_on_disk().unwrap(), 0x200);
    }

    #[test]
    fn test_header() {
        let mut section = builder();
        section.reserve(0x201).unwrap();
        section.close();

        let header = section.header().unwrap();
        assert_eq!(header.name(), ".nvpatch");
        assert_eq!(header.virtual_address, 0x4000);
        assert_eq!(header.virtual_size, 0x201);
        assert_eq!(header.size_of_raw_data, 0x400);
        assert_eq!(header.pointer_to_raw_data, 0x800);
        assert_eq!(header.characteristics.bits(), 0x4000_0040);
    }

    #[test]
    fn test_empty_section() {
        let mut section = builder();
        section.close();
        assert_eq!(section.size().unwrap(), 0);
        assert_eq!(section.size_on_disk().unwrap(), 0);
    }
}
