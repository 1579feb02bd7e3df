//! PE32+ image model.
//!
//! [`crate::file::PeImage`] owns the complete bytes of one executable and the decoded
//! header chain. The byte buffer is never modified after load: header edits are made on
//! the decoded [`crate::file::headers`] values, new content is staged in
//! [`crate::file::section::SectionBuilder`]s, and small value patches are recorded by file
//! offset. [`crate::file::PeImage::serialize`] combines all of it into a new buffer.
//!
//! # Key Components
//!
//! - [`crate::file::PeImage`] - Loaded image with RVA translation and staged edits
//! - [`crate::file::headers`] - COFF, optional, data directory and section header records
//! - [`crate::file::section::SectionBuilder`] - Content of one appended section
//! - [`crate::file::io`] - Little-endian field accessors
//! - [`crate::file::parser::Parser`] - Sequential bounds-checked reader
//!
//! # Output layout
//!
//! ```text
//! [ original bytes up to the end of the last original section ]
//! [ new section 0 | zero padding to file alignment ]
//! [ new section 1 | zero padding to file alignment ]
//! [ trailing bytes of the original file, bundle offsets corrected ]
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use gpuhint::file::{headers::DataDirectoryType, PeImage};
//! use std::path::Path;
//!
//! let image = PeImage::from_file(Path::new("game.exe"))?;
//! for section in image.sections() {
//!     println!("{:<8} rva 0x{:08x}", section.name(), section.virtual_address);
//! }
//!
//! if let Some(exports) = image.data_directory(DataDirectoryType::ExportTable) {
//!     println!("export directory at 0x{:x}", exports.virtual_address);
//! }
//! # Ok::<(), gpuhint::Error>(())
//! ```

pub mod headers;
pub mod io;
pub mod parser;
pub mod section;

use std::{collections::BTreeMap, path::Path};

use log::{debug, warn};

use crate::{
    bundle,
    file::{
        headers::{
            pack_section_name, CoffHeader, DataDirectory, DataDirectoryType, OptionalHeader,
            SectionCharacteristics, SectionHeader, COFF_HEADER_SIZE, DATA_DIRECTORY_SIZE,
            OPTIONAL_HEADER_FIXED_SIZE, PE_POINTER_OFFSET, PE_SIGNATURE, SECTION_HEADER_SIZE,
        },
        io::read_le_at,
        parser::Parser,
        section::SectionBuilder,
    },
    utils::round_up_to_alignment,
    Error, Result,
};

/// A loaded PE32+ image together with the edits staged against it.
#[derive(Debug)]
pub struct PeImage {
    data: Vec<u8>,
    coff_offset: usize,
    optional_offset: usize,
    section_table_offset: usize,
    coff: CoffHeader,
    optional: OptionalHeader,
    directories: Vec<DataDirectory>,
    sections: Vec<SectionHeader>,
    builders: Vec<SectionBuilder>,
    patches: BTreeMap<usize, u32>,
    file_name: Option<String>,
}

impl PeImage {
    /// Loads an image from disk and remembers its file name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read, or any error of
    /// [`PeImage::from_mem`].
    pub fn from_file(path: &Path) -> Result<PeImage> {
        let data = std::fs::read(path)?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        let mut image = PeImage::from_mem(data)?;
        image.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(image)
    }

    /// Parses the header chain of `data` and takes ownership of it.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] if the PE signature is missing, the optional header
    ///   size is zero or any header is truncated
    /// - [`crate::Error::UnsupportedFormat`] if the optional header is not PE32+
    /// - [`crate::Error::InvalidAlignment`] if the section or file alignment is zero or
    ///   not a power of two
    pub fn from_mem(data: Vec<u8>) -> Result<PeImage> {
        let mut cursor = PE_POINTER_OFFSET;
        let pe_offset = read_le_at::<u32>(&data, &mut cursor)
            .map_err(|_| malformed_error!("File is too small to hold a DOS header"))?
            as usize;

        let mut cursor = pe_offset;
        match read_le_at::<u32>(&data, &mut cursor) {
            Ok(PE_SIGNATURE) => {}
            _ => {
                return Err(malformed_error!(
                    "Missing PE signature at offset 0x{:x}",
                    pe_offset
                ))
            }
        }

        let coff_offset = cursor;
        let coff = CoffHeader::read(&data, coff_offset)
            .map_err(|_| malformed_error!("Truncated COFF header at 0x{:x}", coff_offset))?;
        if coff.size_of_optional_header == 0 {
            return Err(malformed_error!("Image has no optional header"));
        }

        let optional_offset = coff_offset + COFF_HEADER_SIZE;
        let optional = match OptionalHeader::read(&data, optional_offset) {
            Err(Error::OutOfBounds) => {
                return Err(malformed_error!(
                    "Truncated optional header at 0x{:x}",
                    optional_offset
                ))
            }
            other => other?,
        };
        if usize::from(coff.size_of_optional_header) < OPTIONAL_HEADER_FIXED_SIZE {
            return Err(malformed_error!(
                "Optional header size {} is smaller than the PE32+ fixed fields",
                coff.size_of_optional_header
            ));
        }

        for alignment in [optional.section_alignment, optional.file_alignment] {
            if !alignment.is_power_of_two() {
                return Err(Error::InvalidAlignment(alignment));
            }
        }

        let directories_offset = optional_offset + OPTIONAL_HEADER_FIXED_SIZE;
        let section_table_offset = optional_offset + usize::from(coff.size_of_optional_header);
        let directory_count = (section_table_offset - directories_offset) / DATA_DIRECTORY_SIZE;

        let directories = (0..directory_count)
            .map(|index| {
                DataDirectory::read(&data, directories_offset + index * DATA_DIRECTORY_SIZE)
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|_| malformed_error!("Truncated data directory array"))?;

        let sections = (0..usize::from(coff.number_of_sections))
            .map(|index| {
                SectionHeader::read(&data, section_table_offset + index * SECTION_HEADER_SIZE)
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|_| malformed_error!("Truncated section table"))?;

        debug!(
            "Loaded PE32+ image: {} sections, {} data directories, section alignment 0x{:x}, file alignment 0x{:x}",
            sections.len(),
            directories.len(),
            optional.section_alignment,
            optional.file_alignment
        );

        Ok(PeImage {
            data,
            coff_offset,
            optional_offset,
            section_table_offset,
            coff,
            optional,
            directories,
            sections,
            builders: Vec::new(),
            patches: BTreeMap::new(),
            file_name: None,
        })
    }

    /// The original image bytes, without any staged edits.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// File name the image was loaded from, `None` for images parsed from memory.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The decoded COFF header.
    #[must_use]
    pub fn coff(&self) -> &CoffHeader {
        &self.coff
    }

    /// The decoded optional header fields.
    #[must_use]
    pub fn optional(&self) -> &OptionalHeader {
        &self.optional
    }

    /// The data directory array. Its length is derived from the optional header size.
    #[must_use]
    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.directories
    }

    /// The original section table, in file order.
    #[must_use]
    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Sections appended in this session, in append order.
    #[must_use]
    pub fn new_sections(&self) -> &[SectionBuilder] {
        &self.builders
    }

    /// Returns the data directory of `kind` if the image declares that slot and it is
    /// present (non-zero RVA).
    #[must_use]
    pub fn data_directory(&self, kind: DataDirectoryType) -> Option<DataDirectory> {
        self.directories
            .get(kind as usize)
            .copied()
            .filter(DataDirectory::is_present)
    }

    /// Replaces the data directory of `kind`. Written to the output on serialization.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the image declares fewer directory slots.
    pub fn set_data_directory(
        &mut self,
        kind: DataDirectoryType,
        directory: DataDirectory,
    ) -> Result<()> {
        let count = self.directories.len();
        let slot = self.directories.get_mut(kind as usize).ok_or_else(|| {
            malformed_error!(
                "Image declares {} data directories, no slot for {}",
                count,
                kind
            )
        })?;

        *slot = directory;
        Ok(())
    }

    /// Returns the first original section whose name equals `name`.
    #[must_use]
    pub fn find_section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// Translates an RVA to a file offset using the first section whose virtual range
    /// contains it. Returns `None` if no section does.
    #[must_use]
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let section = self.section_for_rva(rva)?;
        let offset =
            u64::from(section.pointer_to_raw_data) + u64::from(rva - section.virtual_address);
        usize::try_from(offset).ok()
    }

    /// Translates a file offset inside a section's raw data back to its RVA.
    #[must_use]
    pub fn offset_to_rva(&self, offset: usize) -> Option<u32> {
        let offset = u32::try_from(offset).ok()?;
        self.sections
            .iter()
            .find(|section| {
                offset >= section.pointer_to_raw_data
                    && u64::from(offset) < section.raw_end()
                    && offset - section.pointer_to_raw_data < section.virtual_size
            })
            .map(|section| section.virtual_address + (offset - section.pointer_to_raw_data))
    }

    /// Reads the NUL-terminated string stored at `rva`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the RVA is not mapped by any section or the
    /// string is not valid UTF-8, and [`crate::Error::OutOfBounds`] if it is not terminated.
    pub fn read_cstring(&self, rva: u32) -> Result<String> {
        let offset = self
            .rva_to_offset(rva)
            .ok_or_else(|| malformed_error!("String RVA 0x{:x} is not mapped by any section", rva))?;

        let mut parser = Parser::new(&self.data);
        parser.seek(offset)?;
        parser.read_string_utf8()
    }

    /// Reads the 32-bit value at `rva`, including values staged with
    /// [`PeImage::write_u32_at_rva`].
    ///
    /// Bytes inside a section's virtual size but past its raw data are zero-filled by the
    /// loader and read as zero.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the four bytes are not mapped by a section or
    /// the section's raw data lies past the end of the file.
    pub fn read_u32_at_rva(&self, rva: u32) -> Result<u32> {
        let slot = self.value_slot(rva)?;
        if slot.backed == 4 {
            if let Some(value) = self.patches.get(&slot.offset) {
                return Ok(*value);
            }
            let mut cursor = slot.offset;
            return read_le_at(&self.data, &mut cursor);
        }

        let mut bytes = [0u8; 4];
        if let Some(backed) = self.data.get(slot.offset..slot.offset + slot.backed) {
            bytes[..slot.backed].copy_from_slice(backed);
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// File offset of the 32-bit value at `rva`, which must lie entirely in file data.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] if the four bytes are not mapped by a section
    /// - [`crate::Error::ConflictingState`] if they reach into the zero-filled part of the
    ///   section, which has no file data to overwrite
    pub fn value_file_offset(&self, rva: u32) -> Result<usize> {
        let slot = self.value_slot(rva)?;
        if slot.backed < 4 {
            return Err(Error::ConflictingState(format!(
                "Value at RVA 0x{:x} lies in the zero-filled part of section '{}'",
                rva,
                self.sections[slot.section].name()
            )));
        }
        Ok(slot.offset)
    }

    /// Stages a 32-bit write at `rva`, applied to the output by [`PeImage::serialize`].
    ///
    /// # Errors
    ///
    /// Returns any error of [`PeImage::value_file_offset`].
    pub fn write_u32_at_rva(&mut self, rva: u32, value: u32) -> Result<()> {
        let offset = self.value_file_offset(rva)?;
        debug!("Staging value {} at RVA 0x{:x} (file offset 0x{:x})", value, rva, offset);
        self.patches.insert(offset, value);
        Ok(())
    }

    /// Starts a new section placed after the previous new section, or after the last
    /// original section if none was appended yet. The previous new section is closed.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] if `name` is longer than 8 bytes
    /// - [`crate::Error::NoHeaderSpace`] if the header area cannot hold another section
    ///   table entry
    pub fn append_section(
        &mut self,
        name: &str,
        characteristics: SectionCharacteristics,
    ) -> Result<&mut SectionBuilder> {
        let packed = pack_section_name(name)?;

        if self.section_header_room() == 0 {
            return Err(Error::NoHeaderSpace);
        }

        let (prior_end, prior_file_end) = match self.builders.last_mut() {
            Some(previous) => {
                previous.close();
                (
                    u64::from(previous.virtual_address()) + u64::from(previous.size()?),
                    u64::from(previous.file_offset()) + u64::from(previous.size_on_disk()?),
                )
            }
            None => match self.sections.last() {
                Some(last) => (last.virtual_end(), last.raw_end()),
                None => {
                    let headers = u64::from(self.optional.size_of_headers);
                    (headers, headers)
                }
            },
        };

        let virtual_address = round_up_to_alignment(narrow(prior_end)?, self.optional.section_alignment)?;
        let file_offset = round_up_to_alignment(narrow(prior_file_end)?, self.optional.file_alignment)?;
        debug!(
            "Appending section '{}' at RVA 0x{:x}, file offset 0x{:x}",
            name, virtual_address, file_offset
        );

        self.builders.push(SectionBuilder::new(
            packed,
            virtual_address,
            file_offset,
            self.optional.file_alignment,
            characteristics,
        ));

        let index = self.builders.len() - 1;
        Ok(&mut self.builders[index])
    }

    /// Produces the output image: original bytes, appended sections, re-appended trailing
    /// bytes with bundle offsets corrected, and rewritten headers. Closes all open sections.
    ///
    /// The image itself is left untouched apart from closing sections, so serializing twice
    /// yields the same bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a size field overflows or the bundle manifest cannot be parsed.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        for builder in &mut self.builders {
            builder.close();
        }

        let original_end = self.original_sections_end();
        let mut coff = self.coff;
        let mut optional = self.optional;

        let (mut output, trailing) = if self.builders.is_empty() {
            (self.data.clone(), &[][..])
        } else {
            let split = original_end.min(self.data.len());
            (self.data[..split].to_vec(), &self.data[split..])
        };

        let mut new_headers = Vec::with_capacity(self.builders.len());
        for builder in &self.builders {
            let file_offset = builder.file_offset() as usize;
            if output.len() > file_offset {
                return Err(malformed_error!(
                    "Section at file offset 0x{:x} would overlap existing data",
                    file_offset
                ));
            }

            let size_on_disk = builder.size_on_disk()?;
            output.resize(file_offset, 0);
            output.extend_from_slice(builder.data());
            output.resize(file_offset + size_on_disk as usize, 0);

            let characteristics = builder.characteristics();
            if characteristics.contains(SectionCharacteristics::CNT_CODE) {
                optional.size_of_code = grow(optional.size_of_code, size_on_disk)?;
            }
            if characteristics.contains(SectionCharacteristics::CNT_INITIALIZED_DATA) {
                optional.size_of_initialized_data =
                    grow(optional.size_of_initialized_data, size_on_disk)?;
            }
            if characteristics.contains(SectionCharacteristics::CNT_UNINITIALIZED_DATA) {
                optional.size_of_uninitialized_data =
                    grow(optional.size_of_uninitialized_data, size_on_disk)?;
            }

            let mapped_end = round_up_to_alignment(
                grow(builder.virtual_address(), builder.size()?)?,
                optional.section_alignment,
            )?;
            // Growing by the on-disk size alone falls short of the section's mapped end
            // whenever SectionAlignment exceeds FileAlignment, and the loader rejects a
            // SizeOfImage that does not cover every section.
            optional.size_of_image = grow(optional.size_of_image, size_on_disk)?.max(mapped_end);

            new_headers.push(builder.header()?);
        }

        let delta = output.len().saturating_sub(original_end);
        output.extend_from_slice(trailing);

        coff.number_of_sections = u16::try_from(self.sections.len() + new_headers.len())
            .map_err(|_| malformed_error!("Too many sections"))?;
        optional.check_sum = 0;

        coff.write(&mut output, self.coff_offset)?;
        optional.write(&mut output, self.optional_offset)?;
        let directories_offset = self.optional_offset + OPTIONAL_HEADER_FIXED_SIZE;
        for (index, directory) in self.directories.iter().enumerate() {
            directory.write(&mut output, directories_offset + index * DATA_DIRECTORY_SIZE)?;
        }
        for (index, header) in self.sections.iter().chain(new_headers.iter()).enumerate() {
            header.write(&mut output, self.section_table_offset + index * SECTION_HEADER_SIZE)?;
        }

        for (&offset, &value) in &self.patches {
            output
                .get_mut(offset..offset + 4)
                .ok_or(Error::OutOfBounds)?
                .copy_from_slice(&value.to_le_bytes());
        }

        if !trailing.is_empty() {
            let delta = u64::try_from(delta).map_err(|_| malformed_error!("Delta overflow"))?;
            match bundle::patch_manifest(&self.data, &mut output, delta)? {
                Some(summary) => debug!(
                    "Corrected bundle manifest v{}.{} with {} files by 0x{:x}",
                    summary.major_version, summary.minor_version, summary.file_count, delta
                ),
                None => warn!(
                    "Re-appended {} trailing bytes that carry no bundle manifest",
                    trailing.len()
                ),
            }
        }

        Ok(output)
    }

    /// Serializes the image and writes it to `path` in one write.
    ///
    /// # Errors
    ///
    /// Returns any error of [`PeImage::serialize`], or [`crate::Error::FileError`] if the
    /// file cannot be written.
    pub fn write_to_file(&mut self, path: &Path) -> Result<()> {
        let output = self.serialize()?;
        std::fs::write(path, &output)?;
        debug!("Wrote {} bytes to {}", output.len(), path.display());
        Ok(())
    }

    fn section_for_rva(&self, rva: u32) -> Option<&SectionHeader> {
        self.sections.iter().find(|section| section.contains_rva(rva))
    }

    /// Locates the 4-byte value at `rva` and how many of its bytes the file backs.
    fn value_slot(&self, rva: u32) -> Result<ValueSlot> {
        let (index, section) = self
            .sections
            .iter()
            .enumerate()
            .find(|(_, section)| section.contains_rva(rva))
            .ok_or_else(|| malformed_error!("RVA 0x{:x} is not mapped by any section", rva))?;

        let relative = u64::from(rva - section.virtual_address);
        let mapped = section.virtual_size.max(section.size_of_raw_data);
        if relative + 4 > u64::from(mapped) {
            return Err(malformed_error!(
                "Value at RVA 0x{:x} runs past the end of section '{}'",
                rva,
                section.name()
            ));
        }

        let backed = u64::from(section.size_of_raw_data).saturating_sub(relative).min(4) as usize;
        let offset = (u64::from(section.pointer_to_raw_data) + relative) as usize;
        if backed > 0 && offset + backed > self.data.len() {
            return Err(malformed_error!("Value at RVA 0x{:x} lies past the end of the file", rva));
        }

        Ok(ValueSlot {
            section: index,
            offset,
            backed,
        })
    }

    /// End of the last original section's raw data, where trailing bytes begin.
    fn original_sections_end(&self) -> usize {
        self.sections
            .last()
            .map_or(u64::from(self.optional.size_of_headers), SectionHeader::raw_end) as usize
    }

    /// Number of further section table entries that fit in the header area, after the
    /// original and already appended sections.
    pub fn section_header_room(&self) -> usize {
        let used = self.section_table_offset
            + (self.sections.len() + self.builders.len()) * SECTION_HEADER_SIZE;
        self.header_space_end().saturating_sub(used) / SECTION_HEADER_SIZE
    }

    /// First byte that a new section table entry must not overlap.
    fn header_space_end(&self) -> usize {
        self.sections
            .iter()
            .filter(|section| section.size_of_raw_data != 0)
            .map(|section| section.pointer_to_raw_data as usize)
            .chain(std::iter::once(self.optional.size_of_headers as usize))
            .min()
            .unwrap_or(0)
    }
}

/// A 4-byte value inside a section; only the first `backed` bytes exist in the file.
struct ValueSlot {
    section: usize,
    offset: usize,
    backed: usize,
}

fn narrow(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Value 0x{:x} exceeds 32 bits", value))
}

fn grow(value: u32, by: u32) -> Result<u32> {
    value
        .checked_add(by)
        .ok_or_else(|| malformed_error!("Header size field overflows: 0x{:x} + 0x{:x}", value, by))
}
