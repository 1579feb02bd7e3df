//! PE/COFF header records.
//!
//! Each header block is an owned, plain Rust value that is decoded from a byte offset
//! and re-encoded to a byte offset field by field. Nothing here aliases the image
//! buffer: edits happen on these values and are serialized back into the output
//! during the final write pass.
//!
//! # Layout
//!
//! ```text
//! 0x3C            u32 offset of the PE signature
//! sig             "PE\0\0"
//! sig + 4         CoffHeader                  20 bytes
//! sig + 24        OptionalHeader (PE32+)     112 bytes of fixed fields
//!                 DataDirectory[n]             8 bytes each
//! sig + 24 + SizeOfOptionalHeader
//!                 SectionHeader[NumberOfSections]  40 bytes each
//! ```

use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter, FromRepr};

use crate::{
    file::io::{read_le_at, write_le_at},
    Error, Result,
};

/// File offset of the `e_lfanew` field holding the PE signature offset.
pub const PE_POINTER_OFFSET: usize = 0x3C;
/// The PE signature, `"PE\0\0"` read as a little-endian `u32`.
pub const PE_SIGNATURE: u32 = 0x0000_4550;
/// Optional header magic for the 32-bit PE32 form.
pub const PE32_MAGIC: u16 = 0x10b;
/// Optional header magic for the 64-bit PE32+ form.
pub const PE32PLUS_MAGIC: u16 = 0x20b;
/// Size of the COFF file header.
pub const COFF_HEADER_SIZE: usize = 20;
/// Size of the fixed (standard + windows specific) PE32+ optional header fields.
pub const OPTIONAL_HEADER_FIXED_SIZE: usize = 112;
/// Size of one data directory entry.
pub const DATA_DIRECTORY_SIZE: usize = 8;
/// Size of one section header.
pub const SECTION_HEADER_SIZE: usize = 40;

/// COFF machine type for x86.
pub const MACHINE_I386: u16 = 0x014c;
/// COFF machine type for x64.
pub const MACHINE_AMD64: u16 = 0x8664;

/// Offset of `CheckSum` inside the optional header.
const CHECKSUM_OFFSET: usize = 64;

bitflags! {
    /// Section characteristics flags (`IMAGE_SCN_*`).
    ///
    /// Bits without a named constant are preserved as-is when a header is re-encoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionCharacteristics: u32 {
        /// The section contains executable code.
        const CNT_CODE = 0x0000_0020;
        /// The section contains initialized data.
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// The section contains uninitialized data.
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// The section can be executed as code.
        const MEM_EXECUTE = 0x2000_0000;
        /// The section can be read.
        const MEM_READ = 0x4000_0000;
        /// The section can be written to.
        const MEM_WRITE = 0x8000_0000;

        const _ = !0;
    }
}

/// The standard data directory slots, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[repr(usize)]
pub enum DataDirectoryType {
    /// Export table (`.edata`)
    ExportTable = 0,
    /// Import table
    ImportTable,
    /// Resource table
    ResourceTable,
    /// Exception table
    ExceptionTable,
    /// Attribute certificate table (file offset, not an RVA)
    CertificateTable,
    /// Base relocation table
    BaseRelocationTable,
    /// Debug data
    Debug,
    /// Reserved, must be zero
    Architecture,
    /// Global pointer register RVA
    GlobalPtr,
    /// Thread local storage table
    TlsTable,
    /// Load configuration table
    LoadConfigTable,
    /// Bound import table
    BoundImport,
    /// Import address table
    ImportAddressTable,
    /// Delay import descriptor
    DelayImportDescriptor,
    /// CLR runtime header
    ClrRuntimeHeader,
    /// Reserved, must be zero
    Reserved,
}

/// The COFF file header that follows the PE signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoffHeader {
    /// Target machine type
    pub machine: u16,
    /// Number of entries in the section table
    pub number_of_sections: u16,
    /// Link time stamp
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, usually zero
    pub pointer_to_symbol_table: u32,
    /// Number of COFF symbols
    pub number_of_symbols: u32,
    /// Size of the optional header; also the distance from its start to the section table
    pub size_of_optional_header: u16,
    /// Image characteristics
    pub characteristics: u16,
}

impl CoffHeader {
    /// Decodes a COFF header at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the header does not fit into `data`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = offset;
        Ok(CoffHeader {
            machine: read_le_at(data, &mut cursor)?,
            number_of_sections: read_le_at(data, &mut cursor)?,
            time_date_stamp: read_le_at(data, &mut cursor)?,
            pointer_to_symbol_table: read_le_at(data, &mut cursor)?,
            number_of_symbols: read_le_at(data, &mut cursor)?,
            size_of_optional_header: read_le_at(data, &mut cursor)?,
            characteristics: read_le_at(data, &mut cursor)?,
        })
    }

    /// Encodes this header at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the header does not fit into `data`.
    pub fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        let mut cursor = offset;
        write_le_at(data, &mut cursor, self.machine)?;
        write_le_at(data, &mut cursor, self.number_of_sections)?;
        write_le_at(data, &mut cursor, self.time_date_stamp)?;
        write_le_at(data, &mut cursor, self.pointer_to_symbol_table)?;
        write_le_at(data, &mut cursor, self.number_of_symbols)?;
        write_le_at(data, &mut cursor, self.size_of_optional_header)?;
        write_le_at(data, &mut cursor, self.characteristics)?;
        Ok(())
    }
}

/// The fixed fields of a PE32+ optional header (standard and windows specific parts).
///
/// The data directory array that follows is kept separately, see
/// [`crate::file::PeImage::data_directories`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionalHeader {
    /// Always [`PE32PLUS_MAGIC`] once decoded
    pub magic: u16,
    /// Linker major version
    pub major_linker_version: u8,
    /// Linker minor version
    pub minor_linker_version: u8,
    /// Sum of all code sections
    pub size_of_code: u32,
    /// Sum of all initialized data sections
    pub size_of_initialized_data: u32,
    /// Sum of all uninitialized data sections
    pub size_of_uninitialized_data: u32,
    /// Entry point RVA
    pub address_of_entry_point: u32,
    /// RVA of the start of the code section
    pub base_of_code: u32,
    /// Preferred load address
    pub image_base: u64,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Alignment of section raw data in the file
    pub file_alignment: u32,
    /// Required operating system, major
    pub major_operating_system_version: u16,
    /// Required operating system, minor
    pub minor_operating_system_version: u16,
    /// Image version, major
    pub major_image_version: u16,
    /// Image version, minor
    pub minor_image_version: u16,
    /// Subsystem version, major
    pub major_subsystem_version: u16,
    /// Subsystem version, minor
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero
    pub win32_version_value: u32,
    /// Size of the image in memory
    pub size_of_image: u32,
    /// Combined size of all headers, rounded to the file alignment
    pub size_of_headers: u32,
    /// Image checksum
    pub check_sum: u32,
    /// Subsystem
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: u16,
    /// Stack reserve size
    pub size_of_stack_reserve: u64,
    /// Stack commit size
    pub size_of_stack_commit: u64,
    /// Heap reserve size
    pub size_of_heap_reserve: u64,
    /// Heap commit size
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero
    pub loader_flags: u32,
    /// Declared number of data directories
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    /// Decodes a PE32+ optional header at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if the magic is not [`PE32PLUS_MAGIC`], or
    /// [`Error::OutOfBounds`] if the fixed fields do not fit into `data`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = offset;
        let magic: u16 = read_le_at(data, &mut cursor)?;
        if magic != PE32PLUS_MAGIC {
            return Err(Error::UnsupportedFormat { magic });
        }

        Ok(OptionalHeader {
            magic,
            major_linker_version: read_le_at(data, &mut cursor)?,
            minor_linker_version: read_le_at(data, &mut cursor)?,
            size_of_code: read_le_at(data, &mut cursor)?,
            size_of_initialized_data: read_le_at(data, &mut cursor)?,
            size_of_uninitialized_data: read_le_at(data, &mut cursor)?,
            address_of_entry_point: read_le_at(data, &mut cursor)?,
            base_of_code: read_le_at(data, &mut cursor)?,
            image_base: read_le_at(data, &mut cursor)?,
            section_alignment: read_le_at(data, &mut cursor)?,
            file_alignment: read_le_at(data, &mut cursor)?,
            major_operating_system_version: read_le_at(data, &mut cursor)?,
            minor_operating_system_version: read_le_at(data, &mut cursor)?,
            major_image_version: read_le_at(data, &mut cursor)?,
            minor_image_version: read_le_at(data, &mut cursor)?,
            major_subsystem_version: read_le_at(data, &mut cursor)?,
            minor_subsystem_version: read_le_at(data, &mut cursor)?,
            win32_version_value: read_le_at(data, &mut cursor)?,
            size_of_image: read_le_at(data, &mut cursor)?,
            size_of_headers: read_le_at(data, &mut cursor)?,
            check_sum: read_le_at(data, &mut cursor)?,
            subsystem: read_le_at(data, &mut cursor)?,
            dll_characteristics: read_le_at(data, &mut cursor)?,
            size_of_stack_reserve: read_le_at(data, &mut cursor)?,
            size_of_stack_commit: read_le_at(data, &mut cursor)?,
            size_of_heap_reserve: read_le_at(data, &mut cursor)?,
            size_of_heap_commit: read_le_at(data, &mut cursor)?,
            loader_flags: read_le_at(data, &mut cursor)?,
            number_of_rva_and_sizes: read_le_at(data, &mut cursor)?,
        })
    }

    /// Encodes the fixed fields at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the fields do not fit into `data`.
    pub fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        let mut cursor = offset;
        write_le_at(data, &mut cursor, self.magic)?;
        write_le_at(data, &mut cursor, self.major_linker_version)?;
        write_le_at(data, &mut cursor, self.minor_linker_version)?;
        write_le_at(data, &mut cursor, self.size_of_code)?;
        write_le_at(data, &mut cursor, self.size_of_initialized_data)?;
        write_le_at(data, &mut cursor, self.size_of_uninitialized_data)?;
        write_le_at(data, &mut cursor, self.address_of_entry_point)?;
        write_le_at(data, &mut cursor, self.base_of_code)?;
        write_le_at(data, &mut cursor, self.image_base)?;
        write_le_at(data, &mut cursor, self.section_alignment)?;
        write_le_at(data, &mut cursor, self.file_alignment)?;
        write_le_at(data, &mut cursor, self.major_operating_system_version)?;
        write_le_at(data, &mut cursor, self.minor_operating_system_version)?;
        write_le_at(data, &mut cursor, self.major_image_version)?;
        write_le_at(data, &mut cursor, self.minor_image_version)?;
        write_le_at(data, &mut cursor, self.major_subsystem_version)?;
        write_le_at(data, &mut cursor, self.minor_subsystem_version)?;
        write_le_at(data, &mut cursor, self.win32_version_value)?;
        write_le_at(data, &mut cursor, self.size_of_image)?;
        write_le_at(data, &mut cursor, self.size_of_headers)?;
        debug_assert_eq!(cursor - offset, CHECKSUM_OFFSET);
        write_le_at(data, &mut cursor, self.check_sum)?;
        write_le_at(data, &mut cursor, self.subsystem)?;
        write_le_at(data, &mut cursor, self.dll_characteristics)?;
        write_le_at(data, &mut cursor, self.size_of_stack_reserve)?;
        write_le_at(data, &mut cursor, self.size_of_stack_commit)?;
        write_le_at(data, &mut cursor, self.size_of_heap_reserve)?;
        write_le_at(data, &mut cursor, self.size_of_heap_commit)?;
        write_le_at(data, &mut cursor, self.loader_flags)?;
        write_le_at(data, &mut cursor, self.number_of_rva_and_sizes)?;
        Ok(())
    }
}

/// One `(RVA, size)` data directory entry. An RVA of zero means the directory is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// RVA of the table
    pub virtual_address: u32,
    /// Size of the table in bytes
    pub size: u32,
}

impl DataDirectory {
    /// Returns `true` if this directory points at a table.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }

    /// Decodes a data directory entry at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the entry does not fit into `data`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = offset;
        Ok(DataDirectory {
            virtual_address: read_le_at(data, &mut cursor)?,
            size: read_le_at(data, &mut cursor)?,
        })
    }

    /// Encodes this entry at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the entry does not fit into `data`.
    pub fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        let mut cursor = offset;
        write_le_at(data, &mut cursor, self.virtual_address)?;
        write_le_at(data, &mut cursor, self.size)
    }
}

/// One entry of the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Packed, NUL padded section name
    pub name: [u8; 8],
    /// Size of the section in memory
    pub virtual_size: u32,
    /// RVA of the section
    pub virtual_address: u32,
    /// Size of the raw data in the file
    pub size_of_raw_data: u32,
    /// File offset of the raw data
    pub pointer_to_raw_data: u32,
    /// File offset of COFF relocations, zero for images
    pub pointer_to_relocations: u32,
    /// File offset of COFF line numbers, deprecated
    pub pointer_to_linenumbers: u32,
    /// Number of COFF relocations
    pub number_of_relocations: u16,
    /// Number of COFF line numbers
    pub number_of_linenumbers: u16,
    /// Section flags
    pub characteristics: SectionCharacteristics,
}

impl SectionHeader {
    /// Decodes a section header at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the header does not fit into `data`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let end = offset
            .checked_add(SECTION_HEADER_SIZE)
            .filter(|end| *end <= data.len())
            .ok_or(Error::OutOfBounds)?;

        let mut name = [0u8; 8];
        name.copy_from_slice(&data[offset..offset + 8]);

        let mut cursor = offset + 8;
        let header = SectionHeader {
            name,
            virtual_size: read_le_at(data, &mut cursor)?,
            virtual_address: read_le_at(data, &mut cursor)?,
            size_of_raw_data: read_le_at(data, &mut cursor)?,
            pointer_to_raw_data: read_le_at(data, &mut cursor)?,
            pointer_to_relocations: read_le_at(data, &mut cursor)?,
            pointer_to_linenumbers: read_le_at(data, &mut cursor)?,
            number_of_relocations: read_le_at(data, &mut cursor)?,
            number_of_linenumbers: read_le_at(data, &mut cursor)?,
            characteristics: SectionCharacteristics::from_bits_retain(read_le_at(
                data,
                &mut cursor,
            )?),
        };
        debug_assert_eq!(cursor, end);

        Ok(header)
    }

    /// Encodes this header at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the header does not fit into `data`.
    pub fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        if offset
            .checked_add(SECTION_HEADER_SIZE)
            .filter(|end| *end <= data.len())
            .is_none()
        {
            return Err(Error::OutOfBounds);
        }

        data[offset..offset + 8].copy_from_slice(&self.name);
        let mut cursor = offset + 8;
        write_le_at(data, &mut cursor, self.virtual_size)?;
        write_le_at(data, &mut cursor, self.virtual_address)?;
        write_le_at(data, &mut cursor, self.size_of_raw_data)?;
        write_le_at(data, &mut cursor, self.pointer_to_raw_data)?;
        write_le_at(data, &mut cursor, self.pointer_to_relocations)?;
        write_le_at(data, &mut cursor, self.pointer_to_linenumbers)?;
        write_le_at(data, &mut cursor, self.number_of_relocations)?;
        write_le_at(data, &mut cursor, self.number_of_linenumbers)?;
        write_le_at(data, &mut cursor, self.characteristics.bits())?;
        Ok(())
    }

    /// Returns the section name with NUL padding removed.
    ///
    /// Names that are not valid UTF-8 are decoded lossily.
    #[must_use]
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Returns `true` if `rva` falls inside `[virtual_address, virtual_address + virtual_size)`.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = u64::from(self.virtual_address);
        let end = start + u64::from(self.virtual_size);
        (start..end).contains(&u64::from(rva))
    }

    /// End of the section in memory (`virtual_address + virtual_size`).
    #[must_use]
    pub fn virtual_end(&self) -> u64 {
        u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }

    /// End of the section's raw data in the file.
    #[must_use]
    pub fn raw_end(&self) -> u64 {
        u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_raw_data)
    }
}

/// Packs a section name into its 8 byte, NUL padded on-disk form.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the name is longer than 8 bytes.
pub fn pack_section_name(name: &str) -> Result<[u8; 8]> {
    let bytes = name.as_bytes();
    if bytes.len() > 8 {
        return Err(malformed_error!(
            "Section name '{}' is longer than 8 bytes",
            name
        ));
    }

    let mut packed = [0u8; 8];
    packed[..bytes.len()].copy_from_slice(bytes);
    Ok(packed)
}

/// Returns a human readable name for a COFF machine type.
#[must_use]
pub fn machine_name(machine: u16) -> &'static str {
    match machine {
        MACHINE_AMD64 => "x64",
        MACHINE_I386 => "x86",
        _ => "unknown",
    }
}
