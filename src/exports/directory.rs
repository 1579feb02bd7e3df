//! The fixed 40 byte export directory record (`IMAGE_EXPORT_DIRECTORY`).

use crate::{
    file::io::{read_le_at, write_le_at},
    Result,
};

/// Size of the export directory record.
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Time stamp written into newly encoded directories.
pub const EXPORT_TIMESTAMP_SENTINEL: u32 = 0xFFFF_FFFF;

/// Header of the export data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportDirectory {
    /// Reserved, zero
    pub export_flags: u32,
    /// Creation time stamp
    pub time_date_stamp: u32,
    /// Major version, informational
    pub major_version: u16,
    /// Minor version, informational
    pub minor_version: u16,
    /// RVA of the module name string
    pub name_rva: u32,
    /// Ordinal of the first address table entry
    pub ordinal_base: u32,
    /// Number of address table entries
    pub address_table_entries: u32,
    /// Number of name pointers, and of ordinal table entries
    pub number_of_name_pointers: u32,
    /// RVA of the export address table
    pub export_address_table_rva: u32,
    /// RVA of the name pointer table
    pub name_pointer_rva: u32,
    /// RVA of the ordinal table
    pub ordinal_table_rva: u32,
}

impl ExportDirectory {
    /// Decodes the record at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the record does not fit into `data`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = offset;
        Ok(ExportDirectory {
            export_flags: read_le_at(data, &mut cursor)?,
            time_date_stamp: read_le_at(data, &mut cursor)?,
            major_version: read_le_at(data, &mut cursor)?,
            minor_version: read_le_at(data, &mut cursor)?,
            name_rva: read_le_at(data, &mut cursor)?,
            ordinal_base: read_le_at(data, &mut cursor)?,
            address_table_entries: read_le_at(data, &mut cursor)?,
            number_of_name_pointers: read_le_at(data, &mut cursor)?,
            export_address_table_rva: read_le_at(data, &mut cursor)?,
            name_pointer_rva: read_le_at(data, &mut cursor)?,
            ordinal_table_rva: read_le_at(data, &mut cursor)?,
        })
    }

    /// Encodes the record into `data`, which must hold at least [`EXPORT_DIRECTORY_SIZE`]
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        let mut cursor = 0;
        write_le_at(data, &mut cursor, self.export_flags)?;
        write_le_at(data, &mut cursor, self.time_date_stamp)?;
        write_le_at(data, &mut cursor, self.major_version)?;
        write_le_at(data, &mut cursor, self.minor_version)?;
        write_le_at(data, &mut cursor, self.name_rva)?;
        write_le_at(data, &mut cursor, self.ordinal_base)?;
        write_le_at(data, &mut cursor, self.address_table_entries)?;
        write_le_at(data, &mut cursor, self.number_of_name_pointers)?;
        write_le_at(data, &mut cursor, self.export_address_table_rva)?;
        write_le_at(data, &mut cursor, self.name_pointer_rva)?;
        write_le_at(data, &mut cursor, self.ordinal_table_rva)?;
        Ok(())
    }
}
