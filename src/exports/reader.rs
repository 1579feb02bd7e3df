use log::warn;

use crate::{
    exports::{ExportDirectory, ExportEntry, ExportTable, ExportTarget},
    file::{headers::DataDirectoryType, parser::Parser, PeImage},
    Error, Result,
};

impl ExportTable {
    /// Decodes the export directory of `image`.
    ///
    /// An image without an export directory, or whose directory RVA is not mapped by any
    /// section, yields an empty table with an empty module name. Address table slots holding a
    /// zero RVA are gaps unless a name is bound to them, in which case they decode as
    /// [`ExportTarget::Address`]`(0)`. Slots pointing back into the directory are decoded as
    /// forwarders.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InconsistentExportTable`] if a name refers to an ordinal without
    ///   an address table entry
    /// - [`crate::Error::Malformed`] if a sub-table or string is not mapped or truncated
    pub fn parse(image: &PeImage) -> Result<ExportTable> {
        let Some(location) = image.data_directory(DataDirectoryType::ExportTable) else {
            return Ok(ExportTable::new(""));
        };
        let Some(offset) = image.rva_to_offset(location.virtual_address) else {
            warn!(
                "Export directory RVA 0x{:x} is not mapped by any section, treating as absent",
                location.virtual_address
            );
            return Ok(ExportTable::new(""));
        };

        let directory = ExportDirectory::read(image.data(), offset)
            .map_err(|_| malformed_error!("Truncated export directory at 0x{:x}", offset))?;

        let module_name = if directory.name_rva == 0 {
            String::new()
        } else {
            image.read_cstring(directory.name_rva)?
        };

        let mut table = ExportTable::new(module_name);
        table.ordinal_base = directory.ordinal_base;

        let directory_range = u64::from(location.virtual_address)
            ..u64::from(location.virtual_address) + u64::from(location.size);

        let mut addresses = table_parser(
            image,
            directory.export_address_table_rva,
            directory.address_table_entries,
            "address table",
        )?;
        for index in 0..directory.address_table_entries {
            let rva: u32 = addresses.read_le().map_err(|_| truncated("address table"))?;
            let ordinal = directory
                .ordinal_base
                .checked_add(index)
                .ok_or_else(|| malformed_error!("Export ordinal overflows at slot {}", index))?;
            let target = if rva == 0 {
                ExportTarget::Address(0)
            } else if directory_range.contains(&u64::from(rva)) {
                ExportTarget::Forwarder(image.read_cstring(rva)?)
            } else {
                ExportTarget::Address(rva)
            };

            table.by_ordinal.insert(
                ordinal,
                ExportEntry {
                    ordinal,
                    name: None,
                    target,
                },
            );
        }

        let count = directory.number_of_name_pointers;
        let mut names =
            table_parser(image, directory.name_pointer_rva, count, "name pointer table")?;
        let mut ordinals =
            table_parser(image, directory.ordinal_table_rva, count, "ordinal table")?;
        for _ in 0..count {
            let name_rva: u32 = names.read_le().map_err(|_| truncated("name pointer table"))?;
            let index: u16 = ordinals.read_le().map_err(|_| truncated("ordinal table"))?;
            let name = image.read_cstring(name_rva)?;

            let ordinal = directory.ordinal_base.wrapping_add(u32::from(index));
            let Some(entry) = table.by_ordinal.get_mut(&ordinal) else {
                return Err(Error::InconsistentExportTable { ordinal, name });
            };

            if let Some(existing) = &entry.name {
                warn!(
                    "Export ordinal {} has a second name '{}', keeping '{}'",
                    ordinal, name, existing
                );
                continue;
            }
            if table.by_name.contains_key(&name) {
                warn!("Export name '{}' is bound to more than one ordinal", name);
                continue;
            }

            table.by_name.insert(name.clone(), ordinal);
            entry.name = Some(name);
        }

        // Zero slots only survive when a name refers to them
        table.by_ordinal.retain(|ordinal, entry| {
            let gap = entry.name.is_none() && entry.target == ExportTarget::Address(0);
            if gap {
                warn!("Export address table slot for ordinal {} is empty", ordinal);
            }
            !gap
        });

        Ok(table)
    }
}

/// Positions a parser at a sub-table of `count` entries; an empty table needs no mapping.
fn table_parser<'a>(image: &'a PeImage, rva: u32, count: u32, what: &str) -> Result<Parser<'a>> {
    let mut parser = Parser::new(image.data());
    if count == 0 {
        return Ok(parser);
    }

    let offset = image
        .rva_to_offset(rva)
        .ok_or_else(|| malformed_error!("Export {} RVA 0x{:x} is not mapped", what, rva))?;
    parser.seek(offset).map_err(|_| truncated(what))?;
    Ok(parser)
}

fn truncated(what: &str) -> Error {
    malformed_error!("Export {} is truncated", what)
}
