use std::collections::BTreeMap;

use log::debug;

use crate::{
    exports::{
        ExportDirectory, ExportTable, ExportTarget, EXPORT_DIRECTORY_SIZE,
        EXPORT_TIMESTAMP_SENTINEL,
    },
    file::{headers::DataDirectory, section::SectionBuilder},
    utils::to_u32,
    Result,
};

impl ExportTable {
    /// Encodes the table into `section` at its current write position and returns the
    /// data directory entry describing it.
    ///
    /// The directory header is reserved first and written last, once the RVAs of all
    /// sub-tables are known. The address table is dense from the ordinal base to the
    /// highest ordinal; ordinals without an entry are written as zero. Name pointers and
    /// ordinal indices are sorted by name bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SectionClosed`] if `section` is closed, or
    /// [`crate::Error::Malformed`] if an ordinal index does not fit the 16-bit ordinal table.
    pub fn encode(&self, section: &mut SectionBuilder) -> Result<DataDirectory> {
        let ordinal_base = self
            .by_ordinal
            .first_key_value()
            .map_or(self.ordinal_base, |(lowest, _)| self.ordinal_base.min(*lowest));
        let address_table_entries = self
            .by_ordinal
            .last_key_value()
            .map_or(0, |(highest, _)| highest - ordinal_base + 1);

        let directory_rva = section.current_rva()?;
        let header_at = section.reserve(EXPORT_DIRECTORY_SIZE)?;

        // Forwarder strings follow the address table directly, so their RVAs are known
        // before the table is written.
        let export_address_table_rva = section.current_rva()?;
        let mut forwarder_rva = export_address_table_rva
            .checked_add(address_table_entries.checked_mul(4).ok_or_else(too_many)?)
            .ok_or_else(too_many)?;
        let mut forwarders = Vec::new();
        let mut slots = vec![0u32; address_table_entries as usize];
        for entry in self.by_ordinal.values() {
            let slot = &mut slots[(entry.ordinal - ordinal_base) as usize];
            match &entry.target {
                ExportTarget::Address(rva) => *slot = *rva,
                ExportTarget::Forwarder(target) => {
                    *slot = forwarder_rva;
                    forwarder_rva += to_u32(target.len() + 1)?;
                    forwarders.push(target.as_str());
                }
            }
        }
        for slot in slots {
            section.write_u32(slot)?;
        }
        for target in forwarders {
            section.write_cstr(target)?;
        }

        let mut name_rvas = BTreeMap::new();
        for entry in self.by_ordinal.values() {
            if let Some(name) = &entry.name {
                let rva = section.write_cstr(name)?;
                name_rvas.insert(name.as_bytes(), (rva, entry.ordinal));
            }
        }

        let name_rva = section.write_cstr(&self.module_name)?;

        let name_pointer_rva = section.current_rva()?;
        for (rva, _) in name_rvas.values() {
            section.write_u32(*rva)?;
        }

        let ordinal_table_rva = section.current_rva()?;
        for (name, (_, ordinal)) in &name_rvas {
            let index = u16::try_from(ordinal - ordinal_base).map_err(|_| {
                malformed_error!(
                    "Export '{}' ordinal {} is out of range for ordinal base {}",
                    String::from_utf8_lossy(name),
                    ordinal,
                    ordinal_base
                )
            })?;
            section.write_u16(index)?;
        }

        let end = section.position();
        let header = ExportDirectory {
            export_flags: 0,
            time_date_stamp: EXPORT_TIMESTAMP_SENTINEL,
            major_version: 0,
            minor_version: 0,
            name_rva,
            ordinal_base,
            address_table_entries,
            number_of_name_pointers: to_u32(name_rvas.len())?,
            export_address_table_rva,
            name_pointer_rva,
            ordinal_table_rva,
        };
        let mut encoded = [0u8; EXPORT_DIRECTORY_SIZE];
        header.write(&mut encoded)?;
        section.seek(header_at)?;
        section.write_bytes(&encoded)?;
        section.seek(end)?;

        let size = to_u32(end - header_at)?;
        debug!(
            "Encoded export directory for '{}': {} address slots, {} names, {} bytes at RVA 0x{:x}",
            self.module_name,
            address_table_entries,
            header.number_of_name_pointers,
            size,
            directory_rva
        );

        Ok(DataDirectory {
            virtual_address: directory_rva,
            size,
        })
    }
}

fn too_many() -> crate::Error {
    malformed_error!("Export address table does not fit into the address space")
}

#[cfg(test)]
mod tests {
    use crate::{
        exports::{
            ExportDirectory, ExportEntry, ExportTable, ExportTarget, EXPORT_DIRECTORY_SIZE,
            EXPORT_TIMESTAMP_SENTINEL,
        },
        file::{
            headers::{DataDirectoryType, SectionCharacteristics},
            io::read_le,
            section::SectionBuilder,
            PeImage,
        },
        test::image::ImageBuilder,
    };

    fn section() -> SectionBuilder {
        SectionBuilder::new(
            *b".nvpatch",
            0x5000,
            0xC00,
            0x200,
            SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
        )
    }

    fn read_u32(section: &SectionBuilder, rva: u32) -> u32 {
        read_le(&section.data()[(rva - 0x5000) as usize..]).unwrap()
    }

    fn read_u16(section: &SectionBuilder, rva: u32) -> u16 {
        read_le(&section.data()[(rva - 0x5000) as usize..]).unwrap()
    }

    fn read_str(section: &SectionBuilder, rva: u32) -> String {
        let start = (rva - 0x5000) as usize;
        let len = section.data()[start..].iter().position(|&b| b == 0).unwrap();
        String::from_utf8(section.data()[start..start + len].to_vec()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let mut table = ExportTable::new("game.exe");
        table.add(ExportEntry::new(1, "Foo", 0x2000)).unwrap();

        let mut section = section();
        section.write_u32(1).unwrap();
        let directory = table.encode(&mut section).unwrap();

        assert_eq!(directory.virtual_address, 0x5004);
        assert_eq!(directory.size as usize, section.data().len() - 4);

        let header = ExportDirectory::read(section.data(), 4).unwrap();
        assert_eq!(header.time_date_stamp, EXPORT_TIMESTAMP_SENTINEL);
        assert_eq!(header.export_flags, 0);
        assert_eq!(header.ordinal_base, 1);
        assert_eq!(header.address_table_entries, 1);
        assert_eq!(header.number_of_name_pointers, 1);
        assert_eq!(header.export_address_table_rva, 0x5004 + EXPORT_DIRECTORY_SIZE as u32);
        assert_eq!(read_u32(&section, header.export_address_table_rva), 0x2000);
        assert_eq!(read_str(&section, header.name_rva), "game.exe");

        let name_rva = read_u32(&section, header.name_pointer_rva);
        assert_eq!(read_str(&section, name_rva), "Foo");
        assert_eq!(read_u16(&section, header.ordinal_table_rva), 0);
        assert_eq!(section.position(), section.data().len());
    }

    #[test]
    fn test_encode_sorts_names_and_fills_gaps() {
        let mut table = ExportTable::new("game.exe");
        table.add(ExportEntry::new(1, "beta", 0x2000)).unwrap();
        table.add(ExportEntry::new(2, "Alpha", 0x2004)).unwrap();
        table.add(ExportEntry::new(5, "alpha", 0x2008)).unwrap();
        table
            .add(ExportEntry {
                ordinal: 4,
                name: Some("Zed".to_string()),
                target: ExportTarget::Forwarder("OTHER.Zed".to_string()),
            })
            .unwrap();

        let mut section = section();
        let directory = table.encode(&mut section).unwrap();
        let header = ExportDirectory::read(section.data(), 0).unwrap();

        assert_eq!(header.address_table_entries, 5);
        let slots: Vec<u32> = (0..5)
            .map(|i| read_u32(&section, header.export_address_table_rva + 4 * i))
            .collect();
        assert_eq!(slots[0], 0x2000);
        assert_eq!(slots[1], 0x2004);
        assert_eq!(slots[2], 0);
        assert_eq!(slots[4], 0x2008);

        // forwarder slots point inside the directory at their target string
        let forwarder = slots[3];
        assert!(forwarder > directory.virtual_address);
        assert!(forwarder < directory.virtual_address + directory.size);
        assert_eq!(read_str(&section, forwarder), "OTHER.Zed");

        let names: Vec<String> = (0..4)
            .map(|i| read_str(&section, read_u32(&section, header.name_pointer_rva + 4 * i)))
            .collect();
        assert_eq!(names, vec!["Alpha", "Zed", "alpha", "beta"]);

        let indices: Vec<u16> = (0..4)
            .map(|i| read_u16(&section, header.ordinal_table_rva + 2 * i))
            .collect();
        assert_eq!(indices, vec![1, 3, 4, 0]);
    }

    #[test]
    fn test_encode_empty_table() {
        let table = ExportTable::new("empty.dll");
        let mut section = section();
        let directory = table.encode(&mut section).unwrap();
        let header = ExportDirectory::read(section.data(), 0).unwrap();

        assert_eq!(header.address_table_entries, 0);
        assert_eq!(header.number_of_name_pointers, 0);
        assert_eq!(read_str(&section, header.name_rva), "empty.dll");
        assert_eq!(directory.size as usize, EXPORT_DIRECTORY_SIZE + "empty.dll".len() + 1);
    }

    #[test]
    fn test_encode_then_decode() {
        let mut image = PeImage::from_mem(ImageBuilder::new().build()).unwrap();

        let mut table = ExportTable::new("roundtrip.exe");
        let section = image
            .append_section(
                ".nvpatch",
                SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
            )
            .unwrap();
        let nv = section.write_u32(1).unwrap();
        let amd = section.write_u32(0).unwrap();
        table.add(ExportEntry::new(1, "NvOptimusEnablement", nv)).unwrap();
        table
            .add(ExportEntry::new(2, "AmdPowerXpressRequestHighPerformance", amd))
            .unwrap();
        table
            .add(ExportEntry {
                ordinal: 4,
                name: None,
                target: ExportTarget::Forwarder("KERNEL32.Sleep".to_string()),
            })
            .unwrap();
        let directory = table.encode(section).unwrap();
        image
            .set_data_directory(DataDirectoryType::ExportTable, directory)
            .unwrap();

        let patched = PeImage::from_mem(image.serialize().unwrap()).unwrap();
        let decoded = ExportTable::parse(&patched).unwrap();

        assert_eq!(decoded.module_name(), "roundtrip.exe");
        let original: Vec<&ExportEntry> = table.entries().collect();
        let roundtrip: Vec<&ExportEntry> = decoded.entries().collect();
        assert_eq!(original, roundtrip);
        assert_eq!(patched.read_u32_at_rva(nv).unwrap(), 1);
        assert_eq!(patched.read_u32_at_rva(amd).unwrap(), 0);
    }

    #[test]
    fn test_named_zero_address_survives_decode() {
        let mut image = PeImage::from_mem(ImageBuilder::new().build()).unwrap();

        let mut table = ExportTable::new("zero.dll");
        table.add(ExportEntry::new(1, "Foo", 0)).unwrap();
        table.add(ExportEntry::new(2, "Bar", 0x1000)).unwrap();
        let section = image
            .append_section(
                ".nvpatch",
                SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
            )
            .unwrap();
        let directory = table.encode(section).unwrap();
        image
            .set_data_directory(DataDirectoryType::ExportTable, directory)
            .unwrap();

        let patched = PeImage::from_mem(image.serialize().unwrap()).unwrap();
        let decoded = ExportTable::parse(&patched).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.by_name("Foo").unwrap().rva(), Some(0));
        assert_eq!(decoded.by_name("Bar").unwrap().ordinal, 2);
    }
}
