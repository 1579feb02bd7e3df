use std::path::Path;

use gpuhint::{
    exports::{ExportTable, ExportTarget},
    file::headers::{machine_name, DataDirectoryType},
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_image,
    output::{print_output, print_table},
};

#[derive(Debug, Serialize)]
struct SectionInfo {
    name: String,
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
    characteristics: u32,
}

#[derive(Debug, Serialize)]
struct DirectoryInfo {
    kind: String,
    virtual_address: u32,
    size: u32,
}

#[derive(Debug, Serialize)]
struct ExportInfo {
    ordinal: u32,
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rva: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    forwarder: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageInfo {
    machine: String,
    image_base: u64,
    section_alignment: u32,
    file_alignment: u32,
    size_of_image: u32,
    size_of_headers: u32,
    checksum: u32,
    trailing_bytes: usize,
    section_header_room: usize,
    sections: Vec<SectionInfo>,
    directories: Vec<DirectoryInfo>,
    module_name: String,
    exports: Vec<ExportInfo>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let image = load_image(path)?;
    let optional = image.optional();

    let sections: Vec<SectionInfo> = image
        .sections()
        .iter()
        .map(|section| SectionInfo {
            name: section.name(),
            virtual_address: section.virtual_address,
            virtual_size: section.virtual_size,
            raw_offset: section.pointer_to_raw_data,
            raw_size: section.size_of_raw_data,
            characteristics: section.characteristics.bits(),
        })
        .collect();

    let directories = image
        .data_directories()
        .iter()
        .enumerate()
        .filter(|(_, directory)| directory.is_present())
        .map(|(index, directory)| DirectoryInfo {
            kind: DataDirectoryType::from_repr(index)
                .map_or_else(|| format!("#{index}"), |kind| kind.to_string()),
            virtual_address: directory.virtual_address,
            size: directory.size,
        })
        .collect();

    let sections_end = image
        .sections()
        .iter()
        .map(|section| section.raw_end())
        .max()
        .unwrap_or(0);
    let trailing_bytes = (image.data().len() as u64).saturating_sub(sections_end) as usize;

    let table = ExportTable::parse(&image)?;
    let exports = table
        .entries()
        .map(|entry| match &entry.target {
            ExportTarget::Address(rva) => ExportInfo {
                ordinal: entry.ordinal,
                name: entry.name.clone(),
                rva: Some(*rva),
                value: image.read_u32_at_rva(*rva).ok(),
                forwarder: None,
            },
            ExportTarget::Forwarder(target) => ExportInfo {
                ordinal: entry.ordinal,
                name: entry.name.clone(),
                rva: None,
                value: None,
                forwarder: Some(target.clone()),
            },
        })
        .collect();

    let info = ImageInfo {
        machine: machine_name(image.coff().machine).to_string(),
        image_base: optional.image_base,
        section_alignment: optional.section_alignment,
        file_alignment: optional.file_alignment,
        size_of_image: optional.size_of_image,
        size_of_headers: optional.size_of_headers,
        checksum: optional.check_sum,
        trailing_bytes,
        section_header_room: image.section_header_room(),
        sections,
        directories,
        module_name: table.module_name().to_string(),
        exports,
    };

    print_output(&info, opts, print_info)
}

fn print_info(info: &ImageInfo) {
    println!("Machine:             {}", info.machine);
    println!("Image base:          0x{:016X}", info.image_base);
    println!("Section alignment:   0x{:X}", info.section_alignment);
    println!("File alignment:      0x{:X}", info.file_alignment);
    println!("Size of image:       0x{:X}", info.size_of_image);
    println!("Size of headers:     0x{:X}", info.size_of_headers);
    println!("Checksum:            0x{:08X}", info.checksum);
    println!("Trailing bytes:      {}", info.trailing_bytes);
    println!("Section header room: {}", info.section_header_room);

    println!("\nSections ({} entries):", info.sections.len());
    print_table(
        &["Name", "RVA", "VSize", "Offset", "RawSize", "Flags"],
        info.sections.iter().map(|section| {
            vec![
                section.name.clone(),
                format!("0x{:08X}", section.virtual_address),
                format!("0x{:X}", section.virtual_size),
                format!("0x{:08X}", section.raw_offset),
                format!("0x{:X}", section.raw_size),
                format!("0x{:08X}", section.characteristics),
            ]
        }),
    );

    if !info.directories.is_empty() {
        println!("\nData directories:");
        print_table(
            &["Kind", "RVA", "Size"],
            info.directories.iter().map(|directory| {
                vec![
                    directory.kind.clone(),
                    format!("0x{:08X}", directory.virtual_address),
                    format!("0x{:X}", directory.size),
                ]
            }),
        );
    }

    if info.exports.is_empty() {
        println!("\nNo exports found.");
        return;
    }

    println!(
        "\nExports of {} ({} entries):",
        info.module_name,
        info.exports.len()
    );
    print_table(
        &["Ordinal", "RVA", "Value", "Name"],
        info.exports.iter().map(|export| {
            let name = export.name.as_deref().unwrap_or("<ordinal-only>");
            match &export.forwarder {
                Some(target) => vec![
                    export.ordinal.to_string(),
                    String::new(),
                    String::new(),
                    format!("{name} -> {target}"),
                ],
                None => vec![
                    export.ordinal.to_string(),
                    export.rva.map(|rva| format!("0x{rva:08X}")).unwrap_or_default(),
                    export.value.map(|v| format!("0x{v:08X}")).unwrap_or_default(),
                    name.to_string(),
                ],
            }
        }),
    );
}
