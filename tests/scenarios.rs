//! End-to-end patching scenarios on synthetic PE32+ images.
//!
//! Each test builds an image in memory, runs the library the way the command line tool
//! does, serializes, and inspects the output both through the library and at byte level.

#[path = "../src/test/image.rs"]
mod image;

use gpuhint::{
    bundle::BUNDLE_SIGNATURE,
    exports::ExportTable,
    file::headers::{DataDirectoryType, SectionCharacteristics},
    patcher::{self, PatchOptions, PatchOutcome, SymbolState},
    Error, PeImage, Result,
};
use image::{
    BundleSpec, ExportSpec, ImageBuilder, TestExport, TestSection, BUNDLE_POINTER_IN_DATA,
};

fn foo_bar() -> PatchOptions {
    PatchOptions::default()
        .with_symbols(["Foo", "Bar"])
        .with_module_name("test.exe")
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

fn read_i64(data: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(data[at..at + 8].try_into().unwrap())
}

/// Scenario A: no export directory, add a single symbol.
#[test]
fn add_symbol_to_image_without_exports() -> Result<()> {
    let mut image = PeImage::from_mem(ImageBuilder::new().build())?;
    assert!(image.data_directory(DataDirectoryType::ExportTable).is_none());

    let options = PatchOptions::default()
        .with_symbols(["Foo"])
        .with_module_name("test.exe");
    let outcome = patcher::apply(&mut image, &options, 1)?;
    assert!(matches!(outcome, PatchOutcome::SectionAdded { ref added, .. } if added == &["Foo"]));

    let patched = PeImage::from_mem(image.serialize()?)?;
    assert_eq!(patched.sections().len(), 3);
    let section = patched.find_section(".nvpatch").expect("section added");
    assert_eq!(
        section.characteristics,
        SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ
    );

    let directory = patched
        .data_directory(DataDirectoryType::ExportTable)
        .expect("export directory installed");
    assert!(section.contains_rva(directory.virtual_address));

    let exports = ExportTable::parse(&patched)?;
    assert_eq!(exports.len(), 1);
    let foo = exports.by_name("Foo").expect("Foo exported");
    assert_eq!(foo.ordinal, 1);
    assert_eq!(patched.read_u32_at_rva(foo.rva().unwrap())?, 1);
    Ok(())
}

/// Scenario B: both symbols exist, values are overwritten without changing the layout.
#[test]
fn update_existing_symbols_in_place() -> Result<()> {
    let (data, layout) = ImageBuilder::new()
        .exports(
            ExportSpec::new("test.exe")
                .export(TestExport::value(1, "Foo", 0))
                .export(TestExport::value(2, "Bar", 0)),
        )
        .build_with_layout();
    let mut image = PeImage::from_mem(data.clone())?;
    let sections_before = image.coff().number_of_sections;

    let outcome = patcher::apply(&mut image, &foo_bar(), 1)?;
    assert_eq!(outcome, PatchOutcome::Updated { symbols: 2 });
    assert!(image.new_sections().is_empty());

    let output = image.serialize()?;
    assert_eq!(output.len(), data.len());

    let patched = PeImage::from_mem(output.clone())?;
    assert_eq!(patched.coff().number_of_sections, sections_before);
    for name in ["Foo", "Bar"] {
        let rva = layout.value_rva(name);
        let offset = patched.rva_to_offset(rva).unwrap();
        assert_eq!(read_u32(&output, offset), 1, "{name}");
    }

    // Only the checksum and the two variables differ
    let changed = data.iter().zip(&output).filter(|(a, b)| a != b).count();
    assert!(changed <= 2);
    Ok(())
}

/// Scenario C: one symbol missing and the reserved section already present.
#[test]
fn partial_exports_with_reserved_section_conflict() -> Result<()> {
    let data = ImageBuilder::new()
        .section(TestSection::data(".nvpatch", vec![0u8; 8]))
        .exports(ExportSpec::new("test.exe").export(TestExport::value(1, "Foo", 0)))
        .build();
    let mut image = PeImage::from_mem(data)?;

    match patcher::apply(&mut image, &foo_bar(), 1) {
        Err(Error::ConflictingState(message)) => assert!(message.contains(".nvpatch")),
        other => panic!("expected ConflictingState, got {other:?}"),
    }
    Ok(())
}

/// Scenario C: one symbol missing, a section is added with the full rebuilt table.
#[test]
fn partial_exports_rebuild_table() -> Result<()> {
    let (data, layout) = ImageBuilder::new()
        .exports(ExportSpec::new("test.exe").export(TestExport::value(1, "Foo", 0)))
        .build_with_layout();
    let foo_rva = layout.value_rva("Foo");
    let mut image = PeImage::from_mem(data)?;

    let outcome = patcher::apply(&mut image, &foo_bar(), 1)?;
    let PatchOutcome::SectionAdded { added, updated, rva, .. } = outcome else {
        panic!("expected a new section");
    };
    assert_eq!(added, vec!["Bar"]);
    assert_eq!(updated, vec!["Foo"]);
    assert_eq!(image.new_sections().len(), 1);

    let patched = PeImage::from_mem(image.serialize()?)?;
    let exports = ExportTable::parse(&patched)?;
    assert_eq!(exports.len(), 2);

    let foo = exports.by_name("Foo").unwrap();
    assert_eq!(foo.ordinal, 1);
    assert_eq!(foo.rva(), Some(foo_rva));
    assert_eq!(patched.read_u32_at_rva(foo_rva)?, 1);

    let bar = exports.by_name("Bar").unwrap();
    assert_eq!(bar.ordinal, 2);
    assert_eq!(bar.rva(), Some(rva));
    assert_eq!(patched.read_u32_at_rva(rva)?, 1);

    let status = patcher::query(&patched, &foo_bar())?;
    assert!(status.iter().all(|s| s.state == SymbolState::Value(1)));
    Ok(())
}

/// Scenario D: an appended section of 0x400 bytes on disk moves bundle offsets by 0x400.
#[test]
fn bundle_offsets_follow_appended_section() -> Result<()> {
    let bundle = BundleSpec::new(0x1000, 1).file(0x2000, 0x100, "app.dll");
    let (data, layout) = ImageBuilder::new().bundle(bundle.clone()).build_with_layout();
    let (_, data_offset, _) = layout.section(".data");
    let pointer_at = data_offset as usize + BUNDLE_POINTER_IN_DATA;
    assert_eq!(&data[pointer_at + 8..pointer_at + 40], &BUNDLE_SIGNATURE);

    let mut image = PeImage::from_mem(data.clone())?;
    let section =
        image.append_section(".nvpatch", SectionCharacteristics::CNT_INITIALIZED_DATA)?;
    section.reserve(0x3F0)?;
    section.close();
    assert_eq!(section.size_on_disk()?, 0x400);

    let output = image.serialize()?;
    assert_eq!(output.len(), data.len() + 0x400);

    assert_eq!(read_i64(&output, pointer_at), 0x1000 + 0x400);
    assert_eq!(
        BundleSpec::decode_offsets(&output[0x1400..], 1),
        vec![0x2000 + 0x400]
    );

    // the manifest itself is byte-identical apart from the patched offsets
    let id = bundle.bundle_id.as_bytes();
    assert_eq!(read_u32(&output, 0x1400), 1);
    assert_eq!(&output[0x1400 + 13..0x1400 + 13 + id.len()], id);
    Ok(())
}

/// Bundled v6 host patched through the full enable path.
#[test]
fn enable_on_bundled_host() -> Result<()> {
    let bundle = BundleSpec::new(0x1000, 6)
        .deps_json(0x1800, 0x40)
        .runtime_config(0x1900, 0x40)
        .file(0x2000, 0x100, "app.dll")
        .file(0x2100, 0x100, "app.runtimeconfig.json");
    let data = ImageBuilder::new().bundle(bundle).build();
    let mut image = PeImage::from_mem(data.clone())?;

    patcher::apply(&mut image, &PatchOptions::default(), 1)?;
    let delta = i64::from(image.new_sections()[0].size_on_disk()?);
    let output = image.serialize()?;
    assert_eq!(output.len() as i64, data.len() as i64 + delta);

    let manifest = (0x1000 + delta) as usize;
    assert_eq!(
        BundleSpec::decode_offsets(&output[manifest..], 6),
        vec![0x1800 + delta, 0x1900 + delta, 0x2000 + delta, 0x2100 + delta]
    );

    let patched = PeImage::from_mem(output)?;
    let status = patcher::query(&patched, &PatchOptions::default())?;
    assert!(status.iter().all(|s| s.state == SymbolState::Value(1)));
    Ok(())
}

/// Trailing data that is not a bundle is carried over unchanged after the new section.
#[test]
fn overlay_is_preserved() -> Result<()> {
    let overlay = b"overlay data that belongs to an installer".to_vec();
    let data = ImageBuilder::new().trailing(&overlay).build();
    let mut image = PeImage::from_mem(data)?;

    patcher::apply(&mut image, &PatchOptions::default(), 1)?;
    let output = image.serialize()?;
    assert!(output.ends_with(&overlay));
    Ok(())
}
