//! Integration tests that write patched images to disk and read them back.
//!
//! The output is checked with goblin as an independent PE parser, so a layout mistake that
//! our own reader would tolerate still shows up here.

#[path = "../src/test/image.rs"]
mod image;

use std::io::Write;

use gpuhint::{
    exports::ExportTable,
    patcher::{self, PatchOptions, PatchOutcome, SymbolState, GPU_EXPORT_SYMBOLS},
    PeImage,
};
use image::{ExportSpec, ImageBuilder, TestExport};
use tempfile::NamedTempFile;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Writes `data` to a fresh temporary file.
fn factory_image_file(
    data: &[u8],
) -> std::result::Result<NamedTempFile, Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

#[test]
fn enable_in_place_and_reload() -> TestResult {
    let file = factory_image_file(&ImageBuilder::new().build())?;

    let mut image = PeImage::from_file(file.path())?;
    let options = PatchOptions::default().with_module_name("game.exe");
    patcher::apply(&mut image, &options, 1)?;
    image.write_to_file(file.path())?;

    let reloaded = PeImage::from_file(file.path())?;
    assert_eq!(reloaded.sections().len(), 3);
    for status in patcher::query(&reloaded, &options)? {
        assert_eq!(status.state, SymbolState::Value(1), "{}", status.name);
    }

    // disabling the patched file takes the in-place path
    let mut image = reloaded;
    let outcome = patcher::apply(&mut image, &options, 0)?;
    assert_eq!(outcome, PatchOutcome::Updated { symbols: 2 });
    image.write_to_file(file.path())?;

    let reloaded = PeImage::from_file(file.path())?;
    assert_eq!(reloaded.sections().len(), 3);
    for status in patcher::query(&reloaded, &options)? {
        assert_eq!(status.state, SymbolState::Value(0), "{}", status.name);
    }
    Ok(())
}

#[test]
fn patched_image_parses_with_goblin() -> TestResult {
    let data = ImageBuilder::new()
        .checksum(0x0001_2345)
        .exports(
            ExportSpec::new("game.exe")
                .export(TestExport::value(1, "GameEntry", 0x11))
                .export(TestExport::unnamed(2, 0x22)),
        )
        .build();
    let file = factory_image_file(&data)?;
    let output = NamedTempFile::new()?;

    let mut image = PeImage::from_file(file.path())?;
    let options = PatchOptions::default().with_module_name("game.exe");
    let PatchOutcome::SectionAdded { rva, .. } = patcher::apply(&mut image, &options, 1)? else {
        panic!("expected a new section");
    };
    image.write_to_file(output.path())?;

    let bytes = std::fs::read(output.path())?;
    let pe = goblin::pe::PE::parse(&bytes)?;
    let reloaded = PeImage::from_mem(bytes.clone())?;

    assert_eq!(pe.sections.len(), 4);
    let last = &pe.sections[3];
    assert_eq!(last.name()?, ".nvpatch");
    assert_eq!(last.virtual_address, rva);

    let optional = pe.header.optional_header.ok_or("missing optional header")?;
    assert_eq!(optional.windows_fields.check_sum, 0);
    assert!(optional.windows_fields.size_of_image >= last.virtual_address + last.virtual_size);

    assert_eq!(pe.name, Some("game.exe"));
    let exported: Vec<(&str, usize)> = pe
        .exports
        .iter()
        .filter_map(|export| export.name.map(|name| (name, export.rva)))
        .collect();
    assert_eq!(exported.len(), 3);
    assert!(exported.iter().any(|(name, _)| *name == "GameEntry"));
    for symbol in GPU_EXPORT_SYMBOLS {
        let (_, symbol_rva) = exported
            .iter()
            .find(|(name, _)| *name == symbol)
            .ok_or("symbol not exported")?;
        let symbol_rva = u32::try_from(*symbol_rva)?;
        assert!(last.virtual_address <= symbol_rva);
        assert_eq!(reloaded.read_u32_at_rva(symbol_rva)?, 1);
    }
    Ok(())
}

#[test]
fn module_name_defaults_to_file_name() -> TestResult {
    let file = factory_image_file(&ImageBuilder::new().build())?;
    let file_name = file
        .path()
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("temporary file has no name")?
        .to_string();

    let mut image = PeImage::from_file(file.path())?;
    assert_eq!(image.file_name(), Some(file_name.as_str()));
    patcher::apply(&mut image, &PatchOptions::default(), 1)?;

    let patched = PeImage::from_mem(image.serialize()?)?;
    assert_eq!(patched.file_name(), None);
    assert_eq!(ExportTable::parse(&patched)?.module_name(), file_name);
    Ok(())
}

#[test]
fn missing_file_is_a_file_error() {
    let result = PeImage::from_file(std::path::Path::new("does/not/exist.exe"));
    assert!(matches!(result, Err(gpuhint::Error::FileError(_))));
}
