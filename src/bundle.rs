//! Single-file bundle manifest correction.
//!
//! Self-contained single-file .NET executables are an ordinary PE image (the app host)
//! followed by the application files and a manifest describing them. The host locates the
//! manifest through an absolute file offset stored in the 8 bytes in front of a fixed
//! 32 byte signature inside its own data. Every file record in the manifest again stores an
//! absolute file offset.
//!
//! Appending sections moves everything after the original sections by the size of the new
//! sections, so all of these offsets have to grow by the same delta. The manifest is read
//! from the original bytes and corrected values are written into the output buffer; the
//! original bytes are never modified.
//!
//! # Manifest layout
//!
//! ```text
//! u32      major version
//! u32      minor version
//! i32      file count
//! string   bundle id                  7-bit length prefixed UTF-8
//! -- major >= 2 --
//! i64      deps.json offset           patched
//! i64      deps.json size
//! i64      runtimeconfig.json offset  patched
//! i64      runtimeconfig.json size
//! u64      flags
//! -- per file --
//! i64      offset                     patched
//! i64      size
//! i64      compressed size            major >= 6 only
//! u8       file type
//! string   relative path
//! ```
//!
//! Offsets are only patched when they are positive; zero marks an absent entry.

use log::debug;

use crate::{
    file::{
        io::{write_le, PeIO},
        parser::Parser,
    },
    utils::KmpPattern,
    Error::OutOfBounds,
    Result,
};

/// Signature that follows the manifest offset inside the app host (SHA-256 of
/// ".net core bundle").
pub const BUNDLE_SIGNATURE: [u8; 32] = [
    0x8b, 0x12, 0x02, 0xb9, 0x6a, 0x61, 0x20, 0x38, 0x72, 0x7b, 0x93, 0x02, 0x14, 0xd7, 0xa0, 0x32,
    0x13, 0xf5, 0xb9, 0xe6, 0xef, 0xae, 0x33, 0x18, 0xee, 0x3b, 0x2d, 0xce, 0x24, 0xb3, 0x6a, 0xae,
];

const MANIFEST_POINTER_SIZE: usize = 8;

/// What was found and corrected in a bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSummary {
    /// File offset of the manifest in the original image
    pub manifest_offset: u64,
    /// Manifest format major version
    pub major_version: u32,
    /// Manifest format minor version
    pub minor_version: u32,
    /// Number of file records
    pub file_count: u32,
    /// Bundle identifier
    pub bundle_id: String,
    /// Number of offset fields rewritten, including the manifest pointer
    pub patched_offsets: usize,
}

/// Finds the bundle signature in `original` and adds `delta` to the manifest pointer and
/// every positive offset inside the manifest, writing the results into `output`.
///
/// The manifest pointer is rewritten at its original position; manifest fields are
/// rewritten at their original position plus `delta`. Returns `Ok(None)` if there is no
/// signature or the pointer is zero.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the manifest is truncated, a pointer is negative
/// or a corrected field would fall outside `output`.
pub fn patch_manifest(
    original: &[u8],
    output: &mut [u8],
    delta: u64,
) -> Result<Option<ManifestSummary>> {
    let Some(signature_at) = KmpPattern::new(&BUNDLE_SIGNATURE).find_in(original) else {
        return Ok(None);
    };
    let pointer_at = signature_at
        .checked_sub(MANIFEST_POINTER_SIZE)
        .ok_or_else(|| {
            malformed_error!(
                "Bundle signature at 0x{:x} has no room for a manifest pointer",
                signature_at
            )
        })?;

    let mut parser = Parser::new(original);
    parser.seek(pointer_at)?;
    let pointer = parser.read_le::<i64>()?;
    if pointer == 0 {
        debug!("Bundle signature at 0x{:x} without manifest", signature_at);
        return Ok(None);
    }
    if pointer < 0 {
        return Err(malformed_error!("Negative bundle manifest offset {}", pointer));
    }

    let mut patcher = OffsetPatcher::new(output, delta)?;
    patcher.write_at(pointer_at, pointer)?;

    let manifest_offset = pointer.unsigned_abs();
    usize::try_from(manifest_offset)
        .ok()
        .and_then(|offset| parser.seek(offset).ok())
        .ok_or_else(|| {
            malformed_error!(
                "Bundle manifest offset 0x{:x} lies past the end of the file",
                manifest_offset
            )
        })?;

    let major_version: u32 = parser.read_le().map_err(|_| truncated())?;
    let minor_version: u32 = parser.read_le().map_err(|_| truncated())?;
    let file_count: i32 = parser.read_le().map_err(|_| truncated())?;
    let bundle_id = parser.read_prefixed_string_utf8().map_err(|_| truncated())?;
    let file_count = u32::try_from(file_count)
        .map_err(|_| malformed_error!("Negative bundle file count {}", file_count))?;

    if major_version >= 2 {
        // deps.json and runtimeconfig.json: offset, size
        patcher.read_and_patch(&mut parser)?;
        skip::<i64>(&mut parser)?;
        patcher.read_and_patch(&mut parser)?;
        skip::<i64>(&mut parser)?;
        // flags
        skip::<u64>(&mut parser)?;
    }

    for _ in 0..file_count {
        patcher.read_and_patch(&mut parser)?;
        skip::<i64>(&mut parser)?;
        if major_version >= 6 {
            skip::<i64>(&mut parser)?;
        }
        skip::<u8>(&mut parser)?;
        parser.read_prefixed_string_utf8().map_err(|_| truncated())?;
    }

    debug!(
        "Bundle '{}' v{}.{}: manifest at 0x{:x}, {} files, {} offsets moved by 0x{:x}",
        bundle_id,
        major_version,
        minor_version,
        manifest_offset,
        file_count,
        patcher.patched,
        delta
    );

    Ok(Some(ManifestSummary {
        manifest_offset,
        major_version,
        minor_version,
        file_count,
        bundle_id,
        patched_offsets: patcher.patched,
    }))
}

/// Writes corrected offsets into the output buffer.
struct OffsetPatcher<'a> {
    output: &'a mut [u8],
    delta: i64,
    shift: usize,
    patched: usize,
}

impl<'a> OffsetPatcher<'a> {
    fn new(output: &'a mut [u8], delta: u64) -> Result<Self> {
        let too_large = || malformed_error!("Delta 0x{:x} is too large", delta);
        Ok(OffsetPatcher {
            output,
            delta: i64::try_from(delta).map_err(|_| too_large())?,
            shift: usize::try_from(delta).map_err(|_| too_large())?,
            patched: 0,
        })
    }

    /// Reads an offset field; a positive value is written back corrected at the field's
    /// shifted position.
    fn read_and_patch(&mut self, parser: &mut Parser) -> Result<()> {
        let position = parser.pos();
        let value: i64 = parser.read_le().map_err(|_| truncated())?;
        if value > 0 {
            let at = position.checked_add(self.shift).ok_or(OutOfBounds)?;
            self.write_at(at, value)?;
        }
        Ok(())
    }

    fn write_at(&mut self, at: usize, value: i64) -> Result<()> {
        let corrected = value
            .checked_add(self.delta)
            .ok_or_else(|| malformed_error!("Bundle offset 0x{:x} overflows", value))?;
        self.output
            .get_mut(at..)
            .ok_or(OutOfBounds)
            .and_then(|target| write_le(target, corrected))
            .map_err(|_| {
                malformed_error!("Bundle offset field at 0x{:x} lies outside the output", at)
            })?;

        self.patched += 1;
        Ok(())
    }
}

fn skip<T: PeIO>(parser: &mut Parser) -> Result<()> {
    parser.advance_by(T::SIZE).map_err(|_| truncated())
}

fn truncated() -> crate::Error {
    malformed_error!("Bundle manifest is truncated")
}
