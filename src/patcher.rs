//! GPU preference exports.
//!
//! Hybrid graphics drivers look for two exported 32-bit variables in the executable of a
//! process: `NvOptimusEnablement` (NVIDIA Optimus) and `AmdPowerXpressRequestHighPerformance`
//! (AMD PowerXpress). A value of 1 asks the driver to run the process on the discrete GPU.
//!
//! [`crate::patcher::query`] reports the current state of these exports, and
//! [`crate::patcher::apply`] sets them to a value:
//!
//! - if every symbol is already exported, the existing variables are overwritten in place
//!   and the layout of the image does not change;
//! - otherwise a single `.nvpatch` section is appended that holds the variables of the
//!   missing symbols and a rebuilt export directory listing both old and new exports.
//!
//! A second run on an image that has the `.nvpatch` section but still misses a symbol is
//! refused, since the section name is reserved for this edit.
//!
//! # Examples
//!
//! ```rust,no_run
//! use gpuhint::{patcher::{self, PatchOptions}, PeImage};
//! use std::path::Path;
//!
//! let mut image = PeImage::from_file(Path::new("game.exe"))?;
//! let options = PatchOptions::default().with_module_name("game.exe");
//!
//! let outcome = patcher::apply(&mut image, &options, 1)?;
//! println!("{outcome:?}");
//! image.write_to_file(Path::new("game.exe"))?;
//! # Ok::<(), gpuhint::Error>(())
//! ```

use log::{debug, info};

use crate::{
    exports::{ExportEntry, ExportTable, ExportTarget},
    file::{
        headers::{DataDirectoryType, SectionCharacteristics},
        PeImage,
    },
    Error, Result,
};

/// The exports read by hybrid graphics drivers.
pub const GPU_EXPORT_SYMBOLS: [&str; 2] = [
    "NvOptimusEnablement",
    "AmdPowerXpressRequestHighPerformance",
];

/// Name of the section created for missing exports.
pub const PATCH_SECTION_NAME: &str = ".nvpatch";

/// What to patch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Exported variables to manage
    pub symbols: Vec<String>,
    /// Name of the section created for missing symbols; its presence blocks a second one
    pub section_name: String,
    /// Characteristics of the created section
    pub characteristics: SectionCharacteristics,
    /// Module name stored in a rebuilt export directory. `None` keeps the existing name,
    /// or uses [`PeImage::file_name`] when the image had no export directory name
    pub module_name: Option<String>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            symbols: GPU_EXPORT_SYMBOLS.iter().map(ToString::to_string).collect(),
            section_name: PATCH_SECTION_NAME.to_string(),
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA
                | SectionCharacteristics::MEM_READ,
            module_name: None,
        }
    }
}

impl PatchOptions {
    /// Sets the module name written into a rebuilt export directory.
    #[must_use]
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    /// Replaces the managed symbols.
    #[must_use]
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }
}

/// Current state of one managed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolState {
    /// The image does not export the symbol.
    Absent,
    /// The symbol is exported and its variable holds this value.
    Value(u32),
    /// The symbol is forwarded to another module.
    Forwarded(String),
}

/// State of a named export, as reported by [`query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolStatus {
    /// Export name
    pub name: String,
    /// Current state
    pub state: SymbolState,
}

/// Result of [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// All symbols were exported already and were overwritten in place.
    Updated {
        /// Number of variables overwritten
        symbols: usize,
    },
    /// A section was appended for the missing symbols.
    SectionAdded {
        /// Name of the new section
        section: String,
        /// RVA of the new section
        rva: u32,
        /// Symbols that were added
        added: Vec<String>,
        /// Symbols that already existed and were overwritten in place
        updated: Vec<String>,
    },
}

/// Reports the state of every symbol in `options`.
///
/// # Errors
///
/// Returns an error if the export directory cannot be decoded or an exported variable is
/// not mapped by a section. Variables in the zero-filled part of a section report 0.
pub fn query(image: &PeImage, options: &PatchOptions) -> Result<Vec<SymbolStatus>> {
    let exports = ExportTable::parse(image)?;

    options
        .symbols
        .iter()
        .map(|symbol| {
            let state = match exports.by_name(symbol).map(|entry| &entry.target) {
                None => SymbolState::Absent,
                Some(ExportTarget::Address(rva)) => {
                    SymbolState::Value(image.read_u32_at_rva(*rva)?)
                }
                Some(ExportTarget::Forwarder(target)) => SymbolState::Forwarded(target.clone()),
            };
            Ok(SymbolStatus {
                name: symbol.clone(),
                state,
            })
        })
        .collect()
}

/// Sets every symbol in `options` to `value`, adding the missing ones.
///
/// Nothing is written to disk; serialize `image` afterwards.
///
/// # Errors
///
/// - [`crate::Error::ConflictingState`] if symbols are missing but the section named in
///   `options` already exists, a symbol is a forwarder, or an existing variable lies in the
///   zero-filled part of its section
/// - [`crate::Error::NoHeaderSpace`] if there is no room for another section header
/// - any decoding error of [`ExportTable::parse`]
pub fn apply(image: &mut PeImage, options: &PatchOptions, value: u32) -> Result<PatchOutcome> {
    let mut exports = ExportTable::parse(image)?;

    let mut present = Vec::new();
    let mut missing = Vec::new();
    for symbol in &options.symbols {
        match exports.by_name(symbol).map(|entry| &entry.target) {
            None => missing.push(symbol.clone()),
            Some(ExportTarget::Address(rva)) => present.push((symbol.clone(), *rva)),
            Some(ExportTarget::Forwarder(target)) => {
                return Err(Error::ConflictingState(format!(
                    "Export '{symbol}' is forwarded to '{target}' and cannot be patched"
                )))
            }
        }
    }

    if !missing.is_empty() && image.find_section(&options.section_name).is_some() {
        return Err(Error::ConflictingState(format!(
            "Can't patch as some symbols are missing ({}) and section '{}' has already been created",
            missing.join(", "),
            options.section_name
        )));
    }

    for (symbol, rva) in &present {
        image.value_file_offset(*rva).map_err(|error| match error {
            Error::ConflictingState(reason) => Error::ConflictingState(format!(
                "Export '{symbol}' can't be patched in place: {reason}"
            )),
            other => other,
        })?;
    }
    for (symbol, rva) in &present {
        debug!("Overwriting '{}' at RVA 0x{:x} with {}", symbol, rva, value);
        image.write_u32_at_rva(*rva, value)?;
    }
    let updated: Vec<String> = present.into_iter().map(|(symbol, _)| symbol).collect();

    if missing.is_empty() {
        info!("Updated {} existing exports to {}", updated.len(), value);
        return Ok(PatchOutcome::Updated {
            symbols: updated.len(),
        });
    }

    match (&options.module_name, image.file_name()) {
        (Some(name), _) => exports.set_module_name(name.clone()),
        (None, Some(file_name)) if exports.module_name().is_empty() => {
            exports.set_module_name(file_name.to_string());
        }
        _ => {}
    }

    let section = image.append_section(&options.section_name, options.characteristics)?;
    for symbol in &missing {
        let ordinal = exports.next_ordinal();
        let rva = section.write_u32(value)?;
        debug!("Adding export '{}' as ordinal {} at RVA 0x{:x}", symbol, ordinal, rva);
        exports.add(ExportEntry::new(ordinal, symbol.clone(), rva))?;
    }

    let directory = exports.encode(section)?;
    let rva = section.virtual_address();
    image.set_data_directory(DataDirectoryType::ExportTable, directory)?;

    info!(
        "Added section '{}' at RVA 0x{:x} exporting {}",
        options.section_name,
        rva,
        missing.join(", ")
    );

    Ok(PatchOutcome::SectionAdded {
        section: options.section_name.clone(),
        rva,
        added: missing,
        updated,
    })
}
