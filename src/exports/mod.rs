//! PE export directory decoding and encoding.
//!
//! An [`crate::exports::ExportTable`] is the editable form of an image's export data
//! directory. It is decoded once from the loaded image, changed through
//! [`crate::exports::ExportTable::add`], and encoded as a whole into a new section. The
//! existing directory bytes are never edited in place.
//!
//! Entries are indexed twice, by ordinal and by name. Both indices are only ever updated
//! together through `add`, which enforces that ordinals are unique and that names, where
//! present, are unique.
//!
//! # Encoded layout
//!
//! ```text
//! ExportDirectory                  40 bytes, written last
//! address table                    u32 per ordinal in [base, max], 0 for gaps
//! forwarder strings                "DLL.Symbol\0" for every forwarded entry
//! name strings                     ordinal order
//! module name
//! name pointer table               u32 per named entry, sorted by name
//! ordinal table                    u16 per named entry, same order
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use gpuhint::{exports::ExportTable, PeImage};
//! use std::path::Path;
//!
//! let image = PeImage::from_file(Path::new("game.exe"))?;
//! let exports = ExportTable::parse(&image)?;
//! for entry in exports.entries() {
//!     println!("{:>4} {:?} {:?}", entry.ordinal, entry.name, entry.target);
//! }
//! # Ok::<(), gpuhint::Error>(())
//! ```

mod directory;
mod reader;
mod writer;

pub use directory::{ExportDirectory, EXPORT_DIRECTORY_SIZE, EXPORT_TIMESTAMP_SENTINEL};

use std::collections::{BTreeMap, HashMap};

use crate::{Error, Result};

/// What an export resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportTarget {
    /// RVA of the exported code or data.
    Address(u32),
    /// A `"DLL.Symbol"` or `"DLL.#ordinal"` forward to another module.
    Forwarder(String),
}

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportEntry {
    /// Export ordinal, unique within the table
    pub ordinal: u32,
    /// Export name, unique among named entries
    pub name: Option<String>,
    /// Resolution target
    pub target: ExportTarget,
}

impl ExportEntry {
    /// Creates a named export of an address.
    pub fn new(ordinal: u32, name: impl Into<String>, rva: u32) -> Self {
        ExportEntry {
            ordinal,
            name: Some(name.into()),
            target: ExportTarget::Address(rva),
        }
    }

    /// Returns the exported RVA, or `None` for forwarders.
    #[must_use]
    pub fn rva(&self) -> Option<u32> {
        match self.target {
            ExportTarget::Address(rva) => Some(rva),
            ExportTarget::Forwarder(_) => None,
        }
    }
}

/// Editable export table of one module.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    module_name: String,
    ordinal_base: u32,
    by_ordinal: BTreeMap<u32, ExportEntry>,
    by_name: HashMap<String, u32>,
}

impl ExportTable {
    /// Creates an empty table with ordinal base 1.
    pub fn new(module_name: impl Into<String>) -> Self {
        ExportTable {
            module_name: module_name.into(),
            ordinal_base: 1,
            by_ordinal: BTreeMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Name of the exporting module, such as `"game.exe"`.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Replaces the module name.
    pub fn set_module_name(&mut self, name: impl Into<String>) {
        self.module_name = name.into();
    }

    /// Ordinal of the first address table slot.
    #[must_use]
    pub fn ordinal_base(&self) -> u32 {
        self.ordinal_base
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    /// Returns `true` if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ExportEntry> {
        self.by_name
            .get(name)
            .and_then(|ordinal| self.by_ordinal.get(ordinal))
    }

    /// Looks up an entry by ordinal.
    #[must_use]
    pub fn by_ordinal(&self, ordinal: u32) -> Option<&ExportEntry> {
        self.by_ordinal.get(&ordinal)
    }

    /// All entries in ascending ordinal order.
    pub fn entries(&self) -> impl Iterator<Item = &ExportEntry> {
        self.by_ordinal.values()
    }

    /// The ordinal a newly added entry should use: one past the highest ordinal in use,
    /// or 1 for an empty table.
    #[must_use]
    pub fn next_ordinal(&self) -> u32 {
        self.by_ordinal
            .last_key_value()
            .map_or(1, |(ordinal, _)| ordinal.saturating_add(1))
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateExport`] if the ordinal, or the name when present,
    /// is already in use. The table is unchanged in that case.
    pub fn add(&mut self, entry: ExportEntry) -> Result<()> {
        let name_taken = entry
            .name
            .as_ref()
            .is_some_and(|name| self.by_name.contains_key(name));
        if name_taken || self.by_ordinal.contains_key(&entry.ordinal) {
            return Err(Error::DuplicateExport {
                ordinal: entry.ordinal,
                name: entry.name,
            });
        }

        if let Some(name) = &entry.name {
            self.by_name.insert(name.clone(), entry.ordinal);
        }
        self.by_ordinal.insert(entry.ordinal, entry);
        Ok(())
    }
}
