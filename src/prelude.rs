//! # gpuhint Prelude
//!
//! The commonly used types of the crate, for glob imports.
//!
//! ```rust
//! use gpuhint::prelude::*;
//!
//! let options = PatchOptions::default();
//! assert_eq!(options.section_name, ".nvpatch");
//! assert_eq!(options.symbols, GPU_EXPORT_SYMBOLS);
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all gpuhint operations
pub use crate::Error;

/// The result type used throughout gpuhint
pub use crate::Result;

// ================================================================================================
// Image Model
// ================================================================================================

/// Loaded PE32+ image
pub use crate::PeImage;

/// Header records and section flags
pub use crate::file::headers::{
    CoffHeader, DataDirectory, DataDirectoryType, OptionalHeader, SectionCharacteristics,
    SectionHeader,
};

/// Staged content of an appended section
pub use crate::file::section::SectionBuilder;

// ================================================================================================
// Exports and Patching
// ================================================================================================

/// Export directory model
pub use crate::exports::{ExportEntry, ExportTable, ExportTarget};

/// Enable, disable and status operations
pub use crate::patcher::{
    self, PatchOptions, PatchOutcome, SymbolState, SymbolStatus, GPU_EXPORT_SYMBOLS,
};
