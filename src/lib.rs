// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # gpuhint
//!
//! Adds or toggles the `NvOptimusEnablement` and `AmdPowerXpressRequestHighPerformance`
//! exports of 64-bit Windows executables, so hybrid graphics drivers run them on the
//! discrete GPU, while keeping the image loadable.
//!
//! ## Architecture
//!
//! - [`crate::file`] - PE32+ image model: header records, RVA translation, appended
//!   sections and serialization
//! - [`crate::exports`] - Export directory decoding and encoding
//! - [`crate::bundle`] - Offset correction for single-file bundle manifests appended to
//!   the image
//! - [`crate::patcher`] - The enable, disable and status operations
//! - [`crate::utils`] - Alignment arithmetic and byte pattern search
//!
//! Loaded bytes are never edited in place. Header values are decoded into plain structs,
//! edits are staged, and [`PeImage::serialize`] produces the complete output in memory
//! before anything is written to disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpuhint::prelude::*;
//! use std::path::Path;
//!
//! let mut image = PeImage::from_file(Path::new("game.exe"))?;
//!
//! for status in patcher::query(&image, &PatchOptions::default())? {
//!     println!("{}: {:?}", status.name, status.state);
//! }
//!
//! let options = PatchOptions::default().with_module_name("game.exe");
//! patcher::apply(&mut image, &options, 1)?;
//! image.write_to_file(Path::new("game.patched.exe"))?;
//! # Ok::<(), gpuhint::Error>(())
//! ```
//!
//! ## Errors
//!
//! Every operation returns [`Result`]. Nothing is retried and no partial output is
//! written; see [`Error`] for the failure categories.

#[macro_use]
pub(crate) mod error;


/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub mod bundle;
pub mod exports;
pub mod file;
pub mod patcher;

pub mod utils;

/// `gpuhint` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `gpuhint` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Main entry point: a loaded PE32+ image
pub use file::PeImage;
