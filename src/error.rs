use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is terminal for the current patch run: nothing is retried and nothing is
/// written to the destination once one of these has been produced.
///
/// # Error Categories
///
/// ## Image Format Errors
/// - [`Error::Malformed`] - PE signature absent, optional header missing, truncated headers
/// - [`Error::UnsupportedFormat`] - Optional header is not the PE32+ form
/// - [`Error::OutOfBounds`] - A field read or write would leave its buffer
/// - [`Error::InvalidAlignment`] - Section or file alignment that cannot be rounded to
///
/// ## Export Table Errors
/// - [`Error::InconsistentExportTable`] - A name references an ordinal without an address slot
/// - [`Error::DuplicateExport`] - An added entry collides with an existing ordinal or name
///
/// ## Editing Errors
/// - [`Error::ConflictingState`] - The image was already patched in an incompatible way
/// - [`Error::SectionClosed`] - Write attempted on a finalized section
/// - [`Error::NoHeaderSpace`] - The header area cannot hold another section header
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust,no_run
/// use gpuhint::{Error, PeImage};
/// use std::path::Path;
///
/// match PeImage::from_file(Path::new("game.exe")) {
///     Ok(image) => println!("{} sections", image.sections().len()),
///     Err(Error::UnsupportedFormat { magic }) => eprintln!("not PE32+ (magic 0x{magic:x})"),
///     Err(Error::Malformed { message, .. }) => eprintln!("malformed image: {message}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// Raised when the PE signature is absent, the optional header is missing or
    /// zero-sized, or a header structure would extend past the end of the image.
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The optional header does not carry the PE32+ magic.
    #[error("Optional header magic 0x{magic:04x} is not a PE32+ header")]
    UnsupportedFormat {
        /// The magic value found in the optional header
        magic: u16,
    },

    /// An out of bound access was attempted on a byte buffer.
    #[error("Out of Bound access would have occurred!")]
    OutOfBounds,

    /// An alignment value of zero or a non power of two was encountered.
    #[error("Invalid alignment value - {0}")]
    InvalidAlignment(u32),

    /// A name in the export name table references an ordinal that has no slot in the
    /// export address table.
    #[error("Export '{name}' references ordinal {ordinal}, which has no address table entry")]
    InconsistentExportTable {
        /// The ordinal computed from the ordinal table
        ordinal: u32,
        /// The name bound to the missing ordinal
        name: String,
    },

    /// An export entry with the same ordinal or name already exists.
    #[error("Export already exists - ordinal {ordinal}, name {name:?}")]
    DuplicateExport {
        /// The ordinal of the rejected entry
        ordinal: u32,
        /// The name of the rejected entry, if any
        name: Option<String>,
    },

    /// The image is in a state that prevents the requested edit.
    ///
    /// Used when a new section would be required but a section with the reserved
    /// name already exists, which would otherwise lead to patching an image twice.
    #[error("{0}")]
    ConflictingState(String),

    /// A write was attempted on a section that has already been closed.
    #[error("Section has been closed and can no longer be written to")]
    SectionClosed,

    /// There is no room left between the section table and the first section's raw data
    /// for another section header.
    #[error("No room left in the PE headers for another section header")]
    NoHeaderSpace,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading the input image
    /// or writing the patched output.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
