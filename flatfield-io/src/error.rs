//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Pixel type the pipeline cannot process.
    #[error("unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Malformed XML metadata.
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] flatfield_core::Error),
}

impl From<Error> for flatfield_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::CoreError(inner) => inner,
            Error::Io(io) => Self::Io(io),
            other => Self::Collaborator(Box::new(other)),
        }
    }
}
