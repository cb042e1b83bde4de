//! Error types for flatfield-core.

use crate::channel::Channel;
use thiserror::Error;

/// Result type alias for flatfield operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for flatfield operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Array dimensions disagree with what the consumer expects.
    #[error("shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Coordinate outside a declared shape.
    #[error("{axis} index {index} out of range (len {len})")]
    IndexOutOfRange {
        axis: &'static str,
        index: usize,
        len: usize,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised by an acquisition reader or volume writer.
    #[error(transparent)]
    Collaborator(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Builds a [`Error::ShapeMismatch`] from any slice-like shapes.
    pub fn shape_mismatch(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Returns true for configuration errors.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true for shape mismatches.
    #[must_use]
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. })
    }
}

/// Configuration errors. Fatal for the unit of work they are raised in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Channel wavelength outside {405, 488, 561, 647}.
    #[error("unrecognized channel {0} (expected 405, 488, 561 or 647)")]
    UnknownChannel(u32),

    /// Channel string that is not a number.
    #[error("unrecognized channel '{0}' (expected 405, 488, 561 or 647)")]
    UnparsableChannel(String),

    /// Flat-field generation requires single-channel tilescans.
    #[error("tilescan '{tilescan}' has {channels} channels; flat-field generation needs exactly 1")]
    TooManyChannels { tilescan: String, channels: usize },

    /// Acquisition channel with no flat field configured.
    #[error("tilescan '{tilescan}' channel {index} has no flat field ({configured} configured)")]
    MissingChannelCalibration {
        tilescan: String,
        index: usize,
        configured: usize,
    },

    /// Same channel configured twice.
    #[error("channel {0} configured more than once")]
    DuplicateChannel(Channel),

    /// No channel calibrations at all.
    #[error("at least one channel flat field is required")]
    NoChannels,

    /// Tilescan without any mosaic tile, slice, or pixel.
    #[error("tilescan '{tilescan}' is empty")]
    EmptyTilescan { tilescan: String },

    /// Dark field stack with the wrong number of planes.
    #[error("dark field must have {expected} planes, got {actual}")]
    DarkFieldDepth { expected: usize, actual: usize },

    /// Flat field stack without planes.
    #[error("flat field for channel {0} has no planes")]
    EmptyFlatField(Channel),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_converts() {
        let err: Error = ConfigurationError::UnknownChannel(532).into();
        assert!(err.is_configuration());
        assert!(!err.is_shape_mismatch());
        assert!(err.to_string().contains("532"));
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::shape_mismatch("dark field", &[4, 512, 512], &[4, 256, 256]);
        assert!(err.is_shape_mismatch());
        let msg = err.to_string();
        assert!(msg.contains("dark field"));
        assert!(msg.contains("[4, 512, 512]"));
    }
}
