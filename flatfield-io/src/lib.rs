//! flatfield-io: Acquisition and calibration file I/O for flatfield.
//!
//! This crate reads Leica LIF containers through memory-mapped files,
//! reads calibration stacks from multi-page TIFF, and writes corrected
//! volumes as `ImageJ` hyperstacks.
//!

mod error;
pub mod lif;
mod reader;
mod tiff_io;

pub use error::{Error, Result};
pub use lif::{LifFile, LifImage, SharedBytes};
pub use reader::MappedFileReader;
pub use tiff_io::{
    imagej_description, read_stack, resolution_rational, write_volume, TiffStackReader,
    TiffVolumeSink,
};
