//! flatfield-core: Core types for dark-/flat-field microscopy correction.
//!
//! This crate provides the channel model, calibration stacks, named-axis
//! output volumes, tilescan descriptors and the traits through which the
//! correction pipeline talks to container readers and output writers.
//!

pub mod calibration;
pub mod channel;
pub mod error;
pub mod tilescan;
pub mod volume;

pub use calibration::{CalibrationStack, GainProfile};
pub use channel::{Channel, DARK_FIELD_PLANES};
pub use error::{ConfigurationError, Error, Result};
pub use tilescan::{
    CalibrationImageReader, MemoryTilescan, PhysicalSize, Scale, Tilescan, TilescanInfo,
    VolumeKey, VolumeMetadata, VolumeSink,
};
pub use volume::{Volume, VolumeAxis, VolumeShape};
