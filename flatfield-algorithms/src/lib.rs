//! flatfield-algorithms: Correction and calibration algorithms.
//!
//! This crate provides:
//! - **Calibration loading** - dark field, dark-subtracted flat fields, gain profiles
//! - **Slice correction** - the per-plane dark/flat formula with flat-plane alignment
//! - **Flat-field generation** - per-slice median across mosaic tiles
//! - **Assembly** - per-tile corrected `TZCYX` volumes
//!
#![warn(missing_docs)]

mod assembler;
mod calibration;
mod correction;
mod flat_field;

pub use assembler::{select_z_stacks, AssemblerOptions, CorrectionSummary, ImageAssembler};
pub use calibration::{
    compute_gain_profile, subtract_dark, CalibrationFieldLoader, ChannelCalibration,
    CorrectionConfig, DarkField,
};
pub use correction::{correct_pixel, correct_plane, flat_index, CorrectedPlane, SliceCorrector};
pub use flat_field::{
    generate_flat_field, generate_flat_fields, median_combine, median_u8, FlatFieldReport,
};
