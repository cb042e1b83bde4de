//! Per-plane dark-/flat-field correction.
//!
//! For a raw plane of slice `z` in channel `ch`:
//!
//! 1. `v = raw - dark[ch]`
//! 2. `v = max(v, 0)`
//! 3. `v = v / flat[ch][i]`
//! 4. `v = v * gain[ch][i]`
//! 5. `v = min(v, 255)`
//! 6. truncate `v` to `u8`
//!
//! where `i` is the flat-field plane aligned with `z` (see [`flat_index`]).
//!
//! A flat-field pixel of exactly zero (or a non-finite one) cannot normalise
//! anything: such pixels saturate to 255 when the dark-subtracted signal is
//! positive and stay 0 otherwise.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::float_cmp
)]

use crate::calibration::{ChannelCalibration, CorrectionConfig};
use flatfield_core::{Error, Result};
use ndarray::{Array2, ArrayView2, Zip};

/// Flat-field plane aligned with acquisition slice `slice_index`.
///
/// Centres the flat-field stack on the acquisition stack and clamps into
/// `[0, flat_depth - 1]`. `flat_depth` must be non-zero.
#[must_use]
pub fn flat_index(flat_depth: usize, acquisition_depth: usize, slice_index: usize) -> usize {
    debug_assert!(flat_depth > 0, "flat-field stack has no planes");
    let flat_center = (flat_depth / 2) as i64;
    let acquisition_center = (acquisition_depth / 2) as i64;
    let unclamped = flat_center - acquisition_center + slice_index as i64;
    unclamped.clamp(0, flat_depth.saturating_sub(1) as i64) as usize
}

/// Corrects a single pixel.
#[inline]
#[must_use]
pub fn correct_pixel(raw: u8, dark: f64, flat: f64, gain: f64) -> u8 {
    let mut v = f64::from(raw) - dark;
    if v < 0.0 {
        v = 0.0;
    }
    if flat == 0.0 || !flat.is_finite() {
        return if v > 0.0 { u8::MAX } else { 0 };
    }
    v /= flat;
    v *= gain;
    if v > 255.0 {
        v = 255.0;
    }
    // Saturating cast: truncates toward zero, maps NaN and negatives to 0.
    v as u8
}

/// Result of correcting one plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedPlane {
    /// Corrected 8-bit plane.
    pub plane: Array2<u8>,
    /// Pixels whose flat-field value was zero or non-finite.
    pub zero_flat_pixels: usize,
}

/// Applies the correction formula elementwise.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the planes differ in shape.
pub fn correct_plane(
    raw: ArrayView2<'_, u8>,
    dark: ArrayView2<'_, f64>,
    flat: ArrayView2<'_, f64>,
    gain: f64,
) -> Result<CorrectedPlane> {
    for (what, dim) in [("dark plane", dark.dim()), ("flat plane", flat.dim())] {
        if dim != raw.dim() {
            return Err(Error::shape_mismatch(
                format!("{what} vs raw plane"),
                &[raw.nrows(), raw.ncols()],
                &[dim.0, dim.1],
            ));
        }
    }

    let mut plane = Array2::<u8>::zeros(raw.dim());
    Zip::from(&mut plane)
        .and(&raw)
        .and(&dark)
        .and(&flat)
        .for_each(|out, &r, &d, &f| *out = correct_pixel(r, d, f, gain));

    let zero_flat_pixels = flat.iter().filter(|&&f| f == 0.0 || !f.is_finite()).count();
    Ok(CorrectedPlane {
        plane,
        zero_flat_pixels,
    })
}

/// Corrects the planes of one acquisition channel.
///
/// Borrows the run's calibration; holds no mutable state, so one corrector
/// can be shared across threads.
#[derive(Debug, Clone)]
pub struct SliceCorrector<'a> {
    dark: ArrayView2<'a, f64>,
    calibration: &'a ChannelCalibration,
    acquisition_depth: usize,
}

impl<'a> SliceCorrector<'a> {
    /// Corrector for acquisition channel `channel_index` of a tilescan with
    /// `acquisition_depth` slices.
    ///
    /// Returns `None` if no calibration is configured for that channel.
    #[must_use]
    pub fn for_channel(
        config: &'a CorrectionConfig,
        channel_index: usize,
        acquisition_depth: usize,
    ) -> Option<Self> {
        let calibration = config.calibrations().get(channel_index)?;
        Some(Self {
            dark: config.dark().plane(calibration.channel()),
            calibration,
            acquisition_depth,
        })
    }

    /// Calibration applied by this corrector.
    #[must_use]
    pub fn calibration(&self) -> &ChannelCalibration {
        self.calibration
    }

    /// Flat-field plane used for acquisition slice `slice_index`.
    #[must_use]
    pub fn flat_index(&self, slice_index: usize) -> usize {
        flat_index(
            self.calibration.flat().depth(),
            self.acquisition_depth,
            slice_index,
        )
    }

    /// Corrects the raw plane of slice `slice_index`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `raw` disagrees with the
    /// calibration's spatial shape.
    pub fn correct(&self, raw: ArrayView2<'_, u8>, slice_index: usize) -> Result<CorrectedPlane> {
        let index = self.flat_index(slice_index);
        let flat = self.calibration.flat().plane(index)?;
        let gain = self.calibration.gain().get(index).ok_or(Error::IndexOutOfRange {
            axis: "gain profile",
            index,
            len: self.calibration.gain().len(),
        })?;

        let corrected = correct_plane(raw, self.dark, flat, gain)?;
        if corrected.zero_flat_pixels > 0 {
            log::warn!(
                "channel {} slice {slice_index}: {} flat-field pixels are zero; saturated where signal is present",
                self.calibration.channel(),
                corrected.zero_flat_pixels
            );
        }
        Ok(corrected)
    }
}
