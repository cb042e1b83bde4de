//! Calibration field loading and the immutable correction configuration.
#![allow(clippy::cast_precision_loss)]

use flatfield_core::{
    CalibrationImageReader, CalibrationStack, Channel, ConfigurationError, Error, GainProfile,
    Result, TilescanInfo, DARK_FIELD_PLANES,
};
use ndarray::{ArrayView2, Axis};
use std::collections::HashSet;
use std::path::Path;

/// Dark-field stack with one plane per channel, in [`Channel::ALL`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkField {
    stack: CalibrationStack,
}

impl DarkField {
    /// Validates that `stack` has exactly one plane per known channel.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::DarkFieldDepth`] otherwise.
    pub fn new(stack: CalibrationStack) -> Result<Self> {
        if stack.depth() != DARK_FIELD_PLANES {
            return Err(ConfigurationError::DarkFieldDepth {
                expected: DARK_FIELD_PLANES,
                actual: stack.depth(),
            }
            .into());
        }
        Ok(Self { stack })
    }

    /// Dark plane measured for `channel`.
    #[must_use]
    pub fn plane(&self, channel: Channel) -> ArrayView2<'_, f64> {
        self.stack.view().index_axis_move(Axis(0), channel.dark_field_index())
    }

    /// Spatial shape as `(Y, X)`.
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize) {
        self.stack.spatial_shape()
    }

    /// Borrows the underlying stack.
    #[must_use]
    pub fn stack(&self) -> &CalibrationStack {
        &self.stack
    }
}

/// Subtracts `dark` from every plane of `raw`. Negative results are kept.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the spatial shapes differ.
pub fn subtract_dark(raw: &CalibrationStack, dark: ArrayView2<'_, f64>) -> Result<CalibrationStack> {
    raw.ensure_spatial_shape("flat field vs dark field", dark.dim())?;
    let mut data = raw.view().to_owned();
    for mut plane in data.axis_iter_mut(Axis(0)) {
        plane -= &dark;
    }
    Ok(CalibrationStack::new(data))
}

/// Mean of each plane over `Y, X`.
#[must_use]
pub fn compute_gain_profile(stack: &CalibrationStack) -> GainProfile {
    let values = stack
        .view()
        .axis_iter(Axis(0))
        .map(|plane| plane.sum() / plane.len() as f64)
        .collect();
    GainProfile::new(values)
}

/// Dark-subtracted flat field and gain profile of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalibration {
    channel: Channel,
    flat: CalibrationStack,
    gain: GainProfile,
}

impl ChannelCalibration {
    /// Builds the calibration from a raw flat-field measurement.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::EmptyFlatField`] for a stack without
    /// planes and [`Error::ShapeMismatch`] if it disagrees with `dark`.
    pub fn from_raw(channel: Channel, raw_flat: &CalibrationStack, dark: &DarkField) -> Result<Self> {
        if raw_flat.depth() == 0 {
            return Err(ConfigurationError::EmptyFlatField(channel).into());
        }
        let flat = subtract_dark(raw_flat, dark.plane(channel))?;
        let gain = compute_gain_profile(&flat);
        Ok(Self {
            channel,
            flat,
            gain,
        })
    }

    /// The calibrated channel.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Dark-subtracted flat-field stack.
    #[must_use]
    pub fn flat(&self) -> &CalibrationStack {
        &self.flat
    }

    /// Per-plane gains of the flat field.
    #[must_use]
    pub fn gain(&self) -> &GainProfile {
        &self.gain
    }
}

/// Immutable calibration for a correction run.
///
/// Acquisition channel `c` is corrected with the `c`-th calibration, in the
/// order they were supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionConfig {
    dark: DarkField,
    calibrations: Vec<ChannelCalibration>,
}

impl CorrectionConfig {
    /// Validates and assembles the configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] for an empty or duplicated channel list
    /// and [`Error::ShapeMismatch`] if any flat field disagrees with the dark
    /// field's spatial shape.
    pub fn new(dark: DarkField, calibrations: Vec<ChannelCalibration>) -> Result<Self> {
        if calibrations.is_empty() {
            return Err(ConfigurationError::NoChannels.into());
        }
        let mut seen = HashSet::new();
        for calibration in &calibrations {
            if !seen.insert(calibration.channel) {
                return Err(ConfigurationError::DuplicateChannel(calibration.channel).into());
            }
            calibration.flat.ensure_spatial_shape(
                &format!("flat field {} vs dark field", calibration.channel),
                dark.spatial_shape(),
            )?;
        }
        Ok(Self { dark, calibrations })
    }

    /// The dark field.
    #[must_use]
    pub fn dark(&self) -> &DarkField {
        &self.dark
    }

    /// Calibrations in acquisition channel order.
    #[must_use]
    pub fn calibrations(&self) -> &[ChannelCalibration] {
        &self.calibrations
    }

    /// Configured channels in acquisition channel order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.calibrations.iter().map(ChannelCalibration::channel)
    }

    /// Fails unless every plane and channel of `info` can be corrected.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the calibration's spatial shape
    /// differs from the tilescan's, and
    /// [`ConfigurationError::MissingChannelCalibration`] if the tilescan has
    /// more channels than configured flat fields.
    pub fn ensure_compatible(&self, info: &TilescanInfo) -> Result<()> {
        let (dy, dx) = self.dark.spatial_shape();
        if (dy, dx) != info.dims {
            return Err(Error::shape_mismatch(
                format!("calibration vs tilescan '{}'", info.name),
                &[info.dims.0, info.dims.1],
                &[dy, dx],
            ));
        }
        if info.channels > self.calibrations.len() {
            return Err(ConfigurationError::MissingChannelCalibration {
                tilescan: info.name.clone(),
                index: self.calibrations.len(),
                configured: self.calibrations.len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Loads calibration images through a [`CalibrationImageReader`].
#[derive(Debug, Clone, Default)]
pub struct CalibrationFieldLoader<R> {
    reader: R,
}

impl<R: CalibrationImageReader> CalibrationFieldLoader<R> {
    /// Creates a loader backed by `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Loads the 4-plane dark field.
    ///
    /// # Errors
    /// Propagates reader failures; fails with
    /// [`ConfigurationError::DarkFieldDepth`] if the image is not 4 planes.
    pub fn load_dark_field(&self, path: &Path) -> Result<DarkField> {
        let data = self.reader.read_calibration_image(path)?;
        DarkField::new(CalibrationStack::new(data))
    }

    /// Loads the flat field of `channel` and subtracts its dark plane.
    ///
    /// # Errors
    /// Propagates reader failures and [`ChannelCalibration::from_raw`] errors.
    pub fn load_flat_field(
        &self,
        channel: Channel,
        path: &Path,
        dark: &DarkField,
    ) -> Result<ChannelCalibration> {
        let raw = CalibrationStack::new(self.reader.read_calibration_image(path)?);
        let calibration = ChannelCalibration::from_raw(channel, &raw, dark)?;
        log::debug!(
            "loaded flat field for channel {channel}: {} planes from {}",
            calibration.flat.depth(),
            path.display()
        );
        Ok(calibration)
    }

    /// Loads the dark field and every `(channel, flat field)` pair into one
    /// configuration.
    ///
    /// Duplicate channels are rejected before any image is read.
    ///
    /// # Errors
    /// Returns the first loading or validation error.
    pub fn load_config<P: AsRef<Path>>(
        &self,
        dark_path: &Path,
        flats: &[(Channel, P)],
    ) -> Result<CorrectionConfig> {
        if flats.is_empty() {
            return Err(ConfigurationError::NoChannels.into());
        }
        let mut seen = HashSet::new();
        for (channel, _) in flats {
            if !seen.insert(*channel) {
                return Err(ConfigurationError::DuplicateChannel(*channel).into());
            }
        }

        let dark = self.load_dark_field(dark_path)?;
        let calibrations = flats
            .iter()
            .map(|(channel, path)| self.load_flat_field(*channel, path.as_ref(), &dark))
            .collect::<Result<Vec<_>>>()?;
        CorrectionConfig::new(dark, calibrations)
    }
}
