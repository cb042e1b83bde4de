//! Tilescan descriptors and the collaborator seams of the pipeline.
//!
//! Readers of acquisition containers implement [`Tilescan`], readers of
//! calibration images implement [`CalibrationImageReader`], and output
//! writers implement [`VolumeSink`].

use crate::error::{ConfigurationError, Error, Result};
use crate::volume::Volume;
use ndarray::{s, Array2, Array3, Array5};
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sampling density in voxels per micrometre.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Scale {
    /// Voxels per micrometre along X.
    pub x: f64,
    /// Voxels per micrometre along Y.
    pub y: f64,
    /// Voxels per micrometre along Z.
    pub z: f64,
}

impl Scale {
    /// Creates a scale triple.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Voxel size in micrometres (reciprocal per axis).
    #[must_use]
    pub fn physical_size(&self) -> PhysicalSize {
        PhysicalSize {
            x: 1.0 / self.x,
            y: 1.0 / self.y,
            z: 1.0 / self.z,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Voxel size in micrometres.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhysicalSize {
    /// Micrometres per voxel along X.
    pub x: f64,
    /// Micrometres per voxel along Y.
    pub y: f64,
    /// Micrometres per voxel along Z.
    pub z: f64,
}

/// Physical metadata written alongside a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeMetadata {
    /// Voxel size in micrometres.
    pub physical_size: PhysicalSize,
    /// In-plane pixel resolution `(x, y)` in pixels per micrometre.
    pub resolution: (f64, f64),
}

impl VolumeMetadata {
    /// Derives the metadata of volumes cut from a tilescan with `scale`.
    #[must_use]
    pub fn from_scale(scale: Scale) -> Self {
        Self {
            physical_size: scale.physical_size(),
            resolution: (scale.x, scale.y),
        }
    }
}

/// Dimensions and naming of one tilescan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TilescanInfo {
    /// Tilescan name, used to name output files.
    pub name: String,
    /// Plane shape as `(Y, X)`.
    pub dims: (usize, usize),
    /// Number of z-slices.
    pub nz: usize,
    /// Number of channels.
    pub channels: usize,
    /// Number of mosaic tiles.
    pub n_mosaic: usize,
    /// Voxels per micrometre.
    pub scale: Scale,
}

impl TilescanInfo {
    /// Returns true when the tilescan spans more than one focal slice.
    #[must_use]
    pub fn is_z_stack(&self) -> bool {
        self.nz > 1
    }

    /// Fails if any of tiles, slices, channels, rows or columns is zero.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::EmptyTilescan`].
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.n_mosaic == 0
            || self.nz == 0
            || self.channels == 0
            || self.dims.0 == 0
            || self.dims.1 == 0
        {
            return Err(ConfigurationError::EmptyTilescan {
                tilescan: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// Read access to the planes of one tilescan.
///
/// Implementations must be shareable across threads; planes may be fetched
/// concurrently.
pub trait Tilescan: Sync {
    /// Tilescan dimensions.
    fn info(&self) -> &TilescanInfo;

    /// Reads the `Y x X` plane at slice `z`, time `t`, channel `c`, tile `m`.
    ///
    /// # Errors
    /// Returns an error if the coordinates are out of range or the plane
    /// cannot be read.
    fn frame(&self, z: usize, t: usize, c: usize, m: usize) -> Result<Array2<u8>>;
}

/// Reader of calibration images stored as `depth x Y x X` stacks.
pub trait CalibrationImageReader {
    /// Reads every plane of the image at `path`.
    ///
    /// # Errors
    /// Returns an error if the file is missing or cannot be decoded.
    fn read_calibration_image(&self, path: &Path) -> Result<Array3<f64>>;
}

/// Identity of an output volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeKey {
    /// Source tilescan name.
    pub tilescan: String,
    /// Mosaic tile, for per-tile outputs.
    pub tile: Option<usize>,
}

impl VolumeKey {
    /// Key for a per-tile corrected volume.
    #[must_use]
    pub fn tile(tilescan: impl Into<String>, tile: usize) -> Self {
        Self {
            tilescan: tilescan.into(),
            tile: Some(tile),
        }
    }

    /// Key for a whole-tilescan volume.
    #[must_use]
    pub fn tilescan(tilescan: impl Into<String>) -> Self {
        Self {
            tilescan: tilescan.into(),
            tile: None,
        }
    }
}

/// Destination of assembled volumes.
pub trait VolumeSink {
    /// Persists one volume with its physical metadata.
    ///
    /// # Errors
    /// Returns an error if the volume cannot be written.
    fn write_volume(&mut self, key: &VolumeKey, volume: &Volume, metadata: &VolumeMetadata)
        -> Result<()>;
}

/// A tilescan held entirely in memory as an `M x Z x C x Y x X` array.
///
/// Useful for synthetic acquisitions and for buffering small tilescans.
#[derive(Debug, Clone)]
pub struct MemoryTilescan {
    info: TilescanInfo,
    planes: Array5<u8>,
}

impl MemoryTilescan {
    /// Wraps `planes` laid out as `M x Z x C x Y x X`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `planes` disagrees with `info`.
    pub fn new(info: TilescanInfo, planes: Array5<u8>) -> Result<Self> {
        let expected = [info.n_mosaic, info.nz, info.channels, info.dims.0, info.dims.1];
        if planes.shape() != expected {
            return Err(Error::shape_mismatch(
                format!("tilescan '{}'", info.name),
                &expected,
                planes.shape(),
            ));
        }
        Ok(Self { info, planes })
    }

    /// Builds a tilescan whose every pixel is produced by `f(m, z, c, y, x)`.
    #[must_use]
    pub fn from_fn<F>(info: TilescanInfo, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize, usize, usize) -> u8,
    {
        let shape = (info.n_mosaic, info.nz, info.channels, info.dims.0, info.dims.1);
        let planes = Array5::from_shape_fn(shape, |(m, z, c, y, x)| f(m, z, c, y, x));
        Self { info, planes }
    }
}

impl Tilescan for MemoryTilescan {
    fn info(&self) -> &TilescanInfo {
        &self.info
    }

    fn frame(&self, z: usize, t: usize, c: usize, m: usize) -> Result<Array2<u8>> {
        let checks = [
            ("Z", z, self.info.nz),
            ("T", t, 1),
            ("C", c, self.info.channels),
            ("M", m, self.info.n_mosaic),
        ];
        for (axis, index, len) in checks {
            if index >= len {
                return Err(Error::IndexOutOfRange { axis, index, len });
            }
        }
        Ok(self.planes.slice(s![m, z, c, .., ..]).to_owned())
    }
}
