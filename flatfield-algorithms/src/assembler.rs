//! Assembly of corrected per-tile volumes.
//!
//! Walks tiles, then channels, then slices of every z-stack tilescan,
//! corrects each plane and writes one `TZCYX` volume per mosaic tile.

use crate::calibration::CorrectionConfig;
use crate::correction::SliceCorrector;
use flatfield_core::{
    ConfigurationError, Error, Result, Tilescan, Volume, VolumeKey, VolumeMetadata, VolumeShape,
    VolumeSink,
};
use ndarray::Array2;
use rayon::prelude::*;

/// Execution options for [`ImageAssembler`].
#[derive(Clone, Debug)]
pub struct AssemblerOptions {
    /// Correct the planes of a tile in parallel.
    pub parallel: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl AssemblerOptions {
    /// Enable or disable parallel plane correction.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Totals of a correction run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorrectionSummary {
    /// Tilescans corrected.
    pub tilescans_corrected: usize,
    /// Tilescans skipped because they have a single slice.
    pub tilescans_skipped: usize,
    /// Volumes handed to the sink.
    pub volumes_written: usize,
    /// Planes corrected.
    pub planes_corrected: usize,
}

/// Tilescans the correction pipeline processes: those with more than one
/// z-slice.
pub fn select_z_stacks<T: Tilescan>(tilescans: &[T]) -> impl Iterator<Item = &T> {
    tilescans.iter().filter(|t| t.info().is_z_stack())
}

/// Drives [`SliceCorrector`] over tilescans and writes corrected volumes.
#[derive(Debug)]
pub struct ImageAssembler<'a> {
    config: &'a CorrectionConfig,
    options: AssemblerOptions,
}

impl<'a> ImageAssembler<'a> {
    /// Creates an assembler sharing `config` read-only.
    #[must_use]
    pub fn new(config: &'a CorrectionConfig, options: AssemblerOptions) -> Self {
        Self { config, options }
    }

    fn correctors(&self, tilescan: &dyn Tilescan) -> Result<Vec<SliceCorrector<'a>>> {
        let info = tilescan.info();
        self.config.ensure_compatible(info)?;
        (0..info.channels)
            .map(|c| {
                SliceCorrector::for_channel(self.config, c, info.nz).ok_or_else(|| {
                    Error::from(ConfigurationError::MissingChannelCalibration {
                        tilescan: info.name.clone(),
                        index: c,
                        configured: self.config.calibrations().len(),
                    })
                })
            })
            .collect()
    }

    /// Corrects every channel and slice of mosaic tile `tile`.
    ///
    /// # Errors
    /// Returns configuration and shape errors before any plane is read, then
    /// propagates frame read failures.
    pub fn assemble_tile(&self, tilescan: &dyn Tilescan, tile: usize) -> Result<Volume> {
        let correctors = self.correctors(tilescan)?;
        self.assemble_with(tilescan, tile, &correctors)
    }

    fn assemble_with(
        &self,
        tilescan: &dyn Tilescan,
        tile: usize,
        correctors: &[SliceCorrector<'_>],
    ) -> Result<Volume> {
        let info = tilescan.info();
        let (ny, nx) = info.dims;
        let jobs: Vec<(usize, usize)> = (0..info.channels)
            .flat_map(|c| (0..info.nz).map(move |z| (c, z)))
            .collect();

        let correct = |&(c, z): &(usize, usize)| -> Result<(usize, usize, Array2<u8>)> {
            let raw = tilescan.frame(z, 0, c, tile)?;
            let corrector = &correctors[c];
            log::debug!(
                "{} tile {tile} channel {} slice {z} -> flat plane {}",
                info.name,
                corrector.calibration().channel(),
                corrector.flat_index(z)
            );
            let corrected = corrector.correct(raw.view(), z)?;
            Ok((c, z, corrected.plane))
        };

        let planes = if self.options.parallel {
            jobs.par_iter().map(correct).collect::<Result<Vec<_>>>()?
        } else {
            jobs.iter().map(correct).collect::<Result<Vec<_>>>()?
        };

        let mut volume = Volume::zeros(VolumeShape::single_timepoint(info.nz, info.channels, ny, nx));
        for (c, z, plane) in planes {
            volume.set_plane(0, z, c, plane.view())?;
        }
        Ok(volume)
    }

    /// Corrects one tilescan and writes one volume per mosaic tile.
    ///
    /// Returns the number of volumes written.
    ///
    /// # Errors
    /// Fails before writing anything if the configuration does not fit the
    /// tilescan; afterwards propagates read and write failures.
    pub fn correct_tilescan<S>(&self, tilescan: &dyn Tilescan, sink: &mut S) -> Result<usize>
    where
        S: VolumeSink + ?Sized,
    {
        let info = tilescan.info();
        info.ensure_non_empty()?;
        let correctors = self.correctors(tilescan)?;
        let metadata = VolumeMetadata::from_scale(info.scale);

        for tile in 0..info.n_mosaic {
            log::debug!("{}: correcting tile {}/{}", info.name, tile + 1, info.n_mosaic);
            let volume = self.assemble_with(tilescan, tile, &correctors)?;
            sink.write_volume(&VolumeKey::tile(info.name.clone(), tile), &volume, &metadata)?;
        }
        Ok(info.n_mosaic)
    }

    /// Corrects every z-stack tilescan; single-slice tilescans are skipped.
    ///
    /// # Errors
    /// Aborts on the first failure. Volumes already written stay on disk.
    pub fn run<T, S>(&self, tilescans: &[T], sink: &mut S) -> Result<CorrectionSummary>
    where
        T: Tilescan,
        S: VolumeSink + ?Sized,
    {
        let mut summary = CorrectionSummary::default();
        for tilescan in tilescans.iter().filter(|t| !t.info().is_z_stack()) {
            log::info!("skipping '{}': single slice", tilescan.info().name);
            summary.tilescans_skipped += 1;
        }
        for tilescan in select_z_stacks(tilescans) {
            let info = tilescan.info();
            log::info!(
                "correcting '{}' ({} tiles, {} slices, {} channels)",
                info.name,
                info.n_mosaic,
                info.nz,
                info.channels
            );
            let written = self.correct_tilescan(tilescan, sink)?;
            summary.tilescans_corrected += 1;
            summary.volumes_written += written;
            summary.planes_corrected += written * info.nz * info.channels;
        }
        Ok(summary)
    }
}
