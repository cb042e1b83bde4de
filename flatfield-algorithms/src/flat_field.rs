//! Flat-field generation from redundant tiles of a reference target.
//!
//! Every z-slice of the output is the elementwise median, across all mosaic
//! tiles, of that slice. The median is taken on the native 8-bit values.
//! With an even tile count the two middle values are averaged in integer
//! arithmetic and truncated, so `[10, 30]` gives 20 and `[10, 31]` gives 20.

use flatfield_core::{
    ConfigurationError, Error, Result, Tilescan, Volume, VolumeKey, VolumeMetadata, VolumeShape,
    VolumeSink,
};
use ndarray::Array2;
use rayon::prelude::*;

/// Median of `values`, reordering them in place.
///
/// Returns 0 for an empty slice.
#[must_use]
pub fn median_u8(values: &mut [u8]) -> u8 {
    let len = values.len();
    if len == 0 {
        return 0;
    }
    let mid = len / 2;
    let (lower, upper, _) = values.select_nth_unstable(mid);
    let upper = *upper;
    if !len.is_multiple_of(2) {
        return upper;
    }
    // Largest of the lower half is the other middle value.
    let lower = lower.iter().copied().max().unwrap_or(upper);
    lower.midpoint(upper)
}

/// Elementwise median across equally shaped planes.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the planes differ in shape and
/// [`Error::IndexOutOfRange`] if there are none.
pub fn median_combine(planes: &[Array2<u8>]) -> Result<Array2<u8>> {
    let first = planes.first().ok_or(Error::IndexOutOfRange {
        axis: "M",
        index: 0,
        len: 0,
    })?;
    let (ny, nx) = first.dim();
    for (m, plane) in planes.iter().enumerate() {
        if plane.dim() != (ny, nx) {
            return Err(Error::shape_mismatch(
                format!("tile {m} plane"),
                &[ny, nx],
                &[plane.nrows(), plane.ncols()],
            ));
        }
    }

    let rows: Vec<Vec<u8>> = (0..ny)
        .into_par_iter()
        .map(|y| {
            let mut buf = Vec::with_capacity(planes.len());
            (0..nx)
                .map(|x| {
                    buf.clear();
                    buf.extend(planes.iter().map(|plane| plane[[y, x]]));
                    median_u8(&mut buf)
                })
                .collect()
        })
        .collect();

    let data: Vec<u8> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((ny, nx), data)
        .map_err(|_| Error::shape_mismatch("median plane", &[ny, nx], &[]))
}

/// Builds the single-channel flat-field volume of one tilescan.
///
/// The channel count is checked before any plane is read.
///
/// # Errors
/// Returns [`ConfigurationError::TooManyChannels`] for a multi-channel
/// tilescan, [`ConfigurationError::EmptyTilescan`] for an empty one, and
/// propagates frame read failures.
pub fn generate_flat_field(tilescan: &dyn Tilescan) -> Result<Volume> {
    let info = tilescan.info();
    if info.channels > 1 {
        return Err(ConfigurationError::TooManyChannels {
            tilescan: info.name.clone(),
            channels: info.channels,
        }
        .into());
    }
    info.ensure_non_empty()?;

    let (ny, nx) = info.dims;
    let mut volume = Volume::zeros(VolumeShape::single_timepoint(info.nz, 1, ny, nx));
    for z in 0..info.nz {
        let tiles = (0..info.n_mosaic)
            .map(|m| {
                let frame = tilescan.frame(z, 0, 0, m)?;
                if frame.dim() != info.dims {
                    return Err(Error::shape_mismatch(
                        format!("tilescan '{}' tile {m} slice {z}", info.name),
                        &[ny, nx],
                        &[frame.nrows(), frame.ncols()],
                    ));
                }
                Ok(frame)
            })
            .collect::<Result<Vec<_>>>()?;
        let median = median_combine(&tiles)?;
        volume.set_plane(0, z, 0, median.view())?;
        log::debug!(
            "{}: slice {}/{} combined from {} tiles",
            info.name,
            z + 1,
            info.nz,
            tiles.len()
        );
    }
    Ok(volume)
}

/// Outcome of a flat-field generation run.
#[derive(Debug, Default)]
pub struct FlatFieldReport {
    /// Tilescans whose flat field was written.
    pub written: Vec<String>,
    /// Tilescans that failed, with the reason. Nothing was written for them.
    pub failed: Vec<(String, Error)>,
}

impl FlatFieldReport {
    /// Returns true if every tilescan was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Generates and writes one flat-field volume per tilescan.
///
/// Tilescans are independent: a failure is recorded in the report and the
/// remaining tilescans are still processed.
pub fn generate_flat_fields<T, S>(tilescans: &[T], sink: &mut S) -> FlatFieldReport
where
    T: Tilescan,
    S: VolumeSink + ?Sized,
{
    let mut report = FlatFieldReport::default();
    for tilescan in tilescans {
        let info = tilescan.info();
        log::info!(
            "generating flat field for '{}' ({} tiles, {} slices)",
            info.name,
            info.n_mosaic,
            info.nz
        );
        let result = generate_flat_field(tilescan).and_then(|volume| {
            sink.write_volume(
                &VolumeKey::tilescan(info.name.clone()),
                &volume,
                &VolumeMetadata::from_scale(info.scale),
            )
        });
        match result {
            Ok(()) => report.written.push(info.name.clone()),
            Err(err) => {
                log::error!("flat field for '{}' failed: {err}", info.name);
                report.failed.push((info.name.clone(), err));
            }
        }
    }
    report
}
