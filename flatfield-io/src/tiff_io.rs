//! TIFF calibration stacks and `ImageJ` hyperstack output.
//!
//! Calibration images (dark and flat fields) are multi-page grayscale TIFF
//! files; every page becomes one plane of a `depth x Y x X` stack.
//! Assembled volumes are written as 8-bit `ImageJ` hyperstacks with pages in
//! `TZCYX` order and the physical voxel size recorded in the description.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::{Error, Result};
use flatfield_core::{
    CalibrationImageReader, Volume, VolumeKey, VolumeMetadata, VolumeShape, VolumeSink,
};
use ndarray::Array3;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::ColorType;

/// Reads every page of a grayscale TIFF file into a `depth x Y x X` stack.
///
/// # Errors
/// Returns an error if the file cannot be decoded, is not single-sample
/// grayscale, or its pages differ in size.
pub fn read_stack<P: AsRef<Path>>(path: P) -> Result<Array3<f64>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let mut data = Vec::new();
    let mut depth = 0usize;
    loop {
        let page = decoder.dimensions()?;
        if page != (width, height) {
            return Err(Error::InvalidFormat(format!(
                "{}: page {depth} is {}x{}, first page is {width}x{height}",
                path.display(),
                page.0,
                page.1
            )));
        }
        let colortype = decoder.colortype()?;
        if !matches!(colortype, ColorType::Gray(_)) {
            return Err(Error::UnsupportedPixelType(format!(
                "{}: {colortype:?}",
                path.display()
            )));
        }
        match decoder.read_image()? {
            DecodingResult::U8(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::U16(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::U32(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::I8(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::I16(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::I32(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::F32(v) => data.extend(v.into_iter().map(f64::from)),
            DecodingResult::F64(v) => data.extend(v),
            _ => {
                return Err(Error::UnsupportedPixelType(format!(
                    "{}: {colortype:?} samples",
                    path.display()
                )))
            }
        }
        depth += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    log::debug!(
        "Read {depth} page(s) of {width}x{height} from {}",
        path.display()
    );

    Array3::from_shape_vec((depth, height as usize, width as usize), data)
        .map_err(|e| Error::InvalidFormat(e.to_string()))
}

/// [`CalibrationImageReader`] backed by [`read_stack`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffStackReader;

impl CalibrationImageReader for TiffStackReader {
    fn read_calibration_image(&self, path: &Path) -> flatfield_core::Result<Array3<f64>> {
        Ok(read_stack(path)?)
    }
}

/// Builds the `ImageJ` description stored on the first page of a hyperstack.
#[must_use]
pub fn imagej_description(shape: &VolumeShape, metadata: &VolumeMetadata) -> String {
    let size = metadata.physical_size;
    let mut lines = vec![
        "ImageJ=1.11a".to_string(),
        format!("images={}", shape.plane_count()),
    ];
    if shape.c > 1 {
        lines.push(format!("channels={}", shape.c));
    }
    if shape.z > 1 {
        lines.push(format!("slices={}", shape.z));
    }
    if shape.t > 1 {
        lines.push(format!("frames={}", shape.t));
    }
    lines.extend([
        "hyperstack=true".to_string(),
        "mode=grayscale".to_string(),
        "unit=um".to_string(),
        format!("spacing={}", size.z),
        format!("axes={}", VolumeShape::AXES),
        format!("PhysicalSizeX={}", size.x),
        "PhysicalSizeXUnit=um".to_string(),
        format!("PhysicalSizeY={}", size.y),
        "PhysicalSizeYUnit=um".to_string(),
        format!("PhysicalSizeZ={}", size.z),
        "PhysicalSizeZUnit=um".to_string(),
    ]);
    let mut description = lines.join("\n");
    description.push('\n');
    description
}

/// Approximates a positive resolution as a TIFF rational.
///
/// Non-finite or non-positive values become `1/1`.
#[must_use]
pub fn resolution_rational(value: f64) -> Rational {
    if !value.is_finite() || value <= 0.0 {
        return Rational { n: 1, d: 1 };
    }
    let max = f64::from(u32::MAX);
    let d = [1_000_000u32, 1_000, 1]
        .into_iter()
        .find(|&d| value * f64::from(d) <= max)
        .unwrap_or(1);
    let n = (value * f64::from(d)).round().clamp(1.0, max) as u32;
    let g = gcd(n, d);
    Rational { n: n / g, d: d / g }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Writes `volume` to `path` as an 8-bit `ImageJ` hyperstack.
///
/// # Errors
/// Returns an error if the file cannot be created or encoded.
pub fn write_volume(path: &Path, volume: &Volume, metadata: &VolumeMetadata) -> Result<()> {
    let shape = volume.shape();
    let width = u32::try_from(shape.x)
        .map_err(|_| Error::InvalidFormat(format!("width {} exceeds TIFF limits", shape.x)))?;
    let height = u32::try_from(shape.y)
        .map_err(|_| Error::InvalidFormat(format!("height {} exceeds TIFF limits", shape.y)))?;
    let description = imagej_description(&shape, metadata);

    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    for (index, (_, plane)) in volume.planes().enumerate() {
        let mut image = encoder.new_image::<colortype::Gray8>(width, height)?;
        if index == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description.as_str())?;
        }
        image.resolution_unit(ResolutionUnit::None);
        image.x_resolution(resolution_rational(metadata.resolution.0));
        image.y_resolution(resolution_rational(metadata.resolution.1));

        let data: Cow<'_, [u8]> = match plane.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(plane.iter().copied().collect()),
        };
        image.write_data(&data)?;
    }
    Ok(())
}

/// [`VolumeSink`] writing one `ImageJ` TIFF per volume into a directory.
///
/// Per-tile volumes are named `<tilescan>-<tile>.tif`, whole-tilescan
/// volumes `<tilescan>.tif`.
#[derive(Debug)]
pub struct TiffVolumeSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl TiffVolumeSink {
    /// Creates a sink writing into `dir`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    /// Creates a sink writing into `name`, a sibling of `acquisition`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn beside<P: AsRef<Path>>(acquisition: P, name: &str) -> Result<Self> {
        let parent = acquisition
            .as_ref()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::new(parent.join(name))
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths written so far, in write order.
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// File name of the volume identified by `key`.
    #[must_use]
    pub fn file_name(key: &VolumeKey) -> String {
        let stem: String = key
            .tilescan
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        match key.tile {
            Some(tile) => format!("{stem}-{tile}.tif"),
            None => format!("{stem}.tif"),
        }
    }
}

impl VolumeSink for TiffVolumeSink {
    fn write_volume(
        &mut self,
        key: &VolumeKey,
        volume: &Volume,
        metadata: &VolumeMetadata,
    ) -> flatfield_core::Result<()> {
        let path = self.dir.join(Self::file_name(key));
        write_volume(&path, volume, metadata)?;
        log::info!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }
}
