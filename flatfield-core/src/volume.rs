//! Five-dimensional 8-bit output volumes with a fixed `TZCYX` axis order.

use crate::error::{Error, Result};
use ndarray::{s, Array5, ArrayView2, ArrayView5};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Named volume axes, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeAxis {
    /// Time point.
    T,
    /// Focal slice.
    Z,
    /// Channel.
    C,
    /// Row.
    Y,
    /// Column.
    X,
}

impl VolumeAxis {
    /// All axes in storage order.
    pub const ORDER: [VolumeAxis; 5] = [
        VolumeAxis::T,
        VolumeAxis::Z,
        VolumeAxis::C,
        VolumeAxis::Y,
        VolumeAxis::X,
    ];

    /// Position of this axis in the storage order.
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            VolumeAxis::T => 0,
            VolumeAxis::Z => 1,
            VolumeAxis::C => 2,
            VolumeAxis::Y => 3,
            VolumeAxis::X => 4,
        }
    }

    /// Single-letter axis label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            VolumeAxis::T => "T",
            VolumeAxis::Z => "Z",
            VolumeAxis::C => "C",
            VolumeAxis::Y => "Y",
            VolumeAxis::X => "X",
        }
    }
}

impl fmt::Display for VolumeAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shape of a [`Volume`] along its named axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeShape {
    /// Time points.
    pub t: usize,
    /// Focal slices.
    pub z: usize,
    /// Channels.
    pub c: usize,
    /// Rows.
    pub y: usize,
    /// Columns.
    pub x: usize,
}

impl VolumeShape {
    /// Axis labels in storage order.
    pub const AXES: &'static str = "TZCYX";

    /// Shape of a single-time-point volume.
    #[must_use]
    pub fn single_timepoint(z: usize, c: usize, y: usize, x: usize) -> Self {
        Self { t: 1, z, c, y, x }
    }

    /// Length along `axis`.
    #[must_use]
    pub fn len_of(&self, axis: VolumeAxis) -> usize {
        match axis {
            VolumeAxis::T => self.t,
            VolumeAxis::Z => self.z,
            VolumeAxis::C => self.c,
            VolumeAxis::Y => self.y,
            VolumeAxis::X => self.x,
        }
    }

    /// Dimensions in storage order.
    #[must_use]
    pub fn dims(&self) -> [usize; 5] {
        [self.t, self.z, self.c, self.y, self.x]
    }

    /// Number of `Y x X` planes.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.t * self.z * self.c
    }

    /// Spatial shape as `(Y, X)`.
    #[must_use]
    pub fn plane_shape(&self) -> (usize, usize) {
        (self.y, self.x)
    }
}

/// An 8-bit `TZCYX` volume.
///
/// Planes are addressed by explicit `(t, z, c)` coordinates, never by
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    data: Array5<u8>,
}

impl Volume {
    /// Allocates a zero-filled volume.
    #[must_use]
    pub fn zeros(shape: VolumeShape) -> Self {
        Self {
            data: Array5::zeros(shape.dims()),
        }
    }

    /// Wraps an array already laid out as `TZCYX`.
    #[must_use]
    pub fn from_array(data: Array5<u8>) -> Self {
        Self { data }
    }

    /// Shape along the named axes.
    #[must_use]
    pub fn shape(&self) -> VolumeShape {
        let dims = self.data.dim();
        VolumeShape {
            t: dims.0,
            z: dims.1,
            c: dims.2,
            y: dims.3,
            x: dims.4,
        }
    }

    fn check_coords(&self, t: usize, z: usize, c: usize) -> Result<()> {
        let shape = self.shape();
        for (axis, index) in [(VolumeAxis::T, t), (VolumeAxis::Z, z), (VolumeAxis::C, c)] {
            let len = shape.len_of(axis);
            if index >= len {
                return Err(Error::IndexOutOfRange {
                    axis: axis.label(),
                    index,
                    len,
                });
            }
        }
        Ok(())
    }

    /// Borrows the `Y x X` plane at `(t, z, c)`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for coordinates outside the shape.
    pub fn plane(&self, t: usize, z: usize, c: usize) -> Result<ArrayView2<'_, u8>> {
        self.check_coords(t, z, c)?;
        Ok(self.data.slice(s![t, z, c, .., ..]))
    }

    /// Copies `plane` into the slot at `(t, z, c)`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for coordinates outside the shape and
    /// [`Error::ShapeMismatch`] if `plane` is not `Y x X`.
    pub fn set_plane(&mut self, t: usize, z: usize, c: usize, plane: ArrayView2<'_, u8>) -> Result<()> {
        self.check_coords(t, z, c)?;
        let expected = self.shape().plane_shape();
        if plane.dim() != expected {
            return Err(Error::shape_mismatch(
                format!("volume plane (t={t}, z={z}, c={c})"),
                &[expected.0, expected.1],
                &[plane.nrows(), plane.ncols()],
            ));
        }
        self.data.slice_mut(s![t, z, c, .., ..]).assign(&plane);
        Ok(())
    }

    /// Iterates planes in storage (`T`, then `Z`, then `C`) order.
    pub fn planes(&self) -> impl Iterator<Item = ((usize, usize, usize), ArrayView2<'_, u8>)> {
        let shape = self.shape();
        (0..shape.t).flat_map(move |t| {
            (0..shape.z).flat_map(move |z| {
                (0..shape.c).map(move |c| ((t, z, c), self.data.slice(s![t, z, c, .., ..])))
            })
        })
    }

    /// Borrows the whole volume.
    #[must_use]
    pub fn view(&self) -> ArrayView5<'_, u8> {
        self.data.view()
    }

    /// Consumes the volume, returning the underlying array.
    #[must_use]
    pub fn into_inner(self) -> Array5<u8> {
        self.data
    }
}
