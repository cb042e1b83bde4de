//! Calibration stacks and gain profiles.
//!
//! Both are immutable once built and shared read-only by every tile, slice
//! and channel processed in a run.

use crate::error::{Error, Result};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

/// A `depth x Y x X` stack of floating-point calibration measurements.
///
/// Holds either the dark field (depth 4, one plane per channel) or a
/// dark-subtracted flat field (depth = number of reference z-slices).
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStack {
    data: Array3<f64>,
}

impl CalibrationStack {
    /// Wraps a `depth x Y x X` array.
    #[must_use]
    pub fn new(data: Array3<f64>) -> Self {
        Self { data }
    }

    /// Number of planes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Spatial shape as `(Y, X)`.
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, y, x) = self.data.dim();
        (y, x)
    }

    /// Full shape as `[depth, Y, X]`.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        let (d, y, x) = self.data.dim();
        [d, y, x]
    }

    /// Borrows plane `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if `index >= depth`.
    pub fn plane(&self, index: usize) -> Result<ArrayView2<'_, f64>> {
        if index >= self.depth() {
            return Err(Error::IndexOutOfRange {
                axis: "calibration plane",
                index,
                len: self.depth(),
            });
        }
        Ok(self.data.index_axis(Axis(0), index))
    }

    /// Borrows the whole stack.
    #[must_use]
    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    /// Fails unless the stack's `(Y, X)` equals `expected`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] naming `what`.
    pub fn ensure_spatial_shape(&self, what: &str, expected: (usize, usize)) -> Result<()> {
        let actual = self.spatial_shape();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::shape_mismatch(
                what,
                &[expected.0, expected.1],
                &[actual.0, actual.1],
            ))
        }
    }

    /// Consumes the stack, returning the underlying array.
    #[must_use]
    pub fn into_inner(self) -> Array3<f64> {
        self.data
    }
}

/// Mean intensity of each flat-field plane, used to restore brightness
/// after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct GainProfile {
    values: Vec<f64>,
}

impl GainProfile {
    /// Wraps per-plane gains.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Gain for plane `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Number of planes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the profile covers no planes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrows the gains.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_stack_shape_accessors() {
        let stack = CalibrationStack::new(Array3::zeros((3, 4, 5)));
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.spatial_shape(), (4, 5));
        assert_eq!(stack.shape(), [3, 4, 5]);
        assert_eq!(stack.plane(2).unwrap().dim(), (4, 5));
        assert!(matches!(
            stack.plane(3),
            Err(Error::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn test_ensure_spatial_shape() {
        let stack = CalibrationStack::new(Array3::zeros((1, 8, 6)));
        assert!(stack.ensure_spatial_shape("flat", (8, 6)).is_ok());
        let err = stack.ensure_spatial_shape("flat", (6, 8)).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_gain_profile_lookup() {
        let gains = GainProfile::new(vec![1.0, 2.5]);
        assert_eq!(gains.len(), 2);
        assert_eq!(gains.get(1), Some(2.5));
        assert_eq!(gains.get(2), None);
        assert!(!gains.is_empty());
    }
}
