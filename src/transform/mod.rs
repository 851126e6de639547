//! Parametric spatial transforms.
//!
//! A transform maps fixed-image points into the moving image and exposes the
//! Jacobian of the mapped point with respect to its parameters. Every transform
//! reports a [`JacobianStructure`] once, which the estimation code uses to pick the
//! Jacobian statistics algorithm without re-inspecting the transform per sample.
//!
//! Transforms write their Jacobian into a caller-owned [`JacobianBuffer`]:
//! - dense transforms write the `D x P` matrix and indices `0..P`
//! - compact-support transforms write `D x K` columns and the `K` global parameter
//!   indices those columns belong to
//!
//! Each call overwrites the buffer completely.

use crate::error::AsgdResult;
use nalgebra::{DMatrix, DVector};
use std::fmt;

pub mod affine;
pub mod bspline;
pub mod sparse_jacobian;
pub mod translation;

pub use affine::AffineTransform;
pub use bspline::BSplineTransform;
pub use sparse_jacobian::SparseJacobianAdapter;
pub use translation::TranslationTransform;

/// Shape of a transform's parameter Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JacobianStructure {
    /// Any point may depend on any parameter.
    Generic,
    /// Pure translation: the Jacobian is the identity at every point.
    Translation,
    /// Each point depends on a bounded subset of the parameters.
    CompactSupport,
}

impl fmt::Display for JacobianStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JacobianStructure::Generic => write!(f, "Generic"),
            JacobianStructure::Translation => write!(f, "Translation"),
            JacobianStructure::CompactSupport => write!(f, "CompactSupport"),
        }
    }
}

/// Reusable storage for the Jacobian at one point.
#[derive(Debug, Clone)]
pub struct JacobianBuffer {
    /// `D x K` partial derivatives, column `c` belongs to parameter `indices[c]`.
    pub matrix: DMatrix<f64>,
    /// Global parameter index of each column.
    pub indices: Vec<usize>,
}

impl JacobianBuffer {
    pub fn new() -> Self {
        Self {
            matrix: DMatrix::zeros(0, 0),
            indices: Vec::new(),
        }
    }

    /// Reset to a zeroed `rows x cols` matrix and an empty index list.
    pub fn reset(&mut self, rows: usize, cols: usize) {
        if self.matrix.shape() == (rows, cols) {
            self.matrix.fill(0.0);
        } else {
            self.matrix = DMatrix::zeros(rows, cols);
        }
        self.indices.clear();
    }

    /// Number of active parameters at the last evaluated point.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when the last evaluated point lies outside the transform's support.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl Default for JacobianBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A spatial transform with a parameter Jacobian.
///
/// Implementations must be `Send + Sync`; the metric evaluates points from several
/// rayon workers against a shared transform.
pub trait Transform: Send + Sync {
    /// Spatial dimension `D`.
    fn space_dimension(&self) -> usize;

    /// Number of parameters `P`.
    fn number_of_parameters(&self) -> usize;

    /// Upper bound on the number of parameters active at a single point.
    fn number_of_nonzero_jacobian_indices(&self) -> usize;

    /// Current parameter vector.
    fn parameters(&self) -> DVector<f64>;

    /// Replace the parameter vector; fails on a length mismatch.
    fn set_parameters(&mut self, parameters: &DVector<f64>) -> AsgdResult<()>;

    /// Map a point with the current parameters.
    fn transform_point(&self, point: &DVector<f64>) -> DVector<f64>;

    /// Jacobian shape, fixed for the lifetime of the transform.
    fn jacobian_structure(&self) -> JacobianStructure;

    /// Write the Jacobian at `point` into `buffer`, overwriting its contents.
    /// Points outside the support leave the index list empty.
    fn jacobian_into(&self, point: &DVector<f64>, buffer: &mut JacobianBuffer);
}

pub(crate) fn check_parameter_count(expected: usize, given: usize) -> AsgdResult<()> {
    if expected != given {
        return Err(crate::error::AsgdError::InvalidInput(format!(
            "parameter vector has {given} entries, transform expects {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reset_clears_previous_contents() {
        let mut buffer = JacobianBuffer::new();
        buffer.reset(2, 3);
        buffer.matrix[(1, 2)] = 5.0;
        buffer.indices.extend([4, 5, 6]);

        buffer.reset(2, 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.matrix[(1, 2)], 0.0);

        buffer.reset(3, 1);
        assert_eq!(buffer.matrix.shape(), (3, 1));
    }
}
