//! Jacobian restricted to the parameters that are nonzero at a point.

use super::{JacobianBuffer, Transform};
use crate::optimizer::scales::ParameterScales;
use nalgebra::DVector;

/// Evaluates a transform's Jacobian into a reusable buffer, applying parameter
/// scales to the written columns.
///
/// Every call to [`SparseJacobianAdapter::evaluate`] rewrites the buffer; results
/// from earlier points are never merged in.
pub struct SparseJacobianAdapter<'a> {
    transform: &'a dyn Transform,
    scales: Option<&'a ParameterScales>,
}

impl<'a> SparseJacobianAdapter<'a> {
    pub fn new(transform: &'a dyn Transform) -> Self {
        Self {
            transform,
            scales: None,
        }
    }

    /// Divide each column by the scale factor of its parameter.
    pub fn with_scales(mut self, scales: &'a ParameterScales) -> Self {
        self.scales = (!scales.is_identity()).then_some(scales);
        self
    }

    pub fn number_of_parameters(&self) -> usize {
        self.transform.number_of_parameters()
    }

    pub fn number_of_nonzero_jacobian_indices(&self) -> usize {
        self.transform.number_of_nonzero_jacobian_indices()
    }

    /// Jacobian and nonzero indices at `point`.
    pub fn evaluate(&self, point: &DVector<f64>, buffer: &mut JacobianBuffer) {
        self.transform.jacobian_into(point, buffer);
        if let Some(scales) = self.scales {
            for (column, &parameter) in buffer.indices.iter().enumerate() {
                let factor = scales.factor(parameter);
                buffer.matrix.column_mut(column).unscale_mut(factor);
            }
        }
    }
}
