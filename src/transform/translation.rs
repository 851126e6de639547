//! Translation transform `T(x) = x + t`.

use super::{JacobianBuffer, JacobianStructure, Transform, check_parameter_count};
use crate::error::AsgdResult;
use nalgebra::DVector;

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationTransform {
    offset: DVector<f64>,
}

impl TranslationTransform {
    /// Zero translation in `dimension` dimensions.
    pub fn identity(dimension: usize) -> Self {
        Self {
            offset: DVector::zeros(dimension),
        }
    }

    pub fn new(offset: DVector<f64>) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> &DVector<f64> {
        &self.offset
    }
}

impl Transform for TranslationTransform {
    fn space_dimension(&self) -> usize {
        self.offset.len()
    }

    fn number_of_parameters(&self) -> usize {
        self.offset.len()
    }

    fn number_of_nonzero_jacobian_indices(&self) -> usize {
        self.offset.len()
    }

    fn parameters(&self) -> DVector<f64> {
        self.offset.clone()
    }

    fn set_parameters(&mut self, parameters: &DVector<f64>) -> AsgdResult<()> {
        check_parameter_count(self.offset.len(), parameters.len())?;
        self.offset.copy_from(parameters);
        Ok(())
    }

    fn transform_point(&self, point: &DVector<f64>) -> DVector<f64> {
        point + &self.offset
    }

    fn jacobian_structure(&self) -> JacobianStructure {
        JacobianStructure::Translation
    }

    fn jacobian_into(&self, _point: &DVector<f64>, buffer: &mut JacobianBuffer) {
        let dimension = self.offset.len();
        buffer.reset(dimension, dimension);
        buffer.matrix.fill_diagonal(1.0);
        buffer.indices.extend(0..dimension);
    }
}
