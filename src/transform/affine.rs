//! Affine transform about a fixed centre.
//!
//! `T(x) = M (x - c) + c + t`. Parameters are laid out as the row-major entries of
//! `M` followed by the translation `t`, giving `P = D^2 + D`.

use super::{JacobianBuffer, JacobianStructure, Transform, check_parameter_count};
use crate::error::{AsgdError, AsgdResult};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct AffineTransform {
    matrix: DMatrix<f64>,
    translation: DVector<f64>,
    center: DVector<f64>,
}

impl AffineTransform {
    /// Identity transform about `center`.
    pub fn identity(center: DVector<f64>) -> AsgdResult<Self> {
        let dimension = center.len();
        if dimension == 0 {
            return Err(AsgdError::InvalidInput(
                "affine transform needs a non-empty centre".to_string(),
            ));
        }
        Ok(Self {
            matrix: DMatrix::identity(dimension, dimension),
            translation: DVector::zeros(dimension),
            center,
        })
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn translation(&self) -> &DVector<f64> {
        &self.translation
    }
}

impl Transform for AffineTransform {
    fn space_dimension(&self) -> usize {
        self.center.len()
    }

    fn number_of_parameters(&self) -> usize {
        let d = self.center.len();
        d * d + d
    }

    fn number_of_nonzero_jacobian_indices(&self) -> usize {
        self.number_of_parameters()
    }

    fn parameters(&self) -> DVector<f64> {
        let d = self.center.len();
        let mut parameters = DVector::zeros(d * d + d);
        for row in 0..d {
            for col in 0..d {
                parameters[row * d + col] = self.matrix[(row, col)];
            }
            parameters[d * d + row] = self.translation[row];
        }
        parameters
    }

    fn set_parameters(&mut self, parameters: &DVector<f64>) -> AsgdResult<()> {
        let d = self.center.len();
        check_parameter_count(d * d + d, parameters.len())?;
        for row in 0..d {
            for col in 0..d {
                self.matrix[(row, col)] = parameters[row * d + col];
            }
            self.translation[row] = parameters[d * d + row];
        }
        Ok(())
    }

    fn transform_point(&self, point: &DVector<f64>) -> DVector<f64> {
        &self.matrix * (point - &self.center) + &self.center + &self.translation
    }

    fn jacobian_structure(&self) -> JacobianStructure {
        JacobianStructure::Generic
    }

    fn jacobian_into(&self, point: &DVector<f64>, buffer: &mut JacobianBuffer) {
        let d = self.center.len();
        let parameters = d * d + d;
        buffer.reset(d, parameters);
        for row in 0..d {
            for col in 0..d {
                buffer.matrix[(row, row * d + col)] = point[col] - self.center[col];
            }
            buffer.matrix[(row, d * d + row)] = 1.0;
        }
        buffer.indices.extend(0..parameters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_layout() {
        let mut transform = AffineTransform::identity(DVector::from_vec(vec![1.0, 1.0])).unwrap();
        assert_eq!(
            transform.parameters(),
            DVector::from_vec(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
        );

        // 90 degree rotation about (1, 1) plus a shift along y
        transform
            .set_parameters(&DVector::from_vec(vec![0.0, -1.0, 1.0, 0.0, 0.0, 2.0]))
            .unwrap();
        let mapped = transform.transform_point(&DVector::from_vec(vec![2.0, 1.0]));
        assert!((mapped[0] - 1.0).abs() < 1e-12);
        assert!((mapped[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let mut transform = AffineTransform::identity(DVector::from_vec(vec![0.5, -0.5])).unwrap();
        let base = DVector::from_vec(vec![1.1, 0.2, -0.3, 0.9, 0.4, -0.7]);
        transform.set_parameters(&base).unwrap();
        let point = DVector::from_vec(vec![2.0, 3.0]);

        let mut buffer = JacobianBuffer::new();
        transform.jacobian_into(&point, &mut buffer);
        assert_eq!(buffer.indices, (0..6).collect::<Vec<_>>());

        let h = 1e-6;
        for p in 0..6 {
            let mut shifted = base.clone();
            shifted[p] += h;
            let mut perturbed = transform.clone();
            perturbed.set_parameters(&shifted).unwrap();
            let numeric = (perturbed.transform_point(&point) - transform.transform_point(&point)) / h;
            for row in 0..2 {
                assert!((numeric[row] - buffer.matrix[(row, p)]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_empty_center_is_rejected() {
        assert!(AffineTransform::identity(DVector::zeros(0)).is_err());
    }
}
