//! Cubic B-spline deformation on a regular control-point grid.
//!
//! `T(x) = x + sum_k B(x - x_k) c_k` with tensor-product cubic B-spline weights.
//! Coefficients are stored dimension-major: the coefficient for dimension `d` of
//! control point `k` (flat, x-fastest) is parameter `d * N + k`, with `N` the number
//! of control points. A point is influenced by `W = 4^D` control points, so its
//! Jacobian has `D * W` nonzero columns.

use super::{JacobianBuffer, JacobianStructure, Transform, check_parameter_count};
use crate::core::image::unravel;
use crate::error::{AsgdError, AsgdResult};
use nalgebra::DVector;

const SPLINE_ORDER: usize = 3;
const SUPPORT: usize = SPLINE_ORDER + 1;

#[derive(Debug, Clone, PartialEq)]
pub struct BSplineTransform {
    grid_origin: Vec<f64>,
    grid_spacing: Vec<f64>,
    grid_size: Vec<usize>,
    coefficients: DVector<f64>,
}

impl BSplineTransform {
    /// Control grid with explicit geometry and zero coefficients.
    pub fn new(grid_origin: Vec<f64>, grid_spacing: Vec<f64>, grid_size: Vec<usize>) -> AsgdResult<Self> {
        let dimension = grid_size.len();
        if dimension == 0 || grid_origin.len() != dimension || grid_spacing.len() != dimension {
            return Err(AsgdError::InvalidInput(format!(
                "B-spline grid geometry mismatch: size {grid_size:?}, origin {grid_origin:?}, spacing {grid_spacing:?}"
            )));
        }
        if grid_size.iter().any(|&n| n < SUPPORT) {
            return Err(AsgdError::InvalidInput(format!(
                "B-spline grid needs at least {SUPPORT} control points per dimension, got {grid_size:?}"
            )));
        }
        if grid_spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(AsgdError::InvalidInput(
                "B-spline grid spacing must be positive and finite".to_string(),
            ));
        }
        let points: usize = grid_size.iter().product();
        Ok(Self {
            grid_origin,
            grid_spacing,
            grid_size,
            coefficients: DVector::zeros(points * dimension),
        })
    }

    /// Control grid covering the box `[origin, origin + extent]` with the given
    /// control-point spacing, padded so every point of the box has full support.
    pub fn covering(origin: &[f64], extent: &[f64], control_spacing: &[f64]) -> AsgdResult<Self> {
        if origin.len() != extent.len() || origin.len() != control_spacing.len() {
            return Err(AsgdError::InvalidInput(
                "B-spline covering box dimensions disagree".to_string(),
            ));
        }
        let grid_origin = origin
            .iter()
            .zip(control_spacing)
            .map(|(o, s)| o - s)
            .collect();
        let grid_size = extent
            .iter()
            .zip(control_spacing)
            .map(|(e, s)| (e / s).floor().max(0.0) as usize + SUPPORT)
            .collect();
        Self::new(grid_origin, control_spacing.to_vec(), grid_size)
    }

    pub fn grid_size(&self) -> &[usize] {
        &self.grid_size
    }

    pub fn number_of_control_points(&self) -> usize {
        self.grid_size.iter().product()
    }

    /// First support index and fractional offset per dimension, or `None` when the
    /// support would leave the control grid.
    fn support(&self, point: &DVector<f64>) -> Option<(Vec<usize>, Vec<f64>)> {
        let dimension = self.grid_size.len();
        if point.len() != dimension {
            return None;
        }
        let mut start = Vec::with_capacity(dimension);
        let mut fraction = Vec::with_capacity(dimension);
        for d in 0..dimension {
            let u = (point[d] - self.grid_origin[d]) / self.grid_spacing[d];
            if !u.is_finite() {
                return None;
            }
            let cell = u.floor();
            let first = cell - 1.0;
            if first < 0.0 || first as usize + SUPPORT > self.grid_size[d] {
                return None;
            }
            start.push(first as usize);
            fraction.push(u - cell);
        }
        Some((start, fraction))
    }

    /// Tensor-product weights and flat control-point indices of the support.
    fn weights_and_indices(&self, start: &[usize], fraction: &[f64], weights: &mut Vec<f64>, indices: &mut Vec<usize>) {
        let dimension = self.grid_size.len();
        let per_dim: Vec<[f64; SUPPORT]> = fraction.iter().map(|&t| cubic_weights(t)).collect();
        let support_shape = vec![SUPPORT; dimension];
        let count = SUPPORT.pow(dimension as u32);

        weights.clear();
        indices.clear();
        let mut offset = vec![0usize; dimension];
        for w in 0..count {
            unravel(w, &support_shape, &mut offset);
            let mut weight = 1.0;
            let mut flat = 0;
            let mut stride = 1;
            for d in 0..dimension {
                weight *= per_dim[d][offset[d]];
                flat += (start[d] + offset[d]) * stride;
                stride *= self.grid_size[d];
            }
            weights.push(weight);
            indices.push(flat);
        }
    }
}

/// Cubic B-spline weights for a fractional offset `t` in `[0, 1)`.
fn cubic_weights(t: f64) -> [f64; SUPPORT] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        (1.0 - t).powi(3) / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

impl Transform for BSplineTransform {
    fn space_dimension(&self) -> usize {
        self.grid_size.len()
    }

    fn number_of_parameters(&self) -> usize {
        self.coefficients.len()
    }

    fn number_of_nonzero_jacobian_indices(&self) -> usize {
        let dimension = self.grid_size.len();
        dimension * SUPPORT.pow(dimension as u32)
    }

    fn parameters(&self) -> DVector<f64> {
        self.coefficients.clone()
    }

    fn set_parameters(&mut self, parameters: &DVector<f64>) -> AsgdResult<()> {
        check_parameter_count(self.coefficients.len(), parameters.len())?;
        self.coefficients.copy_from(parameters);
        Ok(())
    }

    fn transform_point(&self, point: &DVector<f64>) -> DVector<f64> {
        let Some((start, fraction)) = self.support(point) else {
            return point.clone();
        };
        let mut weights = Vec::new();
        let mut indices = Vec::new();
        self.weights_and_indices(&start, &fraction, &mut weights, &mut indices);

        let points = self.number_of_control_points();
        let mut mapped = point.clone();
        for d in 0..self.grid_size.len() {
            mapped[d] += weights
                .iter()
                .zip(&indices)
                .map(|(w, &k)| w * self.coefficients[d * points + k])
                .sum::<f64>();
        }
        mapped
    }

    fn jacobian_structure(&self) -> JacobianStructure {
        JacobianStructure::CompactSupport
    }

    fn jacobian_into(&self, point: &DVector<f64>, buffer: &mut JacobianBuffer) {
        let dimension = self.grid_size.len();
        let Some((start, fraction)) = self.support(point) else {
            buffer.reset(dimension, 0);
            return;
        };
        let mut weights = Vec::new();
        let mut flat = Vec::new();
        self.weights_and_indices(&start, &fraction, &mut weights, &mut flat);

        let support = weights.len();
        let points = self.number_of_control_points();
        buffer.reset(dimension, dimension * support);
        for d in 0..dimension {
            for (w, (&weight, &k)) in weights.iter().zip(&flat).enumerate() {
                buffer.matrix[(d, d * support + w)] = weight;
                buffer.indices.push(d * points + k);
            }
        }
    }
}
