//! N-dimensional scalar image with physical geometry.
//!
//! Pixels are stored x-fastest. Physical coordinates follow
//! `point[d] = origin[d] + index[d] * spacing[d]` (no direction cosines).

use crate::error::{AsgdError, AsgdResult};
use nalgebra::DVector;

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    size: Vec<usize>,
    spacing: Vec<f64>,
    origin: Vec<f64>,
    data: Vec<f64>,
}

impl Image {
    /// Create an image, checking that the geometry and buffer agree.
    pub fn new(
        size: Vec<usize>,
        spacing: Vec<f64>,
        origin: Vec<f64>,
        data: Vec<f64>,
    ) -> AsgdResult<Self> {
        let dimension = size.len();
        if dimension == 0 {
            return Err(AsgdError::InvalidInput(
                "image must have at least one dimension".to_string(),
            ));
        }
        if spacing.len() != dimension || origin.len() != dimension {
            return Err(AsgdError::InvalidInput(format!(
                "image geometry mismatch: size has {} dimensions, spacing {}, origin {}",
                dimension,
                spacing.len(),
                origin.len()
            )));
        }
        if size.contains(&0) {
            return Err(AsgdError::InvalidInput(
                "image size must be positive in every dimension".to_string(),
            ));
        }
        if spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(AsgdError::InvalidInput(
                "image spacing must be positive and finite".to_string(),
            ));
        }
        let voxels: usize = size.iter().product();
        if data.len() != voxels {
            return Err(AsgdError::InvalidInput(format!(
                "image buffer has {} values, expected {}",
                data.len(),
                voxels
            )));
        }
        Ok(Self {
            size,
            spacing,
            origin,
            data,
        })
    }

    /// Sample a function of the physical point on the image grid.
    pub fn from_fn<F>(size: Vec<usize>, spacing: Vec<f64>, origin: Vec<f64>, f: F) -> AsgdResult<Self>
    where
        F: Fn(&DVector<f64>) -> f64,
    {
        let voxels: usize = size.iter().product();
        let mut data = Vec::with_capacity(voxels);
        let mut index = vec![0usize; size.len()];
        for linear in 0..voxels {
            unravel(linear, &size, &mut index);
            let point = DVector::from_fn(size.len(), |d, _| origin[d] + index[d] as f64 * spacing[d]);
            data.push(f(&point));
        }
        Self::new(size, spacing, origin, data)
    }

    pub fn dimension(&self) -> usize {
        self.size.len()
    }

    pub fn size(&self) -> &[usize] {
        &self.size
    }

    pub fn spacing(&self) -> &[f64] {
        &self.spacing
    }

    pub fn origin(&self) -> &[f64] {
        &self.origin
    }

    pub fn number_of_voxels(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn mean_spacing(&self) -> f64 {
        self.spacing.iter().sum::<f64>() / self.spacing.len() as f64
    }

    /// Value at a linear (x-fastest) index.
    pub fn value_at_linear(&self, linear: usize) -> f64 {
        self.data[linear]
    }

    /// Linear index of an N-D index.
    pub fn linear_index(&self, index: &[usize]) -> usize {
        let mut linear = 0;
        let mut stride = 1;
        for (d, &i) in index.iter().enumerate() {
            linear += i * stride;
            stride *= self.size[d];
        }
        linear
    }

    /// Physical point of an N-D index.
    pub fn index_to_point(&self, index: &[usize]) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |d, _| {
            self.origin[d] + index[d] as f64 * self.spacing[d]
        })
    }

    /// Physical point of a linear index.
    pub fn linear_to_point(&self, linear: usize) -> DVector<f64> {
        let mut index = vec![0usize; self.dimension()];
        unravel(linear, &self.size, &mut index);
        self.index_to_point(&index)
    }

    /// N-linear interpolation of the value and its physical-space gradient.
    ///
    /// Returns `None` when the point lies outside the image buffer.
    pub fn interpolate_with_gradient(&self, point: &DVector<f64>) -> Option<(f64, DVector<f64>)> {
        let dimension = self.dimension();
        if point.len() != dimension {
            return None;
        }

        let mut base = vec![0usize; dimension];
        let mut upper = vec![0usize; dimension];
        let mut fraction = vec![0.0; dimension];
        for d in 0..dimension {
            let continuous = (point[d] - self.origin[d]) / self.spacing[d];
            let last = (self.size[d] - 1) as f64;
            if !(continuous >= 0.0 && continuous <= last) {
                return None;
            }
            let floor = continuous.floor().min((self.size[d].max(2) - 2) as f64);
            base[d] = floor as usize;
            upper[d] = (base[d] + 1).min(self.size[d] - 1);
            fraction[d] = continuous - floor;
        }

        let mut value = 0.0;
        let mut gradient = DVector::zeros(dimension);
        let mut corner = vec![0usize; dimension];
        for mask in 0..(1usize << dimension) {
            let mut weight = 1.0;
            for d in 0..dimension {
                let high = (mask >> d) & 1 == 1;
                corner[d] = if high { upper[d] } else { base[d] };
                weight *= if high { fraction[d] } else { 1.0 - fraction[d] };
            }
            let sample = self.data[self.linear_index(&corner)];
            value += weight * sample;

            for g in 0..dimension {
                let mut derivative = if (mask >> g) & 1 == 1 { 1.0 } else { -1.0 };
                for d in 0..dimension {
                    if d != g {
                        let high = (mask >> d) & 1 == 1;
                        derivative *= if high { fraction[d] } else { 1.0 - fraction[d] };
                    }
                }
                gradient[g] += derivative * sample / self.spacing[g];
            }
        }

        Some((value, gradient))
    }

    /// Interpolated value only.
    pub fn interpolate(&self, point: &DVector<f64>) -> Option<f64> {
        self.interpolate_with_gradient(point).map(|(value, _)| value)
    }
}

/// Convert a linear index into an N-D index (x-fastest).
pub(crate) fn unravel(mut linear: usize, size: &[usize], index: &mut [usize]) {
    for (d, &extent) in size.iter().enumerate() {
        index[d] = linear % extent;
        linear /= extent;
    }
}
