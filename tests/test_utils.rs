//! Shared fixtures for the integration tests
//!
//! Synthetic images with known geometry and cost functions with known quadratic
//! form, so estimated settings and step lengths can be checked analytically.

#![allow(dead_code)]

use adaptive_sgd::AsgdResult;
use adaptive_sgd::core::{CostFunction, Image, ImageSample};
use adaptive_sgd::transform::Transform;
use nalgebra::DVector;

/// `0.5 * stiffness * (mu[index] - target)^2`, independent of the samples.
pub struct SingleParameterQuadratic {
    pub number_of_parameters: usize,
    pub index: usize,
    pub target: f64,
    pub stiffness: f64,
}

impl CostFunction for SingleParameterQuadratic {
    fn number_of_parameters(&self) -> usize {
        self.number_of_parameters
    }

    fn value_and_gradient(
        &self,
        parameters: &DVector<f64>,
        _samples: &[ImageSample],
    ) -> AsgdResult<(f64, DVector<f64>)> {
        let residual = parameters[self.index] - self.target;
        let mut gradient = DVector::zeros(self.number_of_parameters);
        gradient[self.index] = self.stiffness * residual;
        Ok((0.5 * self.stiffness * residual * residual, gradient))
    }
}

/// `0.5 * ||mu - target||^2`, independent of the samples.
pub struct Bowl {
    pub target: DVector<f64>,
}

impl CostFunction for Bowl {
    fn number_of_parameters(&self) -> usize {
        self.target.len()
    }

    fn value_and_gradient(
        &self,
        parameters: &DVector<f64>,
        _samples: &[ImageSample],
    ) -> AsgdResult<(f64, DVector<f64>)> {
        let residual = parameters - &self.target;
        Ok((0.5 * residual.norm_squared(), residual))
    }
}

/// `size x size` image covering `[-1, 1]^2`, corners included.
pub fn unit_square_image(size: usize) -> Image {
    let spacing = 2.0 / (size - 1) as f64;
    Image::from_fn(vec![size, size], vec![spacing; 2], vec![-1.0; 2], |p| p[0] + p[1])
        .expect("valid image geometry")
}

/// Sum of Gaussian blobs shifted by `shift`.
pub fn blob_image(size: usize, shift: (f64, f64)) -> Image {
    Image::from_fn(vec![size, size], vec![1.0; 2], vec![0.0; 2], move |p| {
        [(20.0, 24.0, 6.0), (40.0, 36.0, 8.0), (30.0, 45.0, 5.0)]
            .iter()
            .map(|&(cx, cy, width)| {
                let dx = p[0] - cx - shift.0;
                let dy = p[1] - cy - shift.1;
                (-(dx * dx + dy * dy) / (2.0 * width * width)).exp()
            })
            .sum()
    })
    .expect("valid image geometry")
}

/// Largest displacement between two parameter vectors of `transform` over the
/// voxel positions of `image`.
pub fn max_displacement<T: Transform + Clone>(
    transform: &T,
    before: &DVector<f64>,
    after: &DVector<f64>,
    image: &Image,
) -> f64 {
    let mut first = transform.clone();
    first.set_parameters(before).expect("parameter count");
    let mut second = transform.clone();
    second.set_parameters(after).expect("parameter count");
    (0..image.number_of_voxels())
        .map(|i| {
            let point = image.linear_to_point(i);
            (second.transform_point(&point) - first.transform_point(&point)).norm()
        })
        .fold(0.0, f64::max)
}
