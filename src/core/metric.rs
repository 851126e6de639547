//! Cost functions evaluated on image samples.

use super::image::Image;
use super::sampler::ImageSample;
use crate::error::{AsgdError, AsgdResult};
use crate::transform::{JacobianBuffer, SparseJacobianAdapter, Transform};
use nalgebra::DVector;
use rayon::prelude::*;

/// Samples per rayon work item in the metric reduction. Partial sums are combined
/// in chunk order, so the result does not depend on the thread count.
const METRIC_CHUNK_SIZE: usize = 256;

/// A cost function of the transform parameters, evaluated on a sample set.
pub trait CostFunction: Send + Sync {
    fn number_of_parameters(&self) -> usize;

    /// Cost value and gradient with respect to the (unscaled) parameters.
    fn value_and_gradient(
        &self,
        parameters: &DVector<f64>,
        samples: &[ImageSample],
    ) -> AsgdResult<(f64, DVector<f64>)>;

    fn gradient(&self, parameters: &DVector<f64>, samples: &[ImageSample]) -> AsgdResult<DVector<f64>> {
        Ok(self.value_and_gradient(parameters, samples)?.1)
    }
}

/// Mean of squared intensity differences between the fixed samples and the
/// transformed moving image.
#[derive(Debug, Clone)]
pub struct MeanSquaresMetric<T: Transform + Clone> {
    moving: Image,
    transform: T,
}

struct PartialSum {
    value: f64,
    gradient: DVector<f64>,
    count: usize,
}

impl<T: Transform + Clone> MeanSquaresMetric<T> {
    pub fn new(moving: Image, transform: T) -> AsgdResult<Self> {
        if moving.dimension() != transform.space_dimension() {
            return Err(AsgdError::InvalidInput(format!(
                "moving image is {}-D but the transform is {}-D",
                moving.dimension(),
                transform.space_dimension()
            )));
        }
        Ok(Self { moving, transform })
    }

    pub fn moving_image(&self) -> &Image {
        &self.moving
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    fn accumulate(&self, transform: &T, samples: &[ImageSample]) -> PartialSum {
        let adapter = SparseJacobianAdapter::new(transform);
        let mut buffer = JacobianBuffer::new();
        let mut partial = PartialSum {
            value: 0.0,
            gradient: DVector::zeros(transform.number_of_parameters()),
            count: 0,
        };

        for sample in samples {
            let mapped = transform.transform_point(&sample.point);
            let Some((moving_value, moving_gradient)) = self.moving.interpolate_with_gradient(&mapped)
            else {
                continue;
            };
            let difference = moving_value - sample.value;
            partial.value += difference * difference;
            partial.count += 1;

            adapter.evaluate(&sample.point, &mut buffer);
            let projected = buffer.matrix.tr_mul(&moving_gradient);
            for (column, &parameter) in buffer.indices.iter().enumerate() {
                partial.gradient[parameter] += 2.0 * difference * projected[column];
            }
        }
        partial
    }
}

impl<T: Transform + Clone> CostFunction for MeanSquaresMetric<T> {
    fn number_of_parameters(&self) -> usize {
        self.transform.number_of_parameters()
    }

    fn value_and_gradient(
        &self,
        parameters: &DVector<f64>,
        samples: &[ImageSample],
    ) -> AsgdResult<(f64, DVector<f64>)> {
        let mut transform = self.transform.clone();
        transform.set_parameters(parameters)?;

        let partials: Vec<PartialSum> = samples
            .par_chunks(METRIC_CHUNK_SIZE)
            .map(|chunk| self.accumulate(&transform, chunk))
            .collect();

        let mut value = 0.0;
        let mut gradient = DVector::zeros(transform.number_of_parameters());
        let mut count = 0;
        for partial in partials {
            value += partial.value;
            gradient += partial.gradient;
            count += partial.count;
        }

        if count == 0 {
            return Err(AsgdError::InsufficientSamples(format!(
                "none of the {} samples maps inside the moving image",
                samples.len()
            )));
        }
        let n = count as f64;
        Ok((value / n, gradient / n))
    }
}
