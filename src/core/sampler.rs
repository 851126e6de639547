//! Image samplers.
//!
//! A sampler turns an image into a [`SampleContainer`]: spatial points plus the
//! image value at each point. The optimizer needs two flavours: a stochastic sampler
//! that draws a fresh small set per call (approximate gradients) and a
//! deterministic grid sampler (exact gradients and Jacobian measurements).

use super::image::{Image, unravel};
use crate::error::{AsgdError, AsgdResult};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A spatial sample with the fixed-image value at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pub point: DVector<f64>,
    pub value: f64,
}

/// Samples drawn in one pass, consumed in order.
pub type SampleContainer = Vec<ImageSample>;

/// Produces sample sets from an image.
pub trait ImageSampler: Send {
    /// Draw a sample set.
    fn sample(&mut self, image: &Image) -> AsgdResult<SampleContainer>;

    /// Whether successive calls draw different samples.
    fn is_stochastic(&self) -> bool;
}

/// Deterministic sampler on a regular voxel grid.
#[derive(Debug, Clone)]
pub struct GridSampler {
    spacing: GridSpacing,
}

#[derive(Debug, Clone)]
enum GridSpacing {
    /// Derive an integer spacing from a target sample count.
    TargetCount(usize),
    /// Explicit voxel spacing per dimension.
    Explicit(Vec<usize>),
}

impl GridSampler {
    /// Grid sampler aiming at roughly `number_of_samples` samples.
    ///
    /// The grid spacing is `max(1, floor((voxels / number_of_samples)^(1/D)))`, so the
    /// actual count is lower than requested when the image is small or the spacing
    /// rounds down to an integer.
    pub fn with_target_count(number_of_samples: usize) -> Self {
        Self {
            spacing: GridSpacing::TargetCount(number_of_samples.max(1)),
        }
    }

    /// Grid sampler with an explicit voxel spacing (one entry per dimension).
    pub fn with_spacing(spacing: Vec<usize>) -> Self {
        Self {
            spacing: GridSpacing::Explicit(spacing),
        }
    }

    /// Voxel spacing used for `image`.
    pub fn grid_spacing(&self, image: &Image) -> AsgdResult<Vec<usize>> {
        match &self.spacing {
            GridSpacing::TargetCount(count) => {
                let fraction = image.number_of_voxels() as f64 / *count as f64;
                let step = fraction.powf(1.0 / image.dimension() as f64).floor();
                let step = if step.is_finite() { (step as usize).max(1) } else { 1 };
                Ok(vec![step; image.dimension()])
            }
            GridSpacing::Explicit(spacing) => {
                if spacing.len() != image.dimension() || spacing.contains(&0) {
                    return Err(AsgdError::Configuration(format!(
                        "grid spacing {:?} does not fit a {}-D image",
                        spacing,
                        image.dimension()
                    )));
                }
                Ok(spacing.clone())
            }
        }
    }
}

impl ImageSampler for GridSampler {
    fn sample(&mut self, image: &Image) -> AsgdResult<SampleContainer> {
        let step = self.grid_spacing(image)?;
        let grid_size: Vec<usize> = image
            .size()
            .iter()
            .zip(&step)
            .map(|(&extent, &s)| extent.div_ceil(s))
            .collect();
        let count: usize = grid_size.iter().product();

        let mut grid_index = vec![0usize; image.dimension()];
        let mut voxel_index = vec![0usize; image.dimension()];
        let mut samples = Vec::with_capacity(count);
        for linear in 0..count {
            unravel(linear, &grid_size, &mut grid_index);
            for d in 0..image.dimension() {
                voxel_index[d] = grid_index[d] * step[d];
            }
            samples.push(ImageSample {
                point: image.index_to_point(&voxel_index),
                value: image.value_at_linear(image.linear_index(&voxel_index)),
            });
        }
        Ok(samples)
    }

    fn is_stochastic(&self) -> bool {
        false
    }
}

/// Uniform random voxel sampler (with replacement), seeded for reproducibility.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    number_of_samples: usize,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(number_of_samples: usize, seed: u64) -> Self {
        Self {
            number_of_samples,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn number_of_samples(&self) -> usize {
        self.number_of_samples
    }
}

impl ImageSampler for RandomSampler {
    fn sample(&mut self, image: &Image) -> AsgdResult<SampleContainer> {
        if self.number_of_samples == 0 {
            return Err(AsgdError::InsufficientSamples(
                "random sampler configured with zero samples".to_string(),
            ));
        }
        let voxels = image.number_of_voxels();
        Ok((0..self.number_of_samples)
            .map(|_| {
                let linear = self.rng.gen_range(0..voxels);
                ImageSample {
                    point: image.linear_to_point(linear),
                    value: image.value_at_linear(linear),
                }
            })
            .collect())
    }

    fn is_stochastic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(size: Vec<usize>) -> Image {
        let dimension = size.len();
        Image::from_fn(size, vec![1.0; dimension], vec![0.0; dimension], |p| p.sum()).unwrap()
    }

    #[test]
    fn test_grid_spacing_from_target_count() {
        let img = image(vec![100, 100]);
        let sampler = GridSampler::with_target_count(1000);
        // (10000 / 1000)^(1/2) = 3.16 -> 3
        assert_eq!(sampler.grid_spacing(&img).unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_small_image_reduces_sample_count() {
        let img = image(vec![10, 10]);
        let mut sampler = GridSampler::with_target_count(100_000);
        let samples = sampler.sample(&img).unwrap();
        assert_eq!(samples.len(), 100);
    }

    #[test]
    fn test_grid_samples_carry_image_values() {
        let img = image(vec![7, 5]);
        let mut sampler = GridSampler::with_spacing(vec![2, 2]);
        let samples = sampler.sample(&img).unwrap();
        assert_eq!(samples.len(), 4 * 3);
        for sample in &samples {
            assert!((sample.value - sample.point.sum()).abs() < 1e-12);
        }
        assert!(!sampler.is_stochastic());
    }

    #[test]
    fn test_explicit_spacing_dimension_mismatch() {
        let img = image(vec![7, 5]);
        let sampler = GridSampler::with_spacing(vec![2]);
        assert!(sampler.grid_spacing(&img).is_err());
    }

    #[test]
    fn test_random_sampler_is_reproducible() {
        let img = image(vec![20, 20]);
        let mut a = RandomSampler::new(50, 3);
        let mut b = RandomSampler::new(50, 3);
        let first = a.sample(&img).unwrap();
        assert_eq!(first, b.sample(&img).unwrap());
        assert_eq!(first.len(), 50);
        assert_ne!(first, a.sample(&img).unwrap());
        assert!(a.is_stochastic());
    }

    #[test]
    fn test_random_sampler_zero_samples() {
        let img = image(vec![4, 4]);
        assert!(RandomSampler::new(0, 1).sample(&img).is_err());
    }
}
