//! Monte-Carlo measurement of gradient magnitude and gradient noise.
//!
//! Around the starting position the cost gradient is measured at `N` randomly
//! perturbed positions, once with a dense grid of samples (the "exact" gradient) and
//! once with the optimizer's own stochastic sampler (the "approximate" gradient).
//! The averaged squared norms feed the parameter estimator.

use crate::core::image::Image;
use crate::core::metric::CostFunction;
use crate::core::sampler::{GridSampler, ImageSampler};
use crate::error::{AsgdError, AsgdResult};
use crate::optimizer::scales::ParameterScales;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Largest accepted condition estimate of the covariance in maximum-likelihood mode.
pub const MAXIMUM_CONDITION: f64 = 1e12;

/// `(max |L_ii| / min |L_ii|)^2` of a Cholesky factor. Infinite for a zero pivot.
fn condition_estimate(factor: &DMatrix<f64>) -> f64 {
    let (smallest, largest) = factor
        .diagonal()
        .iter()
        .map(|l| l * l)
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if smallest <= 1e-14 * largest {
        f64::INFINITY
    } else {
        largest / smallest
    }
}

/// Averaged squared gradient norms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientMeasurement {
    /// Mean squared norm of the exact gradient.
    pub gg: f64,
    /// Mean squared norm of the approximation error.
    pub ee: f64,
    /// Whether the norms were weighted by the inverse covariance.
    pub used_maximum_likelihood: bool,
}

pub struct GradientSampler<'a> {
    cost: &'a dyn CostFunction,
    fixed: &'a Image,
    scales: &'a ParameterScales,
    number_of_exact_samples: usize,
    rng: StdRng,
}

impl<'a> GradientSampler<'a> {
    pub fn new(
        cost: &'a dyn CostFunction,
        fixed: &'a Image,
        scales: &'a ParameterScales,
        number_of_exact_samples: usize,
        seed: u64,
    ) -> Self {
        Self {
            cost,
            fixed,
            scales,
            number_of_exact_samples,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Measure `gg` and `ee` over `number_of_measurements` perturbations of
    /// `position` (unscaled) with standard deviation `sigma` in scaled space.
    ///
    /// When `covariance` is given, the norms are taken in the metric of its inverse;
    /// a covariance that cannot be factorized, or whose condition estimate exceeds
    /// [`MAXIMUM_CONDITION`], falls back to plain norms.
    pub fn sample(
        &mut self,
        position: &DVector<f64>,
        sigma: f64,
        number_of_measurements: usize,
        sampler: &mut dyn ImageSampler,
        covariance: Option<&DMatrix<f64>>,
    ) -> AsgdResult<GradientMeasurement> {
        if number_of_measurements == 0 {
            return Err(AsgdError::InvalidInput(
                "at least one gradient measurement is required".to_string(),
            ));
        }
        if !(sigma >= 0.0) || !sigma.is_finite() {
            return Err(AsgdError::InvalidInput(format!(
                "perturbation sigma must be finite and non-negative, got {sigma}"
            )));
        }

        let stochastic = sampler.is_stochastic();
        let exact_samples = if stochastic {
            GridSampler::with_target_count(self.number_of_exact_samples).sample(self.fixed)?
        } else {
            sampler.sample(self.fixed)?
        };
        debug!(
            "Sampling {} gradients with sigma {:.6e} ({} exact samples, stochastic sampler: {})",
            number_of_measurements,
            sigma,
            exact_samples.len(),
            stochastic
        );

        let cholesky = covariance.and_then(|c| {
            let Some(factor) = c.clone().cholesky() else {
                warn!("Covariance matrix is not positive definite; using plain gradient norms");
                return None;
            };
            let condition = condition_estimate(factor.l_dirty());
            if !(condition <= MAXIMUM_CONDITION) {
                warn!(
                    "Covariance matrix is ill-conditioned (condition estimate {:.3e}); using plain gradient norms",
                    condition
                );
                return None;
            }
            Some(factor)
        });
        let squared_norm = |v: &DVector<f64>| match &cholesky {
            Some(factor) => v.dot(&factor.solve(v)),
            None => v.norm_squared(),
        };

        let center = self.scales.to_scaled(position);
        let mut gg = 0.0;
        let mut ee = 0.0;
        for _ in 0..number_of_measurements {
            let perturbed = if sigma > 0.0 {
                let noise = DVector::from_fn(center.len(), |_, _| {
                    self.rng.sample::<f64, _>(StandardNormal)
                });
                &center + noise * sigma
            } else {
                center.clone()
            };
            let parameters = self.scales.from_scaled(&perturbed);

            let exact = self
                .scales
                .scale_gradient(&self.cost.gradient(&parameters, &exact_samples)?);
            gg += squared_norm(&exact);

            if stochastic {
                let samples = sampler.sample(self.fixed)?;
                let approximate = self
                    .scales
                    .scale_gradient(&self.cost.gradient(&parameters, &samples)?);
                ee += squared_norm(&(&exact - &approximate));
            }
        }

        let n = number_of_measurements as f64;
        Ok(GradientMeasurement {
            gg: gg / n,
            ee: ee / n,
            used_maximum_likelihood: cholesky.is_some(),
        })
    }
}
