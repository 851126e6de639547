//! Automatic estimation of the step-size settings.
//!
//! One pass per resolution level:
//! 1. Jacobian statistics over a grid of `M` fixed-image samples
//! 2. perturbation sigma `delta / sqrt(maxJJ)`
//! 3. `N` exact/approximate gradient measurements
//! 4. settings from [`ParameterEstimator`]

pub mod gradient_sampler;
pub mod jacobian_terms;
pub mod parameter_estimator;

pub use gradient_sampler::{GradientMeasurement, GradientSampler, MAXIMUM_CONDITION};
pub use jacobian_terms::{
    JacobianStatisticsEstimator, JacobianTerms, JacobianTermsEstimate, JacobianTermsMethod,
    REDUCTION_PARTITIONS,
};
pub use parameter_estimator::{EstimatedSettings, EstimationInputs, ParameterEstimator};

use crate::config::ResolutionOptions;
use crate::core::image::Image;
use crate::core::metric::CostFunction;
use crate::core::sampler::{GridSampler, ImageSampler};
use crate::error::AsgdResult;
use crate::optimizer::scales::ParameterScales;
use crate::optimizer::settings::SettingsRecord;
use crate::transform::Transform;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

/// Covariance matrix of one estimation pass, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceSnapshot {
    pub level: usize,
    pub sigma1: f64,
    pub sigma3: f64,
    pub matrix: DMatrix<f64>,
}

/// Borrowed state needed by one estimation pass.
pub struct EstimationContext<'a> {
    pub cost: &'a dyn CostFunction,
    pub transform: &'a dyn Transform,
    pub fixed: &'a Image,
    pub sampler: &'a mut dyn ImageSampler,
    pub scales: &'a ParameterScales,
    /// Starting position, unscaled.
    pub position: &'a DVector<f64>,
    pub maximum_step_length: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct EstimationOutcome {
    pub settings: SettingsRecord,
    pub terms: JacobianTerms,
    pub measurement: GradientMeasurement,
    pub snapshot: Option<CovarianceSnapshot>,
}

/// Run a full estimation pass. Degenerate statistics surface as
/// [`crate::error::AsgdError::DegenerateStatistics`]; the caller decides on a fallback.
pub fn estimate_settings(
    context: EstimationContext<'_>,
    options: &ResolutionOptions,
) -> AsgdResult<EstimationOutcome> {
    let parameters = context.transform.number_of_parameters();
    let keep_covariance = options.save_covariance_matrix || options.use_maximum_likelihood_method;

    let jacobian_samples = GridSampler::with_target_count(options.jacobian_measurements(parameters))
        .sample(context.fixed)?;
    let estimator = JacobianStatisticsEstimator::new(context.transform, context.scales);
    let JacobianTermsEstimate { terms, covariance } =
        estimator.estimate(&jacobian_samples, keep_covariance);
    debug!("Jacobian terms ({} samples): {}", jacobian_samples.len(), terms);

    let sigma = ParameterEstimator::perturbation_sigma(context.maximum_step_length, terms.max_jj);
    let mut gradients = GradientSampler::new(
        context.cost,
        context.fixed,
        context.scales,
        options.number_of_samples_for_exact_gradient,
        context.seed,
    );
    let ml_covariance = if options.use_maximum_likelihood_method {
        covariance.as_ref()
    } else {
        None
    };
    let measurement = gradients.sample(
        context.position,
        sigma,
        options.gradient_measurements(parameters),
        context.sampler,
        ml_covariance,
    )?;
    debug!(
        "Gradient measurements: gg = {:.6e}, ee = {:.6e}, maximum likelihood: {}",
        measurement.gg, measurement.ee, measurement.used_maximum_likelihood
    );

    let estimated = ParameterEstimator::estimate(&EstimationInputs::new(
        measurement,
        terms,
        parameters,
        context.maximum_step_length,
        options.sp_big_a,
    ))?;
    info!(
        "Estimated settings for resolution {}: {}",
        options.level, estimated.settings
    );

    let snapshot = match covariance {
        Some(matrix) if options.save_covariance_matrix => Some(CovarianceSnapshot {
            level: options.level,
            sigma1: estimated.sigma1,
            sigma3: estimated.sigma3,
            matrix,
        }),
        _ => None,
    };

    Ok(EstimationOutcome {
        settings: estimated.settings,
        terms,
        measurement,
        snapshot,
    })
}
