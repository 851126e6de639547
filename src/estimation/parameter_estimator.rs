//! Step-size settings from gradient and Jacobian statistics.

use super::gradient_sampler::GradientMeasurement;
use super::jacobian_terms::JacobianTerms;
use crate::error::{AsgdError, AsgdResult};
use crate::optimizer::settings::SettingsRecord;

const EPSILON: f64 = 1e-14;

/// Everything the estimator needs, gathered from one estimation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationInputs {
    pub gg: f64,
    pub ee: f64,
    pub used_maximum_likelihood: bool,
    pub number_of_parameters: usize,
    pub terms: JacobianTerms,
    /// Maximum voxel displacement `delta` allowed in one step.
    pub maximum_step_length: f64,
    /// Gain offset `A`, kept from the configuration.
    pub big_a: f64,
}

impl EstimationInputs {
    pub fn new(
        measurement: GradientMeasurement,
        terms: JacobianTerms,
        number_of_parameters: usize,
        maximum_step_length: f64,
        big_a: f64,
    ) -> Self {
        Self {
            gg: measurement.gg,
            ee: measurement.ee,
            used_maximum_likelihood: measurement.used_maximum_likelihood,
            number_of_parameters,
            terms,
            maximum_step_length,
            big_a,
        }
    }
}

/// Estimated settings with the gradient and noise magnitudes behind them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatedSettings {
    pub settings: SettingsRecord,
    pub sigma1: f64,
    pub sigma3: f64,
}

pub struct ParameterEstimator;

impl ParameterEstimator {
    /// Standard deviation of the parameter perturbation, `delta / sqrt(maxJJ)`.
    /// Zero when the Jacobian vanishes everywhere.
    pub fn perturbation_sigma(maximum_step_length: f64, max_jj: f64) -> f64 {
        if max_jj > EPSILON {
            maximum_step_length / max_jj.sqrt()
        } else {
            0.0
        }
    }

    /// Derive `a`, `alpha`, `fmax`, `fmin` and `omega`; `A` is passed through.
    ///
    /// ```text
    /// sigma1 = sqrt(gg / TrC)          (maximum likelihood: sqrt(gg / P))
    /// sigma3 = sqrt(ee / TrC)          (maximum likelihood: sqrt(ee / P))
    /// a      = A delta / (sigma1 sqrt(maxJCJ)) * noise
    /// noise  = sigma1^2 / (sigma1^2 + sigma3^2)
    /// fmin   = -0.99 + 0.98 noise
    /// omega  = 0.1 sigma3^2 sqrt(TrCC)
    /// ```
    pub fn estimate(inputs: &EstimationInputs) -> AsgdResult<EstimatedSettings> {
        let terms = &inputs.terms;
        let aggregates = [
            inputs.gg,
            inputs.ee,
            terms.tr_c,
            terms.tr_cc,
            terms.max_jj,
            terms.max_jcj,
            inputs.maximum_step_length,
            inputs.big_a,
        ];
        if aggregates.iter().any(|v| !v.is_finite()) {
            return Err(AsgdError::DegenerateStatistics(format!(
                "non-finite input: gg = {}, ee = {}, {}, delta = {}, A = {}",
                inputs.gg, inputs.ee, terms, inputs.maximum_step_length, inputs.big_a
            )));
        }
        if terms.tr_c <= 0.0 {
            return Err(AsgdError::DegenerateStatistics(format!(
                "TrC must be positive, got {}",
                terms.tr_c
            )));
        }
        if inputs.maximum_step_length <= 0.0 {
            return Err(AsgdError::DegenerateStatistics(format!(
                "maximum step length must be positive, got {}",
                inputs.maximum_step_length
            )));
        }

        let denominator = if inputs.used_maximum_likelihood {
            inputs.number_of_parameters.max(1) as f64
        } else {
            terms.tr_c
        };
        let sigma1 = if inputs.gg > EPSILON {
            (inputs.gg / denominator).sqrt()
        } else {
            0.0
        };
        let sigma3 = if inputs.ee > EPSILON {
            (inputs.ee / denominator).sqrt()
        } else {
            0.0
        };

        let a_max = if sigma1 > EPSILON && terms.max_jcj > EPSILON {
            inputs.big_a * inputs.maximum_step_length / sigma1 / terms.max_jcj.sqrt()
        } else {
            0.0
        };
        let noise = sigma1 * sigma1 / (sigma1 * sigma1 + sigma3 * sigma3 + EPSILON);

        let settings = SettingsRecord {
            a: a_max * noise,
            big_a: inputs.big_a,
            alpha: 1.0,
            fmax: 1.0,
            fmin: -0.99 + 0.98 * noise,
            omega: (0.1 * sigma3 * sigma3 * terms.tr_cc.sqrt()).max(EPSILON),
        };
        Ok(EstimatedSettings {
            settings,
            sigma1,
            sigma3,
        })
    }
}
