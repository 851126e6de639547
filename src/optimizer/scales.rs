//! Parameter scaling.
//!
//! The `Scales` option holds squared scales. The optimizer iterates on
//! `mu_s = mu .* sqrt(scales)`; gradients and Jacobian columns are divided by the
//! same factors.

use crate::config::ConfigError;
use nalgebra::DVector;

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterScales {
    factors: DVector<f64>,
    identity: bool,
}

impl ParameterScales {
    /// Unit scales for `number_of_parameters` parameters.
    pub fn identity(number_of_parameters: usize) -> Self {
        Self {
            factors: DVector::from_element(number_of_parameters, 1.0),
            identity: true,
        }
    }

    /// Resolve the configured squared scales: empty means unit scales, one value
    /// applies to every parameter, otherwise one value per parameter is required.
    pub fn from_config(squared_scales: &[f64], number_of_parameters: usize) -> Result<Self, ConfigError> {
        let factors = match squared_scales.len() {
            0 => return Ok(Self::identity(number_of_parameters)),
            1 => DVector::from_element(number_of_parameters, squared_scales[0]),
            n if n == number_of_parameters => DVector::from_column_slice(squared_scales),
            given => {
                return Err(ConfigError::ScalesLength {
                    given,
                    parameters: number_of_parameters,
                });
            }
        };
        if factors.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(ConfigError::InvalidSetting(
                "Scales must be positive and finite".to_string(),
            ));
        }
        let factors = factors.map(f64::sqrt);
        let identity = factors.iter().all(|&f| f == 1.0);
        Ok(Self { factors, identity })
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Scale factor `sqrt(scale)` of parameter `index`.
    pub fn factor(&self, index: usize) -> f64 {
        self.factors[index]
    }

    pub fn factors(&self) -> &DVector<f64> {
        &self.factors
    }

    pub fn to_scaled(&self, parameters: &DVector<f64>) -> DVector<f64> {
        parameters.component_mul(&self.factors)
    }

    pub fn from_scaled(&self, scaled: &DVector<f64>) -> DVector<f64> {
        scaled.component_div(&self.factors)
    }

    /// Gradient with respect to the scaled parameters.
    pub fn scale_gradient(&self, gradient: &DVector<f64>) -> DVector<f64> {
        gradient.component_div(&self.factors)
    }
}
