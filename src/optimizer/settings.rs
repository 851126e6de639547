//! Gain and sigmoid constants of one resolution.

use crate::config::{ConfigError, ResolutionOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step-size settings used for a whole resolution level.
///
/// Either estimated automatically or taken from the configuration; one record per
/// resolution is appended to the settings vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    /// Gain numerator `a`.
    pub a: f64,
    /// Gain offset `A`.
    pub big_a: f64,
    /// Gain decay exponent.
    pub alpha: f64,
    /// Sigmoid upper bound.
    pub fmax: f64,
    /// Sigmoid lower bound.
    pub fmin: f64,
    /// Sigmoid scale.
    pub omega: f64,
}

impl SettingsRecord {
    /// User or default constants for a resolution.
    pub fn from_options(options: &ResolutionOptions) -> Self {
        Self {
            a: options.sp_a,
            big_a: options.sp_big_a,
            alpha: options.sp_alpha,
            fmax: options.sigmoid_max,
            fmin: options.sigmoid_min,
            omega: options.sigmoid_scale,
        }
    }

    /// Check `fmax > 0 > fmin`, `omega > 0`, `A >= 0`, `alpha > 0`, `a >= 0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [self.a, self.big_a, self.alpha, self.fmax, self.fmin, self.omega];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidSetting(format!(
                "non-finite step-size setting: {self}"
            )));
        }
        if !(self.fmax > 0.0 && self.fmin < 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "SigmoidMax ({}) must be positive and SigmoidMin ({}) negative",
                self.fmax, self.fmin
            )));
        }
        if self.omega <= 0.0 {
            return Err(ConfigError::InvalidSetting(format!(
                "SigmoidScale must be positive, got {}",
                self.omega
            )));
        }
        if self.big_a < 0.0 || self.alpha <= 0.0 || self.a < 0.0 {
            return Err(ConfigError::InvalidSetting(format!(
                "gain constants need a >= 0, A >= 0, alpha > 0; got a = {}, A = {}, alpha = {}",
                self.a, self.big_a, self.alpha
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SettingsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a = {:.6e}, A = {}, alpha = {}, fmax = {}, fmin = {:.6}, omega = {:.6e}",
            self.a, self.big_a, self.alpha, self.fmax, self.fmin, self.omega
        )
    }
}
