//! Optimizer configuration.
//!
//! Every option can be given once for all resolutions or once per resolution, in
//! the same way as elastix parameter files. [`AsgdConfig::options_for`] resolves the
//! values for a single resolution level.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub mod parameter_file;

pub use parameter_file::{FromParameter, ParameterMap};

/// Errors raised while reading or validating the configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Duplicate parameter '{name}' at line {line}")]
    DuplicateParameter { name: String, line: usize },

    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidValue { name: String, value: String },

    #[error("Failed to read parameter file '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error(
        "The Scales option has {given} entries; expected 1 or the number of parameters ({parameters})"
    )]
    ScalesLength { given: usize, parameters: usize },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// A value given either for all resolutions or per resolution. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<T>", bound(deserialize = "T: Clone + Deserialize<'de>"))]
pub struct PerResolution<T>(Vec<T>);

impl<T: Clone> TryFrom<Vec<T>> for PerResolution<T> {
    type Error = ConfigError;

    fn try_from(values: Vec<T>) -> Result<Self, Self::Error> {
        Self::per_level(values)
    }
}

impl<T: Clone> PerResolution<T> {
    /// The same value for every resolution.
    pub fn all(value: T) -> Self {
        Self(vec![value])
    }

    /// One value per resolution; must not be empty.
    pub fn per_level(values: Vec<T>) -> Result<Self, ConfigError> {
        if values.is_empty() {
            return Err(ConfigError::InvalidSetting(
                "a per-resolution option needs at least one value".to_string(),
            ));
        }
        Ok(Self(values))
    }

    /// Value for `level`; falls back to the first entry when fewer values were given.
    pub fn get(&self, level: usize) -> T {
        self.0.get(level).unwrap_or(&self.0[0]).clone()
    }

    pub fn values(&self) -> &[T] {
        &self.0
    }
}

/// Options of the adaptive stochastic gradient descent optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsgdConfig {
    pub maximum_number_of_iterations: PerResolution<usize>,
    pub automatic_parameter_estimation: PerResolution<bool>,
    pub use_adaptive_step_sizes: PerResolution<bool>,
    /// Maximum voxel displacement between iterations; defaults to the mean voxel spacing.
    pub maximum_step_length: Option<PerResolution<f64>>,
    pub sp_a: PerResolution<f64>,
    pub sp_big_a: PerResolution<f64>,
    pub sp_alpha: PerResolution<f64>,
    pub sigmoid_max: PerResolution<f64>,
    pub sigmoid_min: PerResolution<f64>,
    pub sigmoid_scale: PerResolution<f64>,
    pub sigmoid_initial_time: PerResolution<f64>,
    pub use_maximum_likelihood_method: PerResolution<bool>,
    pub save_covariance_matrix: PerResolution<bool>,
    /// 0 selects `max(2, min(5, 500 / P))`.
    pub number_of_gradient_measurements: PerResolution<usize>,
    /// 0 selects `max(1000, 3 P)`.
    pub number_of_jacobian_measurements: PerResolution<usize>,
    pub number_of_samples_for_exact_gradient: PerResolution<usize>,
    /// Squared parameter scales: empty, one value, or one per parameter.
    pub scales: Vec<f64>,
    pub random_seed: u64,
}

impl Default for AsgdConfig {
    fn default() -> Self {
        Self {
            maximum_number_of_iterations: PerResolution::all(500),
            automatic_parameter_estimation: PerResolution::all(true),
            use_adaptive_step_sizes: PerResolution::all(true),
            maximum_step_length: None,
            sp_a: PerResolution::all(400.0),
            sp_big_a: PerResolution::all(20.0),
            sp_alpha: PerResolution::all(1.0),
            sigmoid_max: PerResolution::all(1.0),
            sigmoid_min: PerResolution::all(-0.8),
            sigmoid_scale: PerResolution::all(1e-8),
            sigmoid_initial_time: PerResolution::all(0.0),
            use_maximum_likelihood_method: PerResolution::all(false),
            save_covariance_matrix: PerResolution::all(false),
            number_of_gradient_measurements: PerResolution::all(0),
            number_of_jacobian_measurements: PerResolution::all(0),
            number_of_samples_for_exact_gradient: PerResolution::all(100_000),
            scales: Vec::new(),
            random_seed: 121_212,
        }
    }
}

/// Options resolved for a single resolution level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOptions {
    pub level: usize,
    pub maximum_number_of_iterations: usize,
    pub automatic_parameter_estimation: bool,
    pub use_adaptive_step_sizes: bool,
    pub maximum_step_length: Option<f64>,
    pub sp_a: f64,
    pub sp_big_a: f64,
    pub sp_alpha: f64,
    pub sigmoid_max: f64,
    pub sigmoid_min: f64,
    pub sigmoid_scale: f64,
    pub sigmoid_initial_time: f64,
    pub use_maximum_likelihood_method: bool,
    pub save_covariance_matrix: bool,
    pub number_of_gradient_measurements: usize,
    pub number_of_jacobian_measurements: usize,
    pub number_of_samples_for_exact_gradient: usize,
}

impl ResolutionOptions {
    /// `N`, resolving 0 to `max(2, min(5, 500 / P))`.
    pub fn gradient_measurements(&self, number_of_parameters: usize) -> usize {
        if self.number_of_gradient_measurements > 0 {
            self.number_of_gradient_measurements
        } else {
            (500 / number_of_parameters.max(1)).clamp(2, 5)
        }
    }

    /// `M`, resolving 0 to `max(1000, 3 P)`.
    pub fn jacobian_measurements(&self, number_of_parameters: usize) -> usize {
        if self.number_of_jacobian_measurements > 0 {
            self.number_of_jacobian_measurements
        } else {
            (3 * number_of_parameters).max(1000)
        }
    }
}

impl AsgdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every option for `level`.
    pub fn options_for(&self, level: usize) -> ResolutionOptions {
        ResolutionOptions {
            level,
            maximum_number_of_iterations: self.maximum_number_of_iterations.get(level),
            automatic_parameter_estimation: self.automatic_parameter_estimation.get(level),
            use_adaptive_step_sizes: self.use_adaptive_step_sizes.get(level),
            maximum_step_length: self.maximum_step_length.as_ref().map(|v| v.get(level)),
            sp_a: self.sp_a.get(level),
            sp_big_a: self.sp_big_a.get(level),
            sp_alpha: self.sp_alpha.get(level),
            sigmoid_max: self.sigmoid_max.get(level),
            sigmoid_min: self.sigmoid_min.get(level),
            sigmoid_scale: self.sigmoid_scale.get(level),
            sigmoid_initial_time: self.sigmoid_initial_time.get(level),
            use_maximum_likelihood_method: self.use_maximum_likelihood_method.get(level),
            save_covariance_matrix: self.save_covariance_matrix.get(level),
            number_of_gradient_measurements: self.number_of_gradient_measurements.get(level),
            number_of_jacobian_measurements: self.number_of_jacobian_measurements.get(level),
            number_of_samples_for_exact_gradient: self
                .number_of_samples_for_exact_gradient
                .get(level),
        }
    }

    /// Build a configuration from a parsed parameter file, keeping defaults for
    /// absent options.
    pub fn from_parameter_map(map: &ParameterMap) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        read_option(map, "MaximumNumberOfIterations", &mut config.maximum_number_of_iterations)?;
        read_option(
            map,
            "AutomaticParameterEstimation",
            &mut config.automatic_parameter_estimation,
        )?;
        read_option(map, "UseAdaptiveStepSizes", &mut config.use_adaptive_step_sizes)?;
        if let Some(values) = map.get_all::<f64>("MaximumStepLength")? {
            config.maximum_step_length = Some(PerResolution::per_level(values)?);
        }
        read_option(map, "SP_a", &mut config.sp_a)?;
        read_option(map, "SP_A", &mut config.sp_big_a)?;
        read_option(map, "SP_alpha", &mut config.sp_alpha)?;
        read_option(map, "SigmoidMax", &mut config.sigmoid_max)?;
        read_option(map, "SigmoidMin", &mut config.sigmoid_min)?;
        read_option(map, "SigmoidScale", &mut config.sigmoid_scale)?;
        read_option(map, "SigmoidInitialTime", &mut config.sigmoid_initial_time)?;
        read_option(
            map,
            "UseMaximumLikelihoodMethod",
            &mut config.use_maximum_likelihood_method,
        )?;
        read_option(map, "SaveCovarianceMatrix", &mut config.save_covariance_matrix)?;
        read_option(
            map,
            "NumberOfGradientMeasurements",
            &mut config.number_of_gradient_measurements,
        )?;
        read_option(
            map,
            "NumberOfJacobianMeasurements",
            &mut config.number_of_jacobian_measurements,
        )?;
        read_option(
            map,
            "NumberOfSamplesForExactGradient",
            &mut config.number_of_samples_for_exact_gradient,
        )?;
        if let Some(scales) = map.get_all::<f64>("Scales")? {
            config.scales = scales;
        }
        if let Some(seed) = map.get::<u64>("RandomSeed", 0)? {
            config.random_seed = seed;
        }

        Ok(config)
    }

    /// Read a parameter file from disk.
    pub fn from_parameter_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_parameter_map(&ParameterMap::from_file(path)?)
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.maximum_number_of_iterations = PerResolution::all(iterations);
        self
    }

    pub fn with_automatic_parameter_estimation(mut self, enabled: bool) -> Self {
        self.automatic_parameter_estimation = PerResolution::all(enabled);
        self
    }

    pub fn with_adaptive_step_sizes(mut self, enabled: bool) -> Self {
        self.use_adaptive_step_sizes = PerResolution::all(enabled);
        self
    }

    pub fn with_maximum_step_length(mut self, length: f64) -> Self {
        self.maximum_step_length = Some(PerResolution::all(length));
        self
    }

    /// Set the gain constants `a`, `A` and `alpha`.
    pub fn with_gain(mut self, a: f64, big_a: f64, alpha: f64) -> Self {
        self.sp_a = PerResolution::all(a);
        self.sp_big_a = PerResolution::all(big_a);
        self.sp_alpha = PerResolution::all(alpha);
        self
    }

    /// Set `SigmoidMax`, `SigmoidMin` and `SigmoidScale`.
    pub fn with_sigmoid(mut self, max: f64, min: f64, scale: f64) -> Self {
        self.sigmoid_max = PerResolution::all(max);
        self.sigmoid_min = PerResolution::all(min);
        self.sigmoid_scale = PerResolution::all(scale);
        self
    }

    pub fn with_sigmoid_initial_time(mut self, time: f64) -> Self {
        self.sigmoid_initial_time = PerResolution::all(time);
        self
    }

    pub fn with_maximum_likelihood(mut self, enabled: bool) -> Self {
        self.use_maximum_likelihood_method = PerResolution::all(enabled);
        self
    }

    pub fn with_save_covariance_matrix(mut self, enabled: bool) -> Self {
        self.save_covariance_matrix = PerResolution::all(enabled);
        self
    }

    pub fn with_gradient_measurements(mut self, count: usize) -> Self {
        self.number_of_gradient_measurements = PerResolution::all(count);
        self
    }

    pub fn with_jacobian_measurements(mut self, count: usize) -> Self {
        self.number_of_jacobian_measurements = PerResolution::all(count);
        self
    }

    pub fn with_samples_for_exact_gradient(mut self, count: usize) -> Self {
        self.number_of_samples_for_exact_gradient = PerResolution::all(count);
        self
    }

    pub fn with_scales(mut self, scales: Vec<f64>) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

fn read_option<T>(
    map: &ParameterMap,
    name: &str,
    target: &mut PerResolution<T>,
) -> Result<(), ConfigError>
where
    T: FromParameter + Clone,
{
    if let Some(values) = map.get_all::<T>(name)? {
        *target = PerResolution::per_level(values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AsgdConfig::default().options_for(0);
        assert_eq!(options.maximum_number_of_iterations, 500);
        assert!(options.automatic_parameter_estimation);
        assert_eq!(options.sp_big_a, 20.0);
        assert_eq!(options.sigmoid_min, -0.8);
        assert_eq!(options.number_of_samples_for_exact_gradient, 100_000);
        assert!(options.maximum_step_length.is_none());
    }

    #[test]
    fn test_per_resolution_fallback() {
        let values = PerResolution::per_level(vec![100, 200]).unwrap();
        assert_eq!(values.get(0), 100);
        assert_eq!(values.get(1), 200);
        assert_eq!(values.get(5), 100);
        assert!(PerResolution::<usize>::per_level(vec![]).is_err());
    }

    #[test]
    fn test_deserialize_rejects_empty_per_resolution() {
        use serde::de::value::{Error as ValueError, SeqDeserializer};

        let empty = SeqDeserializer::<_, ValueError>::new(Vec::<usize>::new().into_iter());
        assert!(PerResolution::<usize>::deserialize(empty).is_err());

        let values = SeqDeserializer::<_, ValueError>::new(vec![3usize, 4].into_iter());
        let values = PerResolution::<usize>::deserialize(values).unwrap();
        assert_eq!(values.get(1), 4);
        assert_eq!(values.get(7), 3);
    }

    #[test]
    fn test_default_measurement_counts() {
        let options = AsgdConfig::default().options_for(0);
        assert_eq!(options.gradient_measurements(6), 5);
        assert_eq!(options.gradient_measurements(200), 2);
        assert_eq!(options.gradient_measurements(10_000), 2);
        assert_eq!(options.jacobian_measurements(6), 1000);
        assert_eq!(options.jacobian_measurements(2000), 6000);
    }

    #[test]
    fn test_from_parameter_map() {
        let text = r#"
(MaximumNumberOfIterations 100 200)
(AutomaticParameterEstimation "false")
(SP_a 3200.0 1600.0)
(SigmoidMin -0.5)
(MaximumStepLength 2.0)
(Scales 1000.0)
(RandomSeed 7)
"#;
        let config = AsgdConfig::from_parameter_map(&ParameterMap::parse(text).unwrap()).unwrap();
        let level1 = config.options_for(1);
        assert_eq!(level1.maximum_number_of_iterations, 200);
        assert!(!level1.automatic_parameter_estimation);
        assert_eq!(level1.sp_a, 1600.0);
        assert_eq!(level1.sigmoid_min, -0.5);
        assert_eq!(level1.maximum_step_length, Some(2.0));
        assert_eq!(config.scales, vec![1000.0]);
        assert_eq!(config.random_seed, 7);
    }

    #[test]
    fn test_from_parameter_map_rejects_bad_bool() {
        let map = ParameterMap::parse("(UseAdaptiveStepSizes \"yes\")").unwrap();
        assert!(matches!(
            AsgdConfig::from_parameter_map(&map),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
