//! Per-resolution driver for adaptive stochastic gradient descent.
//!
//! For every resolution level the driver
//! 1. resolves the options of that level and the parameter scales,
//! 2. estimates the step-size settings (or takes the configured ones),
//! 3. appends them to the settings vector,
//! 4. iterates `mu -= a(t) g` on fresh stochastic samples until a stop condition.
//!
//! ```no_run
//! use adaptive_sgd::core::{GridSampler, Image, MeanSquaresMetric, RandomSampler};
//! use adaptive_sgd::optimizer::{AdaptiveStochasticGradientDescent, ResolutionProblem};
//! use adaptive_sgd::transform::{Transform, TranslationTransform};
//! use adaptive_sgd::AsgdConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fixed = Image::from_fn(vec![64, 64], vec![1.0, 1.0], vec![0.0, 0.0], |p| p[0].sin())?;
//! let moving = fixed.clone();
//! let transform = TranslationTransform::identity(2);
//! let metric = MeanSquaresMetric::new(moving, transform.clone())?;
//! let mut sampler = RandomSampler::new(2000, 1);
//!
//! let mut optimizer = AdaptiveStochasticGradientDescent::new(AsgdConfig::default());
//! let problem = ResolutionProblem::new(&metric, &transform, &fixed, &mut sampler);
//! let result = optimizer.optimize_resolution(0, problem, &transform.parameters())?;
//! println!("{}: {}", result.status, result.parameters);
//! # Ok(())
//! # }
//! ```

use super::scales::ParameterScales;
use super::settings::SettingsRecord;
use super::step_controller::{ControllerState, StepController};
use super::{ConvergenceInfo, OptimizationStatus, SolverResult};
use crate::config::AsgdConfig;
use crate::core::image::Image;
use crate::core::metric::CostFunction;
use crate::core::sampler::ImageSampler;
use crate::error::{AsgdError, AsgdResult};
use crate::estimation::{CovarianceSnapshot, EstimationContext, estimate_settings};
use crate::io::format_settings_vector;
use crate::observers::{IterationProgress, OptObserver, OptObserverVec};
use crate::transform::Transform;
use nalgebra::DVector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared flag that ends the current resolution with status `Converged`.
///
/// The flag is cleared once the driver has acted on it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Everything one resolution level optimizes over.
pub struct ResolutionProblem<'a> {
    pub cost: &'a dyn CostFunction,
    /// Transform whose Jacobian drives the estimation.
    pub transform: &'a dyn Transform,
    pub fixed: &'a Image,
    /// Sampler drawing the samples of every iteration.
    pub sampler: &'a mut dyn ImageSampler,
    /// Mean voxel spacing of the moving image, for the default maximum step length.
    pub moving_spacing: Option<f64>,
}

impl<'a> ResolutionProblem<'a> {
    pub fn new(
        cost: &'a dyn CostFunction,
        transform: &'a dyn Transform,
        fixed: &'a Image,
        sampler: &'a mut dyn ImageSampler,
    ) -> Self {
        Self {
            cost,
            transform,
            fixed,
            sampler,
            moving_spacing: None,
        }
    }

    pub fn with_moving_spacing(mut self, spacing: f64) -> Self {
        self.moving_spacing = Some(spacing);
        self
    }

    /// Default `MaximumStepLength`: mean voxel spacing of the fixed and moving images.
    fn default_step_length(&self) -> f64 {
        let fixed = self.fixed.mean_spacing();
        match self.moving_spacing {
            Some(moving) => 0.5 * (fixed + moving),
            None => fixed,
        }
    }
}

pub struct AdaptiveStochasticGradientDescent {
    config: AsgdConfig,
    settings_vector: Vec<SettingsRecord>,
    covariance_snapshot: Option<CovarianceSnapshot>,
    observers: OptObserverVec,
    stop_signal: StopSignal,
}

impl AdaptiveStochasticGradientDescent {
    pub fn new(config: AsgdConfig) -> Self {
        Self {
            config,
            settings_vector: Vec::new(),
            covariance_snapshot: None,
            observers: OptObserverVec::new(),
            stop_signal: StopSignal::new(),
        }
    }

    pub fn config(&self) -> &AsgdConfig {
        &self.config
    }

    /// Settings used so far, one record per finished or running resolution.
    pub fn settings_vector(&self) -> &[SettingsRecord] {
        &self.settings_vector
    }

    /// Covariance of the most recent estimation with `SaveCovarianceMatrix` set.
    pub fn covariance_snapshot(&self) -> Option<&CovarianceSnapshot> {
        self.covariance_snapshot.as_ref()
    }

    /// Handle for requesting a stop from an observer or another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    pub fn add_observer(&mut self, observer: impl OptObserver + 'static) {
        self.observers.add(observer);
    }

    /// Forget the settings vector and covariance snapshot of earlier runs.
    pub fn reset(&mut self) {
        self.settings_vector.clear();
        self.covariance_snapshot = None;
    }

    /// Drop the settings record of a resolution that failed mid-run, so the level
    /// can be retried, and log the error.
    fn abandon_resolution(&mut self, error: AsgdError) -> AsgdError {
        self.settings_vector.pop();
        error.log()
    }

    /// Optimize all levels in order, each starting where the previous one ended.
    pub fn optimize(
        &mut self,
        problems: Vec<ResolutionProblem<'_>>,
        initial: &DVector<f64>,
    ) -> AsgdResult<Vec<SolverResult>> {
        self.reset();
        let mut position = initial.clone();
        let mut results = Vec::with_capacity(problems.len());
        for (level, problem) in problems.into_iter().enumerate() {
            let result = self.optimize_resolution(level, problem, &position)?;
            position = result.parameters.clone();
            results.push(result);
        }
        Ok(results)
    }

    /// Optimize a single resolution level. Levels must be run in order: level `k`
    /// requires exactly `k` records in the settings vector.
    pub fn optimize_resolution(
        &mut self,
        level: usize,
        problem: ResolutionProblem<'_>,
        initial: &DVector<f64>,
    ) -> AsgdResult<SolverResult> {
        let start_time = Instant::now();
        if self.settings_vector.len() != level {
            return Err(AsgdError::InvalidInput(format!(
                "resolution {} requested after {} finished resolutions",
                level,
                self.settings_vector.len()
            ))
            .log());
        }

        let options = self.config.options_for(level);
        let parameters = problem.cost.number_of_parameters();
        if problem.transform.number_of_parameters() != parameters || initial.len() != parameters {
            return Err(AsgdError::InvalidInput(format!(
                "parameter count mismatch: cost {}, transform {}, initial position {}",
                parameters,
                problem.transform.number_of_parameters(),
                initial.len()
            ))
            .log());
        }
        let scales = ParameterScales::from_config(&self.config.scales, parameters)
            .map_err(|e| AsgdError::from(e).log())?;
        let maximum_step_length = options
            .maximum_step_length
            .unwrap_or_else(|| problem.default_step_length());

        info!(
            "Resolution {}: {} parameters, {} iterations, maximum step length {}",
            level, parameters, options.maximum_number_of_iterations, maximum_step_length
        );

        let ResolutionProblem {
            cost,
            transform,
            fixed,
            sampler,
            ..
        } = problem;

        let settings = if options.automatic_parameter_estimation {
            let context = EstimationContext {
                cost,
                transform,
                fixed,
                sampler: &mut *sampler,
                scales: &scales,
                position: initial,
                maximum_step_length,
                seed: self.config.random_seed.wrapping_add(level as u64),
            };
            match estimate_settings(context, &options) {
                Ok(outcome) => {
                    if outcome.snapshot.is_some() {
                        self.covariance_snapshot = outcome.snapshot;
                    }
                    outcome.settings
                }
                Err(AsgdError::DegenerateStatistics(reason)) => {
                    warn!(
                        "Automatic parameter estimation failed ({}); using configured settings",
                        reason
                    );
                    SettingsRecord::from_options(&options)
                }
                Err(e) => return Err(e.log()),
            }
        } else {
            SettingsRecord::from_options(&options)
        };
        settings
            .validate()
            .map_err(|e| AsgdError::from(e).log())?;
        self.settings_vector.push(settings);

        let mut controller = StepController::new(
            settings,
            options.maximum_number_of_iterations,
            options.use_adaptive_step_sizes,
            options.sigmoid_initial_time,
        );
        controller.start().map_err(|e| self.abandon_resolution(e))?;

        let mut position = scales.to_scaled(initial);
        let mut init_cost = f64::NAN;
        let mut final_cost = f64::NAN;
        let mut final_gradient_norm = 0.0;
        let mut final_gain = 0.0;
        let mut cost_evaluations = 0;

        while controller.state() == ControllerState::Running {
            if self.stop_signal.take() {
                info!("Stop requested at iteration {}", controller.iteration());
                controller.request_stop();
                break;
            }

            let samples = sampler
                .sample(fixed)
                .map_err(|e| self.abandon_resolution(e))?;
            let (value, raw_gradient) = cost
                .value_and_gradient(&scales.from_scaled(&position), &samples)
                .map_err(|e| self.abandon_resolution(e))?;
            cost_evaluations += 1;
            let gradient = scales.scale_gradient(&raw_gradient);
            if cost_evaluations == 1 {
                init_cost = value;
            }
            final_cost = value;

            let report = match controller.step(&mut position, &gradient) {
                Ok(report) => report,
                Err(AsgdError::NumericalFailure(reason)) => {
                    warn!("{}", reason);
                    break;
                }
                Err(e) => return Err(self.abandon_resolution(e)),
            };
            final_gradient_norm = gradient.norm();
            final_gain = report.gain;

            let progress = IterationProgress {
                level,
                iteration: report.iteration,
                metric: value,
                gain: report.gain,
                time: report.time,
                gradient_norm: final_gradient_norm,
            };
            debug!(
                "iter {:>5}  metric {:>14.6e}  time {:>10.4}  gain {:>12.4e}  |g| {:>12.4e}",
                progress.iteration, progress.metric, progress.time, progress.gain, progress.gradient_norm
            );
            self.observers.notify(&progress);
        }

        if self.stop_signal.take() {
            debug!("Discarding a stop request that arrived after resolution {} ended", level);
        }

        let status = controller
            .status()
            .unwrap_or(OptimizationStatus::MaxIterationsReached);
        let iterations = controller.iteration();
        let final_time = controller.time();
        controller.stop();

        let parameters = scales.from_scaled(&position);
        info!(
            "Resolution {} stopped: {} after {} iterations",
            level, status, iterations
        );
        info!(
            "Settings vector:\n{}",
            format_settings_vector(&self.settings_vector)
        );
        self.observers.notify_complete(level, &parameters, iterations);

        Ok(SolverResult {
            parameters,
            status,
            init_cost,
            final_cost,
            iterations,
            elapsed_time: start_time.elapsed(),
            settings,
            convergence_info: Some(ConvergenceInfo {
                final_gradient_norm,
                final_gain,
                final_time,
                cost_evaluations,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerResolution;
    use crate::core::sampler::{GridSampler, ImageSample};
    use crate::transform::TranslationTransform;

    struct Bowl;

    impl CostFunction for Bowl {
        fn number_of_parameters(&self) -> usize {
            2
        }

        fn value_and_gradient(
            &self,
            parameters: &DVector<f64>,
            _samples: &[ImageSample],
        ) -> AsgdResult<(f64, DVector<f64>)> {
            Ok((0.5 * parameters.norm_squared(), parameters.clone()))
        }
    }

    fn image() -> Image {
        Image::from_fn(vec![8, 8], vec![1.0, 1.0], vec![0.0, 0.0], |p| p[0]).unwrap()
    }

    fn manual_config() -> AsgdConfig {
        AsgdConfig::default()
            .with_automatic_parameter_estimation(false)
            .with_gain(0.5, 0.0, 1.0)
            .with_max_iterations(10)
    }

    #[test]
    fn test_levels_must_run_in_order() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let mut optimizer = AdaptiveStochasticGradientDescent::new(manual_config());
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        assert!(optimizer
            .optimize_resolution(1, problem, &DVector::zeros(2))
            .is_err());
        assert!(optimizer.settings_vector().is_empty());
    }

    #[test]
    fn test_manual_settings_descend() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let mut optimizer = AdaptiveStochasticGradientDescent::new(manual_config());
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        let result = optimizer
            .optimize_resolution(0, problem, &DVector::from_vec(vec![4.0, -2.0]))
            .unwrap();

        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 10);
        assert!(result.parameters.norm() < 2.0);
        assert!(result.final_cost < result.init_cost);
        assert_eq!(optimizer.settings_vector().len(), 1);
        assert_eq!(optimizer.settings_vector()[0].a, 0.5);
    }

    #[test]
    fn test_invalid_manual_settings_are_fatal() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let config = manual_config().with_sigmoid(1.0, 0.5, 1e-8);
        let mut optimizer = AdaptiveStochasticGradientDescent::new(config);
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        let err = optimizer
            .optimize_resolution(0, problem, &DVector::zeros(2))
            .unwrap_err();
        assert!(matches!(err, AsgdError::Configuration(_)));
    }

    #[test]
    fn test_stop_signal_before_first_iteration() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let mut optimizer = AdaptiveStochasticGradientDescent::new(manual_config());
        optimizer.stop_signal().request_stop();

        let initial = DVector::from_vec(vec![1.0, 1.0]);
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        let result = optimizer.optimize_resolution(0, problem, &initial).unwrap();
        assert_eq!(result.status, OptimizationStatus::Converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.parameters, initial);
        assert!(!optimizer.stop_signal().is_requested());
    }

    struct FailingCost;

    impl CostFunction for FailingCost {
        fn number_of_parameters(&self) -> usize {
            2
        }

        fn value_and_gradient(
            &self,
            _parameters: &DVector<f64>,
            _samples: &[ImageSample],
        ) -> AsgdResult<(f64, DVector<f64>)> {
            Err(AsgdError::InsufficientSamples("no sample maps inside the moving image".to_string()))
        }
    }

    #[test]
    fn test_failed_resolution_leaves_no_settings_record() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let mut optimizer = AdaptiveStochasticGradientDescent::new(manual_config());
        let problem = ResolutionProblem::new(&FailingCost, &transform, &fixed, &mut sampler);
        let err = optimizer
            .optimize_resolution(0, problem, &DVector::zeros(2))
            .unwrap_err();
        assert!(matches!(err, AsgdError::InsufficientSamples(_)));
        assert!(optimizer.settings_vector().is_empty());

        // the same level can be run again
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        assert!(optimizer
            .optimize_resolution(0, problem, &DVector::zeros(2))
            .is_ok());
        assert_eq!(optimizer.settings_vector().len(), 1);
    }

    #[test]
    fn test_stop_request_does_not_leak_into_next_resolution() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let mut config = manual_config();
        config.maximum_number_of_iterations = PerResolution::per_level(vec![0, 5]).unwrap();
        let mut optimizer = AdaptiveStochasticGradientDescent::new(config);
        optimizer.stop_signal().request_stop();

        let initial = DVector::from_vec(vec![1.0, 1.0]);
        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        let first = optimizer.optimize_resolution(0, problem, &initial).unwrap();
        assert_eq!(first.status, OptimizationStatus::MaxIterationsReached);
        assert!(!optimizer.stop_signal().is_requested());

        let problem = ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler);
        let second = optimizer.optimize_resolution(1, problem, &first.parameters).unwrap();
        assert_eq!(second.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(second.iterations, 5);
    }

    #[test]
    fn test_default_step_length_averages_spacings() {
        let fixed = image();
        let transform = TranslationTransform::identity(2);
        let mut sampler = GridSampler::with_target_count(16);
        let problem =
            ResolutionProblem::new(&Bowl, &transform, &fixed, &mut sampler).with_moving_spacing(3.0);
        assert_eq!(problem.default_step_length(), 2.0);
    }
}
