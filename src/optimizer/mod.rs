//! Adaptive stochastic gradient descent.
//!
//! - [`gain`]: gain sequence and sigmoid time update
//! - [`step_controller`]: per-iteration state machine
//! - [`asgd`]: per-resolution driver with automatic parameter estimation

use nalgebra::DVector;
use std::fmt;
use std::time::Duration;

pub mod asgd;
pub mod gain;
pub mod scales;
pub mod settings;
pub mod step_controller;

pub use asgd::{AdaptiveStochasticGradientDescent, ResolutionProblem, StopSignal};
pub use scales::ParameterScales;
pub use settings::SettingsRecord;
pub use step_controller::{ControllerState, StepController, StepReport};

/// Detailed convergence information.
#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    /// Norm of the last (scaled) gradient
    pub final_gradient_norm: f64,
    /// Gain used for the last update
    pub final_gain: f64,
    /// Adaptive time of the last update
    pub final_time: f64,
    /// Cost function evaluation count
    pub cost_evaluations: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final gain: {:.2e}, Final time: {:.3}, Cost evaluations: {}",
            self.final_gradient_norm, self.final_gain, self.final_time, self.cost_evaluations
        )
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Stopped on request
    Converged,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Non-finite gradient
    NumericalFailure,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
        }
    }
}

/// Result of one resolution level.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final (unscaled) parameters
    pub parameters: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Cost at the first iteration; NaN when no iteration ran
    pub init_cost: f64,
    /// Cost at the last iteration; NaN when no iteration ran
    pub final_cost: f64,
    /// Number of parameter updates performed
    pub iterations: usize,
    /// Total time elapsed, estimation included
    pub elapsed_time: Duration,
    /// Settings used for this level
    pub settings: SettingsRecord,
    /// Convergence statistics
    pub convergence_info: Option<ConvergenceInfo>,
}
