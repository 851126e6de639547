//! # adaptive-sgd
//!
//! Adaptive stochastic gradient descent for iterative image registration, with
//! automatic estimation of its step-size settings.
//!
//! ## Features
//!
//! - **Adaptive gain control**: the gain `a / (A + t + 1)^alpha` runs on an adaptive
//!   time that a sigmoid of consecutive gradient inner products moves forward or back
//! - **Automatic parameter estimation**: gain and sigmoid settings derived from
//!   Jacobian statistics of the transform and Monte-Carlo gradient measurements
//! - **Three Jacobian-statistics algorithms**: dense, translation closed form and
//!   sparse compact-support, picked once from the transform's structure
//! - **Collaborators included**: N-D images, grid and random samplers, translation,
//!   affine and cubic B-spline transforms, a mean-squares metric
//! - **Elastix-style parameter files** for configuration, per resolution level

pub mod config;
pub mod core;
pub mod error;
pub mod estimation;
pub mod io;
pub mod logger;
pub mod observers;
pub mod optimizer;
pub mod transform;

// Re-export core types
pub use config::{AsgdConfig, ConfigError, ParameterMap, ResolutionOptions};
pub use error::{AsgdError, AsgdResult};

// Re-export logger
pub use logger::{init_logger, init_logger_with_level};

// Re-export optimizer types
pub use optimizer::{
    AdaptiveStochasticGradientDescent, OptimizationStatus, ResolutionProblem, SettingsRecord,
    SolverResult, StopSignal,
};

pub use observers::{IterationProgress, OptObserver, OptObserverVec};
