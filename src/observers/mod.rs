//! Observer hooks for optimizer progress.
//!
//! Observers receive an [`IterationProgress`] after every parameter update and a
//! completion callback at the end of each resolution. They keep the iteration loop
//! free of reporting concerns: logging, CSV export or plotting live here.
//!
//! ```no_run
//! use adaptive_sgd::observers::{ProgressLogger, ProgressRecorder};
//! use adaptive_sgd::optimizer::AdaptiveStochasticGradientDescent;
//! use adaptive_sgd::AsgdConfig;
//!
//! let mut optimizer = AdaptiveStochasticGradientDescent::new(AsgdConfig::default());
//! let recorder = ProgressRecorder::new();
//! optimizer.add_observer(ProgressLogger::every(50));
//! optimizer.add_observer(recorder.clone());
//! ```

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// State after one parameter update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationProgress {
    pub level: usize,
    pub iteration: usize,
    pub metric: f64,
    pub gain: f64,
    pub time: f64,
    pub gradient_norm: f64,
}

/// Receives optimizer progress.
pub trait OptObserver: Send {
    /// Called after every parameter update.
    fn on_step(&self, progress: &IterationProgress);

    /// Called when a resolution finishes, with the final (unscaled) position.
    fn on_optimization_complete(&self, _level: usize, _position: &DVector<f64>, _iterations: usize) {}
}

/// Ordered collection of observers, notified in registration order.
#[derive(Default)]
pub struct OptObserverVec {
    observers: Vec<Box<dyn OptObserver>>,
}

impl OptObserverVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: impl OptObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn notify(&self, progress: &IterationProgress) {
        for observer in &self.observers {
            observer.on_step(progress);
        }
    }

    pub fn notify_complete(&self, level: usize, position: &DVector<f64>, iterations: usize) {
        for observer in &self.observers {
            observer.on_optimization_complete(level, position, iterations);
        }
    }
}

/// Logs every `interval`-th iteration at INFO level.
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    interval: usize,
}

impl ProgressLogger {
    pub fn every(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
        }
    }
}

impl OptObserver for ProgressLogger {
    fn on_step(&self, progress: &IterationProgress) {
        if progress.iteration % self.interval == 0 {
            info!(
                "[level {}] iter {:>5}  metric {:>14.6e}  gain {:>12.4e}  time {:>10.3}  |g| {:>12.4e}",
                progress.level,
                progress.iteration,
                progress.metric,
                progress.gain,
                progress.time,
                progress.gradient_norm
            );
        }
    }

    fn on_optimization_complete(&self, level: usize, _position: &DVector<f64>, iterations: usize) {
        info!("[level {}] finished after {} iterations", level, iterations);
    }
}

/// Keeps every progress record; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct ProgressRecorder {
    records: Arc<Mutex<Vec<IterationProgress>>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn records(&self) -> Vec<IterationProgress> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OptObserver for ProgressRecorder {
    fn on_step(&self, progress: &IterationProgress) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*progress);
    }
}
