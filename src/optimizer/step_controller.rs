//! Per-iteration gain control and parameter update.
//!
//! States: `Idle -> Running -> (Converged | MaxIterationsReached) -> Stopped`.
//! A non-finite gradient moves a running controller straight to `Stopped` with a
//! [`AsgdError::NumericalFailure`].

use super::OptimizationStatus;
use super::gain::{gain, time_increment};
use super::settings::SettingsRecord;
use crate::error::{AsgdError, AsgdResult};
use nalgebra::DVector;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Converged,
    MaxIterationsReached,
    Stopped,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Converged | ControllerState::MaxIterationsReached | ControllerState::Stopped
        )
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "Idle"),
            ControllerState::Running => write!(f, "Running"),
            ControllerState::Converged => write!(f, "Converged"),
            ControllerState::MaxIterationsReached => write!(f, "MaxIterationsReached"),
            ControllerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Gain and time used for one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub iteration: usize,
    pub gain: f64,
    pub time: f64,
}

#[derive(Debug, Clone)]
pub struct StepController {
    settings: SettingsRecord,
    maximum_iterations: usize,
    use_adaptive_step_sizes: bool,
    state: ControllerState,
    iteration: usize,
    time: f64,
    previous_gradient: Option<DVector<f64>>,
    failure: bool,
}

impl StepController {
    pub fn new(
        settings: SettingsRecord,
        maximum_iterations: usize,
        use_adaptive_step_sizes: bool,
        initial_time: f64,
    ) -> Self {
        Self {
            settings,
            maximum_iterations,
            use_adaptive_step_sizes,
            state: ControllerState::Idle,
            iteration: 0,
            time: initial_time.max(0.0),
            previous_gradient: None,
            failure: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn settings(&self) -> &SettingsRecord {
        &self.settings
    }

    /// Number of completed updates.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Adaptive time of the next update.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gain the next update would use if the time stayed unchanged.
    pub fn current_gain(&self) -> f64 {
        gain(&self.settings, self.time)
    }

    /// Leave `Idle`. The iteration limit is checked here too, so a limit of zero
    /// goes straight to `MaxIterationsReached`.
    pub fn start(&mut self) -> AsgdResult<ControllerState> {
        if self.state != ControllerState::Idle {
            return Err(AsgdError::InvalidInput(format!(
                "step controller can only start from Idle, current state is {}",
                self.state
            )));
        }
        self.state = if self.iteration >= self.maximum_iterations {
            ControllerState::MaxIterationsReached
        } else {
            ControllerState::Running
        };
        Ok(self.state)
    }

    /// Update the time from the new gradient and apply `mu -= a(t) g`.
    pub fn step(&mut self, position: &mut DVector<f64>, gradient: &DVector<f64>) -> AsgdResult<StepReport> {
        if self.state != ControllerState::Running {
            return Err(AsgdError::InvalidInput(format!(
                "step requested while the controller is {}",
                self.state
            )));
        }
        if position.len() != gradient.len() {
            return Err(AsgdError::InvalidInput(format!(
                "gradient has {} entries, position {}",
                gradient.len(),
                position.len()
            )));
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            self.state = ControllerState::Stopped;
            self.failure = true;
            return Err(AsgdError::NumericalFailure(format!(
                "non-finite gradient at iteration {}",
                self.iteration
            )));
        }

        if self.iteration > 0 {
            if self.use_adaptive_step_sizes {
                if let Some(previous) = &self.previous_gradient {
                    let increment = time_increment(&self.settings, previous, gradient);
                    self.time = (self.time + increment).max(0.0);
                }
            } else {
                self.time += 1.0;
            }
        }

        let step_gain = gain(&self.settings, self.time);
        position.axpy(-step_gain, gradient, 1.0);

        match &mut self.previous_gradient {
            Some(previous) => previous.copy_from(gradient),
            None => self.previous_gradient = Some(gradient.clone()),
        }

        let report = StepReport {
            iteration: self.iteration,
            gain: step_gain,
            time: self.time,
        };
        self.iteration += 1;
        if self.iteration >= self.maximum_iterations {
            self.state = ControllerState::MaxIterationsReached;
        }
        Ok(report)
    }

    /// External stop request; a running controller becomes `Converged`.
    pub fn request_stop(&mut self) {
        if self.state == ControllerState::Running {
            self.state = ControllerState::Converged;
        }
    }

    /// Move a terminal state to `Stopped`.
    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            self.state = ControllerState::Stopped;
        }
    }

    /// Outcome for reporting, once the controller has left `Running`.
    pub fn status(&self) -> Option<OptimizationStatus> {
        if self.failure {
            return Some(OptimizationStatus::NumericalFailure);
        }
        match self.state {
            ControllerState::Converged => Some(OptimizationStatus::Converged),
            ControllerState::MaxIterationsReached => Some(OptimizationStatus::MaxIterationsReached),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SettingsRecord {
        SettingsRecord {
            a: 2.0,
            big_a: 1.0,
            alpha: 1.0,
            fmax: 1.0,
            fmin: -0.5,
            omega: 0.1,
        }
    }

    #[test]
    fn test_zero_iterations_leaves_position_untouched() {
        let mut controller = StepController::new(settings(), 0, true, 0.0);
        assert_eq!(controller.start().unwrap(), ControllerState::MaxIterationsReached);
        let mut position = DVector::from_vec(vec![1.0, 2.0]);
        assert!(controller.step(&mut position, &DVector::from_vec(vec![1.0, 1.0])).is_err());
        assert_eq!(position, DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(controller.status(), Some(OptimizationStatus::MaxIterationsReached));

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[test]
    fn test_first_step_uses_initial_time() {
        let mut controller = StepController::new(settings(), 10, true, 0.0);
        controller.start().unwrap();
        let mut position = DVector::from_vec(vec![0.0]);
        let report = controller.step(&mut position, &DVector::from_vec(vec![1.0])).unwrap();
        assert_eq!(report.time, 0.0);
        assert!((report.gain - 1.0).abs() < 1e-15);
        assert!((position[0] + 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_non_adaptive_time_counts_iterations() {
        let mut controller = StepController::new(settings(), 3, false, 0.0);
        controller.start().unwrap();
        let mut position = DVector::zeros(1);
        let gradient = DVector::from_vec(vec![1.0]);
        let gains: Vec<f64> = (0..3)
            .map(|_| controller.step(&mut position, &gradient).unwrap().gain)
            .collect();
        assert_eq!(gains, vec![1.0, 2.0 / 3.0, 0.5]);
        assert_eq!(controller.state(), ControllerState::MaxIterationsReached);
    }

    #[test]
    fn test_oscillating_gradient_slows_down() {
        let mut controller = StepController::new(settings(), 10, true, 0.0);
        controller.start().unwrap();
        let mut position = DVector::zeros(1);
        controller.step(&mut position, &DVector::from_vec(vec![1.0])).unwrap();
        let report = controller.step(&mut position, &DVector::from_vec(vec![-1.0])).unwrap();
        assert!(report.time > 0.0);

        let mut steady = StepController::new(settings(), 10, true, 5.0);
        steady.start().unwrap();
        steady.step(&mut position, &DVector::from_vec(vec![1.0])).unwrap();
        let report = steady.step(&mut position, &DVector::from_vec(vec![1.0])).unwrap();
        assert!(report.time < 5.0);
    }

    #[test]
    fn test_time_never_negative() {
        let mut controller = StepController::new(settings(), 10, true, 0.0);
        controller.start().unwrap();
        let mut position = DVector::zeros(1);
        let gradient = DVector::from_vec(vec![10.0]);
        for _ in 0..5 {
            let report = controller.step(&mut position, &gradient).unwrap();
            assert!(report.time >= 0.0);
        }
    }

    #[test]
    fn test_non_finite_gradient_stops() {
        let mut controller = StepController::new(settings(), 10, true, 0.0);
        controller.start().unwrap();
        let mut position = DVector::zeros(2);
        let err = controller
            .step(&mut position, &DVector::from_vec(vec![f64::NAN, 0.0]))
            .unwrap_err();
        assert!(matches!(err, AsgdError::NumericalFailure(_)));
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert_eq!(controller.status(), Some(OptimizationStatus::NumericalFailure));
        assert_eq!(position, DVector::zeros(2));
    }

    #[test]
    fn test_stop_request_converges() {
        let mut controller = StepController::new(settings(), 10, true, 0.0);
        assert!(controller.status().is_none());
        controller.start().unwrap();
        controller.request_stop();
        assert_eq!(controller.state(), ControllerState::Converged);
        assert_eq!(controller.status(), Some(OptimizationStatus::Converged));
        assert!(controller.start().is_err());
    }
}
