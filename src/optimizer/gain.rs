//! Gain sequence and sigmoid time update.

use super::settings::SettingsRecord;
use nalgebra::DVector;

/// Gain `a / (A + t + 1)^alpha` at (adaptive) time `t`.
pub fn gain(settings: &SettingsRecord, time: f64) -> f64 {
    settings.a / (settings.big_a + time + 1.0).powf(settings.alpha)
}

/// Sigmoid `fmin + (fmax - fmin) / (1 + exp(-x / omega))`, clamped to `[fmin, fmax]`.
pub fn sigmoid(settings: &SettingsRecord, x: f64) -> f64 {
    let z = x / settings.omega;
    let logistic = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    let value = settings.fmin + (settings.fmax - settings.fmin) * logistic;
    value.clamp(settings.fmin, settings.fmax)
}

/// Offset that makes orthogonal gradients leave the time unchanged: `s(-beta) = 0`.
pub fn sigmoid_offset(settings: &SettingsRecord) -> f64 {
    settings.omega * (settings.fmax / -settings.fmin).ln()
}

/// Time increment from two consecutive gradients.
///
/// Consistent gradient directions give a negative increment and therefore a larger
/// gain; reversals give a positive one.
pub fn time_increment(settings: &SettingsRecord, previous: &DVector<f64>, current: &DVector<f64>) -> f64 {
    let inner = previous.dot(current);
    sigmoid(settings, -inner - sigmoid_offset(settings))
}
