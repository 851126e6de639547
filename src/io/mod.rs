//! Diagnostic output.
//!
//! Everything here is a pure serialization of an immutable snapshot: the settings
//! vector, a covariance matrix, or recorded iteration progress. Nothing in this
//! module takes part in estimation or iteration.

use thiserror::Error;

pub mod diagnostics;

pub use diagnostics::{
    format_settings_vector, save_covariance_matrix, write_covariance_matrix, write_progress_csv,
};

/// Errors raised while writing diagnostics
#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Covariance matrix is not square: {rows} x {cols}")]
    NonSquare { rows: usize, cols: usize },
}
