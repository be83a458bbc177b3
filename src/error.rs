//! Crate-wide error type.
//!
//! Only structural problems are errors: companion fields that disagree in
//! shape, or a failing read/write. Data-quality conditions (degenerate
//! profiles, out-of-domain interpolation targets, undefined bowls) are
//! absorbed into the missing-value mask and never surface here.

use thiserror::Error;

/// Error type for density-binning operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Companion fields disagree in shape; fatal, nothing is written.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// What was being compared (e.g. "thetao vs so").
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Invalid data that cannot be recovered by masking.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Missing variable in an input file.
    #[error("missing variable: {0}")]
    MissingVariable(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// NetCDF library error.
    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
