//! Error types for rust_basics

use thiserror::Error;

/// Main error type for the MCMC kernels
#[derive(Error, Debug)]
pub enum BasicsError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid identifiability constraint: {reason}")]
    InvalidConstraint { reason: String },

    #[error("Invalid regression state: {reason}")]
    InvalidRegression { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

/// Result type alias for the MCMC kernels
pub type Result<T> = std::result::Result<T, BasicsError>;
