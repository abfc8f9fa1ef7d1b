//! Error types shared across the crate

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum VetoError {
    /// Invalid configuration, detected before any fitting work starts
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data does not satisfy the requirements of an operation
    #[error("Data error: {0}")]
    DataError(String),

    /// A referenced column is missing or has the wrong type
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Prediction was requested before a successful fit
    #[error("Model has not been fitted yet")]
    ModelNotFitted,

    /// Error bubbled up from polars during frame ingestion
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, VetoError>;
