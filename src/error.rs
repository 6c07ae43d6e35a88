//! Error types for the forecasting data pipeline

use thiserror::Error;

/// Result type alias for forecasting operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Main error type for the forecasting pipeline
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Range error: {0}")]
    RangeError(String),

    #[error("Index {index} out of range for dataset with {len} series")]
    IndexError { index: usize, len: usize },

    #[error(
        "Time series too short for given input and output size. \
         Available timestamps: {available}, required: {required}"
    )]
    InsufficientHistory { available: usize, required: usize },

    #[error("Loss is NaN during {stage} at step {step}, training stopped")]
    NumericInstability { step: usize, stage: String },

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for ForecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        ForecastError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ForecastError {
    fn from(err: ndarray::ShapeError) -> Self {
        ForecastError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
