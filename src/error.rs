//! Error types for the allocation pipeline.

use crate::capability::Capability;
use thiserror::Error;

/// Main error type for the allocation pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Insufficient data: required {required} observations, available {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(Capability),

    #[error("Regime model has not been fitted")]
    ModelNotFitted,

    #[error("Model cache error: {0}")]
    CacheError(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl PipelineError {
    /// True when the error reports a missing optional capability, which callers
    /// are expected to handle by falling back rather than aborting.
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, PipelineError::CapabilityUnavailable(_))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_is_distinguishable() {
        let err = PipelineError::CapabilityUnavailable(Capability::StateModel);
        assert!(err.is_capability_unavailable());
        assert!(err.to_string().contains("state model"));

        let other = PipelineError::ModelNotFitted;
        assert!(!other.is_capability_unavailable());
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = PipelineError::InsufficientData {
            required: 100,
            available: 12,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data: required 100 observations, available 12"
        );
    }
}
