//! Error taxonomy shared by every pipeline stage

use thiserror::Error;

/// Errors raised by the analytics pipeline
#[derive(Debug, Error)]
pub enum InsightError {
    /// Empty or malformed input; the request is rejected
    #[error("validation failed: {0}")]
    Validation(String),
    /// Clustering, training or prediction failed
    #[error("computation failed: {0}")]
    Computation(String),
    /// Saving or loading an artifact failed
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl InsightError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Computation(_) => "computation",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<std::io::Error> for InsightError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for InsightError {
    fn from(error: serde_json::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<polars::error::PolarsError> for InsightError {
    fn from(error: polars::error::PolarsError) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<ndarray::ShapeError> for InsightError {
    fn from(error: ndarray::ShapeError) -> Self {
        Self::Computation(error.to_string())
    }
}
