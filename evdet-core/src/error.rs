//! Error taxonomy shared by every stage of the pipeline.

use thiserror::Error;

/// Errors that can occur while decoding, encoding or postprocessing.
///
/// Every error is raised at the boundary of the stage that detects it and no
/// partial result is returned alongside it.
#[derive(Error, Debug)]
pub enum Error {
    /// The raw input does not have the expected structure.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Declared dimensions disagree with the observed data.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A caller-supplied parameter is outside its valid range.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The external model failed during its forward pass.
    #[error("Model forward pass failed: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn shape_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
