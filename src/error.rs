// src/error.rs

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PcaError>;

/// Coarse category of a [`PcaError`].
///
/// Callers that only need to decide between "report to the user" and "abort the
/// batch" can branch on this instead of matching every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Computation,
    Preprocessing,
    Configuration,
    NotFitted,
    Dimension,
    MissingData,
    Convergence,
    Memory,
    Io,
    Serialization,
}

/// Every failure the toolkit can surface.
#[derive(Debug, Error)]
pub enum PcaError {
    /// Bad input shape or bad input values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Numerical failure (singular matrix, non-finite output, ...).
    #[error("computation error: {0}")]
    Computation(String),

    #[error("preprocessing error: {0}")]
    Preprocessing(String),

    /// Incompatible option combination, detected before any numerical work.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model has not been fitted; call fit or load a model first")]
    NotFitted,

    /// Shape mismatch between new data and a fitted model.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    Dimension {
        expected: usize,
        actual: usize,
        context: String,
    },

    /// A `NaN` was found where the configured strategy does not allow one.
    #[error("missing data at row {row}, column {column}: {message}")]
    MissingData {
        row: usize,
        column: usize,
        message: String,
    },

    #[error("NIPALS did not converge for component {component} after {iterations} iterations")]
    Convergence { component: usize, iterations: usize },

    #[error("insufficient memory: need {requested_bytes} bytes, {available_bytes} available")]
    Memory {
        requested_bytes: u64,
        available_bytes: u64,
    },

    #[error("linear algebra backend failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PcaError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PcaError::Validation(_) => ErrorKind::Validation,
            PcaError::Computation(_) | PcaError::Linalg(_) => ErrorKind::Computation,
            PcaError::Preprocessing(_) => ErrorKind::Preprocessing,
            PcaError::Configuration(_) => ErrorKind::Configuration,
            PcaError::NotFitted => ErrorKind::NotFitted,
            PcaError::Dimension { .. } => ErrorKind::Dimension,
            PcaError::MissingData { .. } => ErrorKind::MissingData,
            PcaError::Convergence { .. } => ErrorKind::Convergence,
            PcaError::Memory { .. } => ErrorKind::Memory,
            PcaError::Io(_) => ErrorKind::Io,
            PcaError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        PcaError::Dimension {
            expected,
            actual,
            context: context.into(),
        }
    }
}

/// Rejects matrices carrying `NaN`/`Inf` produced by a numerical step.
pub(crate) fn ensure_finite<'a, I>(values: I, what: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(PcaError::Computation(format!(
            "{} contains non-finite values",
            what
        )));
    }
    Ok(())
}
