//! Error types for the weathercast library.

use thiserror::Error;

/// Result type alias for forecasting and detection operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors that can occur while assessing, forecasting or scoring a series.
///
/// Per-adapter and per-detector failures are recorded as diagnostics by the
/// pipeline; only the terminal variants reach the caller of `Engine::run`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Series too short for the configured seasonality or model.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A model failed to converge or hit a numerical problem.
    #[error("model {model} failed to fit: {reason}")]
    ModelFit { model: String, reason: String },

    /// A model fit exceeded its time budget.
    #[error("model {model} timed out after {seconds:.3}s")]
    Timeout { model: String, seconds: f64 },

    /// No adapter survived fitting and validation.
    #[error("no forecasting model produced a usable forecast")]
    EnsembleUnavailable,

    /// The memory governor refused the work.
    #[error("resource exhausted: requested {requested} bytes, {available} available")]
    ResourceExhausted { requested: usize, available: usize },

    /// Malformed model, detector or pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Date index problem (ordering, duplicates).
    #[error("timestamp error: {0}")]
    TimestampError(String),

    /// Requested variable is not part of the series.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Model has not been fitted yet.
    #[error("model must be fitted before prediction")]
    FitRequired,

    /// Computation error (e.g., numerical issues).
    #[error("computation error: {0}")]
    ComputationError(String),
}

impl ForecastError {
    /// Build a `ModelFit` error for the named model.
    pub fn fit(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelFit {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the model ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
