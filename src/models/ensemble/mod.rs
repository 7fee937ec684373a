//! Ensemble combination of validated adapter forecasts.
//!
//! Weights are the normalised inverse of each adapter's cross-validated
//! error; see [`combine`].

mod combiner;

pub use combiner::{
    combine, inverse_error_weights, Candidate, EnsembleForecast, ValidationMetric, ENSEMBLE_LABEL,
};
