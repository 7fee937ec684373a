//! # weathercast
//!
//! Ensemble forecasting and adaptive anomaly detection for daily weather
//! series.
//!
//! A request carries a multivariate daily series, a target variable and a
//! set of model configurations. The [`pipeline::Engine`] scores and cleans
//! the data ([`quality`]), fits every configured forecaster concurrently
//! under a per-model time budget ([`models`]), validates each by rolling
//! cross-validation, combines the survivors with inverse-error weights
//! ([`models::ensemble`]) and, alongside, runs a suite of anomaly
//! detectors whose scores are fused and compared against a per-variable
//! adaptive threshold ([`detection`]).
//!
//! Supporting algorithms live in their own modules: STL/MSTL decomposition
//! and the periodogram in [`seasonality`], PELT in [`changepoint`] and
//! k-means in [`clustering`].

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_range_loop)]

pub mod changepoint;
pub mod clustering;
pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod seasonality;
pub mod utils;

pub use error::{ForecastError, Result};

pub mod prelude {
    pub use crate::config::{
        DetectorKind, DetectorSuiteConfig, ModelConfig, ModelKind, PipelineConfig, QualityConfig,
        ResidualCorrectionConfig, Sensitivity, ThresholdConfig,
    };
    pub use crate::core::{DailySeries, Forecast, ForecastResult, TimeSeries};
    pub use crate::detection::{AlertLevel, AnomalyFlag, AnomalyReport};
    pub use crate::error::{ForecastError, Result};
    pub use crate::models::ensemble::EnsembleForecast;
    pub use crate::models::Forecaster;
    pub use crate::pipeline::{AnalysisOutcome, AnalysisRequest, Engine};
}
