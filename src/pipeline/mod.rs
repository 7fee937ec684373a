//! Request orchestration.
//!
//! An [`Engine`] takes an [`AnalysisRequest`] through quality assessment,
//! then runs the forecasting adapters and the anomaly detectors side by
//! side, and finally combines the surviving forecasts.
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use weathercast::config::{ModelConfig, ModelKind};
//! use weathercast::core::TimeSeries;
//! use weathercast::pipeline::{AnalysisRequest, Engine};
//!
//! let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
//! let values: Vec<f64> = (0..400).map(|i| 10.0 + (i % 7) as f64).collect();
//! let series = TimeSeries::daily(start, "temperature", values).unwrap();
//! let models = vec![
//!     ModelConfig::new(ModelKind::SeasonalDecomposition, [7], 7).unwrap(),
//!     ModelConfig::new(ModelKind::Autoregressive, [7], 7).unwrap(),
//! ];
//! let outcome = Engine::new()
//!     .run(&AnalysisRequest::new(series, "temperature", models))
//!     .unwrap();
//! println!("{:?}", outcome.ensemble.forecast.point_values());
//! ```

mod cache;
mod engine;
mod governor;
mod task;

pub use cache::{CacheKey, ResultCache};
pub use engine::{
    AdapterFailure, AdapterForecast, AnalysisOutcome, AnalysisRequest, Diagnostics, Engine,
};
pub use governor::{adapter_bytes, request_bytes, MemoryGovernor, Reservation, DEFAULT_MEMORY_BUDGET};
pub use task::{run_adapter, run_adapters, AdapterOutcome};
