//! The request-level entry point.

use super::cache::{CacheKey, ResultCache};
use super::governor::{request_bytes, MemoryGovernor};
use super::task::run_adapters;
use crate::config::{
    config_hash, DetectorSuiteConfig, ModelConfig, ModelKind, PipelineConfig, QualityConfig,
};
use crate::core::{ForecastResult, TimeSeries};
use crate::detection::{detect, AnomalyReport, DetectorFailure, DetectorState};
use crate::error::{ForecastError, Result};
use crate::models::ensemble::{combine, Candidate, EnsembleForecast, ValidationMetric};
use crate::models::{self, ModelSummary};
use crate::quality::{assess, QualityReport};
use crate::utils::deadline::Deadline;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn};

/// Everything one analysis needs.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub series: TimeSeries,
    /// Variable to forecast.
    pub target: String,
    pub models: Vec<ModelConfig>,
    pub detectors: DetectorSuiteConfig,
    pub quality: QualityConfig,
    pub pipeline: PipelineConfig,
    /// Accept a cached outcome up to this old.
    pub cache_max_age: Option<Duration>,
}

impl AnalysisRequest {
    pub fn new(series: TimeSeries, target: impl Into<String>, models: Vec<ModelConfig>) -> Self {
        Self {
            series,
            target: target.into(),
            models,
            detectors: DetectorSuiteConfig::default(),
            quality: QualityConfig::default(),
            pipeline: PipelineConfig::default(),
            cache_max_age: None,
        }
    }

    pub fn with_detectors(mut self, detectors: DetectorSuiteConfig) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = Some(max_age);
        self
    }

    /// Check every configuration before any work starts.
    ///
    /// Models must be non-empty, of distinct kinds and share one horizon.
    /// Each model is also built once so out-of-range hyperparameters are
    /// reported here rather than by the adapter task.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .models
            .first()
            .ok_or_else(|| ForecastError::InvalidConfig("no forecasting model configured".to_string()))?;
        let mut kinds = BTreeSet::new();
        for model in &self.models {
            models::build(model, Deadline::none())?;
            if !kinds.insert(model.kind) {
                return Err(ForecastError::InvalidConfig(format!(
                    "{} configured more than once",
                    model.kind
                )));
            }
            if model.horizon != first.horizon {
                return Err(ForecastError::InvalidConfig(format!(
                    "{} horizon {} differs from {}",
                    model.kind, model.horizon, first.horizon
                )));
            }
        }
        self.detectors.validate()?;
        self.quality.validate()?;
        self.pipeline.validate()
    }

    /// Hash of everything except the series.
    pub fn config_hash(&self) -> Result<String> {
        #[derive(Serialize)]
        struct View<'a> {
            target: &'a str,
            models: &'a [ModelConfig],
            detectors: &'a DetectorSuiteConfig,
            quality: &'a QualityConfig,
            pipeline: &'a PipelineConfig,
        }
        config_hash(&View {
            target: &self.target,
            models: &self.models,
            detectors: &self.detectors,
            quality: &self.quality,
            pipeline: &self.pipeline,
        })
    }
}

/// An adapter that was excluded, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub model: ModelKind,
    pub error: ForecastError,
}

/// Partial failures that did not stop the request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics {
    pub adapter_failures: Vec<AdapterFailure>,
    pub detector_failures: Vec<DetectorFailure>,
    /// The ensemble rests on a single adapter.
    pub low_confidence: bool,
}

impl Diagnostics {
    pub fn failed_models(&self) -> Vec<ModelKind> {
        self.adapter_failures.iter().map(|f| f.model).collect()
    }

    pub fn timed_out(&self) -> Vec<ModelKind> {
        self.adapter_failures
            .iter()
            .filter(|f| f.error.is_timeout())
            .map(|f| f.model)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.adapter_failures.is_empty() && self.detector_failures.is_empty() && !self.low_confidence
    }
}

/// A surviving adapter's own forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterForecast {
    pub model: ModelKind,
    pub forecast: ForecastResult,
    pub summary: ModelSummary,
    pub elapsed: Duration,
}

/// Result of [`Engine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub quality: QualityReport,
    pub ensemble: EnsembleForecast,
    pub adapters: Vec<AdapterForecast>,
    /// Surviving adapters, best first.
    pub validation: Vec<ValidationMetric>,
    pub anomalies: AnomalyReport,
    pub diagnostics: Diagnostics,
}

impl AnalysisOutcome {
    pub fn adapter(&self, model: ModelKind) -> Option<&AdapterForecast> {
        self.adapters.iter().find(|a| a.model == model)
    }
}

/// Runs analyses. Holds the memory governor shared by all requests and an
/// optional result cache.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    governor: MemoryGovernor,
    cache: Option<Arc<ResultCache<AnalysisOutcome>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_governor(mut self, governor: MemoryGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache<AnalysisOutcome>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn governor(&self) -> &MemoryGovernor {
        &self.governor
    }

    pub fn cache(&self) -> Option<&ResultCache<AnalysisOutcome>> {
        self.cache.as_deref()
    }

    /// Assess, forecast, validate, combine and scan for anomalies.
    ///
    /// Configuration errors fail before any work. Adapter and detector
    /// failures are recorded in [`Diagnostics`]; the call fails only when
    /// the series is too short for every adapter, when no adapter survives
    /// (`EnsembleUnavailable`) or when no detector can score the data.
    pub fn run(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        request.validate()?;
        let series_hash = request.series.content_hash();
        let span = info_span!("analysis", series = %&series_hash[..12], target = %request.target);
        let _guard = span.enter();
        let started = Instant::now();

        let key = CacheKey::new(series_hash.clone(), request.config_hash()?);
        if let (Some(cache), Some(max_age)) = (&self.cache, request.cache_max_age) {
            if let Some(hit) = cache.get(&key, max_age) {
                info!("cache hit");
                return Ok(hit.as_ref().clone());
            }
        }

        let _request_reservation = self.governor.reserve(request_bytes(
            request.series.calendar_span(),
            request.series.variables().len(),
        ))?;

        let assessment = assess(&request.series, &request.target, &request.models, &request.quality)?;
        info!(
            quality = assessment.report.overall,
            points = assessment.cleaned.len(),
            "series assessed"
        );
        let target = Arc::new(assessment.cleaned.get(&request.target)?.clone());
        let identity = request.series.identity();

        let (adapter_results, anomalies) = thread::scope(|scope| {
            let cleaned = &assessment.cleaned;
            let detectors = &request.detectors;
            let detection = scope.spawn(move || {
                let mut state = DetectorState::new(identity, detectors.threshold.clone());
                detect(cleaned, detectors, &mut state)
            });
            let adapters = run_adapters(
                Arc::clone(&target),
                &request.models,
                &request.pipeline,
                &self.governor,
            );
            let anomalies = detection.join().unwrap_or_else(|_| {
                Err(ForecastError::ComputationError(
                    "anomaly detection panicked".to_string(),
                ))
            });
            (adapters, anomalies)
        });

        let mut diagnostics = Diagnostics::default();
        let mut candidates = Vec::new();
        let mut adapters = Vec::new();
        for (model, result) in adapter_results {
            match result {
                Ok(outcome) => {
                    adapters.push(AdapterForecast {
                        model,
                        forecast: outcome.forecast.clone(),
                        summary: outcome.summary,
                        elapsed: outcome.elapsed,
                    });
                    candidates.push(Candidate {
                        model,
                        forecast: outcome.forecast,
                        validation: outcome.validation,
                    });
                }
                Err(error) => diagnostics.adapter_failures.push(AdapterFailure { model, error }),
            }
        }

        let (ensemble, validation) = combine(&candidates)?;
        // Adapters without a usable validation error are dropped by the combiner.
        for candidate in &candidates {
            if !validation.iter().any(|m| m.model == candidate.model) {
                diagnostics.adapter_failures.push(AdapterFailure {
                    model: candidate.model,
                    error: ForecastError::fit(candidate.model.id(), "no usable validation error"),
                });
            }
        }
        adapters.retain(|a| validation.iter().any(|m| m.model == a.model));
        diagnostics.low_confidence = ensemble.low_confidence;
        if ensemble.low_confidence {
            warn!(model = ?ensemble.weights.first().map(|w| w.0), "ensemble rests on one adapter");
        }

        let anomalies = anomalies?;
        diagnostics.detector_failures = anomalies.failures.clone();

        let outcome = AnalysisOutcome {
            quality: assessment.report,
            ensemble,
            adapters,
            validation,
            anomalies,
            diagnostics,
        };
        info!(
            adapters = outcome.adapters.len(),
            failed = outcome.diagnostics.adapter_failures.len(),
            flags = outcome.anomalies.flags.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );

        if let Some(cache) = &self.cache {
            cache.insert(key, outcome.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(n: usize) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        let values = (0..n)
            .map(|i| 12.0 + 4.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).cos() + ((i * 7) % 5) as f64 * 0.1)
            .collect();
        TimeSeries::daily(start, "temperature", values).unwrap()
    }

    fn arima(horizon: usize) -> ModelConfig {
        ModelConfig::new(ModelKind::Autoregressive, [7], horizon)
            .unwrap()
            .with_hyperparameter("d", 0.0)
    }

    #[test]
    fn validation_rejects_mixed_horizons_and_duplicates() {
        let mixed = AnalysisRequest::new(
            series(60),
            "temperature",
            vec![
                arima(7),
                ModelConfig::new(ModelKind::TrendHoliday, [7], 14).unwrap(),
            ],
        );
        assert!(matches!(mixed.validate(), Err(ForecastError::InvalidConfig(_))));

        let duplicate = AnalysisRequest::new(series(60), "temperature", vec![arima(7), arima(7)]);
        assert!(duplicate.validate().is_err());

        let out_of_range = AnalysisRequest::new(
            series(60),
            "temperature",
            vec![arima(7).with_hyperparameter("q", 11.0)],
        );
        assert!(matches!(out_of_range.validate(), Err(ForecastError::InvalidConfig(_))));

        let empty = AnalysisRequest::new(series(60), "temperature", Vec::new());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn config_hash_ignores_series_but_not_config() {
        let a = AnalysisRequest::new(series(60), "temperature", vec![arima(7)]);
        let b = AnalysisRequest::new(series(90), "temperature", vec![arima(7)]);
        let c = AnalysisRequest::new(series(60), "temperature", vec![arima(14)]);
        assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());
        assert_ne!(a.config_hash().unwrap(), c.config_hash().unwrap());
    }

    #[test]
    fn cached_outcome_is_reused() {
        let cache = Arc::new(ResultCache::new());
        let engine = Engine::new().with_cache(Arc::clone(&cache));
        let request = AnalysisRequest::new(series(90), "temperature", vec![arima(7)])
            .with_cache_max_age(Duration::from_secs(600));

        let first = engine.run(&request).unwrap();
        assert_eq!(cache.len(), 1);
        let second = engine.run(&request).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.governor().in_use(), 0);
    }

    #[test]
    fn single_adapter_is_low_confidence() {
        let request = AnalysisRequest::new(series(90), "temperature", vec![arima(7)]);
        let outcome = Engine::new().run(&request).unwrap();
        assert!(outcome.ensemble.low_confidence);
        assert!(outcome.diagnostics.low_confidence);
        assert_eq!(outcome.ensemble.forecast.horizon(), 7);
        assert_eq!(outcome.adapters.len(), 1);
    }

    #[test]
    fn governor_rejection_is_terminal_for_the_request() {
        let engine = Engine::new().with_governor(MemoryGovernor::new(64));
        let request = AnalysisRequest::new(series(90), "temperature", vec![arima(7)]);
        assert!(matches!(
            engine.run(&request),
            Err(ForecastError::ResourceExhausted { .. })
        ));
    }
}
