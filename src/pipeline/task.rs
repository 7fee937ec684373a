//! One supervised task per forecasting adapter.
//!
//! Each adapter runs fit, forecast and cross-validation on its own thread
//! under a single [`Deadline`]. The supervisor collects results over a
//! channel and waits for every adapter to reach a terminal state: a result,
//! an error, or an expired deadline. An adapter whose deadline passes is
//! cancelled and recorded as timed out; its thread stops at the next
//! deadline check and its late result is discarded. A panic inside an
//! adapter is caught on its thread and reported as a computation error.

use super::governor::{adapter_bytes, MemoryGovernor};
use crate::config::{ModelConfig, ModelKind, PipelineConfig};
use crate::core::{DailySeries, ForecastResult};
use crate::error::{ForecastError, Result};
use crate::models::{self, ModelSummary};
use crate::utils::cross_validation::{cross_validate, CVConfig, CVResults};
use crate::utils::deadline::Deadline;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, warn};

/// A fitted, forecast and validated adapter.
#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub kind: ModelKind,
    pub forecast: ForecastResult,
    pub validation: CVResults,
    pub summary: ModelSummary,
    pub elapsed: Duration,
}

/// Fit, forecast and cross-validate one adapter.
pub fn run_adapter(
    config: &ModelConfig,
    series: &DailySeries,
    pipeline: &PipelineConfig,
    deadline: &Deadline,
) -> Result<AdapterOutcome> {
    let span = debug_span!("adapter", model = %config.kind);
    let _guard = span.enter();
    let started = Instant::now();
    let id = config.kind.id();

    let fitted = models::fit(config, series, deadline.clone())?;
    deadline.check(id)?;
    let forecast = fitted.predict(config.horizon, pipeline.confidence_level)?;

    let cv = CVConfig::new(pipeline.cv_folds, config.horizon, config.min_points())
        .with_level(pipeline.confidence_level);
    let validation = cross_validate(&cv, series, || models::build(config, deadline.clone()))?;
    if validation.n_folds == 0 {
        return Err(ForecastError::fit(id, "no cross-validation fold succeeded"));
    }

    let elapsed = started.elapsed();
    debug!(
        folds = validation.n_folds,
        mae = validation.mae,
        elapsed_ms = elapsed.as_millis() as u64,
        "adapter finished"
    );
    Ok(AdapterOutcome {
        kind: config.kind,
        forecast,
        validation,
        summary: fitted.summary(),
        elapsed,
    })
}

/// Refuse work the governor cannot hold.
///
/// Sequence-learning fits on series longer than the configured maximum are
/// always refused.
fn admit(
    config: &ModelConfig,
    points: usize,
    pipeline: &PipelineConfig,
    governor: &MemoryGovernor,
) -> Result<super::governor::Reservation> {
    let requested = adapter_bytes(config, points);
    let max_len = pipeline.max_series_length_for_sequence_model;
    if config.kind == ModelKind::SequenceLearning && points > max_len {
        return Err(ForecastError::ResourceExhausted {
            requested,
            available: adapter_bytes(config, max_len),
        });
    }
    governor.reserve(requested)
}

/// Run `task`, turning a panic into a `ComputationError` for `kind`.
fn run_contained<T>(kind: ModelKind, task: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Err(ForecastError::ComputationError(format!(
            "{kind} task panicked: {message}"
        )))
    })
}

struct Pending {
    index: usize,
    kind: ModelKind,
    deadline: Deadline,
    /// `None` for a budget with no representable end.
    expires: Option<Instant>,
}

type Delivery = (usize, Result<AdapterOutcome>);

/// Next message, or `Timeout` once `until` passes.
fn receive(
    rx: &Receiver<Delivery>,
    until: Option<Instant>,
) -> std::result::Result<Delivery, RecvTimeoutError> {
    match until {
        Some(instant) => rx.recv_deadline(instant),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

/// Run every adapter concurrently and wait for all of them.
///
/// Results come back in the order of `configs`.
pub fn run_adapters(
    series: Arc<DailySeries>,
    configs: &[ModelConfig],
    pipeline: &PipelineConfig,
    governor: &MemoryGovernor,
) -> Vec<(ModelKind, Result<AdapterOutcome>)> {
    let mut results: Vec<Option<Result<AdapterOutcome>>> = (0..configs.len()).map(|_| None).collect();
    let mut pending: Vec<Pending> = Vec::new();
    let (tx, rx) = unbounded::<Delivery>();

    for (index, config) in configs.iter().enumerate() {
        let reservation = match admit(config, series.len(), pipeline, governor) {
            Ok(r) => r,
            Err(error) => {
                warn!(model = %config.kind, %error, "adapter rejected by memory governor");
                results[index] = Some(Err(error));
                continue;
            }
        };

        let seconds = config
            .timeout_seconds
            .unwrap_or(pipeline.per_model_timeout_seconds);
        let deadline = Deadline::from_secs_f64(seconds);
        let expires = deadline.expires_at();

        let tx = tx.clone();
        let series = Arc::clone(&series);
        let task_config = config.clone();
        let task_pipeline = pipeline.clone();
        let task_deadline = deadline.clone();
        let spawned = thread::Builder::new()
            .name(format!("adapter-{}", config.kind))
            .spawn(move || {
                let _reservation = reservation;
                let result = run_contained(task_config.kind, || {
                    run_adapter(&task_config, &series, &task_pipeline, &task_deadline)
                });
                // The supervisor may have stopped listening after a timeout.
                let _ = tx.send((index, result));
            });

        match spawned {
            Ok(_) => pending.push(Pending {
                index,
                kind: config.kind,
                deadline,
                expires,
            }),
            Err(e) => {
                results[index] = Some(Err(ForecastError::ComputationError(format!(
                    "could not start adapter task: {e}"
                ))));
            }
        }
    }
    drop(tx);

    while !pending.is_empty() {
        let next_expiry = pending.iter().filter_map(|p| p.expires).min();
        match receive(&rx, next_expiry) {
            Ok((index, result)) => {
                if let Some(pos) = pending.iter().position(|p| p.index == index) {
                    pending.swap_remove(pos);
                    results[index] = Some(result);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                pending.retain(|p| {
                    if p.expires.is_none_or(|e| e > now) {
                        return true;
                    }
                    p.deadline.cancel();
                    warn!(model = %p.kind, seconds = p.deadline.budget_secs(), "adapter timed out");
                    results[p.index] = Some(Err(ForecastError::Timeout {
                        model: p.kind.id().to_string(),
                        seconds: p.deadline.budget_secs(),
                    }));
                    false
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                for p in pending.drain(..) {
                    results[p.index] = Some(Err(ForecastError::ComputationError(format!(
                        "{} task ended without a result",
                        p.kind
                    ))));
                }
            }
        }
    }

    configs
        .iter()
        .zip(results)
        .map(|(config, result)| {
            let result = result.unwrap_or_else(|| {
                Err(ForecastError::ComputationError(format!(
                    "{} produced no result",
                    config.kind
                )))
            });
            match &result {
                Ok(outcome) => info!(
                    model = %config.kind,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "adapter succeeded"
                ),
                Err(error) => info!(model = %config.kind, %error, "adapter excluded"),
            }
            (config.kind, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(n: usize) -> Arc<DailySeries> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let values = (0..n)
            .map(|i| 10.0 + 3.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin() + (i % 3) as f64 * 0.2)
            .collect();
        Arc::new(DailySeries::observed("temperature", start, values).unwrap())
    }

    fn arima() -> ModelConfig {
        ModelConfig::new(ModelKind::Autoregressive, [7], 7)
            .unwrap()
            .with_hyperparameter("p", 1.0)
            .with_hyperparameter("d", 0.0)
            .with_hyperparameter("q", 0.0)
    }

    #[test]
    fn results_follow_config_order() {
        let configs = vec![
            ModelConfig::new(ModelKind::SeasonalDecomposition, [365], 7).unwrap(),
            arima(),
        ];
        let results = run_adapters(series(60), &configs, &PipelineConfig::default(), &MemoryGovernor::default());

        assert_eq!(results[0].0, ModelKind::SeasonalDecomposition);
        assert!(matches!(
            results[0].1,
            Err(ForecastError::InsufficientData { .. })
        ));
        let outcome = results[1].1.as_ref().unwrap();
        assert_eq!(outcome.forecast.horizon(), 7);
        assert!(outcome.validation.n_folds > 0);
    }

    #[test]
    fn long_series_rejects_sequence_model() {
        let pipeline = PipelineConfig {
            max_series_length_for_sequence_model: 50,
            ..PipelineConfig::default()
        };
        let lstm = ModelConfig::new(ModelKind::SequenceLearning, [7], 7).unwrap();
        let results = run_adapters(series(60), &[lstm], &pipeline, &MemoryGovernor::default());
        assert!(matches!(
            results[0].1,
            Err(ForecastError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn exhausted_governor_rejects_adapter() {
        let governor = MemoryGovernor::new(16);
        let results = run_adapters(series(60), &[arima()], &PipelineConfig::default(), &governor);
        assert!(matches!(
            results[0].1,
            Err(ForecastError::ResourceExhausted { .. })
        ));
        assert_eq!(governor.in_use(), 0);
    }

    #[test]
    fn panicking_task_becomes_computation_error() {
        let result: Result<()> = run_contained(ModelKind::TrendHoliday, || panic!("changepoint grid empty"));
        match result {
            Err(ForecastError::ComputationError(message)) => {
                assert!(message.contains("panicked"));
                assert!(message.contains("changepoint grid empty"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let ok = run_contained(ModelKind::TrendHoliday, || Ok(3));
        assert_eq!(ok, Ok(3));
    }

    #[test]
    fn unbounded_timeout_still_collects_every_adapter() {
        let pipeline = PipelineConfig {
            per_model_timeout_seconds: 1e20,
            ..PipelineConfig::default()
        };
        let configs = vec![arima(), ModelConfig::new(ModelKind::TrendHoliday, [7], 7).unwrap()];
        let results = run_adapters(series(60), &configs, &pipeline, &MemoryGovernor::default());

        assert_eq!(results.len(), 2);
        for (kind, result) in &results {
            assert!(result.is_ok(), "{kind}: {result:?}");
        }
    }

    #[test]
    fn slow_adapter_times_out() {
        let slow = ModelConfig::new(ModelKind::SequenceLearning, [7], 7)
            .unwrap()
            .with_hyperparameter("epochs", 10_000.0)
            .with_timeout(0.05);
        let started = Instant::now();
        let results = run_adapters(series(200), &[slow, arima()], &PipelineConfig::default(), &MemoryGovernor::default());

        assert!(results[0].1.as_ref().unwrap_err().is_timeout());
        assert!(results[1].1.is_ok());
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
