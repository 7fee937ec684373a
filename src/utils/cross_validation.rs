//! Rolling-origin cross-validation for daily forecasters.
//!
//! Folds use an expanding training window: every fold trains on
//! `[0, origin)` and is scored on `[origin, origin + horizon)`. Origins are
//! evenly spaced so the last fold ends at the final observation. Folds are
//! independent and evaluated in parallel.

use crate::core::DailySeries;
use crate::error::{ForecastError, Result};
use crate::models::Forecaster;
use crate::utils::metrics::{mae, rmse};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for time series cross-validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CVConfig {
    /// Requested number of folds.
    pub folds: usize,
    /// Requested forecast horizon per fold.
    pub horizon: usize,
    /// Shortest training window the model accepts.
    pub min_train: usize,
    /// Confidence level for the interval-width metric.
    pub level: f64,
}

impl CVConfig {
    pub fn new(folds: usize, horizon: usize, min_train: usize) -> Self {
        Self {
            folds,
            horizon,
            min_train,
            level: 0.95,
        }
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }
}

/// Fold origins and the horizon actually used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    pub origins: Vec<usize>,
    pub horizon: usize,
}

impl FoldPlan {
    /// Fit the requested folds into a series of length `n`.
    ///
    /// When the series is too short the spacing between origins shrinks
    /// first (down to one day), then the evaluation horizon (down to one
    /// day), then the fold count. Returns `None` when not even one fold with
    /// `min_train` training points and a one-day horizon fits.
    pub fn new(n: usize, config: &CVConfig) -> Option<Self> {
        let min_train = config.min_train.max(1);
        let room = n.checked_sub(min_train)?;

        for k in (1..=config.folds.max(1)).rev() {
            // Longest horizon that still fits k folds one day apart.
            let h = config.horizon.max(1).min(room.saturating_sub(k - 1));
            if h == 0 {
                continue;
            }
            let step = match k {
                1 => h,
                _ => h.min((room - h) / (k - 1)),
            };
            let origins = (0..k).map(|i| n - h - (k - 1 - i) * step).collect();
            return Some(Self { origins, horizon: h });
        }
        None
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// Scores from one fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub origin: usize,
    pub one_step_error: f64,
    pub mae: f64,
    pub rmse: f64,
    pub mean_width: f64,
}

/// Results from cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    /// Number of folds evaluated successfully.
    pub n_folds: usize,
    /// Folds whose fit or forecast failed.
    pub failed_folds: usize,
    /// Horizon used per fold.
    pub horizon: usize,
    /// Mean absolute one-step-ahead error.
    pub one_step_mae: f64,
    /// Mean absolute error over the full fold horizon.
    pub mae: f64,
    /// Root mean squared error over the full fold horizon.
    pub rmse: f64,
    /// Mean predictive interval width.
    pub mean_interval_width: f64,
    /// Per-fold metrics, ordered by origin.
    pub fold_metrics: Vec<FoldMetrics>,
}

impl CVResults {
    fn aggregate(horizon: usize, folds: Vec<FoldMetrics>, failed_folds: usize) -> Self {
        let n = folds.len();
        let avg = |f: fn(&FoldMetrics) -> f64| {
            if n == 0 {
                f64::NAN
            } else {
                folds.iter().map(f).sum::<f64>() / n as f64
            }
        };
        // RMSE is pooled over all squared errors rather than averaged per fold.
        let rmse = if n == 0 {
            f64::NAN
        } else {
            (folds.iter().map(|m| m.rmse * m.rmse).sum::<f64>() / n as f64).sqrt()
        };
        Self {
            n_folds: n,
            failed_folds,
            horizon,
            one_step_mae: avg(|m| m.one_step_error),
            mae: avg(|m| m.mae),
            rmse,
            mean_interval_width: avg(|m| m.mean_width),
            fold_metrics: folds,
        }
    }
}

/// Perform rolling-origin cross-validation.
///
/// `model_factory` builds a fresh unfitted model for each fold. Fold
/// failures are counted, except timeouts, which abort validation and are
/// returned so the caller can treat the adapter as timed out. Fails with
/// `InsufficientData` when no fold fits into the series.
pub fn cross_validate<F, Factory>(
    config: &CVConfig,
    series: &DailySeries,
    model_factory: Factory,
) -> Result<CVResults>
where
    F: Forecaster,
    Factory: Fn() -> Result<F> + Sync,
{
    let plan = FoldPlan::new(series.len(), config).ok_or(ForecastError::InsufficientData {
        needed: config.min_train.max(1) + 1,
        got: series.len(),
    })?;
    let h = plan.horizon;
    let values = series.values();

    let outcomes: Vec<Result<FoldMetrics>> = plan
        .origins
        .par_iter()
        .map(|&origin| {
            let train = series.slice(0, origin)?;
            let mut model = model_factory()?;
            model.fit(&train)?;
            let forecast = model.predict_with_intervals(h, config.level)?;
            let predicted = forecast.point();
            let actual = &values[origin..origin + h];
            if predicted.len() != h || predicted.iter().any(|p| !p.is_finite()) {
                return Err(ForecastError::fit(model.name(), "invalid fold forecast"));
            }
            let mean_width = match (forecast.lower(), forecast.upper()) {
                (Some(lo), Some(up)) => {
                    lo.iter().zip(up).map(|(l, u)| (u - l).abs()).sum::<f64>() / h as f64
                }
                _ => 0.0,
            };
            Ok(FoldMetrics {
                origin,
                one_step_error: (actual[0] - predicted[0]).abs(),
                mae: mae(actual, predicted),
                rmse: rmse(actual, predicted),
                mean_width,
            })
        })
        .collect();

    let mut folds = Vec::with_capacity(outcomes.len());
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(m) => folds.push(m),
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "cross-validation fold failed");
                failed += 1;
            }
        }
    }

    Ok(CVResults::aggregate(h, folds, failed))
}
