//! Inverse-error weighted combination of adapter forecasts.

use crate::config::ModelKind;
use crate::core::{ForecastPoint, ForecastResult};
use crate::error::{ForecastError, Result};
use crate::utils::cross_validation::CVResults;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Label of the combined forecast.
pub const ENSEMBLE_LABEL: &str = "ensemble";

/// Errors at or below this are treated as exact.
const ZERO_ERROR: f64 = 1e-12;

/// Cross-validated accuracy of one adapter and its ensemble weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetric {
    pub model: ModelKind,
    /// Full-horizon mean absolute error; drives the weight.
    pub mae: f64,
    pub rmse: f64,
    pub one_step_mae: f64,
    pub mean_interval_width: f64,
    pub folds: usize,
    /// Share in the ensemble, in `[0, 1]`.
    pub weight: f64,
}

/// A validated adapter forecast offered to the combiner.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: ModelKind,
    pub forecast: ForecastResult,
    pub validation: CVResults,
}

/// The combined forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleForecast {
    pub forecast: ForecastResult,
    /// Weights by adapter, summing to one.
    pub weights: Vec<(ModelKind, f64)>,
    /// Set when fewer than two adapters contributed.
    pub low_confidence: bool,
}

impl EnsembleForecast {
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().map(|(_, w)| w).sum()
    }
}

/// `w_i = (1/e_i) / Σ (1/e_j)`.
///
/// Adapters with zero error take the whole weight, shared equally. Non-finite
/// or negative errors get zero weight. Returns all zeros when no error is
/// usable.
pub fn inverse_error_weights(errors: &[f64]) -> Vec<f64> {
    let usable = |e: f64| e.is_finite() && e >= 0.0;
    let exact = errors.iter().filter(|&&e| usable(e) && e <= ZERO_ERROR).count();
    if exact > 0 {
        return errors
            .iter()
            .map(|&e| if usable(e) && e <= ZERO_ERROR { 1.0 / exact as f64 } else { 0.0 })
            .collect();
    }
    let inverse: Vec<f64> = errors
        .iter()
        .map(|&e| if usable(e) { 1.0 / e } else { 0.0 })
        .collect();
    let total: f64 = inverse.iter().sum();
    if total <= 0.0 {
        return vec![0.0; errors.len()];
    }
    inverse.iter().map(|w| w / total).collect()
}

/// Order by error, then by interval width.
fn rank(a: &ValidationMetric, b: &ValidationMetric) -> Ordering {
    a.mae
        .total_cmp(&b.mae)
        .then(a.mean_interval_width.total_cmp(&b.mean_interval_width))
        .then(a.model.cmp(&b.model))
}

/// Combine validated adapter forecasts.
///
/// Point forecasts are weight-averaged per date. The interval half-width is
/// the weighted spread of the points plus half the weighted mean width, so
/// the combined interval is never narrower than the narrowest contributor.
/// Fails with `EnsembleUnavailable` when no candidate has a usable error.
pub fn combine(candidates: &[Candidate]) -> Result<(EnsembleForecast, Vec<ValidationMetric>)> {
    let errors: Vec<f64> = candidates.iter().map(|c| c.validation.mae).collect();
    let weights = inverse_error_weights(&errors);

    let mut metrics: Vec<ValidationMetric> = candidates
        .iter()
        .zip(&weights)
        .filter(|(c, _)| c.validation.n_folds > 0 && c.validation.mae.is_finite())
        .map(|(c, &weight)| ValidationMetric {
            model: c.model,
            mae: c.validation.mae,
            rmse: c.validation.rmse,
            one_step_mae: c.validation.one_step_mae,
            mean_interval_width: c.validation.mean_interval_width,
            folds: c.validation.n_folds,
            weight,
        })
        .collect();
    metrics.sort_by(rank);

    let contributors: Vec<(&Candidate, f64)> = candidates
        .iter()
        .zip(weights.iter().copied())
        .filter(|(c, _)| c.validation.n_folds > 0 && c.validation.mae.is_finite())
        .collect();
    let first = match contributors.first() {
        Some((c, _)) => c,
        None => return Err(ForecastError::EnsembleUnavailable),
    };

    if contributors.len() == 1 {
        let forecast = ForecastResult::from_points(ENSEMBLE_LABEL, first.forecast.points().to_vec())?;
        return Ok((
            EnsembleForecast {
                forecast,
                weights: vec![(first.model, 1.0)],
                low_confidence: true,
            },
            metrics,
        ));
    }

    let dates = first.forecast.dates();
    for (c, _) in &contributors {
        if c.forecast.dates() != dates {
            return Err(ForecastError::ComputationError(format!(
                "{} forecast dates do not match",
                c.model
            )));
        }
    }

    // Zero-weight contributors (all weight on exact fits) drop out of the mix.
    let active: Vec<&(&Candidate, f64)> = contributors.iter().filter(|(_, w)| *w > 0.0).collect();
    let points = dates
        .iter()
        .enumerate()
        .map(|(h, &date)| {
            let center: f64 = active.iter().map(|(c, w)| w * c.forecast.points()[h].point).sum();
            let spread: f64 = active
                .iter()
                .map(|(c, w)| w * (c.forecast.points()[h].point - center).powi(2))
                .sum();
            let width: f64 = active.iter().map(|(c, w)| w * c.forecast.points()[h].width()).sum();
            let half = spread.sqrt() + 0.5 * width;
            ForecastPoint {
                date,
                point: center,
                lower: center - half,
                upper: center + half,
            }
        })
        .collect();

    let ensemble = EnsembleForecast {
        forecast: ForecastResult::from_points(ENSEMBLE_LABEL, points)?,
        weights: contributors.iter().map(|(c, w)| (c.model, *w)).collect(),
        low_confidence: false,
    };
    Ok((ensemble, metrics))
}
