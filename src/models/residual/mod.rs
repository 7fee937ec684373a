//! Random-forest correction of adapter residuals.
//!
//! A forest learns the part of an adapter's in-sample residuals that
//! calendar position, holidays and recent residuals explain. Forecasts are
//! then shifted by the residuals the forest expects, predicted one day at a
//! time with each prediction fed back as the next day's lag.

pub mod forest;

pub use forest::RandomForest;

use crate::config::ResidualCorrectionConfig;
use crate::core::{DailySeries, Forecast};
use crate::error::{ForecastError, Result};
use crate::models::Forecaster;
use crate::utils::deadline::Deadline;
use crate::utils::metrics::mae;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::TAU;
use tracing::debug;

/// Names of the feature columns, in row order.
pub const FEATURES: [&str; 12] = [
    "trend",
    "weekday_sin",
    "weekday_cos",
    "year_sin",
    "year_cos",
    "month",
    "weekend",
    "holiday",
    "lag_1",
    "lag_2",
    "lag_7",
    "rolling_mean_7",
];

/// Residuals needed before the first feature row.
const WARM_UP: usize = 7;

/// Fewest feature rows worth fitting a forest to.
const MIN_ROWS: usize = 30;

fn features(
    index: usize,
    date: NaiveDate,
    history: &[f64],
    holidays: &BTreeSet<NaiveDate>,
) -> Vec<f64> {
    let weekday = date.weekday().num_days_from_monday() as f64;
    let day_of_year = date.ordinal() as f64;
    let lag = |k: usize| history[history.len() - k];
    let recent = &history[history.len() - WARM_UP..];
    vec![
        index as f64,
        (TAU * weekday / 7.0).sin(),
        (TAU * weekday / 7.0).cos(),
        (TAU * day_of_year / 365.25).sin(),
        (TAU * day_of_year / 365.25).cos(),
        date.month() as f64,
        if weekday >= 5.0 { 1.0 } else { 0.0 },
        if holidays.contains(&date) { 1.0 } else { 0.0 },
        lag(1),
        lag(2),
        lag(7),
        recent.iter().sum::<f64>() / WARM_UP as f64,
    ]
}

/// How the forest fared on the most recent residuals it was not trained on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub train_rows: usize,
    pub holdout_rows: usize,
    /// MAE of the residuals after correction.
    pub holdout_mae: f64,
    /// MAE of the uncorrected residuals.
    pub baseline_mae: f64,
    /// Whether forecasts are shifted at all.
    pub applied: bool,
}

/// A forest fitted to one adapter's residuals.
#[derive(Debug, Clone)]
pub struct ResidualCorrector {
    forest: RandomForest,
    /// Last residuals of the training series, oldest first.
    tail: Vec<f64>,
    len: usize,
    last_date: NaiveDate,
    holidays: BTreeSet<NaiveDate>,
    report: CorrectionReport,
}

impl ResidualCorrector {
    /// Fit to `residuals`, aligned with `series`.
    ///
    /// Leading zero residuals are warm-up points without a real fit and are
    /// skipped. Returns `None` when fewer than thirty feature rows remain.
    pub fn fit(
        series: &DailySeries,
        residuals: &[f64],
        config: &ResidualCorrectionConfig,
        holidays: &BTreeSet<NaiveDate>,
        deadline: &Deadline,
    ) -> Result<Option<Self>> {
        let n = series.len();
        if residuals.len() != n {
            return Err(ForecastError::DimensionMismatch {
                expected: n,
                got: residuals.len(),
            });
        }
        let first = residuals.iter().position(|r| *r != 0.0).unwrap_or(n);
        let start = first + WARM_UP;
        if n < start + MIN_ROWS {
            debug!(rows = n.saturating_sub(start), "too few residuals to correct");
            return Ok(None);
        }

        let (rows, targets): (Vec<Vec<f64>>, Vec<f64>) = (start..n)
            .map(|i| {
                let row = features(i, series.date_at(i), &residuals[first..i], holidays);
                (row, residuals[i])
            })
            .unzip();

        let holdout = ((rows.len() as f64 * config.holdout_fraction).round() as usize).max(1);
        let split = rows.len() - holdout;
        let mut forest = RandomForest::new(config.n_trees)
            .with_max_depth(config.max_depth)
            .with_min_samples_split(config.min_samples_split)
            .with_min_samples_leaf(config.min_samples_leaf)
            .with_seed(config.seed);
        forest.fit(&rows[..split], &targets[..split], deadline)?;

        let predicted = rows[split..]
            .iter()
            .map(|row| forest.predict(row))
            .collect::<Result<Vec<f64>>>()?;
        let held = &targets[split..];
        let holdout_mae = mae(held, &predicted);
        let baseline_mae = held.iter().map(|r| r.abs()).sum::<f64>() / held.len() as f64;
        let applied = holdout_mae < baseline_mae;
        debug!(holdout_mae, baseline_mae, applied, "residual forest scored");

        if applied {
            forest.fit(&rows, &targets, deadline)?;
        }
        Ok(Some(Self {
            forest,
            tail: residuals[n - WARM_UP..].to_vec(),
            len: n,
            last_date: series.last_date(),
            holidays: holidays.clone(),
            report: CorrectionReport {
                train_rows: split,
                holdout_rows: holdout,
                holdout_mae,
                baseline_mae,
                applied,
            },
        }))
    }

    pub fn report(&self) -> CorrectionReport {
        self.report
    }

    /// Expected residual for each of the next `horizon` days; zeros when the
    /// correction is not applied.
    pub fn corrections(&self, horizon: usize) -> Result<Vec<f64>> {
        if !self.report.applied {
            return Ok(vec![0.0; horizon]);
        }
        let mut history = self.tail.clone();
        let mut out = Vec::with_capacity(horizon);
        for h in 1..=horizon {
            let date = self.last_date + Duration::days(h as i64);
            let row = features(self.len + h - 1, date, &history, &self.holidays);
            let residual = self.forest.predict(&row)?;
            out.push(residual);
            history.push(residual);
        }
        Ok(out)
    }

    /// Feature names paired with their share of the forest's error reduction.
    pub fn feature_importances(&self) -> Vec<(&'static str, f64)> {
        FEATURES
            .iter()
            .copied()
            .zip(self.forest.feature_importances().iter().copied())
            .collect()
    }
}

/// A forecaster whose forecasts are shifted by a [`ResidualCorrector`].
///
/// Without a correction config this is a pass-through. Fitted values and
/// residuals are those of the wrapped model.
#[derive(Debug, Clone)]
pub struct Corrected<F> {
    inner: F,
    config: Option<ResidualCorrectionConfig>,
    holidays: BTreeSet<NaiveDate>,
    deadline: Deadline,
    corrector: Option<ResidualCorrector>,
}

impl<F: Forecaster> Corrected<F> {
    pub fn new(inner: F, config: Option<ResidualCorrectionConfig>) -> Self {
        Self {
            inner,
            config,
            holidays: BTreeSet::new(),
            deadline: Deadline::none(),
            corrector: None,
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = holidays.into_iter().collect();
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn corrector(&self) -> Option<&ResidualCorrector> {
        self.corrector.as_ref()
    }

    fn apply(&self, forecast: Forecast) -> Result<Forecast> {
        match &self.corrector {
            Some(corrector) if corrector.report.applied => {
                Ok(forecast.shifted(&corrector.corrections(forecast.horizon())?))
            }
            _ => Ok(forecast),
        }
    }
}

impl<F: Forecaster> Forecaster for Corrected<F> {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        self.corrector = None;
        self.inner.fit(series)?;
        if let Some(config) = &self.config {
            let residuals = self.inner.residuals().ok_or(ForecastError::FitRequired)?;
            self.corrector =
                ResidualCorrector::fit(series, residuals, config, &self.holidays, &self.deadline)?;
        }
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        self.apply(self.inner.predict(horizon)?)
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        self.apply(self.inner.predict_with_intervals(horizon, level)?)
    }

    fn fitted_values(&self) -> Option<&[f64]> {
        self.inner.fitted_values()
    }

    fn residuals(&self) -> Option<&[f64]> {
        self.inner.residuals()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn aic(&self) -> Option<f64> {
        self.inner.aic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Arima;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn start() -> NaiveDate {
        // A Monday.
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn weekend_pattern(i: usize) -> f64 {
        if i % 7 >= 5 {
            14.0
        } else {
            10.0
        }
    }

    /// Weekend bump that a non-seasonal AR(1) cannot represent.
    fn weekend_series(n: usize) -> DailySeries {
        let mut rng = StdRng::seed_from_u64(5);
        let values = (0..n)
            .map(|i| weekend_pattern(i) + rng.gen_range(-0.3..0.3))
            .collect();
        DailySeries::observed("temperature", start(), values).unwrap()
    }

    fn small_forest() -> ResidualCorrectionConfig {
        ResidualCorrectionConfig {
            n_trees: 30,
            max_depth: 6,
            ..ResidualCorrectionConfig::default()
        }
    }

    #[test]
    fn weekday_structure_in_residuals_is_corrected() {
        let series = weekend_series(300);
        let horizon = 14;
        let truth: Vec<f64> = (300..300 + horizon).map(weekend_pattern).collect();

        let mut base = Arima::new(1, 0, 0);
        base.fit(&series).unwrap();
        let plain = base.predict(horizon).unwrap();

        let mut corrected = Corrected::new(Arima::new(1, 0, 0), Some(small_forest()));
        corrected.fit(&series).unwrap();
        let shifted = corrected.predict_with_intervals(horizon, 0.95).unwrap();

        let report = corrected.corrector().unwrap().report();
        assert!(report.applied, "{report:?}");
        assert!(report.holdout_mae < report.baseline_mae);

        let plain_mae = mae(&truth, plain.point());
        let corrected_mae = mae(&truth, shifted.point());
        assert!(corrected_mae < 0.75 * plain_mae, "{corrected_mae} vs {plain_mae}");

        let importances = corrected.corrector().unwrap().feature_importances();
        assert_eq!(importances.len(), FEATURES.len());
        assert!((importances.iter().map(|(_, v)| v).sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn correction_keeps_interval_around_point() {
        let series = weekend_series(200);
        let mut corrected = Corrected::new(Arima::new(1, 0, 0), Some(small_forest()));
        corrected.fit(&series).unwrap();
        let forecast = corrected.predict_with_intervals(7, 0.9).unwrap();
        let (lower, upper) = (forecast.lower().unwrap(), forecast.upper().unwrap());
        for (h, p) in forecast.point().iter().enumerate() {
            assert!(lower[h] <= *p && *p <= upper[h]);
        }
    }

    #[test]
    fn short_history_leaves_forecast_untouched() {
        let series = weekend_series(30);
        let mut base = Arima::new(1, 0, 0);
        base.fit(&series).unwrap();

        let mut corrected = Corrected::new(Arima::new(1, 0, 0), Some(small_forest()));
        corrected.fit(&series).unwrap();

        assert!(corrected.corrector().is_none());
        assert_eq!(corrected.predict(5).unwrap(), base.predict(5).unwrap());
    }

    #[test]
    fn without_config_is_pass_through() {
        let series = weekend_series(120);
        let mut base = Arima::new(1, 0, 0);
        base.fit(&series).unwrap();
        let mut wrapped = Corrected::new(Arima::new(1, 0, 0), None);
        wrapped.fit(&series).unwrap();

        assert!(wrapped.corrector().is_none());
        assert_eq!(wrapped.predict(7).unwrap(), base.predict(7).unwrap());
        assert_eq!(wrapped.residuals(), base.residuals());
        assert_eq!(wrapped.name(), base.name());
    }

    #[test]
    fn calendar_features_mark_weekends_and_holidays() {
        let history = [0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0];
        let new_year = start();
        let holidays: BTreeSet<NaiveDate> = [new_year].into_iter().collect();

        let row = features(8, new_year, &history, &holidays);
        assert_eq!(row.len(), FEATURES.len());
        assert_eq!(row[0], 8.0);
        assert_eq!(row[5], 1.0);
        assert_eq!(row[6], 0.0);
        assert_eq!(row[7], 1.0);
        assert_eq!(&row[8..11], &[2.0, 1.0, 0.0]);
        assert!((row[11] - 3.0 / 7.0).abs() < 1e-12);

        let saturday = new_year + Duration::days(5);
        let row = features(13, saturday, &history, &holidays);
        assert_eq!(row[6], 1.0);
        assert_eq!(row[7], 0.0);
    }
}
