//! Forecasting models.
//!
//! The four algorithm families form a closed set ([`Model`]); each is built
//! from a [`ModelConfig`] and driven through the [`Forecaster`] trait. Any of
//! them can carry a random-forest residual correction ([`residual`]).

mod traits;

pub mod arima;
pub mod ensemble;
pub mod lstm;
pub mod residual;
pub mod tbats;
pub mod trend_holiday;

pub use arima::Arima;
pub use lstm::Lstm;
pub use residual::{CorrectionReport, Corrected};
pub use tbats::Tbats;
pub use traits::Forecaster;
pub use trend_holiday::TrendHoliday;

use crate::config::{ModelConfig, ModelKind};
use crate::core::{DailySeries, Forecast, ForecastResult};
use crate::error::{ForecastError, Result};
use crate::utils::deadline::Deadline;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One configured forecaster of any family.
#[derive(Debug, Clone)]
pub enum Model {
    SeasonalDecomposition(Tbats),
    TrendHoliday(TrendHoliday),
    Autoregressive(Arima),
    SequenceLearning(Lstm),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            Model::SeasonalDecomposition($m) => $body,
            Model::TrendHoliday($m) => $body,
            Model::Autoregressive($m) => $body,
            Model::SequenceLearning($m) => $body,
        }
    };
}

impl Model {
    /// Build an unfitted model from its configuration. Hyperparameters are
    /// validated here so a bad value fails before any fitting starts.
    pub fn from_config(config: &ModelConfig, deadline: Deadline) -> Result<Self> {
        config.validate()?;
        let periods = config.effective_periods();
        let model = match config.kind {
            ModelKind::SeasonalDecomposition => {
                let mut tbats = Tbats::new(periods)
                    .with_max_harmonics(config.hyper_usize("fourier_order", 6, 1, 50)?)
                    .with_deadline(deadline);
                if config.hyper("damped", 0.0) > 0.5 {
                    tbats = tbats.with_damped_trend();
                }
                Model::SeasonalDecomposition(tbats)
            }
            ModelKind::TrendHoliday => {
                let mut th = TrendHoliday::new(periods)
                    .with_changepoint_prior(config.hyper_positive("changepoint_prior", 0.05)?)
                    .with_holiday_window(config.hyper_usize("holiday_window", 0, 0, 30)?)
                    .with_deadline(deadline);
                if config.hyperparameters.contains_key("changepoints") {
                    th = th.with_changepoints(config.hyper_usize("changepoints", 25, 0, 200)?);
                }
                if config.hyperparameters.contains_key("fourier_order") {
                    th = th.with_fourier_order(config.hyper_usize("fourier_order", 3, 1, 50)?);
                }
                if let Some(holidays) = &config.holidays {
                    th = th.with_holidays(holidays.iter().copied());
                }
                Model::TrendHoliday(th)
            }
            ModelKind::Autoregressive => {
                let p = config.hyper_usize("p", 1, 0, 10)?;
                let d = config.hyper_usize("d", 1, 0, 2)?;
                let q = config.hyper_usize("q", 1, 0, 10)?;
                Model::Autoregressive(Arima::new(p, d, q).with_deadline(deadline))
            }
            ModelKind::SequenceLearning => Model::SequenceLearning(
                Lstm::new(periods)
                    .with_look_back(config.hyper_usize("look_back", 7, 1, 365)?)
                    .with_hidden(config.hyper_usize("hidden", 8, 1, 64)?)
                    .with_epochs(config.hyper_usize("epochs", 50, 1, 10_000)?)
                    .with_learning_rate(config.hyper_positive("learning_rate", 0.01)?)
                    .with_seed(config.hyper_usize("seed", 42, 0, u32::MAX as usize)? as u64)
                    .with_deadline(deadline),
            ),
        };
        Ok(model)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::SeasonalDecomposition(_) => ModelKind::SeasonalDecomposition,
            Model::TrendHoliday(_) => ModelKind::TrendHoliday,
            Model::Autoregressive(_) => ModelKind::Autoregressive,
            Model::SequenceLearning(_) => ModelKind::SequenceLearning,
        }
    }
}

impl Forecaster for Model {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        dispatch!(self, m => m.fit(series))
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        dispatch!(self, m => m.predict(horizon))
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        dispatch!(self, m => m.predict_with_intervals(horizon, level))
    }

    fn fitted_values(&self) -> Option<&[f64]> {
        dispatch!(self, m => m.fitted_values())
    }

    fn residuals(&self) -> Option<&[f64]> {
        dispatch!(self, m => m.residuals())
    }

    fn name(&self) -> &str {
        dispatch!(self, m => m.name())
    }

    fn aic(&self) -> Option<f64> {
        dispatch!(self, m => m.aic())
    }
}

/// In-sample diagnostics of a fitted adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub aic: Option<f64>,
    /// Spread of the base model's residuals, before any correction.
    pub residual_sd: f64,
    pub residual_correction: Option<CorrectionReport>,
}

/// Build the unfitted adapter for `config`, wrapped in its residual
/// correction (a pass-through when none is configured).
pub fn build(config: &ModelConfig, deadline: Deadline) -> Result<Corrected<Model>> {
    let model = Model::from_config(config, deadline.clone())?;
    let adapter = Corrected::new(model, config.residual_correction.clone()).with_deadline(deadline);
    Ok(match &config.holidays {
        Some(holidays) => adapter.with_holidays(holidays.iter().copied()),
        None => adapter,
    })
}

/// A model fitted to a particular series, ready to forecast from its end.
#[derive(Debug, Clone)]
pub struct FittedModel {
    kind: ModelKind,
    model: Corrected<Model>,
    last_date: NaiveDate,
    summary: ModelSummary,
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn summary(&self) -> ModelSummary {
        self.summary
    }

    pub fn model(&self) -> &Model {
        self.model.inner()
    }

    /// Dated forecast with intervals at `level`, continuing from the last
    /// training date.
    pub fn predict(&self, horizon: usize, level: f64) -> Result<ForecastResult> {
        let forecast = self.model.predict_with_intervals(horizon, level)?;
        ForecastResult::from_forecast(self.kind.id(), self.last_date, &forecast)
    }
}

/// Fit the adapter described by `config` to `series`.
///
/// Fails fast with `InsufficientData` when the series is shorter than the
/// adapter's minimum.
pub fn fit(config: &ModelConfig, series: &DailySeries, deadline: Deadline) -> Result<FittedModel> {
    let needed = config.min_points();
    if series.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            got: series.len(),
        });
    }
    let mut model = build(config, deadline)?;
    model.fit(series)?;

    let residual_sd = match model.residuals() {
        Some(r) if r.len() > 1 => {
            let mean = r.iter().sum::<f64>() / r.len() as f64;
            (r.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (r.len() - 1) as f64).sqrt()
        }
        _ => 0.0,
    };
    let summary = ModelSummary {
        aic: model.aic(),
        residual_sd,
        residual_correction: model.corrector().map(|c| c.report()),
    };
    Ok(FittedModel {
        kind: config.kind,
        model,
        last_date: series.last_date(),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> DailySeries {
        let values = (0..n)
            .map(|i| 10.0 + 3.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin() + 0.02 * i as f64)
            .collect();
        DailySeries::observed("temperature", NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(), values)
            .unwrap()
    }

    #[test]
    fn every_family_produces_dated_forecast() {
        let s = series(120);
        for kind in ModelKind::ALL {
            let config = ModelConfig::new(kind, [7], 5)
                .unwrap()
                .with_hyperparameter("epochs", 5.0);
            let fitted = fit(&config, &s, Deadline::none()).unwrap();
            let result = fitted.predict(5, 0.95).unwrap();
            assert_eq!(result.horizon(), 5, "{kind}");
            assert_eq!(result.model(), kind.id());
            assert_eq!(
                result.points()[0].date,
                NaiveDate::from_ymd_opt(2023, 5, 1).unwrap()
            );
            for p in result.points() {
                assert!(p.lower <= p.point && p.point <= p.upper);
            }
        }
    }

    #[test]
    fn short_series_is_insufficient() {
        let config = ModelConfig::new(ModelKind::SeasonalDecomposition, [365], 7).unwrap();
        let err = fit(&config, &series(10), Deadline::none()).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 730, got: 10 });
    }

    #[test]
    fn bad_hyperparameter_is_invalid_config() {
        let config = ModelConfig::new(ModelKind::Autoregressive, [7], 3)
            .unwrap()
            .with_hyperparameter("d", 4.0);
        assert!(matches!(
            Model::from_config(&config, Deadline::none()),
            Err(ForecastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn correction_is_reported_in_summary() {
        let correction = crate::config::ResidualCorrectionConfig {
            n_trees: 10,
            max_depth: 4,
            ..Default::default()
        };
        let config = ModelConfig::new(ModelKind::TrendHoliday, [7], 7)
            .unwrap()
            .with_residual_correction(correction);
        let fitted = fit(&config, &series(120), Deadline::none()).unwrap();

        let report = fitted.summary().residual_correction.expect("corrector fitted");
        assert!(report.train_rows > 0 && report.holdout_rows > 0);
        assert_eq!(fitted.predict(7, 0.95).unwrap().horizon(), 7);
        assert!(matches!(fitted.model(), Model::TrendHoliday(_)));
    }

    #[test]
    fn summary_reports_residual_spread() {
        let config = ModelConfig::new(ModelKind::Autoregressive, [7], 3).unwrap();
        let fitted = fit(&config, &series(60), Deadline::none()).unwrap();
        assert!(fitted.summary().residual_sd.is_finite());
        assert!(fitted.summary().aic.is_some());
    }
}
