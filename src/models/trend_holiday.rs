//! Piecewise-linear trend with Fourier seasonality and holiday effects.
//!
//! `y(t) = g(t) + s(t) + β_h · h(t) · g₀(t) + ε`
//!
//! - `g(t)`: linear trend with rate changes at evenly spaced changepoints in
//!   the first 80% of the history, shrunk towards zero by a ridge penalty.
//! - `s(t)`: Fourier terms per seasonal period.
//! - `h(t)`: 1 on dates within `holiday_window` days of a holiday.
//! - `g₀(t)`: a first-stage trend fit, normalised to mean one, so the holiday
//!   effect is additive to trend and seasonality but proportional to the
//!   local trend level.

use crate::core::{DailySeries, Forecast};
use crate::error::{ForecastError, Result};
use crate::models::Forecaster;
use crate::utils::deadline::Deadline;
use crate::utils::linalg::{predict_rows, ridge_fit};
use crate::utils::metrics::gaussian_aic;
use crate::utils::stats::z_for_level;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use std::f64::consts::PI;

const NAME: &str = "TrendHoliday";

/// Share of the history in which changepoints are placed.
const CHANGEPOINT_RANGE: f64 = 0.8;

/// Additive trend + seasonality + holiday regression.
#[derive(Debug, Clone)]
pub struct TrendHoliday {
    seasonal_periods: Vec<usize>,
    fourier_order: Option<usize>,
    n_changepoints: Option<usize>,
    changepoint_prior: f64,
    holidays: BTreeSet<NaiveDate>,
    holiday_window: i64,
    deadline: Deadline,

    // fitted state
    start: Option<NaiveDate>,
    n: usize,
    /// Location scaling: y is modelled as (y - y_mean) / y_scale.
    y_mean: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    orders: Vec<usize>,
    /// First-stage trend coefficients `[intercept, rate, deltas...]`.
    base_trend: Vec<f64>,
    base_trend_mean: f64,
    use_holidays: bool,
    beta: Vec<f64>,
    sigma: f64,
    fitted: Option<Vec<f64>>,
    residuals: Option<Vec<f64>>,
    aic: Option<f64>,
}

impl TrendHoliday {
    pub fn new(seasonal_periods: Vec<usize>) -> Self {
        Self {
            seasonal_periods: seasonal_periods.into_iter().filter(|&p| p > 1).collect(),
            fourier_order: None,
            n_changepoints: None,
            changepoint_prior: 0.05,
            holidays: BTreeSet::new(),
            holiday_window: 0,
            deadline: Deadline::none(),
            start: None,
            n: 0,
            y_mean: 0.0,
            y_scale: 1.0,
            changepoints: Vec::new(),
            orders: Vec::new(),
            base_trend: Vec::new(),
            base_trend_mean: 1.0,
            use_holidays: false,
            beta: Vec::new(),
            sigma: 0.0,
            fitted: None,
            residuals: None,
            aic: None,
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = holidays.into_iter().collect();
        self
    }

    /// Days on either side of a holiday that share its effect.
    pub fn with_holiday_window(mut self, days: usize) -> Self {
        self.holiday_window = days as i64;
        self
    }

    pub fn with_changepoints(mut self, n: usize) -> Self {
        self.n_changepoints = Some(n);
        self
    }

    pub fn with_changepoint_prior(mut self, scale: f64) -> Self {
        self.changepoint_prior = scale;
        self
    }

    /// Harmonics per period; defaults to 3 for weekly-or-shorter cycles and 10
    /// otherwise, capped at half the period.
    pub fn with_fourier_order(mut self, order: usize) -> Self {
        self.fourier_order = Some(order.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fitted holiday coefficient as a fraction of the local trend level
    /// (on the scaled series), if holidays were usable.
    pub fn holiday_effect(&self) -> Option<f64> {
        if self.use_holidays {
            self.beta.last().copied()
        } else {
            None
        }
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        (-self.holiday_window..=self.holiday_window)
            .any(|offset| self.holidays.contains(&(date + Duration::days(offset))))
    }

    /// Scaled time for day index `i` (0 at start, 1 at the last observation).
    fn t(&self, i: usize) -> f64 {
        i as f64 / (self.n.max(2) - 1) as f64
    }

    fn trend_row(&self, i: usize) -> Vec<f64> {
        let t = self.t(i);
        let mut row = vec![1.0, t];
        row.extend(self.changepoints.iter().map(|&s| (t - s).max(0.0)));
        row
    }

    fn season_row(&self, i: usize) -> Vec<f64> {
        let mut row = Vec::new();
        for (&m, &k) in self.seasonal_periods.iter().zip(&self.orders) {
            for j in 1..=k {
                let angle = 2.0 * PI * j as f64 * i as f64 / m as f64;
                row.push(angle.cos());
                row.push(angle.sin());
            }
        }
        row
    }

    /// Normalised first-stage trend level at day index `i`.
    fn base_level(&self, i: usize) -> f64 {
        let row = self.trend_row(i);
        let level: f64 = row.iter().zip(&self.base_trend).map(|(x, b)| x * b).sum();
        // Trend is fitted on the centred series; shift back to the raw level
        // so the multiplier follows the actual magnitude of the variable.
        (level * self.y_scale + self.y_mean) / self.base_trend_mean
    }

    fn full_row(&self, i: usize, date: NaiveDate) -> Vec<f64> {
        let mut row = self.trend_row(i);
        row.extend(self.season_row(i));
        if self.use_holidays {
            let h = if self.is_holiday(date) { 1.0 } else { 0.0 };
            row.push(h * self.base_level(i));
        }
        row
    }

    fn penalties(&self, trend_only: bool) -> Vec<f64> {
        let cp_penalty = 1.0 / (self.changepoint_prior * self.changepoint_prior);
        let mut p = vec![0.0, 0.0];
        p.extend(std::iter::repeat(cp_penalty).take(self.changepoints.len()));
        if !trend_only {
            let n_season: usize = self.orders.iter().map(|k| 2 * k).sum();
            p.extend(std::iter::repeat(0.01).take(n_season));
            if self.use_holidays {
                p.push(0.01);
            }
        }
        p
    }
}

impl Forecaster for TrendHoliday {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        let values = series.values();
        let n = values.len();
        let max_period = self.seasonal_periods.iter().max().copied().unwrap_or(4);
        let needed = (2 * max_period).max(8);
        if n < needed {
            return Err(ForecastError::InsufficientData { needed, got: n });
        }

        self.n = n;
        self.start = Some(series.start());
        self.y_mean = values.iter().sum::<f64>() / n as f64;
        let sd = (values.iter().map(|v| (v - self.y_mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        self.y_scale = if sd > 1e-12 { sd } else { 1.0 };
        let y: Vec<f64> = values.iter().map(|v| (v - self.y_mean) / self.y_scale).collect();

        let n_cp = self.n_changepoints.unwrap_or(25).min(n / 10);
        self.changepoints = (1..=n_cp)
            .map(|j| CHANGEPOINT_RANGE * j as f64 / (n_cp + 1) as f64)
            .collect();
        self.orders = self
            .seasonal_periods
            .iter()
            .map(|&m| {
                let default = if m <= 7 { 3 } else { 10 };
                self.fourier_order.unwrap_or(default).min(m / 2).max(1)
            })
            .collect();

        // Stage one: trend + seasonality, used as the holiday multiplier.
        self.use_holidays = false;
        let design: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let mut row = self.trend_row(i);
                row.extend(self.season_row(i));
                row
            })
            .collect();
        let mut penalties = self.penalties(false);
        let stage_one = ridge_fit(&design, &y, &penalties)?;
        let trend_width = 2 + self.changepoints.len();
        self.base_trend = stage_one[..trend_width].to_vec();
        self.base_trend_mean = 1.0;
        let raw_mean = (0..n).map(|i| self.base_level(i)).sum::<f64>() / n as f64;
        self.base_trend_mean = if raw_mean.abs() > 1e-9 { raw_mean } else { 1.0 };

        self.deadline.check(NAME)?;

        // Stage two: add the holiday regressor when any holiday falls in the
        // observed history.
        let start = series.start();
        let dates: Vec<NaiveDate> = (0..n).map(|i| start + Duration::days(i as i64)).collect();
        self.use_holidays = dates.iter().any(|&d| self.is_holiday(d));
        let beta = if self.use_holidays {
            let design: Vec<Vec<f64>> = (0..n).map(|i| self.full_row(i, dates[i])).collect();
            penalties = self.penalties(false);
            ridge_fit(&design, &y, &penalties)?
        } else {
            stage_one
        };

        let design: Vec<Vec<f64>> = (0..n).map(|i| self.full_row(i, dates[i])).collect();
        let fitted: Vec<f64> = predict_rows(&design, &beta)
            .into_iter()
            .map(|f| f * self.y_scale + self.y_mean)
            .collect();
        if fitted.iter().any(|f| !f.is_finite()) {
            return Err(ForecastError::fit(NAME, "non-finite fitted values"));
        }
        let residuals: Vec<f64> = values.iter().zip(&fitted).map(|(y, f)| y - f).collect();
        let dof = n.saturating_sub(beta.len()).max(1);
        self.sigma = (residuals.iter().map(|r| r * r).sum::<f64>() / dof as f64).sqrt();
        self.aic = gaussian_aic(&residuals, beta.len() + 1);
        self.beta = beta;
        self.fitted = Some(fitted);
        self.residuals = Some(residuals);
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        let start = self.start.ok_or(ForecastError::FitRequired)?;
        if self.fitted.is_none() {
            return Err(ForecastError::FitRequired);
        }
        let predictions = (self.n..self.n + horizon)
            .map(|i| {
                let row = self.full_row(i, start + Duration::days(i as i64));
                let scaled: f64 = row.iter().zip(&self.beta).map(|(x, b)| x * b).sum();
                scaled * self.y_scale + self.y_mean
            })
            .collect();
        Ok(Forecast::from_values(predictions))
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        let point = self.predict(horizon)?;
        let z = z_for_level(level);

        // Future rate changes are assumed as large as the average historical
        // change, spread evenly over the history.
        let deltas = &self.beta[2..2 + self.changepoints.len()];
        let mean_abs_delta = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().map(|d| d.abs()).sum::<f64>() / deltas.len() as f64
        };
        let rate_sd = mean_abs_delta * self.y_scale * self.changepoints.len() as f64
            / (self.n.max(2) - 1) as f64
            / (self.n.max(2) - 1) as f64;

        let sds: Vec<f64> = (1..=horizon)
            .map(|h| (self.sigma.powi(2) + (h as f64 * rate_sd).powi(2)).sqrt())
            .collect();
        Ok(Forecast::with_symmetric_intervals(
            point.point().to_vec(),
            &sds,
            z,
        ))
    }

    fn fitted_values(&self) -> Option<&[f64]> {
        self.fitted.as_deref()
    }

    fn residuals(&self) -> Option<&[f64]> {
        self.residuals.as_deref()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn aic(&self) -> Option<f64> {
        self.aic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
    }

    fn seasonal_values(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 0.05 * i as f64 + 5.0 * (2.0 * PI * i as f64 / 7.0).cos())
            .collect()
    }

    #[test]
    fn fits_trend_and_weekly_cycle() {
        let series = DailySeries::observed("load", start(), seasonal_values(210)).unwrap();
        let mut model = TrendHoliday::new(vec![7]);
        model.fit(&series).unwrap();

        let forecast = model.predict(7).unwrap();
        let expected = seasonal_values(217);
        for h in 0..7 {
            assert_relative_eq!(forecast.point()[h], expected[210 + h], epsilon = 1.0);
        }
        assert!(model.holiday_effect().is_none());
    }

    #[test]
    fn holiday_effect_scales_with_trend_level() {
        // Holidays every 30 days add 10% of the (rising) level.
        let n = 360;
        let holidays: Vec<NaiveDate> = (0..n / 30 + 2)
            .map(|k| start() + Duration::days(15 + 30 * k as i64))
            .collect();
        let values: Vec<f64> = (0..n)
            .map(|i| {
                let level = 50.0 + 0.2 * i as f64;
                let date = start() + Duration::days(i as i64);
                let bump = if holidays.contains(&date) { 0.1 * level } else { 0.0 };
                level + bump
            })
            .collect();
        let series = DailySeries::observed("load", start(), values).unwrap();

        let mut model = TrendHoliday::new(vec![7]).with_holidays(holidays.clone());
        model.fit(&series).unwrap();
        assert!(model.holiday_effect().unwrap() > 0.0);

        // Next holiday is at day 375; compare the bump against the plain trend.
        let forecast = model.predict(20).unwrap();
        let on_holiday = forecast.point()[375 - n];
        let before = forecast.point()[374 - n];
        let level = 50.0 + 0.2 * 375.0;
        assert_relative_eq!(on_holiday - before, 0.1 * level, epsilon = 0.25 * 0.1 * level);
    }

    #[test]
    fn intervals_bracket_point() {
        let series = DailySeries::observed("load", start(), seasonal_values(100)).unwrap();
        let mut model = TrendHoliday::new(vec![7]);
        model.fit(&series).unwrap();
        let forecast = model.predict_with_intervals(5, 0.9).unwrap();
        for h in 0..5 {
            assert!(forecast.lower().unwrap()[h] <= forecast.point()[h]);
            assert!(forecast.point()[h] <= forecast.upper().unwrap()[h]);
        }
    }

    #[test]
    fn needs_two_cycles() {
        let series = DailySeries::observed("load", start(), seasonal_values(10)).unwrap();
        let mut model = TrendHoliday::new(vec![365]);
        assert!(matches!(
            model.fit(&series),
            Err(ForecastError::InsufficientData { needed: 730, got: 10 })
        ));
    }
}
