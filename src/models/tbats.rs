//! Trigonometric seasonal state-space model (TBATS-style).
//!
//! State vector: `x = [level, trend, s1_cos, s1_sin, s2_cos, s2_sin, ...]`.
//! Observation: `y = level + phi * trend + Σ cos states`. Each harmonic pair
//! rotates by `2πj/m` per step and is corrected by `gamma_one` (cos) and
//! `gamma_two` (sin) times the one-step error.
//!
//! Initial states come from a joint trend + Fourier regression, so long
//! periods such as 365 are represented from the first observation instead of
//! having to be learnt through the smoothing gains.

use crate::core::{DailySeries, Forecast};
use crate::error::{ForecastError, Result};
use crate::models::Forecaster;
use crate::utils::deadline::Deadline;
use crate::utils::linalg::{predict_rows, ridge_fit};
use crate::utils::optimization::{nelder_mead_until, NelderMeadConfig};
use crate::utils::stats::z_for_level;
use std::f64::consts::PI;

const NAME: &str = "TBATS";

/// Trigonometric seasonal exponential smoothing.
#[derive(Debug, Clone)]
pub struct Tbats {
    seasonal_periods: Vec<usize>,
    /// Harmonics per period, chosen by AIC up to `max_harmonics`.
    fourier_k: Vec<usize>,
    max_harmonics: usize,
    use_damped_trend: bool,
    phi: f64,
    alpha: f64,
    beta: f64,
    gamma_one: Vec<f64>,
    gamma_two: Vec<f64>,
    initial_state: Vec<f64>,
    /// State after filtering the whole sample.
    state: Vec<f64>,
    fitted: Option<Vec<f64>>,
    residuals: Option<Vec<f64>>,
    sigma2: f64,
    aic: Option<f64>,
    deadline: Deadline,
}

impl Tbats {
    /// Create a model for the given seasonal periods (periods <= 1 are ignored).
    pub fn new(seasonal_periods: Vec<usize>) -> Self {
        let seasonal_periods: Vec<usize> =
            seasonal_periods.into_iter().filter(|&p| p > 1).collect();
        let n_periods = seasonal_periods.len();
        Self {
            seasonal_periods,
            fourier_k: vec![1; n_periods],
            max_harmonics: 6,
            use_damped_trend: false,
            phi: 1.0,
            alpha: 0.09,
            beta: 0.05,
            gamma_one: vec![0.0; n_periods],
            gamma_two: vec![0.0; n_periods],
            initial_state: Vec::new(),
            state: Vec::new(),
            fitted: None,
            residuals: None,
            sigma2: 1.0,
            aic: None,
            deadline: Deadline::none(),
        }
    }

    /// Upper bound on harmonics tried per period.
    pub fn with_max_harmonics(mut self, k: usize) -> Self {
        self.max_harmonics = k.max(1);
        self
    }

    /// Enable damped trend (phi estimated in [0.8, 0.999]).
    pub fn with_damped_trend(mut self) -> Self {
        self.use_damped_trend = true;
        self.phi = 0.98;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Selected harmonics per period.
    pub fn fourier_k(&self) -> &[usize] {
        &self.fourier_k
    }

    /// Maximum number of harmonics for a given period.
    fn harmonic_limit(period: usize) -> usize {
        (period / 2).max(1)
    }

    fn tau(&self) -> usize {
        self.fourier_k.iter().map(|&k| 2 * k).sum()
    }

    fn state_dim(&self) -> usize {
        2 + self.tau()
    }

    /// Design rows `[1, t, cos/sin terms...]` for the given harmonics.
    fn design(n: usize, periods: &[usize], ks: &[usize]) -> Vec<Vec<f64>> {
        (0..n)
            .map(|t| {
                let mut row = vec![1.0, t as f64];
                for (&m, &k) in periods.iter().zip(ks) {
                    for j in 1..=k {
                        let angle = 2.0 * PI * j as f64 * t as f64 / m as f64;
                        row.push(angle.cos());
                        row.push(angle.sin());
                    }
                }
                row
            })
            .collect()
    }

    /// Pick harmonics per period by AIC on the regression, then seed states.
    fn initialize(&mut self, values: &[f64]) -> Result<()> {
        let n = values.len();
        let mut ks = vec![1; self.seasonal_periods.len()];

        for i in 0..self.seasonal_periods.len() {
            let limit = Self::harmonic_limit(self.seasonal_periods[i]).min(self.max_harmonics);
            let mut best_k = 1;
            let mut best_aic = f64::INFINITY;
            for k in 1..=limit {
                ks[i] = k;
                let design = Self::design(n, &self.seasonal_periods, &ks);
                let width = design[0].len();
                if width + 2 >= n {
                    break;
                }
                let beta = ridge_fit(&design, values, &vec![1e-6; width])?;
                let fitted = predict_rows(&design, &beta);
                let sse: f64 = values.iter().zip(&fitted).map(|(y, f)| (y - f).powi(2)).sum();
                let aic = n as f64 * (sse.max(1e-12) / n as f64).ln() + 2.0 * width as f64;
                if aic < best_aic {
                    best_aic = aic;
                    best_k = k;
                }
            }
            ks[i] = best_k;
        }
        self.fourier_k = ks;

        let design = Self::design(n, &self.seasonal_periods, &self.fourier_k);
        let width = design[0].len();
        let beta = ridge_fit(&design, values, &vec![1e-6; width])?;

        // Regression coefficients of cos/sin at t=0 are exactly the initial
        // rotating states; intercept and slope seed level and trend.
        self.initial_state = beta;
        self.initial_state[0] -= self.initial_state[1];
        debug_assert_eq!(self.initial_state.len(), self.state_dim());
        Ok(())
    }

    /// Observation from a state vector.
    fn observe(&self, state: &[f64], phi: f64) -> f64 {
        let mut y = state[0] + phi * state[1];
        let mut pos = 2;
        for &k in &self.fourier_k {
            for j in 0..k {
                y += state[pos + 2 * j];
            }
            pos += 2 * k;
        }
        y
    }

    /// Advance a state one step with error correction.
    fn transition(&self, state: &mut [f64], params: &Params, error: f64) {
        let level = state[0];
        let trend = state[1];
        state[0] = level + params.phi * trend + params.alpha * error;
        state[1] = params.phi * trend + params.beta * error;

        let mut pos = 2;
        for (idx, &k) in self.fourier_k.iter().enumerate() {
            let m = self.seasonal_periods[idx] as f64;
            let g1 = params.gamma_one[idx];
            let g2 = params.gamma_two[idx];
            for j in 0..k {
                let freq = 2.0 * PI * (j + 1) as f64 / m;
                let (sin_f, cos_f) = freq.sin_cos();
                let c = state[pos + 2 * j];
                let s = state[pos + 2 * j + 1];
                state[pos + 2 * j] = cos_f * c + sin_f * s + g1 * error;
                state[pos + 2 * j + 1] = -sin_f * c + cos_f * s + g2 * error;
            }
            pos += 2 * k;
        }
    }

    /// Run the filter; returns (sse, final state, fitted).
    fn run_filter(&self, values: &[f64], params: &Params) -> (f64, Vec<f64>, Vec<f64>) {
        let mut state = self.initial_state.clone();
        let mut fitted = Vec::with_capacity(values.len());
        let mut sse = 0.0;
        for &y in values {
            let predicted = self.observe(&state, params.phi);
            let error = y - predicted;
            fitted.push(predicted);
            sse += error * error;
            self.transition(&mut state, params, error);
        }
        (sse, state, fitted)
    }

    fn unpack(&self, point: &[f64]) -> Params {
        let n_periods = self.seasonal_periods.len();
        let mut idx = 2;
        let phi = if self.use_damped_trend {
            idx += 1;
            point[2]
        } else {
            1.0
        };
        Params {
            alpha: point[0],
            beta: point[1],
            phi,
            gamma_one: point[idx..idx + n_periods].to_vec(),
            gamma_two: point[idx + n_periods..idx + 2 * n_periods].to_vec(),
        }
    }

    fn optimize_parameters(&self, values: &[f64]) -> Result<Params> {
        let n_periods = self.seasonal_periods.len();
        let mut initial = vec![self.alpha, self.beta];
        let mut bounds = vec![(0.001, 0.999), (0.0, 0.5)];
        if self.use_damped_trend {
            initial.push(0.98);
            bounds.push((0.8, 0.999));
        }
        for _ in 0..2 * n_periods {
            initial.push(0.0);
            bounds.push((-0.1, 0.1));
        }

        let n = values.len() as f64;
        let objective = |point: &[f64]| {
            let params = self.unpack(point);
            let (sse, _, _) = self.run_filter(values, &params);
            let mse = sse / n;
            if mse.is_finite() {
                mse
            } else {
                f64::MAX
            }
        };

        let config = NelderMeadConfig {
            max_iter: 300,
            tolerance: 1e-8,
            ..Default::default()
        };
        let result = nelder_mead_until(objective, &initial, Some(&bounds), config, &self.deadline);
        if result.interrupted {
            self.deadline.check(NAME)?;
        }
        Ok(self.unpack(&result.optimal_point))
    }

    /// Number of estimated parameters for AIC.
    fn n_parameters(&self) -> usize {
        let smoothing = 2 + usize::from(self.use_damped_trend) + 2 * self.seasonal_periods.len();
        smoothing + self.state_dim() + 1
    }
}

struct Params {
    alpha: f64,
    beta: f64,
    phi: f64,
    gamma_one: Vec<f64>,
    gamma_two: Vec<f64>,
}

impl Forecaster for Tbats {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        let values = series.values();
        let max_period = self.seasonal_periods.iter().max().copied().unwrap_or(4);
        let needed = (2 * max_period).max(8);
        if values.len() < needed {
            return Err(ForecastError::InsufficientData {
                needed,
                got: values.len(),
            });
        }

        self.initialize(values)?;
        self.deadline.check(NAME)?;
        let params = self.optimize_parameters(values)?;

        let (sse, final_state, fitted) = self.run_filter(values, &params);
        if !sse.is_finite() {
            return Err(ForecastError::fit(NAME, "state-space filter diverged"));
        }

        let n = values.len();
        self.alpha = params.alpha;
        self.beta = params.beta;
        self.phi = params.phi;
        self.gamma_one = params.gamma_one;
        self.gamma_two = params.gamma_two;
        self.state = final_state;
        self.sigma2 = sse / n as f64;

        let log_likelihood = -0.5 * n as f64 * (1.0 + (2.0 * PI * self.sigma2.max(1e-300)).ln());
        self.aic = Some(-2.0 * log_likelihood + 2.0 * self.n_parameters() as f64);

        self.residuals = Some(values.iter().zip(&fitted).map(|(y, f)| y - f).collect());
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        if self.fitted.is_none() {
            return Err(ForecastError::FitRequired);
        }

        let params = Params {
            alpha: 0.0,
            beta: 0.0,
            phi: self.phi,
            gamma_one: vec![0.0; self.seasonal_periods.len()],
            gamma_two: vec![0.0; self.seasonal_periods.len()],
        };
        let mut state = self.state.clone();
        let mut predictions = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            predictions.push(self.observe(&state, self.phi));
            self.transition(&mut state, &params, 0.0);
        }
        Ok(Forecast::from_values(predictions))
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        let point = self.predict(horizon)?;
        let z = z_for_level(level);
        let sd = self.sigma2.sqrt();

        // Variance of a local level/trend forecast grows roughly with the
        // accumulated level gain.
        let sds: Vec<f64> = (1..=horizon)
            .map(|h| sd * (1.0 + (h as f64 - 1.0) * self.alpha * self.alpha).sqrt())
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
    use chrono::NaiveDate;
    use std::time::Duration;

    fn weekly_series(n: usize) -> DailySeries {
        let values: Vec<f64> = (0..n)
            .map(|i| {
                let weekly = 4.0 * (2.0 * PI * i as f64 / 7.0).sin();
                let noise = ((i * 17) % 7) as f64 * 0.05;
                15.0 + 0.01 * i as f64 + weekly + noise
            })
            .collect();
        DailySeries::observed(
            "temperature",
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn tbats_tracks_weekly_cycle() {
        let series = weekly_series(140);
        let mut model = Tbats::new(vec![7]);
        model.fit(&series).unwrap();

        assert!(model.is_fitted());
        assert!(model.aic().is_some());

        let forecast = model.predict(7).unwrap();
        assert_eq!(forecast.horizon(), 7);
        for (h, &p) in forecast.point().iter().enumerate() {
            let i = 140 + h;
            let expected = 15.0 + 0.01 * i as f64 + 4.0 * (2.0 * PI * i as f64 / 7.0).sin();
            assert_relative_eq!(p, expected, epsilon = 1.5);
        }
    }

    #[test]
    fn tbats_intervals_bracket_and_widen() {
        let series = weekly_series(100);
        let mut model = Tbats::new(vec![7]).with_damped_trend();
        model.fit(&series).unwrap();

        let forecast = model.predict_with_intervals(10, 0.95).unwrap();
        let lower = forecast.lower().unwrap();
        let upper = forecast.upper().unwrap();
        for h in 0..10 {
            assert!(lower[h] <= forecast.point()[h]);
            assert!(forecast.point()[h] <= upper[h]);
        }
        assert!(upper[9] - lower[9] >= upper[0] - lower[0]);
    }

    #[test]
    fn tbats_requires_two_cycles() {
        let series = weekly_series(20);
        let mut model = Tbats::new(vec![14]);
        assert!(matches!(
            model.fit(&series),
            Err(ForecastError::InsufficientData { needed: 28, got: 20 })
        ));
    }

    #[test]
    fn tbats_predict_before_fit_fails() {
        let model = Tbats::new(vec![7]);
        assert!(matches!(model.predict(3), Err(ForecastError::FitRequired)));
    }

    #[test]
    fn tbats_respects_expired_deadline() {
        let series = weekly_series(100);
        let mut model = Tbats::new(vec![7]).with_deadline(Deadline::after(Duration::ZERO));
        let err = model.fit(&series).unwrap_err();
        assert!(err.is_timeout());
    }
}
