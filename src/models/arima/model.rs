//! ARIMA (Autoregressive Integrated Moving Average) model.

use crate::core::{DailySeries, Forecast};
use crate::error::{ForecastError, Result};
use crate::models::arima::diff::{difference, integrate, integrate_weights};
use crate::models::Forecaster;
use crate::utils::deadline::Deadline;
use crate::utils::optimization::{nelder_mead_until, NelderMeadConfig};
use crate::utils::stats::z_for_level;

const NAME: &str = "ARIMA";

/// ARIMA model specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaSpec {
    /// AR order (p)
    pub p: usize,
    /// Differencing order (d)
    pub d: usize,
    /// MA order (q)
    pub q: usize,
}

impl ArimaSpec {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// Total number of parameters.
    pub fn num_params(&self) -> usize {
        self.p + self.q + 1
    }

    /// Shortest series the conditional sum of squares can be computed on.
    pub fn min_len(&self) -> usize {
        self.d + self.p.max(self.q) + 2
    }
}

impl Default for ArimaSpec {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

/// ARIMA(p, d, q) fitted by conditional sum of squares.
#[derive(Debug, Clone)]
pub struct Arima {
    spec: ArimaSpec,
    ar_coefficients: Vec<f64>,
    ma_coefficients: Vec<f64>,
    /// Mean of the differenced series.
    intercept: f64,
    original: Option<Vec<f64>>,
    differenced: Option<Vec<f64>>,
    /// Innovations on the differenced scale.
    innovations: Vec<f64>,
    /// One-step fitted values on the original scale.
    fitted: Option<Vec<f64>>,
    residuals: Option<Vec<f64>>,
    residual_variance: f64,
    aic: Option<f64>,
    deadline: Deadline,
}

impl Arima {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self {
            spec: ArimaSpec::new(p, d, q),
            ar_coefficients: vec![],
            ma_coefficients: vec![],
            intercept: 0.0,
            original: None,
            differenced: None,
            innovations: Vec::new(),
            fitted: None,
            residuals: None,
            residual_variance: 0.0,
            aic: None,
            deadline: Deadline::none(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn spec(&self) -> ArimaSpec {
        self.spec
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.ar_coefficients
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.ma_coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// One-step innovations of the ARMA recursion on the differenced series.
    fn innovations(
        diff_series: &[f64],
        p: usize,
        q: usize,
        ar: &[f64],
        ma: &[f64],
        intercept: f64,
    ) -> Vec<f64> {
        let n = diff_series.len();
        let start = p.max(q);
        let mut residuals = vec![0.0; n];
        for t in start..n {
            let mut pred = intercept;
            for i in 0..p {
                pred += ar[i] * (diff_series[t - 1 - i] - intercept);
            }
            for i in 0..q {
                pred += ma[i] * residuals[t - 1 - i];
            }
            residuals[t] = diff_series[t] - pred;
        }
        residuals
    }

    fn estimate_parameters(&mut self, diff_series: &[f64]) -> Result<()> {
        let p = self.spec.p;
        let q = self.spec.q;
        let mean = diff_series.iter().sum::<f64>() / diff_series.len() as f64;

        if p == 0 && q == 0 {
            self.intercept = mean;
            return Ok(());
        }

        let mut initial = vec![0.0; p + q + 1];
        initial[0] = mean;
        for i in 0..p {
            initial[1 + i] = 0.1 / (i + 1) as f64;
        }
        for i in 0..q {
            initial[1 + p + i] = 0.1 / (i + 1) as f64;
        }

        let mut bounds = vec![(f64::NEG_INFINITY, f64::INFINITY)];
        bounds.extend(std::iter::repeat((-0.99, 0.99)).take(p + q));

        let start = p.max(q);
        let objective = |params: &[f64]| {
            let residuals =
                Self::innovations(diff_series, p, q, &params[1..1 + p], &params[1 + p..], params[0]);
            let css: f64 = residuals[start..].iter().map(|r| r * r).sum();
            if css.is_finite() {
                css
            } else {
                f64::MAX
            }
        };

        let config = NelderMeadConfig {
            max_iter: 1000,
            tolerance: 1e-8,
            ..Default::default()
        };
        let result = nelder_mead_until(objective, &initial, Some(&bounds), config, &self.deadline);
        if result.interrupted {
            self.deadline.check(NAME)?;
        }

        self.intercept = result.optimal_point[0];
        self.ar_coefficients = result.optimal_point[1..1 + p].to_vec();
        self.ma_coefficients = result.optimal_point[1 + p..].to_vec();
        Ok(())
    }

    /// MA(∞) weights of the ARMA part, `psi[0] = 1`.
    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        let mut psi = vec![0.0; horizon];
        if horizon == 0 {
            return psi;
        }
        psi[0] = 1.0;
        for j in 1..horizon {
            let mut w = self.ma_coefficients.get(j - 1).copied().unwrap_or(0.0);
            for (i, phi) in self.ar_coefficients.iter().enumerate() {
                if j > i {
                    w += phi * psi[j - 1 - i];
                }
            }
            psi[j] = w;
        }
        psi
    }
}

impl Default for Arima {
    fn default() -> Self {
        let spec = ArimaSpec::default();
        Self::new(spec.p, spec.d, spec.q)
    }
}

impl Forecaster for Arima {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        let values = series.values();
        let min_len = self.spec.min_len();
        if values.len() < min_len {
            return Err(ForecastError::InsufficientData {
                needed: min_len,
                got: values.len(),
            });
        }

        let diff_series = difference(values, self.spec.d);
        self.estimate_parameters(&diff_series)?;

        let start = self.spec.p.max(self.spec.q);
        let innovations = Self::innovations(
            &diff_series,
            self.spec.p,
            self.spec.q,
            &self.ar_coefficients,
            &self.ma_coefficients,
            self.intercept,
        );
        let valid = &innovations[start..];
        let variance = valid.iter().map(|r| r * r).sum::<f64>() / valid.len() as f64;
        if !variance.is_finite() {
            return Err(ForecastError::fit(NAME, "non-finite residual variance"));
        }
        self.residual_variance = variance;

        let n_eff = valid.len() as f64;
        let ll = -0.5 * n_eff * (1.0 + variance.max(1e-300).ln() + (2.0 * std::f64::consts::PI).ln());
        self.aic = Some(-2.0 * ll + 2.0 * self.spec.num_params() as f64);

        // With d >= 1 the one-step error on the original scale equals the
        // innovation, so warm-up points are the only ones without a fit.
        let offset = self.spec.d + start;
        let mut fitted = values.to_vec();
        let mut residuals = vec![0.0; values.len()];
        for t in offset..values.len() {
            let e = innovations[t - self.spec.d];
            residuals[t] = e;
            fitted[t] = values[t] - e;
        }

        self.original = Some(values.to_vec());
        self.differenced = Some(diff_series);
        self.innovations = innovations;
        self.fitted = Some(fitted);
        self.residuals = Some(residuals);
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        let original = self.original.as_ref().ok_or(ForecastError::FitRequired)?;
        let diff_series = self.differenced.as_ref().ok_or(ForecastError::FitRequired)?;

        let p = self.spec.p;
        let q = self.spec.q;
        let mut extended_diff = diff_series.clone();
        let mut extended_residuals = self.innovations.clone();

        for _ in 0..horizon {
            let t = extended_diff.len();
            let mut pred = self.intercept;
            for i in 0..p {
                if t > i {
                    pred += self.ar_coefficients[i] * (extended_diff[t - 1 - i] - self.intercept);
                }
            }
            for i in 0..q {
                if t > i {
                    pred += self.ma_coefficients[i] * extended_residuals[t - 1 - i];
                }
            }
            extended_diff.push(pred);
            extended_residuals.push(0.0);
        }

        let forecast_diff = &extended_diff[diff_series.len()..];
        Ok(Forecast::from_values(integrate(
            forecast_diff,
            original,
            self.spec.d,
        )))
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        let forecast = self.predict(horizon)?;
        let z = z_for_level(level);

        let psi = integrate_weights(&self.psi_weights(horizon), self.spec.d);
        let mut cumulative = 0.0;
        let sds: Vec<f64> = psi
            .iter()
            .map(|w| {
                cumulative += w * w;
                (self.residual_variance * cumulative).sqrt()
            })
            .collect();

        Ok(Forecast::with_symmetric_intervals(
            forecast.point().to_vec(),
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
