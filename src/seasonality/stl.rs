//! STL (Seasonal-Trend decomposition using LOESS).
//!
//! Splits a daily series into trend, one seasonal cycle and remainder. The
//! seasonal-residual anomaly detector scores the remainder.

use crate::error::{ForecastError, Result};
use crate::utils::stats::{median, variance};

/// Trend + seasonal + remainder, each the length of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub remainder: Vec<f64>,
}

impl Decomposition {
    /// `1 - Var(R) / Var(S + R)`, clamped to `[0, 1]`.
    pub fn seasonal_strength(&self) -> f64 {
        strength(&self.seasonal, &self.remainder)
    }

    /// `1 - Var(R) / Var(T + R)`, clamped to `[0, 1]`.
    pub fn trend_strength(&self) -> f64 {
        strength(&self.trend, &self.remainder)
    }
}

pub(crate) fn strength(component: &[f64], remainder: &[f64]) -> f64 {
    let combined: Vec<f64> = component.iter().zip(remainder).map(|(c, r)| c + r).collect();
    let var_combined = variance(&combined);
    if var_combined < 1e-10 {
        return 0.0;
    }
    (1.0 - variance(remainder) / var_combined).clamp(0.0, 1.0)
}

fn odd(n: usize) -> usize {
    n | 1
}

/// STL decomposer for one seasonal period.
#[derive(Debug, Clone)]
pub struct Stl {
    period: usize,
    seasonal_span: usize,
    trend_span: usize,
    low_pass_span: usize,
    inner_iterations: usize,
    robust_iterations: usize,
}

impl Stl {
    /// Cleveland et al. (1990) default spans for `period`.
    pub fn new(period: usize) -> Self {
        let period = period.max(2);
        let trend = (1.5 * period as f64 / (1.0 - 1.5 / (period as f64).max(2.0))).ceil();
        Self {
            period,
            seasonal_span: odd(period),
            trend_span: odd(trend.max(3.0) as usize),
            low_pass_span: odd(period),
            inner_iterations: 2,
            robust_iterations: 0,
        }
    }

    pub fn with_seasonal_span(mut self, span: usize) -> Self {
        self.seasonal_span = odd(span);
        self
    }

    pub fn with_trend_span(mut self, span: usize) -> Self {
        self.trend_span = odd(span);
        self
    }

    /// Downweight outliers with bisquare weights over `iterations` passes.
    pub fn robust(mut self, iterations: usize) -> Self {
        self.robust_iterations = iterations;
        self
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Decompose `series`; needs at least two full cycles.
    pub fn decompose(&self, series: &[f64]) -> Result<Decomposition> {
        let n = series.len();
        if n < 2 * self.period {
            return Err(ForecastError::InsufficientData {
                needed: 2 * self.period,
                got: n,
            });
        }

        let mut seasonal = vec![0.0; n];
        let mut trend = vec![0.0; n];
        let mut weights = vec![1.0; n];

        for pass in 0..=self.robust_iterations {
            for _ in 0..self.inner_iterations {
                let detrended: Vec<f64> = series.iter().zip(&trend).map(|(y, t)| y - t).collect();
                let cycles = self.smooth_cycle_subseries(&detrended, &weights);
                let low_pass = self.low_pass(&cycles);
                for i in 0..n {
                    seasonal[i] = cycles[i] - low_pass[i];
                }
                let adjusted: Vec<f64> = series.iter().zip(&seasonal).map(|(y, s)| y - s).collect();
                trend = tricube_smooth(&adjusted, self.trend_span, &weights);
            }
            if pass < self.robust_iterations {
                weights = bisquare_weights(&remainder(series, &trend, &seasonal));
            }
        }

        Ok(Decomposition {
            remainder: remainder(series, &trend, &seasonal),
            trend,
            seasonal,
        })
    }

    fn smooth_cycle_subseries(&self, detrended: &[f64], weights: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; detrended.len()];
        for phase in 0..self.period {
            let idx: Vec<usize> = (phase..detrended.len()).step_by(self.period).collect();
            let vals: Vec<f64> = idx.iter().map(|&i| detrended[i]).collect();
            let w: Vec<f64> = idx.iter().map(|&i| weights[i]).collect();
            for (&i, v) in idx.iter().zip(tricube_smooth(&vals, self.seasonal_span, &w)) {
                out[i] = v;
            }
        }
        out
    }

    /// MA(period) ∘ MA(period) ∘ MA(3) followed by a LOESS pass.
    fn low_pass(&self, series: &[f64]) -> Vec<f64> {
        let ma = moving_average(&moving_average(&moving_average(series, self.period), self.period), 3);
        tricube_smooth(&ma, self.low_pass_span, &vec![1.0; series.len()])
    }
}

fn remainder(series: &[f64], trend: &[f64], seasonal: &[f64]) -> Vec<f64> {
    series
        .iter()
        .zip(trend)
        .zip(seasonal)
        .map(|((y, t), s)| y - t - s)
        .collect()
}

/// Centred moving average, truncated at the ends.
pub(crate) fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            series[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Locally weighted mean with tricube kernel of width `span`.
fn tricube_smooth(values: &[f64], span: usize, weights: &[f64]) -> Vec<f64> {
    let n = values.len();
    let half = span / 2;
    let reach = half as f64 + 1.0;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            let (mut sw, mut sv) = (0.0, 0.0);
            for j in start..end {
                let u = (i as f64 - j as f64).abs() / reach;
                let w = (1.0 - u.powi(3)).powi(3) * weights[j];
                sw += w;
                sv += w * values[j];
            }
            if sw > 0.0 {
                sv / sw
            } else {
                values[i]
            }
        })
        .collect()
}

fn bisquare_weights(remainder: &[f64]) -> Vec<f64> {
    let abs: Vec<f64> = remainder.iter().map(|r| r.abs()).collect();
    let h = 6.0 * median(&abs);
    remainder
        .iter()
        .map(|r| {
            if h < 1e-10 {
                return 1.0;
            }
            let u = r.abs() / h;
            if u < 1.0 {
                (1.0 - u * u).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn weekly(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 10.0 + 0.1 * i as f64 + 3.0 * (2.0 * PI * i as f64 / 7.0).sin())
            .collect()
    }

    #[test]
    fn components_sum_to_series() {
        let series = weekly(70);
        let d = Stl::new(7).decompose(&series).unwrap();
        for i in 0..series.len() {
            let total = d.trend[i] + d.seasonal[i] + d.remainder[i];
            assert!((total - series[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn detects_weekly_cycle() {
        let d = Stl::new(7).decompose(&weekly(140)).unwrap();
        assert!(d.seasonal_strength() > 0.8);
        assert!(d.trend_strength() > 0.8);
    }

    #[test]
    fn robust_pass_isolates_spike() {
        let mut series = weekly(140);
        series[70] += 40.0;
        let d = Stl::new(7).robust(4).decompose(&series).unwrap();
        let spike = d.remainder[70].abs();
        let others = d
            .remainder
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 70)
            .map(|(_, r)| r.abs())
            .fold(0.0, f64::max);
        assert!(spike > 5.0 * others.max(1e-6) || spike > 30.0);
    }

    #[test]
    fn needs_two_cycles() {
        assert!(matches!(
            Stl::new(7).decompose(&weekly(10)),
            Err(ForecastError::InsufficientData { needed: 14, got: 10 })
        ));
    }

    #[test]
    fn moving_average_truncates_at_edges() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(ma, vec![1.5, 2.0, 3.0, 3.5]);
    }
}
