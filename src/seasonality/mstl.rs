//! MSTL: STL extended to several seasonal periods (weekly and yearly cycles
//! in daily weather data).

use super::stl::{strength, Stl};
use crate::error::{ForecastError, Result};

/// Result of a multi-period decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiDecomposition {
    pub trend: Vec<f64>,
    /// One component per entry of `periods`.
    pub seasonal: Vec<Vec<f64>>,
    pub periods: Vec<usize>,
    pub remainder: Vec<f64>,
}

impl MultiDecomposition {
    /// Sum of all seasonal components.
    pub fn total_seasonal(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.trend.len()];
        for component in &self.seasonal {
            for (t, c) in total.iter_mut().zip(component) {
                *t += c;
            }
        }
        total
    }

    pub fn seasonal_strength(&self, period: usize) -> Option<f64> {
        let idx = self.periods.iter().position(|&p| p == period)?;
        Some(strength(&self.seasonal[idx], &self.remainder))
    }
}

/// Multi-period decomposer.
///
/// Periods that do not have two full cycles in the input are skipped rather
/// than failing the whole decomposition.
#[derive(Debug, Clone)]
pub struct Mstl {
    periods: Vec<usize>,
    iterations: usize,
    robust_iterations: usize,
}

impl Mstl {
    pub fn new(periods: impl IntoIterator<Item = usize>) -> Self {
        let mut periods: Vec<usize> = periods.into_iter().filter(|&p| p > 1).collect();
        periods.sort_unstable();
        periods.dedup();
        Self {
            periods,
            iterations: 2,
            robust_iterations: 0,
        }
    }

    pub fn with_iterations(mut self, n: usize) -> Self {
        self.iterations = n.max(1);
        self
    }

    pub fn robust(mut self, iterations: usize) -> Self {
        self.robust_iterations = iterations;
        self
    }

    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    fn stl(&self, period: usize) -> Stl {
        Stl::new(period).robust(self.robust_iterations)
    }

    pub fn decompose(&self, series: &[f64]) -> Result<MultiDecomposition> {
        let n = series.len();
        let periods: Vec<usize> = self.periods.iter().copied().filter(|&p| n >= 2 * p).collect();
        let longest = match periods.last() {
            Some(&p) => p,
            None => {
                let needed = 2 * self.periods.first().copied().unwrap_or(2);
                return Err(ForecastError::InsufficientData { needed, got: n });
            }
        };

        let mut seasonal = vec![vec![0.0; n]; periods.len()];
        let mut trend = vec![0.0; n];

        for _ in 0..self.iterations {
            let mut adjusted = series.to_vec();
            for component in &seasonal {
                for (a, s) in adjusted.iter_mut().zip(component) {
                    *a -= s;
                }
            }
            trend = self.stl(longest).decompose(&adjusted)?.trend;

            for (k, &period) in periods.iter().enumerate() {
                let mut target: Vec<f64> = series.iter().zip(&trend).map(|(y, t)| y - t).collect();
                for (other, component) in seasonal.iter().enumerate() {
                    if other != k {
                        for (a, s) in target.iter_mut().zip(component) {
                            *a -= s;
                        }
                    }
                }
                // The trend was already removed; only the seasonal part is kept.
                seasonal[k] = self.stl(period).decompose(&target)?.seasonal;
            }
        }

        let mut remainder: Vec<f64> = series.iter().zip(&trend).map(|(y, t)| y - t).collect();
        for component in &seasonal {
            for (r, s) in remainder.iter_mut().zip(component) {
                *r -= s;
            }
        }

        Ok(MultiDecomposition {
            trend,
            seasonal,
            periods,
            remainder,
        })
    }
}
