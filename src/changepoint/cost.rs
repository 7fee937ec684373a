//! Segment cost functions for changepoint detection.
//!
//! Costs are evaluated in O(1) per segment from prefix sums.

/// Segment cost model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostFunction {
    /// Sum of squared deviations from the segment mean (mean shifts).
    #[default]
    L2,
    /// Gaussian negative log-likelihood with segment mean and variance
    /// (joint mean/variance shifts).
    MeanVariance,
}

/// Prefix sums of `x` and `x²`.
#[derive(Debug, Clone)]
pub struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    pub fn new(series: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(series.len() + 1);
        let mut sum_sq = Vec::with_capacity(series.len() + 1);
        let (mut s, mut q) = (0.0, 0.0);
        sum.push(0.0);
        sum_sq.push(0.0);
        for &x in series {
            s += x;
            q += x * x;
            sum.push(s);
            sum_sq.push(q);
        }
        Self { sum, sum_sq }
    }

    /// Mean of `series[start..end]`.
    pub fn mean(&self, start: usize, end: usize) -> f64 {
        if end <= start {
            return f64::NAN;
        }
        (self.sum[end] - self.sum[start]) / (end - start) as f64
    }

    /// Residual sum of squares about the mean of `series[start..end]`.
    pub fn rss(&self, start: usize, end: usize) -> f64 {
        let n = (end - start) as f64;
        if n == 0.0 {
            return 0.0;
        }
        let s = self.sum[end] - self.sum[start];
        let q = self.sum_sq[end] - self.sum_sq[start];
        (q - s * s / n).max(0.0)
    }

    pub fn cost(&self, start: usize, end: usize, cost_fn: CostFunction) -> f64 {
        let rss = self.rss(start, end);
        match cost_fn {
            CostFunction::L2 => rss,
            CostFunction::MeanVariance => {
                let n = (end - start) as f64;
                // Floor keeps constant segments from producing -inf.
                let variance = (rss / n.max(1.0)).max(1e-8);
                n * (1.0 + variance.ln())
            }
        }
    }
}
