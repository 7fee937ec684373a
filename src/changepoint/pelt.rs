//! PELT (Pruned Exact Linear Time) changepoint search.
//!
//! Minimises `Σ cost(segment) + penalty · #changepoints` exactly, pruning
//! candidate last-changepoints that can never become optimal.

use super::cost::{CostFunction, PrefixSums};

/// Configuration for PELT algorithm.
#[derive(Debug, Clone)]
pub struct PeltConfig {
    pub cost_fn: CostFunction,
    /// Penalty per changepoint.
    pub penalty: f64,
    pub min_segment_length: usize,
}

impl Default for PeltConfig {
    fn default() -> Self {
        Self {
            cost_fn: CostFunction::L2,
            penalty: 1.0,
            min_segment_length: 2,
        }
    }
}

impl PeltConfig {
    /// BIC-style penalty `k · ln(n)`.
    pub fn with_log_penalty(n: usize, k: f64) -> Self {
        Self {
            penalty: k * (n.max(2) as f64).ln(),
            ..Default::default()
        }
    }

    pub fn cost_function(mut self, cost_fn: CostFunction) -> Self {
        self.cost_fn = cost_fn;
        self
    }

    pub fn penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn min_segment_length(mut self, min_len: usize) -> Self {
        self.min_segment_length = min_len.max(1);
        self
    }
}

/// Detected changepoints and the segments they delimit.
#[derive(Debug, Clone, PartialEq)]
pub struct PeltResult {
    /// Index of the first point of each new segment.
    pub changepoints: Vec<usize>,
    /// `[start, end)` pairs covering the series.
    pub segments: Vec<(usize, usize)>,
}

/// Detect changepoints in `series`.
pub fn pelt_detect(series: &[f64], config: &PeltConfig) -> PeltResult {
    let n = series.len();
    let min_len = config.min_segment_length.max(1);
    if n < 2 * min_len {
        return PeltResult {
            changepoints: Vec::new(),
            segments: vec![(0, n)],
        };
    }

    let sums = PrefixSums::new(series);
    let cost = |s: usize, t: usize| sums.cost(s, t, config.cost_fn);

    // f[t]: optimal penalised cost of series[0..t].
    let mut f = vec![f64::INFINITY; n + 1];
    f[0] = -config.penalty;
    let mut last = vec![0usize; n + 1];
    let mut candidates: Vec<usize> = vec![0];

    for t in min_len..=n {
        let mut best = (f64::INFINITY, 0);
        for &s in &candidates {
            if t - s >= min_len && f[s].is_finite() {
                let total = f[s] + cost(s, t) + config.penalty;
                if total < best.0 {
                    best = (total, s);
                }
            }
        }
        f[t] = best.0;
        last[t] = best.1;

        candidates.retain(|&s| t - s < min_len || f[s] + cost(s, t) <= f[t]);
        if t + min_len <= n {
            candidates.push(t);
        }
    }

    let mut changepoints = Vec::new();
    let mut t = n;
    while t > 0 {
        let prev = last[t];
        if prev > 0 {
            changepoints.push(prev);
        }
        t = prev;
    }
    changepoints.reverse();

    let mut segments = Vec::with_capacity(changepoints.len() + 1);
    let mut start = 0;
    for &cp in &changepoints {
        segments.push((start, cp));
        start = cp;
    }
    segments.push((start, n));

    PeltResult {
        changepoints,
        segments,
    }
}
