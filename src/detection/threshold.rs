//! Adaptive cutoff over the trailing distribution of fused severities.

use crate::config::ThresholdConfig;
use std::collections::VecDeque;

/// Smallest standard deviation used for the threshold.
const MIN_SPREAD: f64 = 0.01;

/// Threshold `μ + z·σ` of the last `window` fused severities.
///
/// Until `cold_start_min` severities have been observed the fixed
/// `fallback` applies. Once warm, the engine stays warm.
#[derive(Debug, Clone)]
pub struct DynamicThreshold {
    config: ThresholdConfig,
    window: VecDeque<f64>,
    observed: usize,
    warm: bool,
}

impl DynamicThreshold {
    pub fn new(config: ThresholdConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
            observed: 0,
            warm: false,
        }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Severities observed in total.
    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// Population mean and standard deviation of the trailing window.
    pub fn window_stats(&self) -> Option<(f64, f64)> {
        if self.window.is_empty() {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let var = self.window.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Some((mean, var.sqrt()))
    }

    /// The cutoff the next severity is compared against.
    pub fn current(&self) -> f64 {
        if !self.warm {
            return self.config.fallback;
        }
        match self.window_stats() {
            Some((mean, sd)) => mean + self.config.z * sd.max(MIN_SPREAD),
            None => self.config.fallback,
        }
    }

    /// Add a severity to the trailing window.
    pub fn observe(&mut self, severity: f64) {
        if !severity.is_finite() {
            return;
        }
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(severity);
        self.observed += 1;
        if self.window.len() >= self.config.cold_start_min {
            self.warm = true;
        }
    }

    /// Compare `severity` with the current cutoff, then fold it into the
    /// window. Returns the cutoff used and whether it was exceeded.
    pub fn evaluate(&mut self, severity: f64) -> (f64, bool) {
        let threshold = self.current();
        let exceeded = severity > threshold;
        self.observe(severity);
        (threshold, exceeded)
    }

    /// Forget all history and return to cold start.
    pub fn reset(&mut self) {
        self.window.clear();
        self.observed = 0;
        self.warm = false;
    }
}
