//! Admission control over the aggregate working set of in-flight requests.

use crate::config::{ModelConfig, ModelKind};
use crate::error::{ForecastError, Result};
use crate::models::residual::FEATURES;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default budget shared by all requests of one engine: 2 GiB.
pub const DEFAULT_MEMORY_BUDGET: usize = 2 << 30;

const F64: usize = std::mem::size_of::<f64>();

/// A byte budget shared across threads.
///
/// Work reserves its estimated size up front and gets a [`Reservation`]
/// that hands the bytes back when dropped. A reservation that would push the
/// total past the budget is refused with `ResourceExhausted`.
#[derive(Debug, Clone)]
pub struct MemoryGovernor {
    budget: usize,
    in_use: Arc<AtomicUsize>,
}

impl MemoryGovernor {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.in_use())
    }

    /// Claim `bytes` or fail without claiming anything.
    pub fn reserve(&self, bytes: usize) -> Result<Reservation> {
        let mut current = self.in_use.load(Ordering::SeqCst);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|&next| next <= self.budget)
                .ok_or(ForecastError::ResourceExhausted {
                    requested: bytes,
                    available: self.budget.saturating_sub(current),
                })?;
            match self
                .in_use
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    return Ok(Reservation {
                        bytes,
                        in_use: Arc::clone(&self.in_use),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for MemoryGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }
}

/// Bytes held against a [`MemoryGovernor`] until dropped.
#[derive(Debug)]
pub struct Reservation {
    bytes: usize,
    in_use: Arc<AtomicUsize>,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// Working set of the cleaned request data: raw and cleaned copies of every
/// variable plus provenance.
pub fn request_bytes(points: usize, variables: usize) -> usize {
    points.saturating_mul(variables.max(1)).saturating_mul(3 * F64)
}

/// Rough peak working set of fitting and cross-validating one adapter on
/// `points` observations.
pub fn adapter_bytes(config: &ModelConfig, points: usize) -> usize {
    let periods = config.effective_periods().len();
    let per_point = match config.kind {
        ModelKind::SeasonalDecomposition => {
            let harmonics = config.hyper("fourier_order", 6.0).max(1.0) as usize;
            // State vector and its history.
            2 * (3 + 2 * harmonics * periods)
        }
        ModelKind::TrendHoliday => {
            let changepoints = config.hyper("changepoints", 25.0).max(0.0) as usize;
            let fourier = config.hyper("fourier_order", 10.0).max(1.0) as usize;
            // Design matrix, kept twice across the two fitting stages.
            2 * (2 + changepoints + 2 * fourier * periods)
        }
        ModelKind::Autoregressive => 8,
        ModelKind::SequenceLearning => {
            let look_back = config.hyper("look_back", 7.0).max(1.0) as usize;
            let hidden = config.hyper("hidden", 8.0).max(1.0) as usize;
            // Windows plus per-step gate activations kept for backpropagation.
            look_back * (1 + 6 * hidden)
        }
    };
    // Feature rows plus, per tree, a bootstrap sample and its nodes.
    let correction = config
        .residual_correction
        .as_ref()
        .map_or(0, |c| FEATURES.len() + 4 * c.n_trees);
    points.saturating_mul(per_point + correction).saturating_mul(F64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_release_on_drop() {
        let governor = MemoryGovernor::new(1000);
        let a = governor.reserve(600).unwrap();
        assert_eq!(governor.available(), 400);
        {
            let _b = governor.reserve(400).unwrap();
            assert_eq!(governor.available(), 0);
        }
        assert_eq!(governor.available(), 400);
        drop(a);
        assert_eq!(governor.in_use(), 0);
    }

    #[test]
    fn over_budget_is_refused() {
        let governor = MemoryGovernor::new(1000);
        let _held = governor.reserve(700).unwrap();
        let err = governor.reserve(400).unwrap_err();
        assert_eq!(
            err,
            ForecastError::ResourceExhausted {
                requested: 400,
                available: 300
            }
        );
        assert_eq!(governor.in_use(), 700);
    }

    #[test]
    fn clones_share_the_budget() {
        let governor = MemoryGovernor::new(100);
        let clone = governor.clone();
        let _r = clone.reserve(80).unwrap();
        assert!(governor.reserve(30).is_err());
    }

    #[test]
    fn concurrent_reservations_never_exceed_budget() {
        let governor = MemoryGovernor::new(10_000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = governor.clone();
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for _ in 0..100 {
                        if let Ok(r) = g.reserve(100) {
                            assert!(g.in_use() <= 10_000);
                            held.push(r);
                        }
                    }
                    held
                })
            })
            .collect();
        let held: Vec<Vec<Reservation>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(held.iter().map(Vec::len).sum::<usize>(), 100);
        drop(held);
        assert_eq!(governor.in_use(), 0);
    }

    #[test]
    fn sequence_model_estimate_grows_with_length() {
        let config = ModelConfig::new(ModelKind::SequenceLearning, [7], 7).unwrap();
        assert!(adapter_bytes(&config, 20_000) > adapter_bytes(&config, 1_000));
    }

    #[test]
    fn residual_correction_adds_to_the_estimate() {
        let plain = ModelConfig::new(ModelKind::Autoregressive, [7], 7).unwrap();
        let corrected = plain
            .clone()
            .with_residual_correction(crate::config::ResidualCorrectionConfig::default());
        assert!(adapter_bytes(&corrected, 1_000) > adapter_bytes(&plain, 1_000));
    }
}
