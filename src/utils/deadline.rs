//! Cooperative time budget shared between a task and its supervisor.

use crate::error::{ForecastError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A wall-clock budget plus a cancellation flag.
///
/// Iterative fitters poll [`Deadline::check`] between iterations. The
/// supervisor that gives up waiting calls [`Deadline::cancel`] so the worker
/// stops at its next poll instead of running to completion in the background.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// No time limit.
    pub fn none() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Expires `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A budget too large to represent is no limit at all.
    pub fn from_secs_f64(seconds: f64) -> Self {
        match Duration::try_from_secs_f64(seconds.max(0.0)) {
            Ok(budget) if Instant::now().checked_add(budget).is_some() => Self::after(budget),
            _ => Self::none(),
        }
    }

    /// Instant at which the budget runs out, `None` when unlimited.
    pub fn expires_at(&self) -> Option<Instant> {
        self.budget.and_then(|b| self.started.checked_add(b))
    }

    pub fn budget_secs(&self) -> f64 {
        self.budget.map(|b| b.as_secs_f64()).unwrap_or(f64::INFINITY)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancelled or past the budget.
    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || self.budget.is_some_and(|b| self.started.elapsed() >= b)
    }

    /// `Err(Timeout)` once the deadline has passed.
    pub fn check(&self, model: &str) -> Result<()> {
        if self.is_expired() {
            Err(ForecastError::Timeout {
                model: model.to_string(),
                seconds: self.budget_secs(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_deadline_never_expires() {
        let d = Deadline::none();
        assert!(!d.is_expired());
        assert!(d.check("arima").is_ok());
        assert!(d.expires_at().is_none());
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.is_expired());
        assert!(d.check("lstm").unwrap_err().is_timeout());
    }

    #[test]
    fn unrepresentable_budget_means_no_limit() {
        for seconds in [1e20, f64::MAX, f64::INFINITY] {
            let d = Deadline::from_secs_f64(seconds);
            assert!(!d.is_expired());
            assert!(d.expires_at().is_none());
            assert!(d.check("tbats").is_ok());
        }
    }

    #[test]
    fn fractional_budget_has_an_expiry() {
        let d = Deadline::from_secs_f64(0.5);
        assert!(d.expires_at().is_some());
        assert!((d.budget_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cancel_is_seen_by_clones() {
        let d = Deadline::after(Duration::from_secs(60));
        let worker = d.clone();
        assert!(!worker.is_expired());
        d.cancel();
        assert!(worker.is_expired());
    }
}
