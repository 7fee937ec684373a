//! Anomaly detection for cleaned daily series.
//!
//! Seven detectors score every point of a variable independently:
//! - IQR fences, rolling Z-score and median/MAD modified Z-score
//! - seasonal residuals after an MSTL decomposition
//! - isolation forest and k-means cluster distance over multivariate rows
//! - shifts in level or spread found by PELT
//!
//! Each detector reports raw scores together with the raw value it treats
//! as its own cutoff. Scores are normalized with `raw / (raw + cutoff)`, so
//! every detector maps its cutoff to exactly 0.5. The suite fuses the
//! normalized scores by weighted mean and compares the fused severity with a
//! [`DynamicThreshold`] kept per variable in a request-scoped
//! [`DetectorState`].

mod changepoint;
mod cluster;
mod isolation;
mod outlier;
mod seasonal;
mod state;
mod suite;
mod threshold;

pub use changepoint::level_shift_scores;
pub use cluster::cluster_distance_scores;
pub use isolation::{average_path_length, isolation_scores, IsolationForest};
pub use outlier::{iqr_scores, modified_z_scores, rolling_z_scores};
pub use seasonal::seasonal_residual_scores;
pub use state::DetectorState;
pub use suite::{detect, fuse, score_variable, VariableScores};
pub use threshold::DynamicThreshold;

use crate::config::DetectorKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized score at which a detector counts as a contributor.
pub const CONTRIBUTOR_SCORE: f64 = 0.5;

/// Raw per-point scores of one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorScores {
    pub kind: DetectorKind,
    /// Non-negative; zero means unremarkable.
    pub raw: Vec<f64>,
    /// Raw score at which the detector itself calls a point anomalous.
    pub threshold: f64,
}

impl DetectorScores {
    pub fn new(kind: DetectorKind, raw: Vec<f64>, threshold: f64) -> Self {
        Self {
            kind,
            raw,
            threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Scores mapped into `[0, 1]`.
    pub fn normalized(&self) -> Vec<f64> {
        self.raw.iter().map(|&r| normalize(r, self.threshold)).collect()
    }

    /// Indices at or beyond the detector's own cutoff.
    pub fn flagged(&self) -> Vec<usize> {
        self.raw
            .iter()
            .enumerate()
            .filter(|(_, &r)| r >= self.threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

/// `raw / (raw + cutoff)`, with NaN and non-positive scores mapped to 0.
pub fn normalize(raw: f64, cutoff: f64) -> f64 {
    if raw.is_nan() || raw <= 0.0 {
        return 0.0;
    }
    if raw.is_infinite() {
        return 1.0;
    }
    raw / (raw + cutoff)
}

/// Urgency derived from a flag's fused severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

impl AlertLevel {
    pub fn from_severity(severity: f64) -> Self {
        if severity >= 0.8 {
            AlertLevel::High
        } else if severity >= 0.6 {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }
}

/// One anomalous observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub date: NaiveDate,
    pub variable: String,
    /// Fused severity in `[0, 1]`.
    pub severity: f64,
    /// Detectors whose normalized score reached [`CONTRIBUTOR_SCORE`].
    pub contributors: Vec<DetectorKind>,
    /// Dynamic threshold the severity exceeded.
    pub threshold: f64,
    pub level: AlertLevel,
}

impl AnomalyFlag {
    pub fn has_contributor(&self, kind: DetectorKind) -> bool {
        self.contributors.contains(&kind)
    }
}

/// Per-variable roll-up of the flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAnomalySummary {
    /// Points that were eligible for flagging.
    pub evaluated: usize,
    pub flags: usize,
    pub anomaly_rate: f64,
    pub max_severity: f64,
    /// Detectors that produced scores for this variable.
    pub detectors: Vec<DetectorKind>,
}

/// A detector that could not score a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorFailure {
    pub variable: String,
    pub detector: DetectorKind,
    pub error: crate::error::ForecastError,
}

/// Flags ordered by date then variable, plus per-variable summaries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnomalyReport {
    pub flags: Vec<AnomalyFlag>,
    pub summaries: BTreeMap<String, VariableAnomalySummary>,
    pub failures: Vec<DetectorFailure>,
}

impl AnomalyReport {
    pub fn flags_for<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a AnomalyFlag> + 'a {
        self.flags.iter().filter(move |f| f.variable == variable)
    }

    pub fn flag_on(&self, variable: &str, date: NaiveDate) -> Option<&AnomalyFlag> {
        self.flags
            .iter()
            .find(|f| f.variable == variable && f.date == date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cutoff_maps_to_one_half() {
        assert_relative_eq!(normalize(3.0, 3.0), 0.5);
        assert_relative_eq!(normalize(1.0, 3.0), 0.25);
        assert_eq!(normalize(0.0, 3.0), 0.0);
        assert_eq!(normalize(f64::NAN, 3.0), 0.0);
        assert_eq!(normalize(f64::INFINITY, 3.0), 1.0);
    }

    #[test]
    fn flagged_uses_raw_cutoff() {
        let scores = DetectorScores::new(DetectorKind::Iqr, vec![0.0, 1.5, 2.0, 1.0], 1.5);
        assert_eq!(scores.flagged(), vec![1, 2]);
        assert!(scores.normalized().iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn alert_levels() {
        assert_eq!(AlertLevel::from_severity(0.9), AlertLevel::High);
        assert_eq!(AlertLevel::from_severity(0.6), AlertLevel::Medium);
        assert_eq!(AlertLevel::from_severity(0.3), AlertLevel::Low);
    }
}
