//! Data quality assessment and missing-value treatment.
//!
//! The assessor scores a raw [`TimeSeries`](crate::core::TimeSeries), puts it
//! on a contiguous daily calendar and fills gaps, yielding one cleaned
//! [`DailySeries`](crate::core::DailySeries) per variable.

mod assessor;
mod imputation;

pub use assessor::{assess, plausible_range, Assessment, CleanedData};
pub use imputation::{impute, ImputationCounts, Imputed};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptive statistics of one raw variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSummary {
    pub observed: usize,
    pub missing: usize,
    pub implausible: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub zeros: usize,
    pub negatives: usize,
}

/// Quality scores in `[0, 1]` with remediation advice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub timeliness: f64,
    /// `0.4·completeness + 0.25·consistency + 0.25·accuracy + 0.1·timeliness`
    pub overall: f64,
    pub recommendations: Vec<String>,
    pub variables: BTreeMap<String, VariableSummary>,
    /// Treatment applied to each variable's gaps.
    pub imputation: BTreeMap<String, ImputationCounts>,
    /// Dates added to make the calendar contiguous.
    pub inserted_dates: usize,
    /// Dominant cycle of the target variable, in days.
    pub dominant_period: Option<f64>,
}

impl QualityReport {
    pub(crate) const WEIGHTS: [f64; 4] = [0.4, 0.25, 0.25, 0.1];

    pub(crate) fn weighted(completeness: f64, consistency: f64, accuracy: f64, timeliness: f64) -> f64 {
        let [a, b, c, d] = Self::WEIGHTS;
        a * completeness + b * consistency + c * accuracy + d * timeliness
    }
}
