//! Cleaned univariate daily series used by models and detectors.

use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Where a value in a cleaned series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    Observed,
    /// Linear interpolation across a short gap.
    Interpolated,
    /// Seasonal phase mean substituted into a longer gap.
    SeasonalMean,
    /// Gap too long to impute. The stored value is a linear bridge kept only
    /// so models see a continuous input; detectors never flag these points.
    StillMissing,
}

impl Provenance {
    pub fn is_imputed(self) -> bool {
        !matches!(self, Provenance::Observed)
    }
}

/// A contiguous, fully populated daily series for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    variable: String,
    start: NaiveDate,
    values: Vec<f64>,
    provenance: Vec<Provenance>,
}

impl DailySeries {
    pub fn new(
        variable: impl Into<String>,
        start: NaiveDate,
        values: Vec<f64>,
        provenance: Vec<Provenance>,
    ) -> Result<Self> {
        if values.len() != provenance.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: values.len(),
                got: provenance.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ComputationError(
                "cleaned series contains non-finite values".to_string(),
            ));
        }
        Ok(Self {
            variable: variable.into(),
            start,
            values,
            provenance,
        })
    }

    /// A fully observed series.
    pub fn observed(variable: impl Into<String>, start: NaiveDate, values: Vec<f64>) -> Result<Self> {
        let provenance = vec![Provenance::Observed; values.len()];
        Self::new(variable, start, values, provenance)
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn provenance(&self) -> &[Provenance] {
        &self.provenance
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    /// Date of the last value; the start date for an empty series.
    pub fn last_date(&self) -> NaiveDate {
        self.date_at(self.len().saturating_sub(1))
    }

    /// Whether the point at `index` may be flagged as an anomaly.
    pub fn is_flaggable(&self, index: usize) -> bool {
        self.provenance
            .get(index)
            .is_some_and(|p| *p != Provenance::StillMissing)
    }

    /// Create a new series from the range `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<DailySeries> {
        if start > end || end > self.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.len(),
                got: end,
            });
        }
        Ok(Self {
            variable: self.variable.clone(),
            start: self.date_at(start),
            values: self.values[start..end].to_vec(),
            provenance: self.provenance[start..end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 30).unwrap()
    }

    #[test]
    fn slice_shifts_start_date() {
        let s = DailySeries::observed("temperature", start(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let sub = s.slice(1, 3).unwrap();
        assert_eq!(sub.values(), &[2.0, 3.0]);
        assert_eq!(sub.start(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(sub.last_date(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(s.slice(3, 5).is_err());
    }

    #[test]
    fn still_missing_points_are_not_flaggable() {
        let s = DailySeries::new(
            "temperature",
            start(),
            vec![1.0, 2.0],
            vec![Provenance::Observed, Provenance::StillMissing],
        )
        .unwrap();
        assert!(s.is_flaggable(0));
        assert!(!s.is_flaggable(1));
        assert!(!s.is_flaggable(2));
    }

    #[test]
    fn rejects_non_finite_values() {
        assert!(DailySeries::observed("t", start(), vec![1.0, f64::INFINITY]).is_err());
    }
}
