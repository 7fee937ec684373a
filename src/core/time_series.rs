//! Date-indexed weather series with explicit missing values.

use crate::error::{ForecastError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A daily multivariate weather series as supplied by the caller.
///
/// Dates are strictly increasing and unique. Every variable holds exactly one
/// slot per date; a missing observation is `None`, never an omitted row, so
/// calendar alignment survives across variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Optional caller-supplied identity (station id, location key).
    id: Option<String>,
    dates: Vec<NaiveDate>,
    variables: Vec<String>,
    /// Column-major: values[variable][observation].
    values: Vec<Vec<Option<f64>>>,
}

/// Builder for constructing a [`TimeSeries`] one variable at a time.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesBuilder {
    id: Option<String>,
    dates: Vec<NaiveDate>,
    variables: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
}

impl TimeSeriesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn dates(mut self, dates: Vec<NaiveDate>) -> Self {
        self.dates = dates;
        self
    }

    /// Consecutive daily dates starting at `start`.
    pub fn daily_from(mut self, start: NaiveDate, len: usize) -> Self {
        self.dates = (0..len).map(|i| start + Duration::days(i as i64)).collect();
        self
    }

    /// Add a fully observed variable.
    pub fn variable(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.variables.push(name.into());
        self.values.push(values.into_iter().map(Some).collect());
        self
    }

    /// Add a variable whose gaps are marked with `None`.
    pub fn variable_with_gaps(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        self.variables.push(name.into());
        self.values.push(values);
        self
    }

    pub fn build(self) -> Result<TimeSeries> {
        TimeSeries::new(self.id, self.dates, self.variables, self.values)
    }
}

impl TimeSeries {
    /// Create a new series, validating the date index and column lengths.
    ///
    /// Non-finite values are normalised to `None`.
    pub fn new(
        id: Option<String>,
        dates: Vec<NaiveDate>,
        variables: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        for w in dates.windows(2) {
            if w[1] <= w[0] {
                return Err(ForecastError::TimestampError(format!(
                    "dates must be strictly increasing ({} follows {})",
                    w[1], w[0]
                )));
            }
        }

        if variables.len() != values.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: variables.len(),
                got: values.len(),
            });
        }

        for (i, name) in variables.iter().enumerate() {
            if variables[..i].contains(name) {
                return Err(ForecastError::InvalidConfig(format!(
                    "duplicate variable name '{name}'"
                )));
            }
        }

        let values = values
            .into_iter()
            .map(|column| {
                if column.len() != dates.len() {
                    return Err(ForecastError::DimensionMismatch {
                        expected: dates.len(),
                        got: column.len(),
                    });
                }
                Ok(column
                    .into_iter()
                    .map(|v| v.filter(|x| x.is_finite()))
                    .collect())
            })
            .collect::<Result<Vec<Vec<Option<f64>>>>>()?;

        Ok(Self {
            id,
            dates,
            variables,
            values,
        })
    }

    /// Create a single-variable series from consecutive daily observations.
    pub fn daily(start: NaiveDate, variable: &str, values: Vec<f64>) -> Result<Self> {
        TimeSeriesBuilder::new()
            .daily_from(start, values.len())
            .variable(variable, values)
            .build()
    }

    pub fn builder() -> TimeSeriesBuilder {
        TimeSeriesBuilder::new()
    }

    /// Get the number of observations.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Check if the series is empty.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Variable names in column order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.variables
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| ForecastError::UnknownVariable(name.to_string()))
    }

    /// Values of one variable, `None` where missing.
    pub fn values(&self, name: &str) -> Result<&[Option<f64>]> {
        let idx = self.index_of(name)?;
        Ok(&self.values[idx])
    }

    /// Number of missing slots for a variable.
    pub fn missing_count(&self, name: &str) -> Result<usize> {
        Ok(self.values(name)?.iter().filter(|v| v.is_none()).count())
    }

    /// Number of calendar days spanned, inclusive of both ends.
    pub fn calendar_span(&self) -> usize {
        match (self.first_date(), self.last_date()) {
            (Some(first), Some(last)) => (last - first).num_days() as usize + 1,
            _ => 0,
        }
    }

    /// Whether every day between the first and last date is present.
    pub fn is_contiguous(&self) -> bool {
        self.calendar_span() == self.len()
    }

    /// Reindex onto a contiguous daily calendar.
    ///
    /// Skipped dates become explicit missing rows; existing rows are kept
    /// untouched. Returns the new series and the number of inserted rows.
    pub fn to_daily_calendar(&self) -> (TimeSeries, usize) {
        if self.is_contiguous() {
            return (self.clone(), 0);
        }

        let span = self.calendar_span();
        let first = self.dates[0];
        let dates: Vec<NaiveDate> = (0..span)
            .map(|i| first + Duration::days(i as i64))
            .collect();

        let mut values = vec![vec![None; span]; self.variables.len()];
        for (row, date) in self.dates.iter().enumerate() {
            let slot = (*date - first).num_days() as usize;
            for (var, column) in self.values.iter().enumerate() {
                values[var][slot] = column[row];
            }
        }

        let inserted = span - self.len();
        (
            TimeSeries {
                id: self.id.clone(),
                dates,
                variables: self.variables.clone(),
                values,
            },
            inserted,
        )
    }

    /// Identity used to scope detector state: the caller id when present,
    /// otherwise the content hash.
    pub fn identity(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.content_hash())
    }

    /// SHA-256 over the date index, variable names and value bits.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for date in &self.dates {
            hasher.update(date.num_days_from_ce().to_le_bytes());
        }
        for (name, column) in self.variables.iter().zip(&self.values) {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            for value in column {
                match value {
                    Some(v) => {
                        hasher.update([1u8]);
                        hasher.update(v.to_bits().to_le_bytes());
                    }
                    None => hasher.update([0u8]),
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn builds_multivariate_series() {
        let ts = TimeSeries::builder()
            .id("station-1")
            .daily_from(date(2024, 1, 1), 3)
            .variable("temperature", vec![1.0, 2.0, 3.0])
            .variable_with_gaps("precipitation", vec![Some(0.0), None, Some(1.2)])
            .build()
            .unwrap();

        assert_eq!(ts.len(), 3);
        assert_eq!(ts.variables(), &["temperature", "precipitation"]);
        assert_eq!(ts.missing_count("precipitation").unwrap(), 1);
        assert_eq!(ts.last_date(), Some(date(2024, 1, 3)));
        assert_eq!(ts.identity(), "station-1");
    }

    #[test]
    fn rejects_unordered_dates() {
        let result = TimeSeries::builder()
            .dates(vec![date(2024, 1, 2), date(2024, 1, 1)])
            .variable("temperature", vec![1.0, 2.0])
            .build();
        assert!(matches!(result, Err(ForecastError::TimestampError(_))));

        let result = TimeSeries::builder()
            .dates(vec![date(2024, 1, 1), date(2024, 1, 1)])
            .variable("temperature", vec![1.0, 2.0])
            .build();
        assert!(matches!(result, Err(ForecastError::TimestampError(_))));
    }

    #[test]
    fn rejects_length_mismatch_and_duplicate_names() {
        let result = TimeSeries::builder()
            .daily_from(date(2024, 1, 1), 3)
            .variable("temperature", vec![1.0, 2.0])
            .build();
        assert!(matches!(
            result,
            Err(ForecastError::DimensionMismatch { expected: 3, got: 2 })
        ));

        let result = TimeSeries::builder()
            .daily_from(date(2024, 1, 1), 2)
            .variable("temperature", vec![1.0, 2.0])
            .variable("temperature", vec![1.0, 2.0])
            .build();
        assert!(matches!(result, Err(ForecastError::InvalidConfig(_))));
    }

    #[test]
    fn non_finite_values_become_missing() {
        let ts = TimeSeries::daily(date(2024, 1, 1), "temperature", vec![1.0, f64::NAN, 3.0])
            .unwrap();
        assert_eq!(ts.values("temperature").unwrap()[1], None);
    }

    #[test]
    fn unknown_variable_is_reported() {
        let ts = TimeSeries::daily(date(2024, 1, 1), "temperature", vec![1.0]).unwrap();
        assert_eq!(
            ts.values("humidity"),
            Err(ForecastError::UnknownVariable("humidity".to_string()))
        );
    }

    #[test]
    fn reindexes_skipped_days_as_missing() {
        let ts = TimeSeries::builder()
            .dates(vec![date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 5)])
            .variable("temperature", vec![1.0, 2.0, 5.0])
            .build()
            .unwrap();
        assert!(!ts.is_contiguous());

        let (daily, inserted) = ts.to_daily_calendar();
        assert_eq!(inserted, 2);
        assert_eq!(daily.len(), 5);
        assert_eq!(
            daily.values("temperature").unwrap(),
            &[Some(1.0), Some(2.0), None, None, Some(5.0)]
        );
    }

    #[test]
    fn content_hash_tracks_values() {
        let a = TimeSeries::daily(date(2024, 1, 1), "temperature", vec![1.0, 2.0]).unwrap();
        let b = TimeSeries::daily(date(2024, 1, 1), "temperature", vec![1.0, 2.0]).unwrap();
        let c = TimeSeries::daily(date(2024, 1, 1), "temperature", vec![1.0, 2.5]).unwrap();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.identity(), a.content_hash());
    }
}
