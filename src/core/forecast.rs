//! Forecast structures: raw model output and dated results.

use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Undated model output: point predictions with optional intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forecast {
    point: Vec<f64>,
    lower: Option<Vec<f64>>,
    upper: Option<Vec<f64>>,
}

impl Forecast {
    /// Create a forecast from point predictions.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            point: values,
            lower: None,
            upper: None,
        }
    }

    /// Create a forecast with prediction intervals.
    pub fn from_values_with_intervals(values: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self {
            point: values,
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// Symmetric intervals `point ± z·sd[h]`.
    pub fn with_symmetric_intervals(values: Vec<f64>, sd: &[f64], z: f64) -> Self {
        let lower = values.iter().zip(sd).map(|(p, s)| p - z * s).collect();
        let upper = values.iter().zip(sd).map(|(p, s)| p + z * s).collect();
        Self::from_values_with_intervals(values, lower, upper)
    }

    /// Get the forecast horizon (number of steps).
    pub fn horizon(&self) -> usize {
        self.point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point.is_empty()
    }

    pub fn point(&self) -> &[f64] {
        &self.point
    }

    pub fn lower(&self) -> Option<&[f64]> {
        self.lower.as_deref()
    }

    pub fn upper(&self) -> Option<&[f64]> {
        self.upper.as_deref()
    }

    pub fn has_intervals(&self) -> bool {
        self.lower.is_some() && self.upper.is_some()
    }

    /// Point and bounds moved by `offsets[h]` at each step.
    pub fn shifted(&self, offsets: &[f64]) -> Self {
        let add = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(offsets.iter().chain(std::iter::repeat(&0.0)))
                .map(|(v, o)| v + o)
                .collect()
        };
        Self {
            point: add(&self.point),
            lower: self.lower.as_deref().map(add),
            upper: self.upper.as_deref().map(add),
        }
    }
}

/// One forecast date with its point estimate and interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPoint {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Dated forecast for `horizon` days following the last observed date.
///
/// Every entry satisfies `lower <= point <= upper` and dates are contiguous,
/// starting the day after the series' last date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    model: String,
    points: Vec<ForecastPoint>,
}

impl ForecastResult {
    /// Attach dates to a model forecast.
    ///
    /// Bounds that do not bracket the point (or are missing) are widened to
    /// the point itself. Non-finite point predictions are rejected.
    pub fn from_forecast(
        model: impl Into<String>,
        last_date: NaiveDate,
        forecast: &Forecast,
    ) -> Result<Self> {
        let model = model.into();
        let mut points = Vec::with_capacity(forecast.horizon());
        for (h, &point) in forecast.point().iter().enumerate() {
            if !point.is_finite() {
                return Err(ForecastError::fit(
                    model,
                    format!("non-finite prediction at step {}", h + 1),
                ));
            }
            let lower = forecast
                .lower()
                .and_then(|l| l.get(h).copied())
                .filter(|v| v.is_finite())
                .unwrap_or(point)
                .min(point);
            let upper = forecast
                .upper()
                .and_then(|u| u.get(h).copied())
                .filter(|v| v.is_finite())
                .unwrap_or(point)
                .max(point);
            points.push(ForecastPoint {
                date: last_date + Duration::days(h as i64 + 1),
                point,
                lower,
                upper,
            });
        }
        Ok(Self { model, points })
    }

    /// Build directly from dated points, checking the ordering invariants.
    pub fn from_points(model: impl Into<String>, points: Vec<ForecastPoint>) -> Result<Self> {
        for (i, p) in points.iter().enumerate() {
            if !(p.lower <= p.point && p.point <= p.upper) {
                return Err(ForecastError::ComputationError(format!(
                    "interval does not bracket point at {}",
                    p.date
                )));
            }
            if i > 0 && p.date != points[i - 1].date + Duration::days(1) {
                return Err(ForecastError::TimestampError(format!(
                    "forecast dates not contiguous at {}",
                    p.date
                )));
            }
        }
        Ok(Self {
            model: model.into(),
            points,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn point_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.point).collect()
    }

    /// Mean interval width across the horizon.
    pub fn mean_width(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(ForecastPoint::width).sum::<f64>() / self.points.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dates_continue_from_last_observation() {
        let forecast = Forecast::from_values_with_intervals(
            vec![1.0, 2.0, 3.0],
            vec![0.5, 1.5, 2.5],
            vec![1.5, 2.5, 3.5],
        );
        let result = ForecastResult::from_forecast("test", date(2024, 2, 28), &forecast).unwrap();

        assert_eq!(
            result.dates(),
            vec![date(2024, 2, 29), date(2024, 3, 1), date(2024, 3, 2)]
        );
        assert_relative_eq!(result.mean_width(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn shift_moves_point_and_bounds_together() {
        let forecast = Forecast::from_values_with_intervals(
            vec![1.0, 2.0, 3.0],
            vec![0.0, 1.0, 2.0],
            vec![2.0, 3.0, 4.0],
        );
        let moved = forecast.shifted(&[0.5, -1.0]);
        assert_eq!(moved.point(), &[1.5, 1.0, 3.0]);
        assert_eq!(moved.lower().unwrap(), &[0.5, 0.0, 2.0]);
        assert_eq!(moved.upper().unwrap(), &[2.5, 2.0, 4.0]);
        assert!(Forecast::from_values(vec![1.0]).shifted(&[1.0]).lower().is_none());
    }

    #[test]
    fn missing_or_inverted_bounds_collapse_to_point() {
        let forecast =
            Forecast::from_values_with_intervals(vec![1.0, 2.0], vec![1.5, 1.0], vec![0.5, 3.0]);
        let result = ForecastResult::from_forecast("test", date(2024, 1, 1), &forecast).unwrap();
        for p in result.points() {
            assert!(p.lower <= p.point && p.point <= p.upper);
        }

        let bare = Forecast::from_values(vec![4.0]);
        let result = ForecastResult::from_forecast("test", date(2024, 1, 1), &bare).unwrap();
        assert_eq!(result.points()[0].width(), 0.0);
    }

    #[test]
    fn non_finite_prediction_is_a_fit_error() {
        let forecast = Forecast::from_values(vec![1.0, f64::NAN]);
        let err = ForecastResult::from_forecast("ARIMA", date(2024, 1, 1), &forecast).unwrap_err();
        assert!(matches!(err, ForecastError::ModelFit { .. }));
    }

    #[test]
    fn from_points_checks_invariants() {
        let good = vec![
            ForecastPoint { date: date(2024, 1, 2), point: 1.0, lower: 0.0, upper: 2.0 },
            ForecastPoint { date: date(2024, 1, 3), point: 1.0, lower: 0.0, upper: 2.0 },
        ];
        assert!(ForecastResult::from_points("ensemble", good.clone()).is_ok());

        let mut gap = good.clone();
        gap[1].date = date(2024, 1, 5);
        assert!(ForecastResult::from_points("ensemble", gap).is_err());

        let mut inverted = good;
        inverted[0].lower = 1.5;
        assert!(ForecastResult::from_points("ensemble", inverted).is_err());
    }
}
