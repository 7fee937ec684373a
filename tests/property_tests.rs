//! Property-based tests for forecasting, ensembling and thresholding.
//!
//! These tests verify invariants that should hold for all valid inputs,
//! using randomly generated daily series.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use weathercast::config::{ModelConfig, ModelKind, ThresholdConfig};
use weathercast::core::{DailySeries, ForecastPoint, ForecastResult};
use weathercast::detection::{normalize, DynamicThreshold};
use weathercast::models::ensemble::{combine, inverse_error_weights, Candidate};
use weathercast::models;
use weathercast::utils::{CVResults, Deadline};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
}

fn make_series(values: &[f64]) -> DailySeries {
    DailySeries::observed("temperature", start(), values.to_vec()).unwrap()
}

/// Weekly cycle plus bounded noise around a random base.
fn weekly_values_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    (min_len..max_len).prop_flat_map(|len| {
        (
            -10.0..30.0_f64,
            1.0..8.0_f64,
            prop::collection::vec(-0.5..0.5_f64, len),
        )
            .prop_map(|(base, amplitude, noise)| {
                noise
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        base + amplitude * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin() + e
                    })
                    .collect()
            })
    })
}

fn check_forecast(result: &ForecastResult, horizon: usize, last: NaiveDate) -> Result<(), TestCaseError> {
    prop_assert_eq!(result.horizon(), horizon);
    for (h, p) in result.points().iter().enumerate() {
        prop_assert_eq!(p.date, last + Duration::days(h as i64 + 1));
        prop_assert!(p.lower <= p.point && p.point <= p.upper, "bad interval at {}", p.date);
        prop_assert!(p.point.is_finite());
    }
    Ok(())
}

fn validation(mae: f64) -> CVResults {
    CVResults {
        n_folds: 3,
        failed_folds: 0,
        horizon: 3,
        one_step_mae: mae,
        mae,
        rmse: mae,
        mean_interval_width: 1.0,
        fold_metrics: Vec::new(),
    }
}

fn candidate(kind: ModelKind, centers: &[f64], widths: &[f64], mae: f64) -> Candidate {
    let points = centers
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(h, (&c, &w))| ForecastPoint {
            date: start() + Duration::days(h as i64),
            point: c,
            lower: c - w / 2.0,
            upper: c + w / 2.0,
        })
        .collect();
    Candidate {
        model: kind,
        forecast: ForecastResult::from_points(kind.id(), points).unwrap(),
        validation: validation(mae),
    }
}

// =============================================================================
// Property: horizon, contiguous dates and ordered intervals
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn autoregressive_forecast_is_contiguous_and_bracketed(
        values in weekly_values_strategy(30, 120),
        horizon in 1usize..15
    ) {
        let series = make_series(&values);
        let config = ModelConfig::new(ModelKind::Autoregressive, [7], horizon)
            .unwrap()
            .with_hyperparameter("p", 1.0)
            .with_hyperparameter("d", 0.0)
            .with_hyperparameter("q", 0.0);
        let fitted = models::fit(&config, &series, Deadline::none()).unwrap();
        let result = fitted.predict(horizon, 0.95).unwrap();
        check_forecast(&result, horizon, series.last_date())?;
    }

    #[test]
    fn trend_holiday_forecast_is_contiguous_and_bracketed(
        values in weekly_values_strategy(28, 100),
        horizon in 1usize..15
    ) {
        let series = make_series(&values);
        let config = ModelConfig::new(ModelKind::TrendHoliday, [7], horizon).unwrap();
        let fitted = models::fit(&config, &series, Deadline::none()).unwrap();
        let result = fitted.predict(horizon, 0.9).unwrap();
        check_forecast(&result, horizon, series.last_date())?;
    }
}

// =============================================================================
// Property: ensemble weights and interval widths
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn inverse_error_weights_sum_to_one(errors in prop::collection::vec(0.0..50.0_f64, 1..6)) {
        let weights = inverse_error_weights(&errors);
        prop_assert_eq!(weights.len(), errors.len());
        prop_assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn ensemble_interval_never_narrower_than_narrowest_adapter(
        a in prop::collection::vec((-20.0..40.0_f64, 0.1..10.0_f64), 5),
        b in prop::collection::vec((-20.0..40.0_f64, 0.1..10.0_f64), 5),
        mae_a in 0.1..5.0_f64,
        mae_b in 0.1..5.0_f64,
    ) {
        let (ca, wa): (Vec<f64>, Vec<f64>) = a.into_iter().unzip();
        let (cb, wb): (Vec<f64>, Vec<f64>) = b.into_iter().unzip();
        let candidates = vec![
            candidate(ModelKind::SeasonalDecomposition, &ca, &wa, mae_a),
            candidate(ModelKind::Autoregressive, &cb, &wb, mae_b),
        ];
        let (ensemble, metrics) = combine(&candidates).unwrap();

        prop_assert!((ensemble.weight_sum() - 1.0).abs() < 1e-9);
        prop_assert_eq!(metrics.len(), 2);
        for (h, p) in ensemble.forecast.points().iter().enumerate() {
            let narrowest = wa[h].min(wb[h]);
            prop_assert!(p.width() >= narrowest - 1e-9, "width {} < {}", p.width(), narrowest);
            prop_assert!(p.lower <= p.point && p.point <= p.upper);
        }
    }
}

// =============================================================================
// Property: score normalization and the adaptive threshold
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn normalized_scores_stay_in_unit_interval(raw in 0.0..1e6_f64, cutoff in 0.01..100.0_f64) {
        let s = normalize(raw, cutoff);
        prop_assert!((0.0..1.0).contains(&s));
        prop_assert!((normalize(cutoff, cutoff) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn threshold_rises_with_window_variance(
        mean in 0.1..0.6_f64,
        low in 0.0..0.2_f64,
        extra in 0.001..0.2_f64,
    ) {
        let fill = |spread: f64| {
            let mut threshold = DynamicThreshold::new(ThresholdConfig::default());
            for i in 0..90 {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                threshold.observe(mean + sign * spread);
            }
            threshold.current()
        };
        let calm = fill(low);
        let volatile = fill(low + extra);
        prop_assert!(volatile >= calm - 1e-12, "{} < {}", volatile, calm);
    }
}
