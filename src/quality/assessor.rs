use super::imputation::{impute, ImputationCounts};
use super::{QualityReport, VariableSummary};
use crate::config::{ModelConfig, QualityConfig};
use crate::core::{DailySeries, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::seasonality::dominant_cycle;
use crate::utils::stats::{mean, median, quartiles, std_dev};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Days of staleness after which the freshness score reaches zero.
const FRESHNESS_HORIZON_DAYS: f64 = 30.0;

/// Multiplier on the IQR of day-to-day changes beyond which a jump counts
/// as inconsistent.
const JUMP_K: f64 = 3.0;

/// Built-in physical bounds for common weather variables, matched on the
/// lower-cased variable name.
pub fn plausible_range(variable: &str, config: &QualityConfig) -> Option<(f64, f64)> {
    if let Some(&range) = config.plausible_ranges.get(variable) {
        return Some(range);
    }
    let name = variable.to_lowercase();
    let builtin = [
        ("temp", (-90.0, 60.0)),
        ("precip", (0.0, 1000.0)),
        ("rain", (0.0, 1000.0)),
        ("snow", (0.0, 1000.0)),
        ("humid", (0.0, 100.0)),
        ("pressure", (850.0, 1100.0)),
        ("wind", (0.0, 120.0)),
    ];
    builtin
        .iter()
        .find(|(key, _)| name.contains(key))
        .map(|&(_, range)| range)
}

/// Cleaned, gap-free variables on a shared daily calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedData {
    pub start: NaiveDate,
    pub variables: BTreeMap<String, DailySeries>,
}

impl CleanedData {
    pub fn get(&self, variable: &str) -> Result<&DailySeries> {
        self.variables
            .get(variable)
            .ok_or_else(|| ForecastError::UnknownVariable(variable.to_string()))
    }

    pub fn len(&self) -> usize {
        self.variables.values().next().map_or(0, DailySeries::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of [`assess`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub report: QualityReport,
    pub cleaned: CleanedData,
}

/// Score `series`, reindex it to a daily calendar and impute every variable.
///
/// `target` names the variable to forecast. `models` are the adapters about
/// to be fitted: the series must be long enough for at least one of them.
pub fn assess(
    series: &TimeSeries,
    target: &str,
    models: &[ModelConfig],
    config: &QualityConfig,
) -> Result<Assessment> {
    config.validate()?;
    if series.is_empty() {
        return Err(ForecastError::EmptyData);
    }
    if !series.has_variable(target) {
        return Err(ForecastError::UnknownVariable(target.to_string()));
    }

    let (calendar, inserted) = series.to_daily_calendar();
    let n = calendar.len();

    if !models.is_empty() {
        let needed = models.iter().map(ModelConfig::min_points).min().unwrap_or(0);
        if n < needed {
            return Err(ForecastError::InsufficientData { needed, got: n });
        }
    }

    let start = calendar.first_date().ok_or(ForecastError::EmptyData)?;
    let mut periods: Vec<usize> = models
        .iter()
        .flat_map(|m| m.effective_periods())
        .collect();
    periods.sort_unstable();
    periods.dedup();

    let mut summaries = BTreeMap::new();
    let mut imputation = BTreeMap::new();
    let mut cleaned = BTreeMap::new();
    let (mut completeness, mut consistency, mut accuracy) = (Vec::new(), Vec::new(), Vec::new());

    for name in calendar.variables() {
        let raw = calendar.values(name)?;
        let range = plausible_range(name, config);

        // Implausible readings are dropped before imputation.
        let mut implausible = 0;
        let screened: Vec<Option<f64>> = raw
            .iter()
            .map(|v| match (v, range) {
                (Some(x), Some((lo, hi))) if *x < lo || *x > hi => {
                    implausible += 1;
                    None
                }
                _ => *v,
            })
            .collect();

        let observed: Vec<f64> = raw.iter().flatten().copied().collect();
        let usable: Vec<f64> = screened.iter().flatten().copied().collect();
        completeness.push(usable.len() as f64 / n as f64);
        accuracy.push(if observed.is_empty() {
            0.0
        } else {
            1.0 - implausible as f64 / observed.len() as f64
        });
        consistency.push(consistency_score(&screened, config.iqr_k));
        summaries.insert(name.clone(), summarize(&observed, n, implausible));

        match impute(&screened, &periods, config) {
            Ok(imputed) => {
                imputation.insert(name.clone(), imputed.counts);
                cleaned.insert(
                    name.clone(),
                    DailySeries::new(name.clone(), start, imputed.values, imputed.provenance)?,
                );
            }
            Err(ForecastError::EmptyData) if name != target => {
                debug!(variable = %name, "variable has no usable values; dropped");
            }
            Err(e) => return Err(e),
        }
    }

    let timeliness = timeliness_score(series, config.reference_date);
    let completeness = mean(&completeness);
    let consistency = mean(&consistency);
    let accuracy = mean(&accuracy);
    let overall = QualityReport::weighted(completeness, consistency, accuracy, timeliness);

    let cleaned = CleanedData {
        start,
        variables: cleaned,
    };
    let dominant_period = cleaned
        .get(target)
        .ok()
        .filter(|s| s.len() >= 16)
        .and_then(|s| dominant_cycle(s.values()))
        .filter(|c| c.power_share >= 0.1)
        .map(|c| c.period);

    let mut report = QualityReport {
        completeness,
        consistency,
        accuracy,
        timeliness,
        overall,
        recommendations: Vec::new(),
        variables: summaries,
        imputation,
        inserted_dates: inserted,
        dominant_period,
    };
    report.recommendations = recommendations(&report, &periods, config);

    info!(
        overall = report.overall,
        completeness,
        inserted_dates = inserted,
        "data quality assessed"
    );
    Ok(Assessment { report, cleaned })
}

fn summarize(observed: &[f64], n: usize, implausible: usize) -> VariableSummary {
    let finite_or_nan = |v: f64| if observed.is_empty() { f64::NAN } else { v };
    VariableSummary {
        observed: observed.len(),
        missing: n - observed.len(),
        implausible,
        mean: finite_or_nan(mean(observed)),
        std: finite_or_nan(std_dev(observed)),
        min: finite_or_nan(observed.iter().copied().fold(f64::INFINITY, f64::min)),
        max: finite_or_nan(observed.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        median: finite_or_nan(median(observed)),
        zeros: observed.iter().filter(|v| **v == 0.0).count(),
        negatives: observed.iter().filter(|v| **v < 0.0).count(),
    }
}

/// Share of observed points that are neither IQR outliers nor abrupt jumps
/// from the previous observed day.
fn consistency_score(values: &[Option<f64>], k: f64) -> f64 {
    let observed: Vec<f64> = values.iter().flatten().copied().collect();
    if observed.len() < 4 {
        return 1.0;
    }
    let (q1, q3) = quartiles(&observed);
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - k * iqr, q3 + k * iqr);

    let jumps: Vec<(usize, f64)> = values
        .windows(2)
        .enumerate()
        .filter_map(|(i, w)| match (w[0], w[1]) {
            (Some(a), Some(b)) => Some((i + 1, b - a)),
            _ => None,
        })
        .collect();
    let jump_values: Vec<f64> = jumps.iter().map(|(_, d)| *d).collect();
    let (j1, j3) = if jump_values.len() >= 4 {
        quartiles(&jump_values)
    } else {
        (f64::NEG_INFINITY, f64::INFINITY)
    };
    let jump_iqr = j3 - j1;
    let (jlo, jhi) = (j1 - JUMP_K * jump_iqr, j3 + JUMP_K * jump_iqr);

    let mut bad = vec![false; values.len()];
    for (i, v) in values.iter().enumerate() {
        if let Some(x) = v {
            if *x < lo || *x > hi {
                bad[i] = true;
            }
        }
    }
    for (i, d) in jumps {
        if d < jlo || d > jhi {
            bad[i] = true;
        }
    }
    1.0 - bad.iter().filter(|b| **b).count() as f64 / observed.len() as f64
}

/// Regularity of the original date index times freshness against
/// `reference_date`.
fn timeliness_score(series: &TimeSeries, reference_date: Option<NaiveDate>) -> f64 {
    let span = series.calendar_span().max(1);
    let regularity = series.len() as f64 / span as f64;
    let freshness = match (reference_date, series.last_date()) {
        (Some(reference), Some(last)) => {
            let lag = (reference - last).num_days().max(1) as f64;
            (1.0 - (lag - 1.0) / FRESHNESS_HORIZON_DAYS).clamp(0.0, 1.0)
        }
        _ => 1.0,
    };
    regularity * freshness
}

fn recommendations(report: &QualityReport, periods: &[usize], config: &QualityConfig) -> Vec<String> {
    let mut out = Vec::new();
    if report.inserted_dates > 0 {
        out.push(format!(
            "{} calendar days were absent and inserted as missing; check the data feed for skipped days",
            report.inserted_dates
        ));
    }
    let totals = report
        .imputation
        .values()
        .fold(ImputationCounts::default(), |acc, c| ImputationCounts {
            interpolated: acc.interpolated + c.interpolated,
            seasonal_mean: acc.seasonal_mean + c.seasonal_mean,
            still_missing: acc.still_missing + c.still_missing,
        });
    if report.completeness < 0.95 {
        out.push(format!(
            "completeness is {:.0}%: {} values interpolated, {} filled from seasonal means",
            report.completeness * 100.0,
            totals.interpolated,
            totals.seasonal_mean
        ));
    }
    if totals.still_missing > 0 {
        out.push(format!(
            "{} values lie in gaps longer than {} days and remain missing; backfill the source data",
            totals.still_missing, config.max_imputable_gap
        ));
    }
    let implausible: usize = report.variables.values().map(|v| v.implausible).sum();
    if implausible > 0 {
        out.push(format!(
            "{implausible} values fell outside physical limits and were treated as missing"
        ));
    }
    if report.consistency < 0.9 {
        out.push("many outliers or abrupt jumps; verify sensor calibration".to_string());
    }
    if report.timeliness < 0.5 {
        out.push("data is stale or irregular; refresh before forecasting".to_string());
    }
    if let Some(p) = report.dominant_period {
        let matched = periods
            .iter()
            .any(|&q| (p - q as f64).abs() <= 0.1 * q as f64);
        if !matched && p >= 2.0 {
            out.push(format!(
                "dominant cycle of about {p:.1} days is not among the configured seasonal periods"
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelKind;
    use crate::core::Provenance;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i)
    }

    fn weekly(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 15.0 + 5.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin())
            .collect()
    }

    fn arima(periods: &[usize]) -> ModelConfig {
        ModelConfig::new(ModelKind::Autoregressive, periods.iter().copied(), 7).unwrap()
    }

    #[test]
    fn clean_series_scores_high() {
        let series = TimeSeries::daily(day(0), "temperature", weekly(70)).unwrap();
        let a = assess(&series, "temperature", &[arima(&[7])], &QualityConfig::default()).unwrap();
        assert_relative_eq!(a.report.completeness, 1.0);
        assert_relative_eq!(a.report.accuracy, 1.0);
        assert_relative_eq!(a.report.timeliness, 1.0);
        assert!(a.report.overall > 0.95);
        assert_eq!(a.report.dominant_period, Some(7.0));
        assert!(a.report.recommendations.is_empty(), "{:?}", a.report.recommendations);
        assert_eq!(a.cleaned.len(), 70);
    }

    #[test]
    fn skipped_dates_are_inserted_and_filled() {
        let values = weekly(30);
        let dates: Vec<NaiveDate> = (0..30).filter(|i| *i != 10 && *i != 11).map(day).collect();
        let kept: Vec<f64> = (0..30).filter(|i| *i != 10 && *i != 11).map(|i| values[i as usize]).collect();
        let series = TimeSeries::builder()
            .dates(dates)
            .variable("temperature", kept)
            .build()
            .unwrap();
        let a = assess(&series, "temperature", &[], &QualityConfig::default()).unwrap();
        assert_eq!(a.report.inserted_dates, 2);
        let cleaned = a.cleaned.get("temperature").unwrap();
        assert_eq!(cleaned.len(), 30);
        assert_eq!(cleaned.provenance()[10], Provenance::Interpolated);
        assert!(a.report.timeliness < 1.0);
        assert!(!a.report.recommendations.is_empty());
    }

    #[test]
    fn implausible_values_reduce_accuracy() {
        let mut values = weekly(40);
        values[5] = 150.0;
        let series = TimeSeries::daily(day(0), "temperature", values).unwrap();
        let a = assess(&series, "temperature", &[], &QualityConfig::default()).unwrap();
        assert_relative_eq!(a.report.accuracy, 39.0 / 40.0);
        assert_eq!(a.report.variables["temperature"].implausible, 1);
        assert_eq!(
            a.cleaned.get("temperature").unwrap().provenance()[5],
            Provenance::Interpolated
        );
    }

    #[test]
    fn too_short_for_every_model() {
        let series = TimeSeries::daily(day(0), "temperature", weekly(10)).unwrap();
        let tbats = ModelConfig::new(ModelKind::SeasonalDecomposition, [365], 7).unwrap();
        let err = assess(&series, "temperature", &[tbats.clone()], &QualityConfig::default())
            .unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 730, got: 10 });

        // One feasible model is enough.
        assert!(assess(&series, "temperature", &[tbats, arima(&[])], &QualityConfig::default()).is_ok());
    }

    #[test]
    fn unknown_target() {
        let series = TimeSeries::daily(day(0), "temperature", weekly(10)).unwrap();
        assert!(matches!(
            assess(&series, "humidity", &[], &QualityConfig::default()),
            Err(ForecastError::UnknownVariable(_))
        ));
    }

    #[test]
    fn builtin_ranges_match_by_name() {
        let config = QualityConfig::default();
        assert_eq!(plausible_range("Temperature_max", &config), Some((-90.0, 60.0)));
        assert_eq!(plausible_range("relative_humidity", &config), Some((0.0, 100.0)));
        assert_eq!(plausible_range("load", &config), None);
    }
}
