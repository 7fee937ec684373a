//! Running the detector suite, fusing scores and applying thresholds.

use super::changepoint::level_shift_scores;
use super::cluster::cluster_distance_scores;
use super::isolation::isolation_scores;
use super::outlier::{iqr_scores, modified_z_scores, rolling_z_scores};
use super::seasonal::seasonal_residual_scores;
use super::state::DetectorState;
use super::{
    AlertLevel, AnomalyFlag, AnomalyReport, DetectorFailure, DetectorScores,
    VariableAnomalySummary, CONTRIBUTOR_SCORE,
};
use crate::config::{DetectorKind, DetectorSuiteConfig};
use crate::core::DailySeries;
use crate::error::{ForecastError, Result};
use crate::quality::CleanedData;
use crate::utils::stats::{mean, std_dev};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Detector output for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableScores {
    pub variable: String,
    /// Detectors that succeeded, in [`DetectorKind`] order.
    pub scores: Vec<DetectorScores>,
    /// Fused severity per point; all zero when no detector succeeded.
    pub fused: Vec<f64>,
    pub failures: Vec<DetectorFailure>,
}

type Rows = Option<Result<Vec<Vec<f64>>>>;

/// Standardized rows `[target, context...]` for the multivariate detectors.
fn feature_rows(data: &CleanedData, target: &str, config: &DetectorSuiteConfig) -> Result<Vec<Vec<f64>>> {
    let mut columns: Vec<&DailySeries> = vec![data.get(target)?];
    if config.context_variables.is_empty() {
        columns.extend(
            data.variables
                .iter()
                .filter(|(name, _)| name.as_str() != target)
                .map(|(_, s)| s),
        );
    } else {
        for name in config.context_variables.iter().filter(|n| n.as_str() != target) {
            columns.push(data.get(name)?);
        }
    }

    let n = columns[0].len();
    if let Some(bad) = columns.iter().find(|c| c.len() != n) {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: bad.len(),
        });
    }

    let standardized: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| {
            let m = mean(c.values());
            let sd = std_dev(c.values());
            let sd = if sd.is_finite() && sd > 1e-12 { sd } else { 1.0 };
            c.values().iter().map(|v| (v - m) / sd).collect()
        })
        .collect();

    Ok((0..n)
        .map(|i| standardized.iter().map(|col| col[i]).collect())
        .collect())
}

fn rows_for(rows: &Rows) -> Result<&[Vec<f64>]> {
    match rows {
        Some(Ok(rows)) => Ok(rows),
        Some(Err(e)) => Err(e.clone()),
        None => Err(ForecastError::ComputationError(
            "feature rows were not built".to_string(),
        )),
    }
}

fn run_detector(
    kind: DetectorKind,
    series: &DailySeries,
    rows: &Rows,
    config: &DetectorSuiteConfig,
) -> Result<DetectorScores> {
    let values = series.values();
    match kind {
        DetectorKind::Iqr => iqr_scores(values, config.iqr_k),
        DetectorKind::ZScore => rolling_z_scores(values, config.z_window, config.z_threshold),
        DetectorKind::ModifiedZScore => modified_z_scores(values, config.modified_z_threshold),
        DetectorKind::SeasonalResidual => {
            seasonal_residual_scores(values, &config.seasonal_periods, config.residual_threshold)
        }
        DetectorKind::IsolationForest => isolation_scores(
            rows_for(rows)?,
            config.reference_window,
            config.isolation_trees,
            config.isolation_sample_size,
            config.isolation_threshold,
            config.seed,
        ),
        DetectorKind::ClusterDistance => cluster_distance_scores(
            rows_for(rows)?,
            config.reference_window,
            config.clusters,
            config.cluster_threshold,
            config.seed,
        ),
        DetectorKind::ChangePoint => level_shift_scores(
            values,
            &config.seasonal_periods,
            config.changepoint_min_segment,
            config.changepoint_shift,
        ),
    }
}

/// Weighted mean of normalized scores, per point.
///
/// Weights come from the configuration; when every surviving detector has
/// weight zero the severity is zero.
pub fn fuse(scores: &[DetectorScores], config: &DetectorSuiteConfig) -> Vec<f64> {
    let n = scores.first().map_or(0, DetectorScores::len);
    let weighted: Vec<(f64, Vec<f64>)> = scores
        .iter()
        .map(|s| (config.weight(s.kind), s.normalized()))
        .collect();
    let total: f64 = weighted.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            let sum: f64 = weighted.iter().map(|(w, s)| w * s[i]).sum();
            (sum / total).clamp(0.0, 1.0)
        })
        .collect()
}

/// Run every enabled detector on `variable` in parallel and fuse the results.
///
/// Individual detector failures are collected, not returned.
pub fn score_variable(
    data: &CleanedData,
    variable: &str,
    config: &DetectorSuiteConfig,
) -> Result<VariableScores> {
    let series = data.get(variable)?;
    let kinds: Vec<DetectorKind> = config.enabled.iter().copied().collect();
    let rows: Rows = kinds
        .iter()
        .any(|k| matches!(k, DetectorKind::IsolationForest | DetectorKind::ClusterDistance))
        .then(|| feature_rows(data, variable, config));

    let results: Vec<(DetectorKind, Result<DetectorScores>)> = kinds
        .par_iter()
        .map(|&kind| (kind, run_detector(kind, series, &rows, config)))
        .collect();

    let mut scores = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (kind, result) in results {
        match result {
            Ok(s) => scores.push(s),
            Err(error) => {
                warn!(variable, detector = %kind, %error, "detector failed");
                failures.push(DetectorFailure {
                    variable: variable.to_string(),
                    detector: kind,
                    error,
                });
            }
        }
    }

    let fused = if scores.is_empty() {
        vec![0.0; series.len()]
    } else {
        fuse(&scores, config)
    };
    Ok(VariableScores {
        variable: variable.to_string(),
        scores,
        fused,
        failures,
    })
}

/// Score every cleaned variable and flag points whose fused severity
/// exceeds the variable's dynamic threshold.
///
/// Points still missing after imputation are neither flagged nor fed to the
/// threshold. Fails only when no detector could score any variable.
pub fn detect(
    data: &CleanedData,
    config: &DetectorSuiteConfig,
    state: &mut DetectorState,
) -> Result<AnomalyReport> {
    config.validate()?;
    let names: Vec<&str> = data.variables.keys().map(String::as_str).collect();
    let scored: Vec<Result<VariableScores>> = names
        .par_iter()
        .map(|name| score_variable(data, name, config))
        .collect();

    let mut report = AnomalyReport::default();
    let mut any_scored = false;

    for result in scored {
        let scores = result?;
        let series = data.get(&scores.variable)?;
        report.failures.extend(scores.failures.iter().cloned());
        if scores.scores.is_empty() {
            continue;
        }
        any_scored = true;

        let normalized: Vec<(DetectorKind, Vec<f64>)> = scores
            .scores
            .iter()
            .map(|s| (s.kind, s.normalized()))
            .collect();
        let threshold = state.threshold_mut(&scores.variable);
        let mut summary = VariableAnomalySummary {
            evaluated: 0,
            flags: 0,
            anomaly_rate: 0.0,
            max_severity: 0.0,
            detectors: scores.scores.iter().map(|s| s.kind).collect(),
        };

        for (i, &severity) in scores.fused.iter().enumerate() {
            if !series.is_flaggable(i) {
                continue;
            }
            summary.evaluated += 1;
            let (cutoff, exceeded) = threshold.evaluate(severity);
            if !exceeded {
                continue;
            }
            let contributors = normalized
                .iter()
                .filter(|(_, s)| s[i] >= CONTRIBUTOR_SCORE)
                .map(|(k, _)| *k)
                .collect();
            summary.flags += 1;
            summary.max_severity = summary.max_severity.max(severity);
            report.flags.push(AnomalyFlag {
                date: series.date_at(i),
                variable: scores.variable.clone(),
                severity,
                contributors,
                threshold: cutoff,
                level: AlertLevel::from_severity(severity),
            });
        }

        if summary.evaluated > 0 {
            summary.anomaly_rate = summary.flags as f64 / summary.evaluated as f64;
        }
        debug!(
            variable = %scores.variable,
            flags = summary.flags,
            evaluated = summary.evaluated,
            "variable scored"
        );
        report.summaries.insert(scores.variable, summary);
    }

    if !any_scored {
        return Err(ForecastError::ComputationError(
            "no anomaly detector produced scores".to_string(),
        ));
    }

    report
        .flags
        .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.variable.cmp(&b.variable)));
    info!(
        flags = report.flags.len(),
        failures = report.failures.len(),
        "anomaly detection finished"
    );
    Ok(report)
}
