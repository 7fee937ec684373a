//! Configuration surface for models, detectors, data quality and the pipeline.
//!
//! All types are plain serde data so callers can load them from any format;
//! the crate itself never touches files.

use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The closed set of forecasting algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Trigonometric seasonal state space (TBATS-style).
    SeasonalDecomposition,
    /// Piecewise trend, Fourier seasonality and holiday regressor.
    TrendHoliday,
    /// ARIMA fitted by conditional sum of squares.
    Autoregressive,
    /// Recurrent network (LSTM) trained on sliding windows.
    SequenceLearning,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::SeasonalDecomposition,
        ModelKind::TrendHoliday,
        ModelKind::Autoregressive,
        ModelKind::SequenceLearning,
    ];

    /// Stable identifier used in diagnostics and metrics.
    pub fn id(self) -> &'static str {
        match self {
            ModelKind::SeasonalDecomposition => "seasonal_decomposition",
            ModelKind::TrendHoliday => "trend_holiday",
            ModelKind::Autoregressive => "autoregressive",
            ModelKind::SequenceLearning => "sequence_learning",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-adapter configuration.
///
/// Hyperparameter keys read by each adapter:
/// - seasonal decomposition: `fourier_order`, `damped` (0/1)
/// - trend+holiday: `changepoints`, `fourier_order`, `changepoint_prior`,
///   `holiday_window`
/// - autoregressive: `p`, `d`, `q`
/// - sequence learning: `look_back`, `hidden`, `epochs`, `learning_rate`, `seed`
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub seasonal_periods: BTreeSet<usize>,
    pub horizon: usize,
    #[serde(default)]
    pub holidays: Option<BTreeSet<NaiveDate>>,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, f64>,
    /// Overrides `PipelineConfig::per_model_timeout_seconds`.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Random-forest correction of the adapter's residuals.
    #[serde(default)]
    pub residual_correction: Option<ResidualCorrectionConfig>,
}

impl ModelConfig {
    /// Create a validated configuration.
    pub fn new(
        kind: ModelKind,
        seasonal_periods: impl IntoIterator<Item = usize>,
        horizon: usize,
    ) -> Result<Self> {
        let config = Self {
            kind,
            seasonal_periods: seasonal_periods.into_iter().collect(),
            horizon,
            holidays: None,
            hyperparameters: BTreeMap::new(),
            timeout_seconds: None,
            residual_correction: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = Some(holidays.into_iter().collect());
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: f64) -> Self {
        self.hyperparameters.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_residual_correction(mut self, correction: ResidualCorrectionConfig) -> Self {
        self.residual_correction = Some(correction);
        self
    }

    /// Reject zero horizons, zero periods, bad timeouts and bad residual
    /// correction settings.
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "{}: horizon must be positive",
                self.kind
            )));
        }
        if self.seasonal_periods.contains(&0) {
            return Err(ForecastError::InvalidConfig(format!(
                "{}: seasonal periods must be positive",
                self.kind
            )));
        }
        if let Some(t) = self.timeout_seconds {
            if !(t.is_finite() && t > 0.0) {
                return Err(ForecastError::InvalidConfig(format!(
                    "{}: timeout must be a positive number of seconds",
                    self.kind
                )));
            }
        }
        if self.hyperparameters.values().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidConfig(format!(
                "{}: hyperparameters must be finite",
                self.kind
            )));
        }
        if let Some(correction) = &self.residual_correction {
            correction.validate()?;
        }
        Ok(())
    }

    /// Periods longer than one, ascending.
    pub fn effective_periods(&self) -> Vec<usize> {
        self.seasonal_periods.iter().copied().filter(|&p| p > 1).collect()
    }

    pub fn max_period(&self) -> usize {
        self.effective_periods().last().copied().unwrap_or(1)
    }

    /// Read a real-valued hyperparameter.
    pub fn hyper(&self, key: &str, default: f64) -> f64 {
        self.hyperparameters.get(key).copied().unwrap_or(default)
    }

    /// Read an integer hyperparameter constrained to `[min, max]`.
    pub fn hyper_usize(&self, key: &str, default: usize, min: usize, max: usize) -> Result<usize> {
        match self.hyperparameters.get(key) {
            None => Ok(default),
            Some(&v) => {
                if v.fract() != 0.0 || v < min as f64 || v > max as f64 {
                    Err(ForecastError::InvalidConfig(format!(
                        "{}: hyperparameter '{key}' must be an integer in [{min}, {max}], got {v}",
                        self.kind
                    )))
                } else {
                    Ok(v as usize)
                }
            }
        }
    }

    /// Read a positive real hyperparameter.
    pub fn hyper_positive(&self, key: &str, default: f64) -> Result<f64> {
        let v = self.hyper(key, default);
        if v > 0.0 {
            Ok(v)
        } else {
            Err(ForecastError::InvalidConfig(format!(
                "{}: hyperparameter '{key}' must be positive, got {v}",
                self.kind
            )))
        }
    }

    /// Minimum number of points this adapter needs.
    pub fn min_points(&self) -> usize {
        let max_period = self.max_period();
        match self.kind {
            ModelKind::SeasonalDecomposition | ModelKind::TrendHoliday => {
                (2 * max_period).max(8)
            }
            ModelKind::Autoregressive => {
                let p = self.hyper("p", 1.0).max(0.0) as usize;
                let d = self.hyper("d", 1.0).max(0.0) as usize;
                let q = self.hyper("q", 1.0).max(0.0) as usize;
                d + p.max(q) + 2
            }
            ModelKind::SequenceLearning => {
                let look_back = self.hyper("look_back", 7.0).max(1.0) as usize;
                (3 * max_period).max(look_back + 2)
            }
        }
    }
}

/// Random forest fitted to in-sample residuals and added back onto the
/// adapter's forecast.
///
/// The forest is first trained on the older part of the residuals and scored
/// on the most recent `holdout_fraction`; the correction is kept only when it
/// beats the uncorrected residuals there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidualCorrectionConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub holdout_fraction: f64,
    pub seed: u64,
}

impl Default for ResidualCorrectionConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            holdout_fraction: 0.2,
            seed: 42,
        }
    }
}

impl ResidualCorrectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.n_trees) || !(1..=64).contains(&self.max_depth) {
            return Err(ForecastError::InvalidConfig(
                "residual correction needs 1..=1000 trees of depth 1..=64".to_string(),
            ));
        }
        if self.min_samples_split < 2 || self.min_samples_leaf == 0 {
            return Err(ForecastError::InvalidConfig(
                "residual correction needs min_samples_split >= 2 and min_samples_leaf >= 1"
                    .to_string(),
            ));
        }
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction <= 0.5) {
            return Err(ForecastError::InvalidConfig(
                "residual correction holdout_fraction must be in (0, 0.5]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identifiers of the seven anomaly detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Iqr,
    ZScore,
    ModifiedZScore,
    SeasonalResidual,
    IsolationForest,
    ClusterDistance,
    ChangePoint,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 7] = [
        DetectorKind::Iqr,
        DetectorKind::ZScore,
        DetectorKind::ModifiedZScore,
        DetectorKind::SeasonalResidual,
        DetectorKind::IsolationForest,
        DetectorKind::ClusterDistance,
        DetectorKind::ChangePoint,
    ];

    pub fn id(self) -> &'static str {
        match self {
            DetectorKind::Iqr => "iqr",
            DetectorKind::ZScore => "z_score",
            DetectorKind::ModifiedZScore => "modified_z_score",
            DetectorKind::SeasonalResidual => "seasonal_residual",
            DetectorKind::IsolationForest => "isolation_forest",
            DetectorKind::ClusterDistance => "cluster_distance",
            DetectorKind::ChangePoint => "change_point",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Preset mapping onto the dynamic threshold z-multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    pub fn z(self) -> f64 {
        match self {
            Sensitivity::Low => 3.0,
            Sensitivity::Medium => 2.5,
            Sensitivity::High => 1.5,
        }
    }
}

/// Dynamic threshold parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub window: usize,
    pub z: f64,
    pub cold_start_min: usize,
    pub fallback: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            window: 90,
            z: 2.5,
            cold_start_min: 30,
            fallback: 0.6,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.z.is_finite() && self.z > 0.0) {
            return Err(ForecastError::InvalidConfig(
                "dynamic threshold z must be positive".to_string(),
            ));
        }
        if self.window < 2 || self.cold_start_min == 0 || self.cold_start_min > self.window {
            return Err(ForecastError::InvalidConfig(
                "threshold window must be >= 2 and hold the cold-start minimum".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fallback) {
            return Err(ForecastError::InvalidConfig(
                "fallback threshold must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which detectors run, their fusion weights and tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSuiteConfig {
    pub enabled: BTreeSet<DetectorKind>,
    /// Fusion weights in `[0, 1]`; detectors without an entry weigh 1.
    pub weights: BTreeMap<DetectorKind, f64>,
    pub iqr_k: f64,
    pub z_threshold: f64,
    /// Trailing window for the rolling mean of the Z-score detector.
    pub z_window: usize,
    pub modified_z_threshold: f64,
    /// Periods removed by the seasonal-residual detector.
    pub seasonal_periods: Vec<usize>,
    pub residual_threshold: f64,
    pub isolation_trees: usize,
    pub isolation_sample_size: usize,
    /// Anomaly score (in `(0, 1]`) at which the isolation detector flags.
    pub isolation_threshold: f64,
    /// Trailing observations used to build isolation/cluster references.
    pub reference_window: usize,
    pub clusters: usize,
    pub cluster_threshold: f64,
    pub changepoint_min_segment: usize,
    /// Regime change that counts as significant: the mean shift in robust
    /// standard deviations plus the absolute log ratio of segment spreads.
    pub changepoint_shift: f64,
    /// Variables stacked with the target into feature vectors for the
    /// multivariate detectors. Empty means every variable in the series.
    pub context_variables: Vec<String>,
    pub seed: u64,
    pub threshold: ThresholdConfig,
}

impl Default for DetectorSuiteConfig {
    fn default() -> Self {
        Self {
            enabled: DetectorKind::ALL.into_iter().collect(),
            weights: BTreeMap::new(),
            iqr_k: 1.5,
            z_threshold: 3.0,
            z_window: 30,
            modified_z_threshold: 3.5,
            seasonal_periods: vec![7],
            residual_threshold: 3.0,
            isolation_trees: 100,
            isolation_sample_size: 256,
            isolation_threshold: 0.6,
            reference_window: 365,
            clusters: 3,
            cluster_threshold: 3.0,
            changepoint_min_segment: 7,
            changepoint_shift: 2.0,
            context_variables: Vec::new(),
            seed: 42,
            threshold: ThresholdConfig::default(),
        }
    }
}

impl DetectorSuiteConfig {
    /// Only the given detectors, everything else at defaults.
    pub fn only(detectors: impl IntoIterator<Item = DetectorKind>) -> Self {
        Self {
            enabled: detectors.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.threshold.z = sensitivity.z();
        self
    }

    pub fn with_weight(mut self, detector: DetectorKind, weight: f64) -> Self {
        self.weights.insert(detector, weight);
        self
    }

    pub fn weight(&self, detector: DetectorKind) -> f64 {
        self.weights.get(&detector).copied().unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled.is_empty() {
            return Err(ForecastError::InvalidConfig(
                "at least one detector must be enabled".to_string(),
            ));
        }
        for (kind, w) in &self.weights {
            if !(0.0..=1.0).contains(w) {
                return Err(ForecastError::InvalidConfig(format!(
                    "weight for detector {kind} must be in [0, 1], got {w}"
                )));
            }
        }
        if self.enabled.iter().all(|k| self.weight(*k) == 0.0) {
            return Err(ForecastError::InvalidConfig(
                "enabled detectors have zero total weight".to_string(),
            ));
        }
        let positive = [
            ("iqr_k", self.iqr_k),
            ("z_threshold", self.z_threshold),
            ("modified_z_threshold", self.modified_z_threshold),
            ("residual_threshold", self.residual_threshold),
            ("cluster_threshold", self.cluster_threshold),
            ("changepoint_shift", self.changepoint_shift),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(ForecastError::InvalidConfig(format!(
                    "{name} must be positive"
                )));
            }
        }
        if !(self.isolation_threshold > 0.5 && self.isolation_threshold < 1.0) {
            return Err(ForecastError::InvalidConfig(
                "isolation_threshold must be in (0.5, 1)".to_string(),
            ));
        }
        if self.z_window < 2
            || self.isolation_trees == 0
            || self.isolation_sample_size < 2
            || self.reference_window < 2
            || self.clusters == 0
            || self.changepoint_min_segment < 2
        {
            return Err(ForecastError::InvalidConfig(
                "detector window, tree and cluster sizes out of range".to_string(),
            ));
        }
        if self.seasonal_periods.contains(&0) {
            return Err(ForecastError::InvalidConfig(
                "detector seasonal periods must be positive".to_string(),
            ));
        }
        self.threshold.validate()
    }
}

/// Data quality and imputation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Gaps up to this many days are linearly interpolated.
    pub max_interpolation_gap: usize,
    /// Longer gaps up to this length get seasonal-mean substitution.
    pub max_imputable_gap: usize,
    /// IQR multiplier for the consistency score.
    pub iqr_k: f64,
    /// Plausibility bounds overriding the built-in ones, by variable name.
    pub plausible_ranges: BTreeMap<String, (f64, f64)>,
    /// Date the data is considered current at; enables the freshness part
    /// of the timeliness score.
    pub reference_date: Option<NaiveDate>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_interpolation_gap: 3,
            max_imputable_gap: 30,
            iqr_k: 1.5,
            plausible_ranges: BTreeMap::new(),
            reference_date: None,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_imputable_gap < self.max_interpolation_gap {
            return Err(ForecastError::InvalidConfig(
                "max_imputable_gap must be >= max_interpolation_gap".to_string(),
            ));
        }
        for (name, (lo, hi)) in &self.plausible_ranges {
            if !(lo < hi) {
                return Err(ForecastError::InvalidConfig(format!(
                    "plausible range for {name} is empty"
                )));
            }
        }
        Ok(())
    }
}

/// Pipeline-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cv_folds: usize,
    pub per_model_timeout_seconds: f64,
    pub max_series_length_for_sequence_model: usize,
    pub confidence_level: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            per_model_timeout_seconds: 30.0,
            max_series_length_for_sequence_model: 20_000,
            confidence_level: 0.95,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cv_folds < 2 {
            return Err(ForecastError::InvalidConfig(
                "cv_folds must be at least 2".to_string(),
            ));
        }
        if !(self.per_model_timeout_seconds.is_finite() && self.per_model_timeout_seconds > 0.0) {
            return Err(ForecastError::InvalidConfig(
                "per_model_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.max_series_length_for_sequence_model == 0 {
            return Err(ForecastError::InvalidConfig(
                "max_series_length_for_sequence_model must be positive".to_string(),
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ForecastError::InvalidConfig(
                "confidence_level must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// SHA-256 of the JSON encoding of a configuration value.
pub fn config_hash<T: Serialize>(value: &T) -> Result<String> {
    let encoded =
        serde_json::to_vec(value).map_err(|e| ForecastError::InvalidConfig(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_config_rejects_bad_values() {
        assert!(ModelConfig::new(ModelKind::Autoregressive, [7], 0).is_err());
        assert!(ModelConfig::new(ModelKind::Autoregressive, [0, 7], 7).is_err());

        let config = ModelConfig::new(ModelKind::Autoregressive, [7], 7)
            .unwrap()
            .with_timeout(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn residual_correction_settings_are_checked() {
        let base = ModelConfig::new(ModelKind::SeasonalDecomposition, [7], 7).unwrap();
        let ok = base.clone().with_residual_correction(ResidualCorrectionConfig::default());
        assert!(ok.validate().is_ok());

        let no_trees = base.clone().with_residual_correction(ResidualCorrectionConfig {
            n_trees: 0,
            ..ResidualCorrectionConfig::default()
        });
        assert!(matches!(no_trees.validate(), Err(ForecastError::InvalidConfig(_))));

        let whole_holdout = base.with_residual_correction(ResidualCorrectionConfig {
            holdout_fraction: 1.0,
            ..ResidualCorrectionConfig::default()
        });
        assert!(whole_holdout.validate().is_err());
    }

    #[test]
    fn hyperparameters_are_range_checked() {
        let config = ModelConfig::new(ModelKind::Autoregressive, [7], 7)
            .unwrap()
            .with_hyperparameter("p", 2.0)
            .with_hyperparameter("q", 1.5);

        assert_eq!(config.hyper_usize("p", 1, 0, 5).unwrap(), 2);
        assert_eq!(config.hyper_usize("d", 1, 0, 2).unwrap(), 1);
        assert!(config.hyper_usize("q", 1, 0, 5).is_err());
    }

    #[test]
    fn minimum_points_follow_model_family() {
        let tbats = ModelConfig::new(ModelKind::SeasonalDecomposition, [7, 365], 7).unwrap();
        assert_eq!(tbats.min_points(), 730);

        let lstm = ModelConfig::new(ModelKind::SequenceLearning, [7], 7).unwrap();
        assert_eq!(lstm.min_points(), 21);

        let arima = ModelConfig::new(ModelKind::Autoregressive, [365], 7).unwrap();
        assert_eq!(arima.min_points(), 4);
    }

    #[test]
    fn sensitivity_presets_map_to_z() {
        let config = DetectorSuiteConfig::default().with_sensitivity(Sensitivity::High);
        assert_eq!(config.threshold.z, 1.5);
        assert_eq!(Sensitivity::Low.z(), 3.0);
    }

    #[test]
    fn detector_weights_must_be_unit_interval() {
        let config = DetectorSuiteConfig::default().with_weight(DetectorKind::Iqr, 1.5);
        assert!(config.validate().is_err());
        assert!(DetectorSuiteConfig::default().validate().is_ok());
    }

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let a = ModelConfig::new(ModelKind::Autoregressive, [7], 7).unwrap();
        let b = a.clone().with_hyperparameter("p", 2.0);

        assert_eq!(config_hash(&a).unwrap(), config_hash(&a.clone()).unwrap());
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn configs_round_trip_through_json() {
        let json = r#"{"cv_folds": 3}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cv_folds, 3);
        assert_eq!(config.per_model_timeout_seconds, 30.0);
    }
}
