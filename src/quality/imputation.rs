//! Missing-value treatment for a single daily variable.
//!
//! Gaps are runs of consecutive missing days. Each gap is treated by length:
//! - up to `max_interpolation_gap`: linear interpolation between the
//!   neighbouring observations;
//! - up to `max_imputable_gap`: seasonal phase mean on top of a
//!   deseasonalised linear bridge, when a seasonal period has at least two
//!   observed cycles (otherwise linear interpolation);
//! - longer: linearly bridged and marked [`Provenance::StillMissing`].
//!
//! Gaps touching either end of the series extend the nearest observation.

use crate::config::QualityConfig;
use crate::core::Provenance;
use crate::error::{ForecastError, Result};

/// Counts of each treatment applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImputationCounts {
    pub interpolated: usize,
    pub seasonal_mean: usize,
    pub still_missing: usize,
}

impl ImputationCounts {
    pub fn total(&self) -> usize {
        self.interpolated + self.seasonal_mean + self.still_missing
    }
}

/// Filled values, their provenance and the treatment counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Imputed {
    pub values: Vec<f64>,
    pub provenance: Vec<Provenance>,
    pub counts: ImputationCounts,
}

/// Per-phase offsets from the overall mean for one period.
struct SeasonalProfile {
    period: usize,
    offsets: Vec<f64>,
}

impl SeasonalProfile {
    /// Profile for the longest period with two observed cycles and an
    /// observation at every phase.
    fn estimate(values: &[Option<f64>], periods: &[usize]) -> Option<Self> {
        let observed: Vec<f64> = values.iter().flatten().copied().collect();
        let overall = observed.iter().sum::<f64>() / observed.len().max(1) as f64;

        let mut candidates: Vec<usize> = periods.iter().copied().filter(|&p| p > 1).collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.into_iter().find_map(|period| {
            if observed.len() < 2 * period {
                return None;
            }
            let mut sums = vec![0.0; period];
            let mut counts = vec![0usize; period];
            for (i, v) in values.iter().enumerate() {
                if let Some(v) = v {
                    sums[i % period] += v;
                    counts[i % period] += 1;
                }
            }
            if counts.iter().any(|&c| c == 0) {
                return None;
            }
            let offsets = sums
                .iter()
                .zip(&counts)
                .map(|(s, &c)| s / c as f64 - overall)
                .collect();
            Some(Self { period, offsets })
        })
    }

    fn offset(&self, index: usize) -> f64 {
        self.offsets[index % self.period]
    }
}

/// Fill every missing value in `values`.
///
/// Fails with `EmptyData` when nothing was observed.
pub fn impute(values: &[Option<f64>], periods: &[usize], config: &QualityConfig) -> Result<Imputed> {
    let n = values.len();
    if values.iter().all(Option::is_none) {
        return Err(ForecastError::EmptyData);
    }

    let profile = SeasonalProfile::estimate(values, periods);
    let mut out = vec![0.0; n];
    let mut provenance = vec![Provenance::Observed; n];
    let mut counts = ImputationCounts::default();

    let mut i = 0;
    while i < n {
        if let Some(v) = values[i] {
            out[i] = v;
            i += 1;
            continue;
        }
        let start = i;
        while i < n && values[i].is_none() {
            i += 1;
        }
        let end = i;
        let len = end - start;
        let left = start.checked_sub(1).map(|j| (j, out[j]));
        let right = values.get(end).copied().flatten().map(|v| (end, v));

        let kind = if len <= config.max_interpolation_gap {
            Provenance::Interpolated
        } else if len <= config.max_imputable_gap && profile.is_some() {
            Provenance::SeasonalMean
        } else if len <= config.max_imputable_gap {
            Provenance::Interpolated
        } else {
            Provenance::StillMissing
        };

        let offset = |idx: usize| match (&profile, kind) {
            (Some(p), Provenance::SeasonalMean) => p.offset(idx),
            _ => 0.0,
        };
        for idx in start..end {
            out[idx] = match (left, right) {
                (Some((l, lv)), Some((r, rv))) => {
                    let (la, ra) = (lv - offset(l), rv - offset(r));
                    let w = (idx - l) as f64 / (r - l) as f64;
                    la + w * (ra - la) + offset(idx)
                }
                (Some((l, lv)), None) => lv - offset(l) + offset(idx),
                (None, Some((r, rv))) => rv - offset(r) + offset(idx),
                (None, None) => 0.0,
            };
            provenance[idx] = kind;
        }
        match kind {
            Provenance::Interpolated => counts.interpolated += len,
            Provenance::SeasonalMean => counts.seasonal_mean += len,
            Provenance::StillMissing => counts.still_missing += len,
            Provenance::Observed => {}
        }
    }

    Ok(Imputed {
        values: out,
        provenance,
        counts,
    })
}
