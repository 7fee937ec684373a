//! Regime changes located by PELT on the seasonally adjusted series.

use super::DetectorScores;
use crate::changepoint::{pelt_detect, CostFunction, PeltConfig, PrefixSums};
use crate::config::DetectorKind;
use crate::error::{ForecastError, Result};
use crate::seasonality::Mstl;
use crate::utils::stats::{mad, median};

/// Penalty multiplier on `ln(n)` per changepoint.
const PENALTY_PER_LOG_N: f64 = 3.0;

/// Smallest segment spread, in robust standard deviations.
const SPREAD_FLOOR: f64 = 1e-3;

/// Score the first point of every new segment by how much the regime
/// changes across it. All other points score 0.
///
/// Segments come from PELT with a Gaussian mean/variance cost, so a change
/// in spread is found as readily as a change in level. The score at a
/// boundary is `|Δmean| + |ln(sd_after / sd_before)|` with the mean in units
/// of the robust noise level.
///
/// Seasonality at `periods` is removed first when the series holds two
/// cycles of at least one of them. The noise level is estimated from first
/// differences (`1.4826 · MAD(Δx) / √2`) so that level shifts do not
/// inflate it.
pub fn level_shift_scores(
    values: &[f64],
    periods: &[usize],
    min_segment: usize,
    threshold: f64,
) -> Result<DetectorScores> {
    let n = values.len();
    let needed = 2 * min_segment.max(1);
    if n < needed {
        return Err(ForecastError::InsufficientData { needed, got: n });
    }

    let adjusted: Vec<f64> = match Mstl::new(periods.iter().copied()).decompose(values) {
        Ok(d) => values
            .iter()
            .zip(d.total_seasonal())
            .map(|(v, s)| v - s)
            .collect(),
        Err(_) => values.to_vec(),
    };

    let diffs: Vec<f64> = adjusted.windows(2).map(|w| w[1] - w[0]).collect();
    let sigma = (1.4826 * mad(&diffs) / std::f64::consts::SQRT_2).max(1e-9);
    let center = median(&adjusted);
    let standardized: Vec<f64> = adjusted.iter().map(|x| (x - center) / sigma).collect();

    let config = PeltConfig::with_log_penalty(n, PENALTY_PER_LOG_N)
        .cost_function(CostFunction::MeanVariance)
        .min_segment_length(min_segment);
    let result = pelt_detect(&standardized, &config);

    let sums = PrefixSums::new(&standardized);
    let spread = |(start, end): (usize, usize)| {
        (sums.rss(start, end) / (end - start) as f64).sqrt().max(SPREAD_FLOOR)
    };
    let mut raw = vec![0.0; n];
    for pair in result.segments.windows(2) {
        let (before, after) = (pair[0], pair[1]);
        let level = sums.mean(after.0, after.1) - sums.mean(before.0, before.1);
        let scale = (spread(after) / spread(before)).ln();
        raw[after.0] = level.abs() + scale.abs();
    }

    Ok(DetectorScores::new(DetectorKind::ChangePoint, raw, threshold))
}
