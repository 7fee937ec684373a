//! Residuals left after removing trend and seasonality.

use super::DetectorScores;
use crate::config::DetectorKind;
use crate::error::Result;
use crate::seasonality::Mstl;
use crate::utils::stats::{mad, median};

/// Robust Z-score of the MSTL remainder: `|r - median(r)| / (1.4826 · MAD(r))`.
///
/// Periods without two full cycles in `values` are skipped; the call fails
/// with `InsufficientData` when none is left.
pub fn seasonal_residual_scores(
    values: &[f64],
    periods: &[usize],
    threshold: f64,
) -> Result<DetectorScores> {
    let decomposition = Mstl::new(periods.iter().copied())
        .robust(2)
        .decompose(values)?;
    let remainder = &decomposition.remainder;

    let center = median(remainder);
    let scale = (1.4826 * mad(remainder)).max(1e-9);
    let raw = remainder.iter().map(|r| (r - center).abs() / scale).collect();

    Ok(DetectorScores::new(DetectorKind::SeasonalResidual, raw, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn weekly(n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..n)
            .map(|i| 15.0 + 5.0 * (2.0 * PI * i as f64 / 7.0).sin() + rng.gen_range(-0.3..0.3))
            .collect()
    }

    #[test]
    fn flags_break_in_weekly_pattern() {
        let mut series = weekly(140);
        // A value that is ordinary for the series but wrong for its weekday.
        let trough = (0..7).min_by(|&a, &b| series[70 + a].total_cmp(&series[70 + b])).unwrap() + 70;
        series[trough] += 9.0;

        let scores = seasonal_residual_scores(&series, &[7], 3.0).unwrap();
        assert!(scores.flagged().contains(&trough));
        assert_eq!(scores.len(), 140);
    }

    #[test]
    fn regular_cycle_is_quiet() {
        let series = weekly(140);
        let scores = seasonal_residual_scores(&series, &[7], 3.0).unwrap();
        assert!(scores.flagged().len() <= 3);
    }

    #[test]
    fn needs_two_cycles() {
        let err = seasonal_residual_scores(&weekly(20), &[365], 3.0).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }
}
