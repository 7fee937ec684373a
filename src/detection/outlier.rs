//! Univariate statistical detectors: IQR fences, rolling Z-score and
//! modified Z-score.

use super::DetectorScores;
use crate::config::DetectorKind;
use crate::error::{ForecastError, Result};
use crate::utils::stats::{mad, mean, median, quartiles, std_dev};

/// Smallest spread used as a divisor, relative to the data's magnitude.
fn spread_floor(values: &[f64]) -> f64 {
    let scale = values.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
    scale * 1e-9
}

/// Distance outside the Tukey fences `[Q1 - k·IQR, Q3 + k·IQR]`, in IQRs.
///
/// The raw score is the distance beyond the quartiles (not the fences)
/// divided by IQR, so a point flags exactly when it leaves the fences.
pub fn iqr_scores(values: &[f64], k: f64) -> Result<DetectorScores> {
    if values.len() < 4 {
        return Err(ForecastError::InsufficientData {
            needed: 4,
            got: values.len(),
        });
    }
    let (q1, q3) = quartiles(values);
    let iqr = (q3 - q1).max(spread_floor(values));

    let raw = values
        .iter()
        .map(|&x| {
            let beyond = (q1 - x).max(x - q3).max(0.0);
            beyond / iqr
        })
        .collect();

    Ok(DetectorScores::new(DetectorKind::Iqr, raw, k))
}

/// `|x - mean| / sd` against the `window` observations before each point.
///
/// Points within the first `window` use the first `window + 1` observations
/// minus themselves, so early values are still scored.
pub fn rolling_z_scores(values: &[f64], window: usize, threshold: f64) -> Result<DetectorScores> {
    let n = values.len();
    let window = window.max(2);
    if n < 3 {
        return Err(ForecastError::InsufficientData { needed: 3, got: n });
    }
    let floor = spread_floor(values);
    let mut reference = Vec::with_capacity(window);

    let raw = (0..n)
        .map(|i| {
            reference.clear();
            if i >= window {
                reference.extend_from_slice(&values[i - window..i]);
            } else {
                let end = (window + 1).min(n);
                reference.extend(
                    values[..end]
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, v)| *v),
                );
            }
            let m = mean(&reference);
            let sd = std_dev(&reference);
            let sd = if sd.is_finite() { sd.max(floor) } else { floor };
            (values[i] - m).abs() / sd
        })
        .collect();

    Ok(DetectorScores::new(DetectorKind::ZScore, raw, threshold))
}

/// `0.6745 · |x - median| / MAD`.
///
/// When more than half the values are identical the MAD is zero; the mean
/// absolute deviation (scaled by 1.2533) stands in.
pub fn modified_z_scores(values: &[f64], threshold: f64) -> Result<DetectorScores> {
    if values.len() < 3 {
        return Err(ForecastError::InsufficientData {
            needed: 3,
            got: values.len(),
        });
    }
    let med = median(values);
    let mad = mad(values);

    let raw = if mad > spread_floor(values) {
        values
            .iter()
            .map(|x| 0.6745 * (x - med).abs() / mad)
            .collect()
    } else {
        let mean_ad = values.iter().map(|x| (x - med).abs()).sum::<f64>() / values.len() as f64;
        let scale = (1.2533 * mean_ad).max(spread_floor(values));
        values.iter().map(|x| (x - med).abs() / scale).collect()
    };

    Ok(DetectorScores::new(DetectorKind::ModifiedZScore, raw, threshold))
}
