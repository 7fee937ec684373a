//! FFT periodogram for locating the dominant cycle of a series.

use rustfft::{num_complex::Complex64, FftPlanner};

/// Positive-frequency half of the FFT of a real signal.
pub fn fft_real(signal: &[f64]) -> Vec<Complex64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buffer: Vec<Complex64> = signal.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buffer);
    buffer.truncate(n / 2 + 1);
    buffer
}

/// `(period, power)` pairs for every Fourier frequency with period ≥ 2,
/// after removing a least-squares line. Ordered by increasing frequency.
pub fn periodogram(signal: &[f64]) -> Vec<(f64, f64)> {
    let n = signal.len();
    if n < 4 {
        return Vec::new();
    }
    let detrended = detrend(signal);
    fft_real(&detrended)
        .iter()
        .enumerate()
        .skip(1)
        .map(|(k, c)| (n as f64 / k as f64, c.norm_sqr() / n as f64))
        .filter(|(period, _)| *period >= 2.0)
        .collect()
}

/// Strongest cycle in a periodogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DominantCycle {
    /// Period in samples (days).
    pub period: f64,
    /// Share of total spectral power at this frequency.
    pub power_share: f64,
}

/// Dominant cycle whose period is at most half the series length, so at
/// least two cycles were observed. `None` for short or flat series.
pub fn dominant_cycle(signal: &[f64]) -> Option<DominantCycle> {
    let max_period = signal.len() as f64 / 2.0;
    let spectrum = periodogram(signal);
    let total: f64 = spectrum.iter().map(|(_, p)| p).sum();
    if total <= 1e-12 {
        return None;
    }
    spectrum
        .into_iter()
        .filter(|(period, _)| *period <= max_period)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(period, power)| DominantCycle {
            period,
            power_share: power / total,
        })
}

fn detrend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len() as f64;
    let t_mean = (n - 1.0) / 2.0;
    let y_mean = signal.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in signal.iter().enumerate() {
        let dt = i as f64 - t_mean;
        sxy += dt * (y - y_mean);
        sxx += dt * dt;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    signal
        .iter()
        .enumerate()
        .map(|(i, y)| y - y_mean - slope * (i as f64 - t_mean))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn finds_weekly_cycle() {
        let signal: Vec<f64> = (0..140)
            .map(|i| 5.0 + 0.3 * i as f64 + 2.0 * (2.0 * PI * i as f64 / 7.0).sin())
            .collect();
        let cycle = dominant_cycle(&signal).unwrap();
        assert_relative_eq!(cycle.period, 7.0, epsilon = 1e-9);
        assert!(cycle.power_share > 0.5);
    }

    #[test]
    fn flat_series_has_no_cycle() {
        assert!(dominant_cycle(&[3.0; 50]).is_none());
        assert!(periodogram(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn periods_are_at_least_two() {
        let signal: Vec<f64> = (0..32).map(|i| (i % 5) as f64).collect();
        assert!(periodogram(&signal).iter().all(|(p, _)| *p >= 2.0));
    }
}
