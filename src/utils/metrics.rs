//! Forecast error measures.
//!
//! Mismatched or empty inputs yield NaN rather than an error; callers treat
//! a NaN score as an unusable fold.

/// Mean absolute error.
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Mean squared error.
pub fn mse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}


pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    mse(actual, predicted).sqrt()
}

/// Akaike information criterion from a Gaussian likelihood.
pub fn gaussian_aic(residuals: &[f64], n_params: usize) -> Option<f64> {
    let n = residuals.len();
    if n == 0 {
        return None;
    }
    let sigma2 = residuals.iter().map(|r| r * r).sum::<f64>() / n as f64;
    if sigma2 <= 0.0 || !sigma2.is_finite() {
        return None;
    }
    let log_lik = -0.5 * n as f64 * ((2.0 * std::f64::consts::PI * sigma2).ln() + 1.0);
    Some(-2.0 * log_lik + 2.0 * n_params as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn errors_of_known_pairs() {
        assert_relative_eq!(mae(&[1.0, 2.0, 3.0], &[1.5, 2.5, 3.5]), 0.5, epsilon = 1e-10);
        assert_relative_eq!(rmse(&[1.0, 2.0, 3.0], &[2.0, 3.0, 4.0]), 1.0, epsilon = 1e-10);
        assert_relative_eq!(mse(&[0.0, 0.0], &[1.0, -3.0]), 5.0, epsilon = 1e-10);
        assert!(mae(&[1.0], &[]).is_nan());
        assert!(rmse(&[], &[]).is_nan());
    }

    #[test]
    fn aic_penalises_parameters() {
        let residuals = [0.5, -0.3, 0.2, -0.4, 0.1];
        let small = gaussian_aic(&residuals, 1).unwrap();
        let large = gaussian_aic(&residuals, 4).unwrap();
        assert_relative_eq!(large - small, 6.0, epsilon = 1e-10);
        assert!(gaussian_aic(&[0.0, 0.0], 1).is_none());
    }
}
