//! Differencing utilities for ARIMA models.

/// Apply differencing `d` times.
pub fn difference(series: &[f64], d: usize) -> Vec<f64> {
    let mut result = series.to_vec();
    for _ in 0..d {
        if result.len() <= 1 {
            break;
        }
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Integrate forecasts made on the `d`-times differenced scale back onto the
/// scale of `original`.
pub fn integrate(differenced: &[f64], original: &[f64], d: usize) -> Vec<f64> {
    let mut result = differenced.to_vec();

    // Undo one differencing level at a time, innermost first.
    for level in (0..d).rev() {
        let anchor = difference(original, level).last().copied().unwrap_or(0.0);
        let mut cumsum = anchor;
        for value in result.iter_mut() {
            cumsum += *value;
            *value = cumsum;
        }
    }

    result
}

/// Cumulative-sum MA(∞) weights `d` times, giving the weights of the
/// integrated process used for forecast variances.
pub fn integrate_weights(psi: &[f64], d: usize) -> Vec<f64> {
    let mut result = psi.to_vec();
    for _ in 0..d {
        let mut cumsum = 0.0;
        for w in result.iter_mut() {
            cumsum += *w;
            *w = cumsum;
        }
    }
    result
}
