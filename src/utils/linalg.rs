//! Least-squares helpers shared by the regression-based models.

use crate::error::{ForecastError, Result};

/// Solve `min ||y - Xb||² + Σ penalty_j b_j²` through the normal equations.
///
/// `design` is row-major (one row per observation). A zero penalty leaves
/// the coefficient unregularised; a tiny jitter keeps the system positive
/// definite.
pub fn ridge_fit(design: &[Vec<f64>], y: &[f64], penalties: &[f64]) -> Result<Vec<f64>> {
    let n = y.len();
    if n == 0 {
        return Err(ForecastError::EmptyData);
    }
    if design.len() != n {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: design.len(),
        });
    }
    let k = design[0].len();
    if penalties.len() != k {
        return Err(ForecastError::DimensionMismatch {
            expected: k,
            got: penalties.len(),
        });
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in design.iter().zip(y) {
        if row.len() != k {
            return Err(ForecastError::DimensionMismatch {
                expected: k,
                got: row.len(),
            });
        }
        for i in 0..k {
            let xi = row[i];
            if xi == 0.0 {
                continue;
            }
            xty[i] += xi * yi;
            for j in 0..=i {
                xtx[i][j] += xi * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[j][i] = xtx[i][j];
        }
        xtx[i][i] += penalties[i] + 1e-8;
    }

    solve_symmetric(&xtx, &xty).ok_or_else(|| {
        ForecastError::ComputationError("normal equations are not positive definite".to_string())
    })
}

/// Row-by-coefficient products.
pub fn predict_rows(design: &[Vec<f64>], beta: &[f64]) -> Vec<f64> {
    design
        .iter()
        .map(|row| row.iter().zip(beta).map(|(x, b)| x * b).sum())
        .collect()
}

/// Solve symmetric positive definite system using Cholesky decomposition.
pub fn solve_symmetric(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n {
        return None;
    }

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }

    // L' x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    Some(x)
}
