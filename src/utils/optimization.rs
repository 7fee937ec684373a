//! Derivative-free minimisation for model parameter estimation.
//!
//! ARIMA and the seasonal state-space model both fit by minimising a
//! likelihood-like objective over a handful of box-constrained parameters,
//! which is what Nelder-Mead is good at.

use super::deadline::Deadline;
use std::cmp::Ordering;

/// Outcome of a Nelder-Mead search.
#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub optimal_point: Vec<f64>,
    pub optimal_value: f64,
    pub iterations: usize,
    /// The simplex collapsed or its values agreed within tolerance.
    pub converged: bool,
    /// The search stopped because its deadline passed.
    pub interrupted: bool,
}

/// Search settings. The move coefficients are the textbook ones.
#[derive(Debug, Clone)]
pub struct NelderMeadConfig {
    pub max_iter: usize,
    pub tolerance: f64,
    /// Reflection.
    pub alpha: f64,
    /// Expansion.
    pub gamma: f64,
    /// Contraction.
    pub rho: f64,
    /// Shrink.
    pub sigma: f64,
    /// Relative size of the initial simplex.
    pub initial_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tolerance: 1e-8,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
            initial_step: 0.05,
        }
    }
}

/// Vertices with their objective values, kept in the box given by `bounds`.
struct Simplex<'a, F> {
    objective: F,
    bounds: Option<&'a [(f64, f64)]>,
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl<'a, F: Fn(&[f64]) -> f64> Simplex<'a, F> {
    fn around(objective: F, start: &[f64], bounds: Option<&'a [(f64, f64)]>, step: f64) -> Self {
        let mut simplex = Self {
            objective,
            bounds,
            vertices: Vec::with_capacity(start.len() + 1),
            values: Vec::with_capacity(start.len() + 1),
        };
        simplex.push(start.to_vec());
        for i in 0..start.len() {
            let mut vertex = start.to_vec();
            vertex[i] += if start[i].abs() > 1e-10 { step * start[i].abs() } else { step };
            simplex.push(vertex);
        }
        simplex
    }

    fn clamp(&self, mut point: Vec<f64>) -> Vec<f64> {
        if let Some(bounds) = self.bounds {
            for (x, &(lo, hi)) in point.iter_mut().zip(bounds) {
                *x = x.clamp(lo, hi);
            }
        }
        point
    }

    fn push(&mut self, vertex: Vec<f64>) {
        let vertex = self.clamp(vertex);
        self.values.push((self.objective)(vertex.as_slice()));
        self.vertices.push(vertex);
    }

    /// Clamped point `from + t * (to - from)` and its value.
    fn along(&self, from: &[f64], to: &[f64], t: f64) -> (Vec<f64>, f64) {
        let point = self.clamp(from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect());
        let value = (self.objective)(point.as_slice());
        (point, value)
    }

    fn replace(&mut self, index: usize, (point, value): (Vec<f64>, f64)) {
        self.vertices[index] = point;
        self.values[index] = value;
    }

    /// Vertex indices from best to worst.
    fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].partial_cmp(&self.values[b]).unwrap_or(Ordering::Equal));
        order
    }

    fn centroid_without(&self, excluded: usize) -> Vec<f64> {
        let dim = self.vertices[0].len();
        let mut centroid = vec![0.0; dim];
        for (i, vertex) in self.vertices.iter().enumerate() {
            if i != excluded {
                for (c, x) in centroid.iter_mut().zip(vertex) {
                    *c += x;
                }
            }
        }
        let count = (self.vertices.len() - 1) as f64;
        centroid.iter_mut().for_each(|c| *c /= count);
        centroid
    }

    fn radius(&self, center: &[f64]) -> f64 {
        self.vertices
            .iter()
            .map(|v| v.iter().zip(center).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt())
            .fold(0.0, f64::max)
    }

    fn shrink_toward(&mut self, best: usize, sigma: f64) {
        let anchor = self.vertices[best].clone();
        for i in 0..self.vertices.len() {
            if i != best {
                let moved = self.along(&anchor, &self.vertices[i], sigma);
                self.replace(i, moved);
            }
        }
    }

    fn into_best(self) -> (Vec<f64>, f64) {
        let best = self.ranking()[0];
        let value = self.values[best];
        (self.vertices.into_iter().nth(best).unwrap_or_default(), value)
    }
}

/// Minimise `objective` from `initial`, optionally inside per-dimension
/// `(min, max)` bounds.
pub fn nelder_mead<F>(
    objective: F,
    initial: &[f64],
    bounds: Option<&[(f64, f64)]>,
    config: NelderMeadConfig,
) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    nelder_mead_until(objective, initial, bounds, config, &Deadline::none())
}

/// [`nelder_mead`] that gives up once `deadline` expires, returning the best
/// vertex so far with `interrupted` set.
pub fn nelder_mead_until<F>(
    objective: F,
    initial: &[f64],
    bounds: Option<&[(f64, f64)]>,
    config: NelderMeadConfig,
    deadline: &Deadline,
) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    if initial.is_empty() {
        return NelderMeadResult {
            optimal_point: Vec::new(),
            optimal_value: f64::NAN,
            iterations: 0,
            converged: false,
            interrupted: false,
        };
    }

    let mut simplex = Simplex::around(objective, initial, bounds, config.initial_step);
    let mut iterations = 0;
    let mut converged = false;
    let mut interrupted = false;

    while iterations < config.max_iter {
        if deadline.is_expired() {
            interrupted = true;
            break;
        }
        iterations += 1;

        let order = simplex.ranking();
        let (best, worst, runner_up) = (order[0], order[order.len() - 1], order[order.len() - 2]);
        let (f_best, f_worst, f_runner_up) =
            (simplex.values[best], simplex.values[worst], simplex.values[runner_up]);

        let centroid = simplex.centroid_without(worst);
        if f_worst - f_best < config.tolerance || simplex.radius(&centroid) < config.tolerance {
            converged = true;
            break;
        }

        let worst_vertex = simplex.vertices[worst].clone();
        let reflected = simplex.along(&centroid, &worst_vertex, -config.alpha);
        let f_reflected = reflected.1;

        if f_reflected < f_best {
            let expanded = simplex.along(&centroid, &reflected.0, config.gamma);
            let pick = if expanded.1 < f_reflected { expanded } else { reflected };
            simplex.replace(worst, pick);
            continue;
        }
        if f_reflected < f_runner_up {
            simplex.replace(worst, reflected);
            continue;
        }

        let contracted = if f_reflected < f_worst {
            let outside = simplex.along(&centroid, &reflected.0, config.rho);
            (outside.1 <= f_reflected).then_some(outside)
        } else {
            let inside = simplex.along(&centroid, &worst_vertex, config.rho);
            (inside.1 < f_worst).then_some(inside)
        };
        match contracted {
            Some(point) => simplex.replace(worst, point),
            None => simplex.shrink_toward(best, config.sigma),
        }
    }

    let (optimal_point, optimal_value) = simplex.into_best();
    NelderMeadResult {
        optimal_point,
        optimal_value,
        iterations,
        converged,
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn finds_minimum_of_shifted_bowl() {
        let result = nelder_mead(
            |x| (x[0] - 2.0).powi(2) + 3.0 * (x[1] + 1.0).powi(2) + 0.5,
            &[0.0, 0.0],
            None,
            NelderMeadConfig::default(),
        );

        assert!(result.converged);
        assert_relative_eq!(result.optimal_point[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.optimal_point[1], -1.0, epsilon = 1e-3);
        assert_relative_eq!(result.optimal_value, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn smoothing_parameter_stays_inside_bounds() {
        // Unconstrained optimum at 1.4 lies outside the admissible [0, 1].
        let result = nelder_mead(
            |x| (x[0] - 1.4).powi(2),
            &[0.3],
            Some(&[(0.0, 1.0)]),
            NelderMeadConfig::default(),
        );

        assert_relative_eq!(result.optimal_point[0], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn ar_coefficients_of_a_quadratic_loss() {
        let result = nelder_mead(
            |x| (x[0] - 0.6).powi(2) + (x[1] + 0.2).powi(2) + (x[2] - 0.1).powi(2),
            &[0.0, 0.0, 0.0],
            Some(&[(-0.99, 0.99); 3]),
            NelderMeadConfig::default(),
        );

        assert!(result.converged);
        for (got, want) in result.optimal_point.iter().zip([0.6, -0.2, 0.1]) {
            assert_relative_eq!(*got, want, epsilon = 1e-3);
        }
    }

    #[test]
    fn no_parameters_is_not_a_search() {
        let result = nelder_mead(|_| 0.0, &[], None, NelderMeadConfig::default());
        assert!(!result.converged);
        assert!(result.optimal_value.is_nan());
    }

    #[test]
    fn cancelled_search_returns_initial_best() {
        let deadline = Deadline::none();
        deadline.cancel();
        let result = nelder_mead_until(
            |x| (x[0] - 2.0).powi(2),
            &[0.0],
            None,
            NelderMeadConfig::default(),
            &deadline,
        );

        assert!(result.interrupted);
        assert!(!result.converged);
        assert_eq!(result.iterations, 0);
        assert!(result.optimal_value.is_finite());
    }
}
