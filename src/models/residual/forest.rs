//! Bagged CART regression trees.
//!
//! Each tree is grown on a bootstrap sample of the rows, splitting on the
//! threshold that most reduces the squared error of the targets. The forest
//! predicts the mean of its trees.

use crate::error::{ForecastError, Result};
use crate::utils::deadline::Deadline;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::cmp::Ordering;

const NAME: &str = "residual_forest";

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        value: f64,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
            Node::Leaf { value } => *value,
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
            Node::Leaf { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one tree over a bootstrap sample and tallies split gains.
struct Grower<'a> {
    rows: &'a [Vec<f64>],
    targets: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    gains: Vec<f64>,
}

impl Grower<'_> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> Node {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| self.targets[i]).sum();
        let mean = sum / n as f64;
        let sse: f64 = indices.iter().map(|&i| (self.targets[i] - mean).powi(2)).sum();

        if depth >= self.max_depth || n < self.min_samples_split || sse < 1e-12 {
            return Node::Leaf { value: mean };
        }
        let Some(split) = self.best_split(indices, sse) else {
            return Node::Leaf { value: mean };
        };

        let mut mid = 0;
        for k in 0..n {
            if self.rows[indices[k]][split.feature] <= split.threshold {
                indices.swap(mid, k);
                mid += 1;
            }
        }
        if mid == 0 || mid == n {
            return Node::Leaf { value: mean };
        }

        self.gains[split.feature] += split.gain;
        let (left, right) = indices.split_at_mut(mid);
        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    /// Sweep each feature in sorted order, scoring every cut between two
    /// distinct values from running sums.
    fn best_split(&self, indices: &[usize], parent_sse: f64) -> Option<Split> {
        let n = indices.len();
        let total: f64 = indices.iter().map(|&i| self.targets[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.targets[i].powi(2)).sum();
        let dim = self.rows[indices[0]].len();

        let mut best: Option<Split> = None;
        let mut order = indices.to_vec();
        for feature in 0..dim {
            order.sort_by(|&a, &b| {
                self.rows[a][feature]
                    .partial_cmp(&self.rows[b][feature])
                    .unwrap_or(Ordering::Equal)
            });
            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 0..n - 1 {
                let y = self.targets[order[k]];
                left_sum += y;
                left_sq += y * y;

                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }
                let here = self.rows[order[k]][feature];
                let next = self.rows[order[k + 1]][feature];
                if next <= here {
                    continue;
                }

                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);
                let gain = parent_sse - sse;
                if gain > best.map_or(1e-12, |b| b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: 0.5 * (here + next),
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Random forest regressor.
///
/// ```
/// use weathercast::models::residual::RandomForest;
/// use weathercast::utils::Deadline;
///
/// let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
/// let targets: Vec<f64> = (0..40).map(|i| if i < 20 { -1.0 } else { 1.0 }).collect();
///
/// let mut forest = RandomForest::new(10).with_max_depth(3).with_seed(7);
/// forest.fit(&rows, &targets, &Deadline::none())?;
/// assert!(forest.predict(&[35.0])? > 0.5);
/// # Ok::<(), weathercast::ForecastError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RandomForest {
    n_trees: usize,
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    seed: u64,
    trees: Vec<Node>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(n_trees: usize) -> Self {
        Self {
            n_trees: n_trees.max(1),
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n.max(1);
        self
    }

    /// Tree `t` draws its bootstrap sample from `seed + t`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Grow the trees in parallel. Stops with `Timeout` once `deadline`
    /// passes.
    pub fn fit(&mut self, rows: &[Vec<f64>], targets: &[f64], deadline: &Deadline) -> Result<()> {
        if rows.is_empty() {
            return Err(ForecastError::EmptyData);
        }
        if rows.len() != targets.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: rows.len(),
                got: targets.len(),
            });
        }
        let dim = rows[0].len();
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(ForecastError::DimensionMismatch {
                expected: dim,
                got: bad.len(),
            });
        }
        if targets.iter().chain(rows.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(ForecastError::ComputationError(
                "forest inputs must be finite".to_string(),
            ));
        }

        let n = rows.len();
        let grown: Vec<(Node, Vec<f64>)> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                deadline.check(NAME)?;
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let draw = Uniform::from(0..n);
                let mut sample: Vec<usize> = (0..n).map(|_| draw.sample(&mut rng)).collect();
                let mut grower = Grower {
                    rows,
                    targets,
                    max_depth: self.max_depth,
                    min_samples_split: self.min_samples_split,
                    min_samples_leaf: self.min_samples_leaf,
                    gains: vec![0.0; dim],
                };
                let tree = grower.grow(&mut sample, 0);
                Ok((tree, grower.gains))
            })
            .collect::<Result<_>>()?;

        let mut importances = vec![0.0; dim];
        self.trees = grown
            .into_iter()
            .map(|(tree, gains)| {
                importances.iter_mut().zip(&gains).for_each(|(a, g)| *a += g);
                tree
            })
            .collect();
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        self.importances = importances;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if !self.is_fitted() {
            return Err(ForecastError::FitRequired);
        }
        if row.len() != self.importances.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.importances.len(),
                got: row.len(),
            });
        }
        Ok(self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64)
    }

    /// Share of the total squared-error reduction credited to each feature.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// Depth of the deepest tree.
    pub fn depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }
}
