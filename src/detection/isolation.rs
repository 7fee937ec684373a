//! Isolation forest over multivariate daily rows.

use super::DetectorScores;
use crate::config::DetectorKind;
use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Fewest reference rows a forest is grown from.
const MIN_REFERENCE: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

impl Node {
    fn path_length(&self, row: &[f64], depth: usize) -> f64 {
        match self {
            Node::Split {
                feature,
                value,
                left,
                right,
            } => {
                if row[*feature] < *value {
                    left.path_length(row, depth + 1)
                } else {
                    right.path_length(row, depth + 1)
                }
            }
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
        }
    }
}

/// Expected path length `c(n)` of an unsuccessful search in a binary
/// search tree of `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// An ensemble of random isolation trees.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    /// Grow `n_trees` trees, each on `sample_size` rows drawn without
    /// replacement from `reference`.
    pub fn fit(reference: &[Vec<f64>], n_trees: usize, sample_size: usize, seed: u64) -> Result<Self> {
        if reference.len() < MIN_REFERENCE {
            return Err(ForecastError::InsufficientData {
                needed: MIN_REFERENCE,
                got: reference.len(),
            });
        }
        let dim = reference[0].len();
        if dim == 0 || reference.iter().any(|r| r.len() != dim) {
            return Err(ForecastError::DimensionMismatch {
                expected: dim,
                got: reference.iter().map(Vec::len).find(|&l| l != dim).unwrap_or(0),
            });
        }

        let sample_size = sample_size.clamp(2, reference.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(seed);

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let rows: Vec<&[f64]> = sample(&mut rng, reference.len(), sample_size)
                    .into_iter()
                    .map(|i| reference[i].as_slice())
                    .collect();
                grow(&rows, 0, height_limit, &mut rng)
            })
            .collect();

        Ok(Self { trees, sample_size })
    }

    /// Anomaly score `2^(-E[h(x)] / c(ψ))` in `(0, 1]`. Around 0.5 or below
    /// is ordinary; values near 1 isolate almost immediately.
    pub fn score(&self, row: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }
}

fn grow(rows: &[&[f64]], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
    if depth >= height_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }
    let dim = rows[0].len();

    // Only features that still vary can split.
    let splittable: Vec<(usize, f64, f64)> = (0..dim)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r[f]), hi.max(r[f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if splittable.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let value = rng.gen_range(lo..hi);
    let (left, right): (Vec<&[f64]>, Vec<&[f64]>) = rows.iter().partition(|r| r[feature] < value);

    Node::Split {
        feature,
        value,
        left: Box::new(grow(&left, depth + 1, height_limit, rng)),
        right: Box::new(grow(&right, depth + 1, height_limit, rng)),
    }
}

/// Score every row against a forest grown on the trailing `reference_window`
/// rows.
///
/// The raw score is the forest score above 0.5; `flag_score` is the forest
/// score that counts as anomalous.
pub fn isolation_scores(
    rows: &[Vec<f64>],
    reference_window: usize,
    n_trees: usize,
    sample_size: usize,
    flag_score: f64,
    seed: u64,
) -> Result<DetectorScores> {
    let start = rows.len().saturating_sub(reference_window);
    let forest = IsolationForest::fit(&rows[start..], n_trees, sample_size, seed)?;
    let raw = rows
        .iter()
        .map(|r| (forest.score(r) - 0.5).max(0.0))
        .collect();
    Ok(DetectorScores::new(
        DetectorKind::IsolationForest,
        raw,
        flag_score - 0.5,
    ))
}
