//! K-means clustering of feature vectors.
//!
//! Seeded k-means++ initialisation followed by Lloyd iterations with
//! Euclidean distance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// K-means configuration.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Number of clusters
    pub k: usize,
    /// Maximum iterations
    pub max_iter: usize,
    /// Random seed for initialization
    pub seed: u64,
    /// Convergence tolerance on inertia
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 3,
            max_iter: 100,
            seed: 42,
            tolerance: 1e-6,
        }
    }
}

impl KMeansConfig {
    pub fn k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// K-means clustering result.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster of each input point.
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub n_iter: usize,
}

impl KMeansResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// Nearest centroid and the Euclidean distance to it.
    pub fn nearest(&self, point: &[f64]) -> (usize, f64) {
        nearest(point, &self.centroids)
    }
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, euclidean_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// Cluster `points` (all the same dimension).
pub fn kmeans(points: &[Vec<f64>], config: &KMeansConfig) -> KMeansResult {
    let n = points.len();
    let k = config.k.min(n);
    if k == 0 {
        return KMeansResult {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
            n_iter: 0,
        };
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = initialize_centroids(points, k, &mut rng);
    let mut labels = vec![0; n];
    let mut prev_inertia = f64::INFINITY;
    let mut n_iter = 0;

    for iter in 0..config.max_iter.max(1) {
        n_iter = iter + 1;
        let mut inertia = 0.0;
        for (label, p) in labels.iter_mut().zip(points) {
            let (c, d) = nearest(p, &centroids);
            *label = c;
            inertia += d * d;
        }
        if (prev_inertia - inertia).abs() <= config.tolerance {
            break;
        }
        prev_inertia = inertia;
        update_centroids(points, &labels, &mut centroids);
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| euclidean_distance(p, &centroids[l]).powi(2))
        .sum();

    KMeansResult {
        labels,
        centroids,
        inertia,
        n_iter,
    }
}

/// k-means++: each next centre is drawn with probability proportional to
/// its squared distance from the nearest chosen centre.
fn initialize_centroids(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| nearest(p, &centroids).1.powi(2))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // Every point coincides with a centre already.
            break;
        }
        let target = rng.gen::<f64>() * total;
        let mut acc = 0.0;
        let mut chosen = points.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            acc += w;
            if acc >= target && *w > 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(points[chosen].clone());
    }
    centroids
}

/// Move each centre to the mean of its members; empty clusters keep their
/// previous centre.
fn update_centroids(points: &[Vec<f64>], labels: &[usize], centroids: &mut [Vec<f64>]) {
    let dim = points.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; dim]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (p, &l) in points.iter().zip(labels) {
        counts[l] += 1;
        for (s, x) in sums[l].iter_mut().zip(p) {
            *s += x;
        }
    }
    for ((centroid, sum), &count) in centroids.iter_mut().zip(sums).zip(&counts) {
        if count > 0 {
            *centroid = sum.into_iter().map(|s| s / count as f64).collect();
        }
    }
}
