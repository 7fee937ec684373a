//! Distance to the nearest k-means centroid of recent rows.

use super::DetectorScores;
use crate::clustering::{euclidean_distance, kmeans, KMeansConfig};
use crate::config::DetectorKind;
use crate::error::{ForecastError, Result};
use crate::utils::stats::{mean, median};

/// Score rows by their distance to the nearest of `clusters` centroids fitted
/// on the trailing `reference_window` rows.
///
/// Clusters with too few members to count as dense are ignored. Distances
/// are expressed in multiples of the median reference distance,
/// so `threshold = 3` flags points three times further out than a typical
/// member.
pub fn cluster_distance_scores(
    rows: &[Vec<f64>],
    reference_window: usize,
    clusters: usize,
    threshold: f64,
    seed: u64,
) -> Result<DetectorScores> {
    let start = rows.len().saturating_sub(reference_window);
    let reference = &rows[start..];
    let needed = (2 * clusters).max(4);
    if reference.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            got: reference.len(),
        });
    }

    let fit = kmeans(reference, &KMeansConfig::default().k(clusters).seed(seed));

    // Clusters holding only a handful of points are outliers themselves.
    let min_members = (reference.len() / (10 * clusters)).max(3);
    let sizes = fit.cluster_sizes();
    let mut dense: Vec<Vec<f64>> = fit
        .centroids
        .iter()
        .zip(&sizes)
        .filter(|(_, &size)| size >= min_members)
        .map(|(c, _)| c.clone())
        .collect();
    if dense.is_empty() {
        dense = fit.centroids.clone();
    }
    let nearest = |row: &[f64]| {
        dense
            .iter()
            .map(|c| euclidean_distance(row, c))
            .fold(f64::INFINITY, f64::min)
    };
    let reference_distances: Vec<f64> = reference.iter().map(|r| nearest(r.as_slice())).collect();

    let mut scale = median(&reference_distances);
    if scale <= 1e-12 {
        scale = mean(&reference_distances);
    }
    let scale = scale.max(1e-9);

    let raw = rows.iter().map(|r| nearest(r.as_slice()) / scale).collect();
    Ok(DetectorScores::new(DetectorKind::ClusterDistance, raw, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_regimes() -> Vec<Vec<f64>> {
        (0..120)
            .map(|i| {
                let jitter = ((i * 37) % 11) as f64 / 10.0 - 0.5;
                if i % 2 == 0 {
                    vec![jitter, 0.5 * jitter]
                } else {
                    vec![6.0 + jitter, 6.0 - 0.5 * jitter]
                }
            })
            .collect()
    }

    #[test]
    fn far_point_is_flagged() {
        let mut rows = vec![vec![3.0, 14.0]];
        rows.extend(two_regimes());
        let scores = cluster_distance_scores(&rows, 120, 2, 3.0, 42).unwrap();
        assert_eq!(scores.flagged(), vec![0]);
    }

    #[test]
    fn between_regimes_is_far() {
        let mut rows = vec![vec![3.0, 3.0]];
        rows.extend(two_regimes());
        let scores = cluster_distance_scores(&rows, 120, 2, 3.0, 42).unwrap();
        assert!(scores.raw[0] > 3.0);
    }

    #[test]
    fn outlier_inside_reference_does_not_shelter_itself() {
        let mut rows = two_regimes();
        rows.push(vec![30.0, -30.0]);
        let scores = cluster_distance_scores(&rows, 365, 3, 3.0, 42).unwrap();
        assert!(scores.flagged().contains(&120));
    }

    #[test]
    fn needs_rows_per_cluster() {
        let rows = vec![vec![1.0]; 5];
        assert!(cluster_distance_scores(&rows, 365, 3, 3.0, 1).is_err());
    }
}
