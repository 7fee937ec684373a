//! Clustering of feature vectors.
//!
//! # Example
//!
//! ```
//! use weathercast::clustering::{kmeans, KMeansConfig};
//!
//! let rows = vec![
//!     vec![1.0, 2.0],
//!     vec![1.1, 2.1],
//!     vec![10.0, 11.0],
//!     vec![10.1, 11.1],
//! ];
//! let result = kmeans(&rows, &KMeansConfig::default().k(2).seed(42));
//! assert_eq!(result.centroids.len(), 2);
//! ```

pub mod kmeans;

pub use kmeans::{euclidean_distance, kmeans, KMeansConfig, KMeansResult};
