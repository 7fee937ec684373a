//! Numerical helpers shared by the models and detectors.

pub mod cross_validation;
pub mod deadline;
pub mod linalg;
pub mod metrics;
pub mod optimization;
pub mod stats;

pub use cross_validation::{cross_validate, CVConfig, CVResults, FoldMetrics, FoldPlan};
pub use deadline::Deadline;
pub use metrics::{mae, rmse};
pub use optimization::{nelder_mead, NelderMeadConfig, NelderMeadResult};
pub use stats::{quantile_normal, z_for_level};
