//! Changepoint detection.
//!
//! PELT over prefix-sum segment costs; used by the change-point anomaly
//! detector to locate shifts in level and spread.

pub mod cost;
pub mod pelt;

pub use cost::{CostFunction, PrefixSums};
pub use pelt::{pelt_detect, PeltConfig, PeltResult};
