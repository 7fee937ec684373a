//! Rolling detector state scoped to one series.

use super::threshold::DynamicThreshold;
use crate::config::ThresholdConfig;
use std::collections::BTreeMap;

/// Per-variable dynamic thresholds for a single series identity.
///
/// A request allocates its own state and drops it when done. Rebinding to a
/// different identity discards every rolling window, so history from one
/// series never leaks into another.
#[derive(Debug, Clone)]
pub struct DetectorState {
    identity: String,
    config: ThresholdConfig,
    thresholds: BTreeMap<String, DynamicThreshold>,
}

impl DetectorState {
    pub fn new(identity: impl Into<String>, config: ThresholdConfig) -> Self {
        Self {
            identity: identity.into(),
            config,
            thresholds: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Point the state at `identity`, resetting it if that is a new series.
    /// Returns whether a reset happened.
    pub fn rebind(&mut self, identity: &str) -> bool {
        if self.identity == identity {
            return false;
        }
        self.identity = identity.to_string();
        self.thresholds.clear();
        true
    }

    pub fn threshold(&self, variable: &str) -> Option<&DynamicThreshold> {
        self.thresholds.get(variable)
    }

    pub fn threshold_mut(&mut self, variable: &str) -> &mut DynamicThreshold {
        let config = &self.config;
        self.thresholds
            .entry(variable.to_string())
            .or_insert_with(|| DynamicThreshold::new(config.clone()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.thresholds.keys().map(String::as_str)
    }
}
