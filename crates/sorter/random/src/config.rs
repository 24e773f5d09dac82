//! Sorter configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{SorterError, SorterResult};

/// Construction-time settings for a [`RandomSorter`](crate::RandomSorter).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    /// Identity of the owning allocator, used in log fields.
    pub allocator: Option<String>,

    /// Metrics prefix. Recorded for log context only.
    pub metrics_prefix: Option<String>,

    /// Seed for the shuffle generator. `None` seeds from OS entropy.
    pub seed: Option<u64>,

    /// Scalar resource names to ignore for fairness purposes.
    pub fairness_exclude_resource_names: Option<BTreeSet<String>>,
}

impl SorterConfig {
    /// Load a config from a JSON document. Missing fields take defaults.
    pub fn from_json(text: &str) -> SorterResult<Self> {
        serde_json::from_str(text).map_err(|e| SorterError::Config(e.to_string()))
    }

    pub fn with_allocator(mut self, allocator: impl Into<String>) -> Self {
        self.allocator = Some(allocator.into());
        self
    }

    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = Some(prefix.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_fairness_exclusions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fairness_exclude_resource_names = Some(names.into_iter().map(Into::into).collect());
        self
    }
}
