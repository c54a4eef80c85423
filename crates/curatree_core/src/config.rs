//! Engine tuning knobs.
//!
//! # Invariants
//! - All size limits are strictly positive (`TreeConfig::validate`).
//! - `sample_seed = None` draws type-object samples from OS entropy.

use serde::{Deserialize, Serialize};

/// Runtime configuration of `TreeService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Cache depth requested by recommendations.
    pub default_cache_depth: u32,
    /// Maximum memberships written per INSERT batch.
    pub object_batch_size: usize,
    /// Maximum own objects read to compute leaf centroids and own type objects.
    pub centroid_sample_size: usize,
    /// Default `max_n` for recommendations.
    pub recommend_limit: usize,
    /// Seed for child sampling; fixed seeds make type objects reproducible.
    pub sample_seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_cache_depth: 5,
            object_batch_size: 1000,
            centroid_sample_size: 1000,
            recommend_limit: 1000,
            sample_seed: None,
        }
    }
}

impl TreeConfig {
    /// Returns the first invalid field, if any.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.default_cache_depth == 0 {
            return Err("default_cache_depth");
        }
        if self.object_batch_size == 0 {
            return Err("object_batch_size");
        }
        if self.centroid_sample_size == 0 {
            return Err("centroid_sample_size");
        }
        if self.recommend_limit == 0 {
            return Err("recommend_limit");
        }
        Ok(())
    }

    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }
}
