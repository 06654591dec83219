//! Conversion pipeline configuration

use serde::{Deserialize, Serialize};

use crate::zim::DEFAULT_CLUSTER_CACHE;

/// Worker pool, batching and redirect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Number of parallel workers (one shard each)
    pub num_cores: usize,
    /// Rows per write transaction
    pub batch_size: usize,
    /// Capacity of the worker → writer channel
    pub channel_capacity: usize,
    /// Maximum redirect hops before an entry is dropped
    pub max_redirect_hops: usize,
    /// Decompressed clusters cached per worker
    pub cluster_cache_size: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            num_cores: 1,
            batch_size: 500,
            channel_capacity: 1024,
            max_redirect_hops: 8,
            cluster_cache_size: DEFAULT_CLUSTER_CACHE,
        }
    }
}
