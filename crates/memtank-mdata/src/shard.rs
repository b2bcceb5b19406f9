//! Key routing and shards
//!
//! The key space is split into [`NUM_SHARDS`] independently locked maps.
//! A key always routes to the same shard, so the router must never change
//! while a registry is alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use xxhash_rust::xxh64::xxh64;

use crate::metric::Metric;

/// Number of shards per registry
pub const NUM_SHARDS: usize = 256;

/// Shard index for a metric key
#[inline]
pub fn shard_index(key: &str) -> usize {
    (xxh64(key.as_bytes(), 0) % NUM_SHARDS as u64) as usize
}

/// One partition of the key space
///
/// Anyone may look up or insert; only the sweeper removes.
#[derive(Default)]
pub(crate) struct Shard {
    pub(crate) metrics: RwLock<HashMap<String, Arc<dyn Metric>>>,
}

impl Shard {
    pub(crate) fn get(&self, key: &str) -> Option<Arc<dyn Metric>> {
        self.metrics.read().get(key).cloned()
    }

    /// Snapshot of the keys present right now
    pub(crate) fn keys(&self) -> Vec<String> {
        self.metrics.read().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.metrics.read().len()
    }
}
