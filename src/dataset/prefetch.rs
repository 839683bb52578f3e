// src/dataset/prefetch.rs

//! Background lookahead for sequential consumers.
//!
//! A prefetch node keeps `depth` positions computed ahead of the consumer's
//! last-requested index, converting sequential access latency into latency
//! hidden behind the consumer's own think time. On construction the ring
//! schedules the first `depth` positions on the node's pool; every `get`
//! then returns the requested item (immediately on a background hit,
//! blocking otherwise) and tops the lookahead back up.
//!
//! If consumption outruns production the consumer blocks — backpressure,
//! never stale or partial data. Random access stays correct but carries no
//! latency guarantee.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::index;
use super::item::Item;
use super::pool::WorkerPool;
use super::DatasetCore;

/// Configuration for prefetching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of items to keep computed ahead of the last-requested index.
    pub depth: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self { depth: 2 }
    }
}

impl PrefetchConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `depth` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(PipelineError::configuration(
                "prefetch depth must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// The lookahead state of a prefetch node.
pub(crate) struct PrefetchRing {
    depth: usize,
}

impl PrefetchRing {
    pub(crate) fn new(depth: usize) -> Self {
        Self { depth }
    }

    /// Schedules the first `depth` positions at construction time.
    pub(crate) fn prime(&self, pool: &WorkerPool, parent: &Arc<DatasetCore>, size: usize) {
        for key in 0..self.depth.min(size) {
            Self::schedule(pool, parent, key);
        }
        tracing::debug!(depth = self.depth, "primed prefetch ring");
    }

    /// Returns the item at `index`, then tops up the lookahead.
    pub(crate) fn get(
        &self,
        pool: &WorkerPool,
        parent: &Arc<DatasetCore>,
        size: usize,
        index: f64,
    ) -> Result<Item> {
        let key = index::position(index, size);

        let fetch = {
            let parent = Arc::clone(parent);
            Box::new(move || DatasetCore::fetch(&parent, key as f64))
        };
        let item = pool.get(key, fetch)?;

        // Keep `depth` positions computed ahead of this read; the pool
        // drops the request if that position is already cached or pending.
        let ahead = index::position((key + self.depth) as f64, size);
        Self::schedule(pool, parent, ahead);

        Ok(item)
    }

    fn schedule(pool: &WorkerPool, parent: &Arc<DatasetCore>, key: usize) {
        let parent = Arc::clone(parent);
        pool.submit(key, Box::new(move || DatasetCore::fetch(&parent, key as f64)));
    }
}
