// src/dataset/transform.rs

//! Transform node kinds and their index rules.
//!
//! Each transform wraps exactly one parent node and derives its own size and
//! index-resolution rule from the parent's. Map applies a caller-supplied
//! function; Batch, Unbatch, and Shuffle are structural re-indexings whose
//! only content work is stacking, slicing, or reordering. Nothing here
//! mutates a parent: every constructor produces a fresh node holding a
//! read-only reference up the chain.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::item::Item;
use super::prefetch::PrefetchRing;
use super::source::FieldTable;
use super::DatasetCore;

/// A stateless item-to-item mapping applied lazily on access.
pub type MapFn = Arc<dyn Fn(Item) -> Result<Item> + Send + Sync>;

/// Configuration for a shuffle node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Length of the contiguous blocks permuted independently; a window
    /// covering the whole dataset yields one global permutation.
    pub window_size: usize,
    /// Seed for the permutation draw; thread entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            window_size: 1,
            seed: None,
        }
    }
}

impl ShuffleConfig {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            seed: None,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `window_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(PipelineError::configuration(
                "window_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// The per-kind state of a dataset node.
pub(crate) enum NodeKind {
    /// Leaf of every chain: the named parallel field storage.
    Base { table: FieldTable },
    /// Applies `op` to the parent item at the identical position.
    Map { parent: Arc<DatasetCore>, op: MapFn },
    /// Stacks `batch_size` consecutive parent elements; one own unit spans
    /// `batch_size` parent elements, so fractional own indices address
    /// sliding windows of the parent.
    Batch {
        parent: Arc<DatasetCore>,
        batch_size: usize,
    },
    /// Splits the leading axis of parent items into individual elements.
    /// `offsets[i]` is the own-unit position where parent item `i` begins;
    /// the final entry is the total element count, so unevenly split
    /// leading axes unroll correctly.
    Unbatch {
        parent: Arc<DatasetCore>,
        offsets: Vec<usize>,
    },
    /// Reorders the parent through a permutation held for the node's
    /// lifetime.
    Shuffle {
        parent: Arc<DatasetCore>,
        permutation: Vec<usize>,
    },
    /// Identity on the parent, pipelined through background lookahead.
    Prefetch {
        parent: Arc<DatasetCore>,
        ring: PrefetchRing,
    },
}

/// Draws the block permutation for a shuffle node of `size` positions.
///
/// The index range is partitioned into consecutive non-overlapping blocks of
/// `window_size`; each block receives an independent uniformly random
/// permutation, drawn once here and held for the node's lifetime. A final
/// short block is permuted within itself.
pub(crate) fn build_permutation(size: usize, config: &ShuffleConfig) -> Vec<usize> {
    let window = config.window_size.min(size);
    let mut permutation: Vec<usize> = (0..size).collect();
    match config.seed {
        Some(seed) => shuffle_blocks(&mut permutation, window, &mut StdRng::seed_from_u64(seed)),
        None => shuffle_blocks(&mut permutation, window, &mut thread_rng()),
    }
    permutation
}

fn shuffle_blocks(permutation: &mut [usize], window: usize, rng: &mut impl Rng) {
    for block in permutation.chunks_mut(window) {
        block.shuffle(rng);
    }
}
