// src/dataset/mod.rs

//! Lazy, circularly-addressed dataset pipeline.
//!
//! This module provides the [`Dataset`] node type: a fixed-size collection
//! of structured items addressed through circular indexing, with lazily
//! composed transforms (map, batch, unbatch, shuffle, prefetch) layered on
//! top. Every transform produces a new immutable node holding a read-only
//! reference to its parent; items are computed on access, memoized in a
//! bounded per-node cache, and optionally computed ahead of the consumer by
//! background workers.
//!
//! # Example
//!
//! ```
//! use pipeline_core::{Dataset, FieldTable};
//!
//! let mut table = FieldTable::new();
//! table.insert(
//!     "x",
//!     (0..10).map(|v| ndarray::arr0(v as f32).into_dyn()).collect(),
//! );
//!
//! let base = Dataset::with_defaults(table, "base").unwrap();
//! let batched = base.batch("batched", 3).unwrap();
//!
//! // One own unit spans three parent elements; indices wrap circularly.
//! let item = batched.get(3.0).unwrap();
//! assert_eq!(
//!     item.field("x").unwrap(),
//!     &ndarray::arr1(&[9.0, 0.0, 1.0]).into_dyn(),
//! );
//!
//! batched.close();
//! base.close();
//! ```

mod index;
mod item;
mod iterator;
mod pool;
mod prefetch;
mod source;
mod transform;

pub use item::{Item, Value};
pub use iterator::DatasetIterator;
pub use pool::{Compute, WorkerConfig, WorkerPool};
pub use prefetch::PrefetchConfig;
pub use source::FieldTable;
pub use transform::{MapFn, ShuffleConfig};

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

use prefetch::PrefetchRing;
use transform::NodeKind;

/// Floor for the prefetch node's memo bound, so wrapped re-reads of recently
/// returned items stay cheap even at depth 1.
const PREFETCH_MIN_CACHE: usize = 8;

/// One node of a transform chain.
///
/// A `Dataset` is immutable after construction: transform methods return new
/// nodes and never touch the parent, so one parent may fan out into several
/// derived views. Cloning is shallow — both handles address the same node.
///
/// Indexing is circular: `get` accepts any real-valued index, positive or
/// negative, integer or fractional, in the node's own index units.
/// [`close`](Dataset::close) releases this node's workers and cache only;
/// parents stay usable and must be closed by whoever created them.
#[derive(Clone)]
pub struct Dataset {
    core: Arc<DatasetCore>,
}

pub(crate) struct DatasetCore {
    name: String,
    size: usize,
    kind: NodeKind,
    pool: WorkerPool,
}

impl DatasetCore {
    /// Resolves `index` on `core`, descending the chain as needed.
    pub(crate) fn fetch(core: &Arc<DatasetCore>, index: f64) -> Result<Item> {
        if core.pool.is_closed() {
            return Err(PipelineError::closed(&core.name));
        }

        if let NodeKind::Prefetch { parent, ring } = &core.kind {
            return ring.get(&core.pool, parent, core.size, index);
        }

        let key = core.resolve_key(index);
        let this = Arc::clone(core);
        core.pool.get(key, Box::new(move || this.compute(key)))
    }

    /// Maps an own-unit index to this node's integer cache key.
    ///
    /// For a batch node the key is the resolved parent start offset (one own
    /// unit spans `batch_size` parent elements, so distinct fractional
    /// indices that address the same window share a key); for every other
    /// kind it is the resolved own position.
    fn resolve_key(&self, index: f64) -> usize {
        match &self.kind {
            NodeKind::Batch { parent, batch_size } => {
                index::position(index * *batch_size as f64, parent.size)
            }
            _ => index::position(index, self.size),
        }
    }

    /// Computes the item for an already-resolved key.
    fn compute(&self, key: usize) -> Result<Item> {
        match &self.kind {
            NodeKind::Base { table } => Ok(table.item(key)),
            NodeKind::Map { parent, op } => op(Self::fetch(parent, key as f64)?),
            NodeKind::Batch { parent, batch_size } => {
                let gathered = (0..*batch_size)
                    .map(|step| Self::fetch(parent, (key + step) as f64))
                    .collect::<Result<Vec<_>>>()?;
                Item::stack(&gathered)
            }
            NodeKind::Unbatch { parent, offsets } => {
                let parent_index = offsets.partition_point(|&start| start <= key) - 1;
                let element = Self::fetch(parent, parent_index as f64)?;
                element.slice_leading(key - offsets[parent_index])
            }
            NodeKind::Shuffle { parent, permutation } => {
                Self::fetch(parent, permutation[key] as f64)
            }
            // The ring intercepts prefetch reads in `fetch`; the node's own
            // computation is the identity on its parent.
            NodeKind::Prefetch { parent, .. } => Self::fetch(parent, key as f64),
        }
    }

    fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Base { .. } => "base",
            NodeKind::Map { .. } => "map",
            NodeKind::Batch { .. } => "batch",
            NodeKind::Unbatch { .. } => "unbatch",
            NodeKind::Shuffle { .. } => "shuffle",
            NodeKind::Prefetch { .. } => "prefetch",
        }
    }
}

impl Dataset {
    /// Creates a base dataset over `table`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the table is empty or ragged, or if
    /// `config` is invalid.
    pub fn new(table: FieldTable, name: impl Into<String>, config: WorkerConfig) -> Result<Self> {
        table.validate()?;
        config.validate()?;
        let name = name.into();
        let size = table.len();
        Ok(Self::node(
            name.clone(),
            size,
            NodeKind::Base { table },
            WorkerPool::new(name, config),
        ))
    }

    /// Creates a base dataset with the default worker configuration.
    pub fn with_defaults(table: FieldTable, name: impl Into<String>) -> Result<Self> {
        Self::new(table, name, WorkerConfig::default())
    }

    /// Creates a base dataset using the worker defaults carried by a
    /// [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config or table is invalid.
    pub fn with_config(
        table: FieldTable,
        name: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Self::new(table, name, config.worker.clone())
    }

    fn node(name: String, size: usize, kind: NodeKind, pool: WorkerPool) -> Self {
        tracing::debug!(dataset = %name, size, "created dataset node");
        Self {
            core: Arc::new(DatasetCore {
                name,
                size,
                kind,
                pool,
            }),
        }
    }

    fn derive(&self, name: String, size: usize, kind: NodeKind, config: WorkerConfig) -> Self {
        let pool = WorkerPool::new(name.clone(), config);
        Self::node(name, size, kind, pool)
    }

    /// Derives a dataset applying `op` to every item.
    ///
    /// `op` must be deterministic; its failures surface as compute errors on
    /// the triggering `get` and are never memoized.
    pub fn map<F>(&self, name: impl Into<String>, op: F) -> Result<Self>
    where
        F: Fn(Item) -> Result<Item> + Send + Sync + 'static,
    {
        self.map_with(name, op, WorkerConfig::default())
    }

    /// [`map`](Dataset::map) with an explicit worker configuration.
    pub fn map_with<F>(&self, name: impl Into<String>, op: F, config: WorkerConfig) -> Result<Self>
    where
        F: Fn(Item) -> Result<Item> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(self.derive(
            name.into(),
            self.core.size,
            NodeKind::Map {
                parent: Arc::clone(&self.core),
                op: Arc::new(op),
            },
            config,
        ))
    }

    /// Derives a dataset whose items stack `batch_size` consecutive parent
    /// elements along a new leading axis.
    ///
    /// One own unit spans `batch_size` parent elements, so fractional
    /// indices address sliding windows of the underlying sequence. The
    /// derived size is `ceil(parent_size / batch_size)`: every parent
    /// element is covered once per pass, with a final non-divisible batch
    /// wrapping circularly into the start.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `batch_size` is zero.
    pub fn batch(&self, name: impl Into<String>, batch_size: usize) -> Result<Self> {
        self.batch_with(name, batch_size, WorkerConfig::default())
    }

    /// [`batch`](Dataset::batch) with an explicit worker configuration.
    pub fn batch_with(
        &self,
        name: impl Into<String>,
        batch_size: usize,
        config: WorkerConfig,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::configuration(
                "batch_size must be greater than 0",
            ));
        }
        config.validate()?;
        Ok(self.derive(
            name.into(),
            self.core.size.div_ceil(batch_size),
            NodeKind::Batch {
                parent: Arc::clone(&self.core),
                batch_size,
            },
            config,
        ))
    }

    /// Derives a dataset splitting the leading axis of every parent item
    /// into individual elements.
    ///
    /// Leading lengths are read per parent item at construction, so parents
    /// with unevenly split leading axes unroll correctly; the derived size
    /// is the total element count.
    ///
    /// # Errors
    ///
    /// Returns an item error if a parent item has no leading axis (or ragged
    /// fields), and a configuration error if the unrolled dataset would be
    /// empty.
    pub fn unbatch(&self, name: impl Into<String>) -> Result<Self> {
        self.unbatch_with(name, WorkerConfig::default())
    }

    /// [`unbatch`](Dataset::unbatch) with an explicit worker configuration.
    pub fn unbatch_with(&self, name: impl Into<String>, config: WorkerConfig) -> Result<Self> {
        config.validate()?;

        let mut offsets = Vec::with_capacity(self.core.size + 1);
        let mut total = 0;
        offsets.push(0);
        for position in 0..self.core.size {
            let element = DatasetCore::fetch(&self.core, position as f64)?;
            total += element.leading_len()?;
            offsets.push(total);
        }
        if total == 0 {
            return Err(PipelineError::configuration(
                "unbatch would produce an empty dataset",
            ));
        }

        Ok(self.derive(
            name.into(),
            total,
            NodeKind::Unbatch {
                parent: Arc::clone(&self.core),
                offsets,
            },
            config,
        ))
    }

    /// Derives a dataset reordering the parent through block permutations
    /// drawn once at construction.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config.window_size` is zero.
    pub fn shuffle(&self, name: impl Into<String>, config: ShuffleConfig) -> Result<Self> {
        config.validate()?;
        let permutation = transform::build_permutation(self.core.size, &config);
        Ok(self.derive(
            name.into(),
            self.core.size,
            NodeKind::Shuffle {
                parent: Arc::clone(&self.core),
                permutation,
            },
            WorkerConfig::default(),
        ))
    }

    /// Derives a dataset that keeps `depth` items computed ahead of the
    /// consumer's last-requested position.
    ///
    /// The node runs one background worker; sequential forward access pays
    /// full computation latency for at most the first `depth` items and
    /// hides it behind consumer think time afterwards.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `depth` is zero.
    pub fn prefetch(&self, name: impl Into<String>, depth: usize) -> Result<Self> {
        PrefetchConfig { depth }.validate()?;

        let config = WorkerConfig::default()
            .num_workers(1)
            .cache_size(PREFETCH_MIN_CACHE.max(2 * depth));
        let name = name.into();
        let pool = WorkerPool::with_background(name.clone(), config);
        let dataset = Self::node(
            name,
            self.core.size,
            NodeKind::Prefetch {
                parent: Arc::clone(&self.core),
                ring: PrefetchRing::new(depth),
            },
            pool,
        );

        if let NodeKind::Prefetch { parent, ring } = &dataset.core.kind {
            ring.prime(&dataset.core.pool, parent, dataset.core.size);
        }
        Ok(dataset)
    }

    /// The node's size in its own index units.
    pub fn size(&self) -> usize {
        self.core.size
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether [`close`](Dataset::close) has been called on this node.
    pub fn is_closed(&self) -> bool {
        self.core.pool.is_closed()
    }

    /// Returns the item at `index`.
    ///
    /// `index` may be any real value; it is wrapped circularly into the
    /// node's own index range, so `get(size)` reads position `0` and
    /// `get(-1.0)` reads the last position. The returned item is exactly
    /// what a synchronous single-worker computation would produce,
    /// independent of worker count.
    ///
    /// # Errors
    ///
    /// Returns a closed-dataset error after `close`, or the computation's
    /// own error.
    pub fn get(&self, index: f64) -> Result<Item> {
        DatasetCore::fetch(&self.core, index)
    }

    /// Returns the items of the half-open slice `[start, stop)`.
    ///
    /// Produces exactly `round(stop - start)` items walking forward in
    /// steps of one own unit, each position wrapped independently, in slice
    /// order.
    ///
    /// # Errors
    ///
    /// As [`get`](Dataset::get).
    pub fn get_slice(&self, start: f64, stop: f64) -> Result<Vec<Item>> {
        index::walk(start, stop).map(|i| self.get(i)).collect()
    }

    /// Iterates one sequential pass over positions `0..size`.
    pub fn iter(&self) -> DatasetIterator {
        DatasetIterator::new(self.clone())
    }

    /// Releases this node's workers and cache.
    ///
    /// Idempotent; does not propagate to the parent node, which may be
    /// shared by other derived views. Any later indexing of this node fails
    /// with a closed-dataset error.
    pub fn close(&self) {
        self.core.pool.close();
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.core.name)
            .field("size", &self.core.size)
            .field("kind", &self.core.kind_name())
            .field("closed", &self.core.pool.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn scalar_table(values: &[f32]) -> FieldTable {
        let mut table = FieldTable::new();
        table.insert(
            "x",
            values.iter().map(|&v| ndarray::arr0(v).into_dyn()).collect(),
        );
        table
    }

    fn scalar_dataset(values: &[f32]) -> Dataset {
        Dataset::with_defaults(scalar_table(values), "base").unwrap()
    }

    fn nine() -> Dataset {
        scalar_dataset(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
    }

    fn scalar(item: &Item) -> f32 {
        item.field("x").unwrap().sum()
    }

    fn vector(item: &Item) -> Value {
        item.field("x").unwrap().clone()
    }

    #[test]
    fn test_base_single_queries() {
        let dataset = nine();
        assert_eq!(dataset.size(), 9);
        assert_eq!(scalar(&dataset.get(0.0).unwrap()), 0.0);
        assert_eq!(scalar(&dataset.get(4.0).unwrap()), 4.0);
        assert_eq!(scalar(&dataset.get(8.0).unwrap()), 8.0);
        dataset.close();
    }

    #[test]
    fn test_base_wrapped_queries() {
        let dataset = nine();
        assert_eq!(scalar(&dataset.get(9.0).unwrap()), 0.0);
        assert_eq!(scalar(&dataset.get(11.0).unwrap()), 2.0);
        assert_eq!(scalar(&dataset.get(-1.0).unwrap()), 8.0);
        assert_eq!(scalar(&dataset.get(-2.0).unwrap()), 7.0);
        dataset.close();
    }

    #[test]
    fn test_wraparound_equivalence() {
        let dataset = nine();
        for i in -9..9 {
            let i = i as f64;
            let here = scalar(&dataset.get(i).unwrap());
            assert_eq!(here, scalar(&dataset.get(i + 9.0).unwrap()));
            assert_eq!(here, scalar(&dataset.get(i - 9.0).unwrap()));
        }
        dataset.close();
    }

    #[test]
    fn test_base_slices() {
        let dataset = nine();

        let items = dataset.get_slice(0.0, 3.0).unwrap();
        assert_eq!(items.iter().map(scalar).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);

        let items = dataset.get_slice(-1.0, 1.0).unwrap();
        assert_eq!(items.iter().map(scalar).collect::<Vec<_>>(), vec![8.0, 0.0]);

        let items = dataset.get_slice(9.0, 11.0).unwrap();
        assert_eq!(items.iter().map(scalar).collect::<Vec<_>>(), vec![0.0, 1.0]);

        dataset.close();
    }

    #[test]
    fn test_slice_length_matches_span() {
        let dataset = nine();
        assert_eq!(dataset.get_slice(2.0, 2.0).unwrap().len(), 0);
        assert_eq!(dataset.get_slice(0.0, 9.0).unwrap().len(), 9);
        assert_eq!(dataset.get_slice(-3.0, 4.0).unwrap().len(), 7);
        dataset.close();
    }

    fn ten_batched() -> (Dataset, Dataset) {
        let base = scalar_dataset(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let batched = base.batch("batched", 3).unwrap();
        (base, batched)
    }

    #[test]
    fn test_batch_single_queries() {
        let (base, batched) = ten_batched();
        assert_eq!(batched.size(), 4);

        assert_eq!(vector(&batched.get(0.0).unwrap()), arr1(&[0.0, 1.0, 2.0]).into_dyn());
        assert_eq!(vector(&batched.get(1.0).unwrap()), arr1(&[3.0, 4.0, 5.0]).into_dyn());
        assert_eq!(vector(&batched.get(2.0).unwrap()), arr1(&[6.0, 7.0, 8.0]).into_dyn());

        batched.close();
        base.close();
    }

    #[test]
    fn test_batch_fractional_queries() {
        let (base, batched) = ten_batched();

        assert_eq!(
            vector(&batched.get(1.0 / 3.0).unwrap()),
            arr1(&[1.0, 2.0, 3.0]).into_dyn()
        );
        assert_eq!(
            vector(&batched.get(2.0 / 3.0).unwrap()),
            arr1(&[2.0, 3.0, 4.0]).into_dyn()
        );
        assert_eq!(
            vector(&batched.get(-1.0 / 3.0).unwrap()),
            arr1(&[9.0, 0.0, 1.0]).into_dyn()
        );
        assert_eq!(
            vector(&batched.get(-2.0 / 3.0).unwrap()),
            arr1(&[8.0, 9.0, 0.0]).into_dyn()
        );

        batched.close();
        base.close();
    }

    #[test]
    fn test_batch_wrapped_queries() {
        let (base, batched) = ten_batched();

        // The final batch wraps across the size boundary.
        assert_eq!(vector(&batched.get(3.0).unwrap()), arr1(&[9.0, 0.0, 1.0]).into_dyn());
        assert_eq!(vector(&batched.get(-1.0).unwrap()), arr1(&[7.0, 8.0, 9.0]).into_dyn());
        assert_eq!(vector(&batched.get(-2.0).unwrap()), arr1(&[4.0, 5.0, 6.0]).into_dyn());

        batched.close();
        base.close();
    }

    #[test]
    fn test_batch_fractional_slices() {
        let (base, batched) = ten_batched();

        // A one-unit slice at fractional bounds is one sliding window.
        let items = batched.get_slice(1.0 / 3.0, 4.0 / 3.0).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(vector(&items[0]), arr1(&[1.0, 2.0, 3.0]).into_dyn());

        let items = batched.get_slice(-1.0, 1.0).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(vector(&items[0]), arr1(&[7.0, 8.0, 9.0]).into_dyn());
        assert_eq!(vector(&items[1]), arr1(&[0.0, 1.0, 2.0]).into_dyn());

        batched.close();
        base.close();
    }

    #[test]
    fn test_unbatch_unrolls_groups() {
        let mut table = FieldTable::new();
        table.insert(
            "x",
            vec![
                arr1(&[0.0, 1.0, 2.0]).into_dyn(),
                arr1(&[3.0, 4.0, 5.0]).into_dyn(),
                arr1(&[6.0, 7.0, 8.0]).into_dyn(),
            ],
        );
        let base = Dataset::with_defaults(table, "base").unwrap();
        let unbatched = base.unbatch("unbatched").unwrap();

        assert_eq!(unbatched.size(), 9);
        for i in 0..9 {
            assert_eq!(scalar(&unbatched.get(i as f64).unwrap()), i as f32);
        }
        // And it wraps like any other node.
        assert_eq!(scalar(&unbatched.get(9.0).unwrap()), 0.0);
        assert_eq!(scalar(&unbatched.get(-1.0).unwrap()), 8.0);
        assert_eq!(scalar(&unbatched.get(-2.0).unwrap()), 7.0);

        let items = unbatched.get_slice(8.0, 10.0).unwrap();
        assert_eq!(items.iter().map(scalar).collect::<Vec<_>>(), vec![8.0, 0.0]);

        unbatched.close();
        base.close();
    }

    #[test]
    fn test_unbatch_uneven_split_then_batch() {
        // Size-10 content split 2-then-8 across two parent items.
        let mut table = FieldTable::new();
        table.insert(
            "x",
            vec![
                arr1(&[0.0, 1.0]).into_dyn(),
                arr1(&[2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).into_dyn(),
            ],
        );
        let base = Dataset::with_defaults(table, "base").unwrap();
        let unbatched = base.unbatch("unbatched").unwrap();
        assert_eq!(unbatched.size(), 10);

        let batched = unbatched.batch("batched", 3).unwrap();
        assert_eq!(vector(&batched.get(0.0).unwrap()), arr1(&[0.0, 1.0, 2.0]).into_dyn());
        assert_eq!(vector(&batched.get(1.0).unwrap()), arr1(&[3.0, 4.0, 5.0]).into_dyn());
        assert_eq!(vector(&batched.get(2.0).unwrap()), arr1(&[6.0, 7.0, 8.0]).into_dyn());
        // Wraps across the unbatch boundary.
        assert_eq!(vector(&batched.get(3.0).unwrap()), arr1(&[9.0, 0.0, 1.0]).into_dyn());
        assert_eq!(vector(&batched.get(4.0).unwrap()), arr1(&[2.0, 3.0, 4.0]).into_dyn());
        assert_eq!(vector(&batched.get(-1.0).unwrap()), arr1(&[7.0, 8.0, 9.0]).into_dyn());

        batched.close();
        unbatched.close();
        base.close();
    }

    #[test]
    fn test_batch_unbatch_round_trip() {
        // Nine elements, evenly divisible by three.
        let base = nine();
        let round_tripped = base
            .batch("batched", 3)
            .unwrap()
            .unbatch("unbatched")
            .unwrap();

        assert_eq!(round_tripped.size(), base.size());
        for i in 0..9 {
            assert_eq!(
                scalar(&round_tripped.get(i as f64).unwrap()),
                scalar(&base.get(i as f64).unwrap())
            );
        }

        round_tripped.close();
        base.close();
    }

    #[test]
    fn test_unbatch_scalar_items_fails() {
        let base = nine();
        assert!(matches!(
            base.unbatch("unbatched"),
            Err(PipelineError::Item { .. })
        ));
        base.close();
    }

    #[test]
    fn test_shuffle_is_a_bijection() {
        let base = nine();
        let shuffled = base
            .shuffle("shuffled", ShuffleConfig::new(9).seed(0))
            .unwrap();
        assert_eq!(shuffled.size(), 9);

        let mut values: Vec<f32> = (0..9)
            .map(|i| scalar(&shuffled.get(i as f64).unwrap()))
            .collect();
        // Wrapped access reads the same permutation.
        assert_eq!(scalar(&shuffled.get(9.0).unwrap()), values[0]);
        assert_eq!(scalar(&shuffled.get(-1.0).unwrap()), values[8]);

        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(values, (0..9).map(|v| v as f32).collect::<Vec<_>>());

        shuffled.close();
        base.close();
    }

    #[test]
    fn test_shuffle_leaves_parent_order_untouched() {
        let base = nine();
        let shuffled = base
            .shuffle("shuffled", ShuffleConfig::new(9).seed(1))
            .unwrap();

        for i in 0..9 {
            assert_eq!(scalar(&base.get(i as f64).unwrap()), i as f32);
        }

        shuffled.close();
        base.close();
    }

    #[test]
    fn test_map_applies_function() {
        let base = nine();
        let doubled = base
            .map("doubled", |mut item| {
                let x = item.field("x").unwrap().mapv(|v| v * 2.0);
                item.insert("x", x);
                Ok(item)
            })
            .unwrap();

        assert_eq!(scalar(&doubled.get(3.0).unwrap()), 6.0);
        assert_eq!(scalar(&doubled.get(-1.0).unwrap()), 16.0);
        // The parent is untouched.
        assert_eq!(scalar(&base.get(3.0).unwrap()), 3.0);

        doubled.close();
        base.close();
    }

    #[test]
    fn test_map_failure_surfaces_and_recovers() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let base = nine();
        let flaky = base
            .map("flaky", |item| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                if item.field("x").unwrap().sum() == 3.0 {
                    return Err(PipelineError::compute("flaky", "unlucky item"));
                }
                Ok(item)
            })
            .unwrap();

        assert!(flaky.get(3.0).is_err());
        // Other indices keep working, and the failure was not memoized.
        assert_eq!(scalar(&flaky.get(2.0).unwrap()), 2.0);
        let calls_before_retry = CALLS.load(Ordering::SeqCst);
        assert!(flaky.get(3.0).is_err());
        assert_eq!(CALLS.load(Ordering::SeqCst), calls_before_retry + 1);

        flaky.close();
        base.close();
    }

    #[test]
    fn test_multi_worker_results_match_single_worker() {
        let base = nine();
        let single = base
            .map_with(
                "single",
                |item| Ok(item),
                WorkerConfig::default().num_workers(1),
            )
            .unwrap();
        let pooled = base
            .map_with(
                "pooled",
                |item| Ok(item),
                WorkerConfig::default().num_workers(4),
            )
            .unwrap();

        for i in -9..18 {
            let i = i as f64;
            assert_eq!(
                scalar(&pooled.get(i).unwrap()),
                scalar(&single.get(i).unwrap())
            );
        }

        pooled.close();
        single.close();
        base.close();
    }

    #[test]
    fn test_close_releases_node_but_not_parent() {
        let base = nine();
        let derived = base.map("derived", Ok).unwrap();

        derived.close();
        assert!(derived.is_closed());
        assert!(matches!(
            derived.get(0.0),
            Err(PipelineError::ClosedDataset { .. })
        ));

        // The parent is shared and stays usable.
        assert!(!base.is_closed());
        assert_eq!(scalar(&base.get(0.0).unwrap()), 0.0);

        // Closing again is a no-op.
        derived.close();
        base.close();
        base.close();
    }

    #[test]
    fn test_invalid_configurations_fail_at_construction() {
        let empty = FieldTable::new();
        assert!(Dataset::with_defaults(empty, "base").is_err());

        let base = nine();
        assert!(base.batch("batched", 0).is_err());
        assert!(base.shuffle("shuffled", ShuffleConfig::new(0)).is_err());
        assert!(base.prefetch("prefetched", 0).is_err());
        assert!(base
            .map_with("mapped", Ok, WorkerConfig::default().num_workers(0))
            .is_err());
        base.close();
    }

    #[test]
    fn test_fan_out_shares_parent() {
        let base = nine();
        let batched = base.batch("batched", 3).unwrap();
        let shuffled = base
            .shuffle("shuffled", ShuffleConfig::new(9).seed(0))
            .unwrap();

        assert_eq!(vector(&batched.get(0.0).unwrap()), arr1(&[0.0, 1.0, 2.0]).into_dyn());
        let mut values: Vec<f32> = (0..9)
            .map(|i| scalar(&shuffled.get(i as f64).unwrap()))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(values, (0..9).map(|v| v as f32).collect::<Vec<_>>());

        batched.close();
        shuffled.close();
        base.close();
    }

    #[test]
    fn test_prefetch_returns_correct_items() {
        let base = nine();
        let prefetched = base.prefetch("prefetched", 2).unwrap();

        for i in 0..9 {
            assert_eq!(scalar(&prefetched.get(i as f64).unwrap()), i as f32);
        }
        // Wrapped and random access stay correct.
        assert_eq!(scalar(&prefetched.get(9.0).unwrap()), 0.0);
        assert_eq!(scalar(&prefetched.get(-1.0).unwrap()), 8.0);
        assert_eq!(scalar(&prefetched.get(4.0).unwrap()), 4.0);

        prefetched.close();
        base.close();
    }

    #[test]
    fn test_prefetch_hides_computation_latency() {
        const COMPUTE: Duration = Duration::from_millis(50);
        const CONSUMER_DELAY: Duration = Duration::from_millis(60);

        let slow = |item: Item| {
            std::thread::sleep(COMPUTE);
            Ok(item)
        };

        let base = scalar_dataset(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

        // Without prefetch every access pays the full computation.
        let plain = base
            .map_with(
                "slow",
                slow,
                WorkerConfig::default().caching(false).cache_size(0),
            )
            .unwrap();
        for i in 0..3 {
            let start = Instant::now();
            plain.get(i as f64).unwrap();
            assert!(start.elapsed() >= COMPUTE);
        }

        // With prefetch, items after the first are already computed by the
        // time a consumer slower than the pipeline asks for them.
        let prefetched = base
            .map_with(
                "slow",
                slow,
                WorkerConfig::default().caching(false).cache_size(0),
            )
            .unwrap()
            .prefetch("prefetched", 1)
            .unwrap();

        for i in 0..10 {
            let start = Instant::now();
            prefetched.get(i as f64).unwrap();
            let taken = start.elapsed();
            if i > 0 {
                assert!(
                    taken < COMPUTE * 4 / 5,
                    "access {i} took {taken:?}, expected well under {COMPUTE:?}"
                );
            }
            std::thread::sleep(CONSUMER_DELAY);
        }

        prefetched.close();
        plain.close();
        base.close();
    }

    #[test]
    fn test_with_config_uses_worker_defaults() {
        let config: PipelineConfig = "[worker]\nnum_workers = 2\n".parse().unwrap();
        let dataset =
            Dataset::with_config(scalar_table(&[0.0, 1.0, 2.0]), "base", &config).unwrap();
        assert_eq!(scalar(&dataset.get(5.0).unwrap()), 2.0);
        dataset.close();
    }

    #[test]
    fn test_debug_format() {
        let base = nine();
        let batched = base.batch("batched", 3).unwrap();
        let rendered = format!("{batched:?}");
        assert!(rendered.contains("batched"));
        assert!(rendered.contains("batch"));
        batched.close();
        base.close();
    }
}
