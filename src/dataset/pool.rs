// src/dataset/pool.rs

//! Worker pool and memo cache for a single dataset node.
//!
//! Every dataset node that computes items owns one [`WorkerPool`]. The pool
//! executes item computations across `num_workers` independent workers
//! (degenerating to direct in-thread computation when `num_workers == 1`),
//! memoizes results in a bounded least-recently-used cache keyed by resolved
//! index, and accepts fire-and-forget submissions so a prefetcher can run
//! computation ahead of the consumer.
//!
//! Two concurrent requests for the same not-yet-cached key are computed
//! independently rather than coalesced: item computation is deterministic,
//! so a duplicate costs latency, never correctness.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::item::Item;

/// Default bound on memoized items per node.
const DEFAULT_CACHE_SIZE: usize = 64;

/// Configuration for a dataset node's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of independent workers computing items (must be ≥ 1).
    pub num_workers: usize,
    /// Whether computed items are memoized.
    pub with_caching: bool,
    /// Cache bound; `0` disables memoization regardless of `with_caching`.
    pub cache_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            with_caching: true,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl WorkerConfig {
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn caching(mut self, enabled: bool) -> Self {
        self.with_caching = enabled;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `num_workers` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(PipelineError::configuration(
                "num_workers must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// A unit of item computation, boxed so workers stay ignorant of node kinds.
pub type Compute = Box<dyn FnOnce() -> Result<Item> + Send>;

struct Task {
    compute: Compute,
    reply: Sender<Result<Item>>,
}

/// Bounded least-recently-used memo store.
struct LruCache {
    capacity: usize,
    entries: HashMap<usize, Item>,
    recency: VecDeque<usize>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn touch(&mut self, key: usize) {
        if let Some(pos) = self.recency.iter().position(|&k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key);
    }

    fn get(&mut self, key: usize) -> Option<Item> {
        let item = self.entries.get(&key)?.clone();
        self.touch(key);
        Some(item)
    }

    fn contains(&self, key: usize) -> bool {
        self.entries.contains_key(&key)
    }

    fn insert(&mut self, key: usize, item: Item) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.entries.insert(key, item);
            self.touch(key);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
                tracing::trace!(key = oldest, "evicted least-recent cache entry");
            }
        }
        self.entries.insert(key, item);
        self.recency.push_back(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}

/// Executes and memoizes item computation for one dataset node.
///
/// The cache is exclusively owned by this pool; reads and writes are
/// mutually exclusive across workers and the prefetcher. Computations for
/// different keys proceed in parallel across workers. [`WorkerPool::close`]
/// drains in-flight tasks, joins all workers, and drops the cache; it is
/// idempotent, and every access afterwards fails with a closed-dataset
/// error.
pub struct WorkerPool {
    dataset: String,
    cache_enabled: bool,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cache: Mutex<LruCache>,
    pending: Mutex<HashMap<usize, Receiver<Result<Item>>>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool for the dataset named `dataset`.
    ///
    /// With `num_workers == 1` no threads are spawned and computation runs
    /// directly on the calling thread.
    pub fn new(dataset: impl Into<String>, config: WorkerConfig) -> Self {
        let threads = if config.num_workers > 1 {
            config.num_workers
        } else {
            0
        };
        Self::spawn(dataset.into(), config, threads)
    }

    /// Creates a pool that always runs at least one background worker,
    /// so fire-and-forget submissions have somewhere to execute.
    pub fn with_background(dataset: impl Into<String>, config: WorkerConfig) -> Self {
        let threads = config.num_workers.max(1);
        Self::spawn(dataset.into(), config, threads)
    }

    fn spawn(dataset: String, config: WorkerConfig, threads: usize) -> Self {
        let cache_enabled = config.with_caching && config.cache_size > 0;
        let capacity = if cache_enabled { config.cache_size } else { 0 };

        let mut sender = None;
        let mut workers = Vec::with_capacity(threads);
        if threads > 0 {
            let (tx, rx) = unbounded::<Task>();
            for id in 0..threads {
                let rx: Receiver<Task> = rx.clone();
                let name = dataset.clone();
                workers.push(std::thread::spawn(move || {
                    for task in rx.iter() {
                        let result = (task.compute)();
                        // A dropped reply receiver just means nobody is
                        // waiting for this result anymore.
                        let _ = task.reply.send(result);
                    }
                    tracing::trace!(dataset = %name, worker = id, "worker exited");
                }));
            }
            sender = Some(tx);
            tracing::debug!(dataset = %dataset, workers = threads, "worker pool started");
        }

        Self {
            dataset,
            cache_enabled,
            sender: Mutex::new(sender),
            workers: Mutex::new(workers),
            cache: Mutex::new(LruCache::new(capacity)),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`close`](WorkerPool::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Computes (or recalls) the item for `key`, blocking until available.
    ///
    /// Lookup order: memo cache, then a pending background submission for
    /// the same key, then fresh computation — dispatched to a worker when
    /// the pool runs threads, inline otherwise. Successful results are
    /// memoized; failures are surfaced to the caller and never cached, and
    /// the pool stays usable for other keys.
    ///
    /// # Errors
    ///
    /// Returns a closed-dataset error after [`close`](WorkerPool::close), or
    /// the computation's own error.
    pub fn get(&self, key: usize, compute: Compute) -> Result<Item> {
        if self.is_closed() {
            return Err(PipelineError::closed(&self.dataset));
        }

        if self.cache_enabled {
            if let Some(item) = self.cache.lock().unwrap().get(key) {
                return Ok(item);
            }
        }

        let waiting = self.pending.lock().unwrap().remove(&key);
        let result = match waiting {
            Some(reply) => reply
                .recv()
                .unwrap_or_else(|_| Err(PipelineError::closed(&self.dataset))),
            None => self.run(compute),
        };

        match result {
            Ok(item) => {
                if self.cache_enabled {
                    self.cache.lock().unwrap().insert(key, item.clone());
                }
                Ok(item)
            }
            Err(e) => Err(e),
        }
    }

    /// Schedules background computation for `key` without blocking.
    ///
    /// A no-op when the key is already cached, already pending, the pool is
    /// closed, or the pool runs no background workers. The result is parked
    /// until the matching [`get`](WorkerPool::get) collects it.
    pub fn submit(&self, key: usize, compute: Compute) {
        if self.is_closed() {
            return;
        }
        if self.cache_enabled && self.cache.lock().unwrap().contains(key) {
            return;
        }

        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&key) {
            return;
        }

        let sender = self.sender.lock().unwrap().clone();
        let Some(tx) = sender else {
            return;
        };
        let (reply_tx, reply_rx) = bounded(1);
        if tx.send(Task { compute, reply: reply_tx }).is_ok() {
            pending.insert(key, reply_rx);
            tracing::trace!(dataset = %self.dataset, key, "scheduled background computation");
        }
    }

    /// Runs one computation, through a worker when threads exist.
    fn run(&self, compute: Compute) -> Result<Item> {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(tx) => {
                let (reply_tx, reply_rx) = bounded(1);
                tx.send(Task { compute, reply: reply_tx })
                    .map_err(|_| PipelineError::closed(&self.dataset))?;
                reply_rx
                    .recv()
                    .unwrap_or_else(|_| Err(PipelineError::closed(&self.dataset)))
            }
            None => compute(),
        }
    }

    /// Stops all workers and drops the cache.
    ///
    /// Queued tasks are drained by the workers before they exit, so a
    /// computation that is mid-flight completes rather than deadlocking a
    /// blocked caller. Calling `close` again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the task channel disconnects the workers' receive loop.
        self.sender.lock().unwrap().take();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.join();
        }

        self.cache.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
        tracing::debug!(dataset = %self.dataset, "worker pool closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}
