// src/lib.rs

//! Lazy Dataset Pipeline - Core Library
//!
//! This crate provides a lazy, composable data-pipeline abstraction for
//! iterative training loops: circularly-addressed random access over named
//! collections of tensor fields, with map/batch/unbatch/shuffle/prefetch
//! transforms layered lazily on top, backed by per-node worker pools with
//! bounded memo caches and background prefetch.

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};

pub mod dataset;
pub use dataset::{
    Dataset, DatasetIterator, FieldTable, Item, MapFn, PrefetchConfig, ShuffleConfig, Value,
    WorkerConfig,
};
