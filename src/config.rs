// src/config.rs

//! Configuration management for the dataset pipeline.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and eager validation of configuration values. The
//! sections mirror the per-node configuration structs: `[worker]` supplies
//! the defaults used when constructing datasets, `[prefetch]` and
//! `[shuffle]` carry the transform defaults a training setup would thread
//! through its pipeline.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dataset::{PrefetchConfig, ShuffleConfig, WorkerConfig};
use crate::error::{PipelineError, Result};

// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub worker: WorkerConfig,
    pub prefetch: PrefetchConfig,
    pub shuffle: ShuffleConfig,
}

impl FromStr for PipelineConfig {
    type Err = PipelineError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| PipelineError::configuration_with_source("failed to parse TOML config", e))
    }
}

impl PipelineConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `PC_` and use underscores to
    // separate nested fields. For example:
    // - `PC_WORKER_NUM_WORKERS` overrides `worker.num_workers`
    // - `PC_WORKER_CACHE_SIZE` overrides `worker.cache_size`
    // - `PC_PREFETCH_DEPTH` overrides `prefetch.depth`
    // - `PC_SHUFFLE_SEED` overrides `shuffle.seed`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("PC_WORKER_NUM_WORKERS") {
            if let Ok(v) = val.parse() {
                self.worker.num_workers = v;
            }
        }
        if let Ok(val) = std::env::var("PC_WORKER_WITH_CACHING") {
            if let Ok(v) = val.parse() {
                self.worker.with_caching = v;
            }
        }
        if let Ok(val) = std::env::var("PC_WORKER_CACHE_SIZE") {
            if let Ok(v) = val.parse() {
                self.worker.cache_size = v;
            }
        }
        if let Ok(val) = std::env::var("PC_PREFETCH_DEPTH") {
            if let Ok(v) = val.parse() {
                self.prefetch.depth = v;
            }
        }
        if let Ok(val) = std::env::var("PC_SHUFFLE_WINDOW_SIZE") {
            if let Ok(v) = val.parse() {
                self.shuffle.window_size = v;
            }
        }
        if let Ok(val) = std::env::var("PC_SHUFFLE_SEED") {
            if let Ok(v) = val.parse() {
                self.shuffle.seed = Some(v);
            }
        }
        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        self.worker.validate()?;
        self.prefetch.validate()?;
        self.shuffle.validate()?;
        Ok(())
    }
}
