//! Configuration for Strata
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StrataError};

/// Main configuration for a Strata instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for segment files. `None` runs the engine purely in
    /// memory: nothing is persisted and no background workers are started.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment_000001.seg
    ///     ├── segment_000002.seg
    ///     └── ...
    pub data_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Accumulated entry bytes after which the active table is handed off
    /// to the flush worker
    pub flush_threshold_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Some(PathBuf::from("./strata_data")),
            flush_threshold_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold_bytes == 0 {
            return Err(StrataError::Config(
                "flush_threshold_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all segments)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(path.into());
        self
    }

    /// Run without a data directory
    pub fn in_memory(mut self) -> Self {
        self.config.data_dir = None;
        self
    }

    /// Set the flush threshold (in bytes)
    pub fn flush_threshold_bytes(mut self, size: usize) -> Self {
        self.config.flush_threshold_bytes = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
