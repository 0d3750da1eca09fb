//! Model finalization settings
//!
//! Every post-import pass can be switched off, which is mostly useful in
//! tests and when several captures are imported onto one timeline.
//!
//! # Example tracemodel.toml
//!
//! ```toml
//! shift_world_to_zero = false
//! prune_empty_threads = true
//! import_chunk_size = 5000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which finalization passes run and how imports are chunked
///
/// # Example
/// ```
/// use tracemodel::config::ModelConfig;
///
/// let config = ModelConfig::default();
/// assert!(config.shift_world_to_zero);
/// assert_eq!(config.import_chunk_size, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Move the earliest timestamp of the trace to zero
    pub shift_world_to_zero: bool,

    /// Drop threads that never received a slice
    pub prune_empty_threads: bool,

    /// Close slices still open at the end of the trace, marking them
    /// unfinished
    pub auto_close_open_slices: bool,

    /// Split nested `{"id": "Type/0x.."}` objects out of snapshot args
    pub extract_implicit_snapshots: bool,

    /// Resolve `id_ref` fields of slices and snapshots
    pub join_object_refs: bool,

    /// Close objects still alive at the end of the trace
    pub auto_delete_objects: bool,

    /// Decode snapshot args into typed payloads
    pub initialize_payloads: bool,

    /// Events applied between two yield points of a chunked import
    pub import_chunk_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            shift_world_to_zero: true,
            prune_empty_threads: true,
            auto_close_open_slices: true,
            extract_implicit_snapshots: true,
            join_object_refs: true,
            auto_delete_objects: true,
            initialize_payloads: true,
            import_chunk_size: 10_000,
        }
    }
}

impl ModelConfig {
    /// Keep raw timestamps, empty threads and open objects/slices as
    /// imported
    ///
    /// Use when more captures will be spliced onto the same timeline.
    pub fn preserving() -> Self {
        Self {
            shift_world_to_zero: false,
            prune_empty_threads: false,
            auto_close_open_slices: false,
            auto_delete_objects: false,
            ..Self::default()
        }
    }

    /// Load settings from a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid model config in {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.import_chunk_size == 0 {
            return Err("import_chunk_size must be at least 1".to_string());
        }
        Ok(())
    }
}
