//! Store builder for flexible configuration
//!
//! `StoreBuilder` chooses between a purely in-memory store and one persisted
//! to a snapshot file, and applies a [`Config`].

use crate::config::Config;
use crate::db::{Store, StoreInner};
use crate::error::{CellStoreError, Result};
#[cfg(feature = "snapshot")]
use crate::storage::{SnapshotConfig, SnapshotFile};
#[cfg(feature = "snapshot")]
use std::path::PathBuf;

/// Builder for store configuration with an optional persistence path.
#[derive(Debug)]
pub struct StoreBuilder {
    #[cfg(feature = "snapshot")]
    path: Option<PathBuf>,
    config: Config,
    in_memory: bool,
}

impl StoreBuilder {
    /// Create a new builder with default in-memory configuration.
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "snapshot")]
            path: None,
            config: Config::default(),
            in_memory: true,
        }
    }

    /// Persist to a snapshot at `path`. The snapshot is loaded on build if it exists.
    #[cfg(feature = "snapshot")]
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self.in_memory = false;
        self
    }

    /// Configure for in-memory storage with no persistence.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        #[cfg(feature = "snapshot")]
        {
            self.path = None;
        }
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the store, loading persisted state if configured.
    pub fn build(self) -> Result<Store> {
        self.config.validate().map_err(CellStoreError::Config)?;

        #[cfg_attr(not(feature = "snapshot"), allow(unused_mut))]
        let mut inner = StoreInner::new(&self.config);

        #[cfg(feature = "snapshot")]
        if !self.in_memory
            && let Some(path) = self.path
        {
            let snapshot_config = SnapshotConfig {
                auto_snapshot_ops: self.config.snapshot_auto_ops,
            };
            let snapshot_file = SnapshotFile::new(&path, snapshot_config);
            inner.load_from_snapshot(&snapshot_file)?;
            inner.snapshot_file = Some(snapshot_file);
        }

        Ok(Store::from_inner(inner))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
