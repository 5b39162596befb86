//! Configuration of the chain navigator store.
//!
//! The configuration controls where the region image lives, how large the
//! mapped region may grow and how eagerly it is persisted:
//!
//! ## Storage Management
//! - `path`: base path of the store; images are written to `<path>.0` and
//!   `<path>.1` alternately
//! - `region_capacity`: byte budget of the region (default: 64MB). An
//!   allocation that would exceed it fails and leaves the state unchanged
//!
//! ## Durability
//! - `sync_on_commit`: write the image after every mutating navigator call.
//!   When disabled (the default) the image is written on `flush`, `close`
//!   and drop. Each write serializes and syncs the whole region, so with this
//!   enabled every `allocate`, `commit` and move costs time proportional to
//!   the region size
//!
//! # Usage Examples
//! ```no_run
//! use chainstate::config::Config;
//!
//! let config = Config::from_path("/path/to/chain.nav");
//!
//! let mut config = Config::new("/path/to/chain.nav", 1024 * 1024, false);
//! config.set_sync_on_commit(true);
//! ```
//!
//! The bank count and the fixed header size are not part of the
//! configuration: they belong to the host and are supplied through
//! `PatchHost::adjust_defs` when the store is opened.

use crate::def::DEFAULT_REGION_CAPACITY;

/// Configuration for a navigator store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base path of the store
    pub path: String,
    /// Byte budget of the mapped region
    pub region_capacity: usize,
    /// Whether to persist the image after each mutation. Every write covers
    /// the whole region, so each mutation then costs O(region size)
    pub sync_on_commit: bool,
}

impl Default for Config {
    /// Creates a new Config instance with default values.
    ///
    /// # Default Values
    /// - `path`: "default.nav"
    /// - `region_capacity`: 64MB
    /// - `sync_on_commit`: false
    fn default() -> Self {
        Self {
            path: "default.nav".to_string(),
            region_capacity: DEFAULT_REGION_CAPACITY,
            sync_on_commit: false,
        }
    }
}

impl Config {
    /// Creates a new Config instance with custom values.
    ///
    /// # Arguments
    /// * `path` - Base path of the store
    /// * `region_capacity` - Byte budget of the mapped region
    /// * `sync_on_commit` - Whether to persist the image after each mutation
    pub fn new(path: &str, region_capacity: usize, sync_on_commit: bool) -> Self {
        Self {
            path: path.to_string(),
            region_capacity,
            sync_on_commit,
        }
    }

    /// Creates a new Config instance with default values except for the path.
    pub fn from_path(path: &str) -> Self {
        Config {
            path: path.to_string(),
            ..Config::default()
        }
    }

    /// Sets the byte budget of the mapped region.
    pub fn set_region_capacity(&mut self, region_capacity: usize) {
        self.region_capacity = region_capacity;
    }

    /// Enables or disables persisting the image after each mutation.
    pub fn set_sync_on_commit(&mut self, sync_on_commit: bool) {
        self.sync_on_commit = sync_on_commit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = Config::from_path("/tmp/a.nav");
        assert_eq!("/tmp/a.nav", config.path);
        assert_eq!(DEFAULT_REGION_CAPACITY, config.region_capacity);
        assert!(!config.sync_on_commit);

        let mut config = Config::new("/tmp/b.nav", 4096, false);
        config.set_sync_on_commit(true);
        config.set_region_capacity(8192);
        assert_eq!(8192, config.region_capacity);
        assert!(config.sync_on_commit);
    }
}
