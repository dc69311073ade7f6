//! Index configuration
//!
//! Fan-out, page access strategy, caching and durability knobs for a [`PagedBTree`].
//! Everything except `max_keys_per_page` is a runtime choice; the fan-out is baked into
//! the page size of the backing file and must be identical on every open.
//!
//! [`PagedBTree`]: crate::index::PagedBTree

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default fan-out (max keys per page)
pub const DEFAULT_MAX_KEYS: usize = 64;

/// Smallest fan-out for which both halves of an internal split keep at least one key
pub const MIN_MAX_KEYS: usize = 2;

/// Largest accepted fan-out
pub const MAX_MAX_KEYS: usize = 65_535;

/// Default page cache capacity (pages)
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// How a single page is moved between the backing file and memory.
///
/// Either way the region only lives for the duration of one page access; nothing is
/// retained across operations, so growing the file never leaves a stale view behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccessMode {
    /// Seek + read/write through the file handle
    #[default]
    Buffered,

    /// Map exactly one page-sized region per access
    Mapped,
}

impl AccessMode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered (seek + read/write)",
            Self::Mapped => "mapped (one mmap region per page access)",
        }
    }
}

/// Paged B-tree configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Max keys per page (`M`); determines the page size
    pub max_keys_per_page: usize,

    /// Store-owned LRU page cache capacity; 0 disables caching
    pub cache_pages: usize,

    /// Page access strategy
    pub access_mode: AccessMode,

    /// fsync after every page write (if false, only on flush())
    pub sync_on_write: bool,

    /// Reject inserts of an existing key instead of ignoring them
    pub unique_keys: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_keys_per_page: DEFAULT_MAX_KEYS,
            cache_pages: DEFAULT_CACHE_PAGES,
            access_mode: AccessMode::default(),
            sync_on_write: false,
            unique_keys: false,
        }
    }
}

impl TreeConfig {
    /// Default configuration with the given fan-out
    pub fn with_max_keys(max_keys_per_page: usize) -> Self {
        Self {
            max_keys_per_page,
            ..Default::default()
        }
    }

    /// Every write is fsync'd and duplicates are rejected
    pub fn strict(max_keys_per_page: usize) -> Self {
        Self {
            max_keys_per_page,
            sync_on_write: true,
            unique_keys: true,
            ..Default::default()
        }
    }

    /// No cache, so every access goes to the file (tests, debugging)
    pub fn uncached(max_keys_per_page: usize) -> Self {
        Self {
            max_keys_per_page,
            cache_pages: 0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_MAX_KEYS..=MAX_MAX_KEYS).contains(&self.max_keys_per_page) {
            return Err(StorageError::InvalidArgument(format!(
                "max_keys_per_page must be in {}..={}, got {}",
                MIN_MAX_KEYS, MAX_MAX_KEYS, self.max_keys_per_page
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
