//! pagetree: an embedded, disk-resident index engine
//!
//! Ordered point lookup and insertion of `i32` keys in a B-tree whose nodes live only
//! in a backing file. The tree is rebuilt from the file's bytes alone, so it survives a
//! process restart.
//!
//! ## Architecture
//! - Page codec (`index::page`): node <-> fixed-size big-endian page
//! - Page store (`storage`): page-id addressed file, append-only allocation, LRU cache
//! - Tree engine (`index::btree`): search, insert, split and root growth
//!
//! ## Example
//! ```no_run
//! use pagetree::PagedBTree;
//!
//! let mut tree = PagedBTree::open("tree.bin", 3)?;
//! for key in [10, 5, 7, 12, 15] {
//!     tree.insert(key)?;
//! }
//! assert!(tree.search(12)?);
//! assert!(!tree.search(8)?);
//! # Ok::<(), pagetree::StorageError>(())
//! ```
//!
//! Single-threaded and non-transactional: an insert that fails mid-split may leave the
//! file inconsistent.

pub mod config;
pub mod index;
pub mod storage;

mod error;

pub use config::{AccessMode, TreeConfig};
pub use error::{Result, StorageError};
pub use index::{KeyIndex, KeyLocation, PagedBTree, TreeReport, TreeStats};
pub use storage::{PageId, PageStore, StoreStats};
