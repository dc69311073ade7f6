//! Index layer
//!
//! The disk-resident paged B-tree and the narrow interface external components use
//! to mirror writes into it.

pub mod btree;
pub mod page;

pub use btree::{PagedBTree, TreeReport, TreeStats};
pub use page::{Page, PageLayout};

use crate::storage::PageId;
use crate::Result;

/// Where a key is stored: the leaf page and its slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyLocation {
    pub page_id: PageId,
    pub slot: usize,
}

/// Write/lookup surface offered to components that shadow the index (e.g. an audit
/// log). The index never calls back into them.
pub trait KeyIndex {
    /// Insert a key; false if it was already present
    fn insert(&mut self, key: i32) -> Result<bool>;

    /// Location of a key, if present
    fn find(&self, key: i32) -> Result<Option<KeyLocation>>;

    fn contains(&self, key: i32) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }
}
