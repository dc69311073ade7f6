//! Disk-resident paged B-tree
//!
//! ## Design
//! - **Disk-only nodes**: every node lives in a fixed-size page of the backing file;
//!   the engine keeps no node state between calls
//! - **Stable ids**: a page keeps its identifier for life, and every reference to a
//!   page carries that identifier directly
//! - **Fixed root slot**: page 0 always holds the root, so a reopened file needs no
//!   header to find it
//!
//! ## Layout
//! ```text
//!                 Page 0 (root, internal)
//!                 [ 10 ]
//!                /      \
//!     Page 2 (leaf)    Page 1 (leaf)
//!     [ 5, 7 ]         [ 10, 12, 15 ]
//! ```
//! A leaf split copies the right sibling's first key up as the separator (the key stays
//! in the leaf). An internal split moves its median key up. When the root splits, its
//! left half is copied to a new page and page 0 is rewritten as a one-key internal root;
//! this is the only way the tree grows taller.
//!
//! There is no minimum occupancy and no rebalancing; deletion is not supported.
//! Writes within one insert are not atomic: an I/O error mid-split can leave the file
//! structurally inconsistent.

use crate::config::TreeConfig;
use crate::index::page::{Page, PageLayout};
use crate::index::{KeyIndex, KeyLocation};
use crate::storage::{PageId, PageStore, StoreStats, ROOT_PAGE_ID};
use crate::{Result, StorageError};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Engine counters since open
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub inserts: u64,
    pub duplicates: u64,
    pub leaf_splits: u64,
    pub internal_splits: u64,
    pub root_splits: u64,
    pub store: StoreStats,
}

/// Result of a full structural check
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TreeReport {
    pub pages: u64,
    pub leaf_pages: u64,
    pub internal_pages: u64,
    pub height: usize,
    /// Keys stored in leaves
    pub keys: u64,
    /// Separator keys stored in internal pages
    pub separators: u64,
}

/// A child split: the new right sibling and the key that bounds it from below
#[derive(Debug, Clone, Copy)]
struct Promotion {
    separator: i32,
    right: PageId,
}

enum InsertOutcome {
    Duplicate,
    /// The subtree grew by `growth` keys without splitting: 1 for a plain leaf insert,
    /// 2 when a split below was absorbed (the new key plus its separator)
    Inserted { growth: u32 },
    Split(Promotion),
}

/// Paged B-tree index over `i32` keys
pub struct PagedBTree {
    store: PageStore,
    layout: PageLayout,
    config: TreeConfig,
    stats: TreeStats,
}

impl PagedBTree {
    /// Open or create an index with `max_keys_per_page` keys per page
    pub fn open<P: AsRef<Path>>(path: P, max_keys_per_page: usize) -> Result<Self> {
        Self::open_with_config(path, TreeConfig::with_max_keys(max_keys_per_page))
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: TreeConfig) -> Result<Self> {
        config.validate()?;

        let layout = PageLayout::new(config.max_keys_per_page);
        let empty_root = layout.encode(&Page::new_leaf())?;
        let store = PageStore::open(path, layout.page_size(), &config, &empty_root)?;

        let tree = Self {
            store,
            layout,
            config,
            stats: TreeStats::default(),
        };

        // A file written with another fan-out rarely survives this
        tree.load(ROOT_PAGE_ID)?;

        Ok(tree)
    }

    /// Point lookup
    pub fn search(&self, key: i32) -> Result<bool> {
        self.search_from(ROOT_PAGE_ID, key, 0)
    }

    fn search_from(&self, page_id: PageId, key: i32, depth: usize) -> Result<bool> {
        self.check_depth(page_id, depth)?;
        let page = self.load(page_id)?;

        match page.keys.binary_search(&key) {
            Ok(_) => Ok(true),
            Err(_) if page.is_leaf => Ok(false),
            Err(idx) => self.search_from(page.children[idx], key, depth + 1),
        }
    }

    /// Leaf page and slot holding `key`
    pub fn find(&self, key: i32) -> Result<Option<KeyLocation>> {
        let mut page_id = ROOT_PAGE_ID;
        let mut depth = 0;

        loop {
            self.check_depth(page_id, depth)?;
            let page = self.load(page_id)?;

            if page.is_leaf {
                return Ok(page
                    .keys
                    .binary_search(&key)
                    .ok()
                    .map(|slot| KeyLocation { page_id, slot }));
            }

            // Separators are copies; the key itself lives in the right subtree
            page_id = page.children[page.child_index(key)];
            depth += 1;
        }
    }

    /// Insert a key. Returns false if it was already present.
    ///
    /// With `unique_keys` set, an existing key is an error instead. Either way a
    /// duplicate leaves every page untouched.
    pub fn insert(&mut self, key: i32) -> Result<bool> {
        match self.insert_into(ROOT_PAGE_ID, key, 0)? {
            InsertOutcome::Duplicate => {
                self.stats.duplicates += 1;
                if self.config.unique_keys {
                    return Err(StorageError::DuplicateKey(key));
                }
                Ok(false)
            }
            InsertOutcome::Inserted { .. } => {
                self.stats.inserts += 1;
                Ok(true)
            }
            InsertOutcome::Split(promotion) => {
                self.grow_root(promotion)?;
                self.stats.inserts += 1;
                Ok(true)
            }
        }
    }

    fn insert_into(&mut self, page_id: PageId, key: i32, depth: usize) -> Result<InsertOutcome> {
        self.check_depth(page_id, depth)?;
        let mut page = self.load(page_id)?;

        // Separators are always present in a leaf too, so a hit anywhere is a duplicate
        let idx = match page.keys.binary_search(&key) {
            Ok(_) => return Ok(InsertOutcome::Duplicate),
            Err(idx) => idx,
        };

        if page.is_leaf {
            page.keys.insert(idx, key);
            if page.keys.len() > self.max_keys() {
                return self.split_leaf(page_id, page).map(InsertOutcome::Split);
            }
            page.subtree_size = page.keys.len() as u32;
            self.store_page(page_id, &page)?;
            return Ok(InsertOutcome::Inserted { growth: 1 });
        }

        match self.insert_into(page.children[idx], key, depth + 1)? {
            InsertOutcome::Duplicate => Ok(InsertOutcome::Duplicate),
            InsertOutcome::Inserted { growth } => {
                page.subtree_size = page.subtree_size.saturating_add(growth);
                self.store_page(page_id, &page)?;
                Ok(InsertOutcome::Inserted { growth })
            }
            InsertOutcome::Split(promotion) => self.absorb(page_id, page, idx, promotion),
        }
    }

    /// Link a split child's new sibling into its parent, splitting the parent if full
    fn absorb(
        &mut self,
        page_id: PageId,
        mut page: Page,
        child_idx: usize,
        promotion: Promotion,
    ) -> Result<InsertOutcome> {
        match page.keys.binary_search(&promotion.separator) {
            Ok(_) => {
                return Err(StorageError::Corruption(format!(
                    "separator {} promoted into page {} already exists there",
                    promotion.separator, page_id
                )))
            }
            Err(pos) if pos != child_idx => {
                return Err(StorageError::Corruption(format!(
                    "separator {} from child slot {} lands in slot {} of page {}",
                    promotion.separator, child_idx, pos, page_id
                )))
            }
            Err(_) => {}
        }

        page.keys.insert(child_idx, promotion.separator);
        page.children.insert(child_idx + 1, promotion.right);

        if page.keys.len() > self.max_keys() {
            return self.split_internal(page_id, page).map(InsertOutcome::Split);
        }

        page.subtree_size = self.sum_subtree(&page)?;
        self.store_page(page_id, &page)?;
        Ok(InsertOutcome::Inserted { growth: 2 })
    }

    /// Split an overfull leaf (M + 1 keys). The left half stays in `page_id`.
    fn split_leaf(&mut self, page_id: PageId, mut page: Page) -> Result<Promotion> {
        let mid = self.max_keys() / 2;

        let mut right = Page::new_leaf();
        right.keys = page.keys.split_off(mid + 1);
        right.subtree_size = right.keys.len() as u32;
        page.subtree_size = page.keys.len() as u32;

        let separator = right.keys[0];
        let right_id = self.store.allocate()?;
        self.store_page(right_id, &right)?;
        self.store_page(page_id, &page)?;

        self.stats.leaf_splits += 1;
        debug!(
            page_id,
            right_id,
            separator,
            left_keys = page.keys.len(),
            right_keys = right.keys.len(),
            "btree.split_leaf"
        );

        Ok(Promotion {
            separator,
            right: right_id,
        })
    }

    /// Split an overfull internal page (M + 1 keys, M + 2 children).
    ///
    /// The median moves up and is kept in neither half.
    fn split_internal(&mut self, page_id: PageId, mut page: Page) -> Result<Promotion> {
        let mid = self.max_keys() / 2;

        let mut right_keys = page.keys.split_off(mid);
        let separator = right_keys.remove(0);
        let right_children = page.children.split_off(mid + 1);

        let mut right = Page::new_internal(right_keys, right_children, 0);
        right.subtree_size = self.sum_subtree(&right)?;
        page.subtree_size = self.sum_subtree(&page)?;

        let right_id = self.store.allocate()?;
        self.store_page(right_id, &right)?;
        self.store_page(page_id, &page)?;

        self.stats.internal_splits += 1;
        debug!(
            page_id,
            right_id,
            separator,
            left_keys = page.keys.len(),
            right_keys = right.keys.len(),
            "btree.split_internal"
        );

        Ok(Promotion {
            separator,
            right: right_id,
        })
    }

    /// The root split: move its left half out of page 0 and install a new root there
    fn grow_root(&mut self, promotion: Promotion) -> Result<()> {
        let left = self.load(ROOT_PAGE_ID)?;
        let left_id = self.store.allocate()?;
        self.store_page(left_id, &left)?;

        let right_size = self.load(promotion.right)?.subtree_size;
        let root = Page::new_internal(
            vec![promotion.separator],
            vec![left_id, promotion.right],
            1 + left.subtree_size + right_size,
        );
        self.store_page(ROOT_PAGE_ID, &root)?;

        self.stats.root_splits += 1;
        debug!(
            left_id,
            right_id = promotion.right,
            separator = promotion.separator,
            "btree.grow_root"
        );
        Ok(())
    }

    /// Own key count plus every child's subtree size
    fn sum_subtree(&self, page: &Page) -> Result<u32> {
        let mut total = page.keys.len() as u32;
        for &child in &page.children {
            total = total.saturating_add(self.load(child)?.subtree_size);
        }
        Ok(total)
    }

    /// Levels from the root to the leaves (a lone root leaf is height 1)
    pub fn height(&self) -> Result<usize> {
        let mut page_id = ROOT_PAGE_ID;
        let mut height = 1;
        loop {
            self.check_depth(page_id, height - 1)?;
            let page = self.load(page_id)?;
            if page.is_leaf {
                return Ok(height);
            }
            page_id = page.children[0];
            height += 1;
        }
    }

    /// Walk every page and check ordering, separator bounds, uniform leaf depth and
    /// subtree sizes
    pub fn verify(&self) -> Result<TreeReport> {
        let mut report = TreeReport::default();
        let mut visited = HashSet::new();
        let mut leaf_depth = None;

        self.verify_page(
            ROOT_PAGE_ID,
            (None, None),
            0,
            &mut visited,
            &mut leaf_depth,
            &mut report,
        )?;

        report.height = leaf_depth.map_or(1, |depth| depth + 1);
        Ok(report)
    }

    /// Returns (subtree size, smallest key) of the subtree at `page_id`
    fn verify_page(
        &self,
        page_id: PageId,
        (low, high): (Option<i32>, Option<i32>),
        depth: usize,
        visited: &mut HashSet<PageId>,
        leaf_depth: &mut Option<usize>,
        report: &mut TreeReport,
    ) -> Result<(u32, Option<i32>)> {
        if !visited.insert(page_id) {
            return Err(StorageError::Corruption(format!(
                "page {} is referenced more than once",
                page_id
            )));
        }

        let page = self.load(page_id)?;
        report.pages += 1;

        if let (Some(low), Some(&first)) = (low, page.keys.first()) {
            if first < low {
                return Err(StorageError::Corruption(format!(
                    "page {} key {} is below its lower bound {}",
                    page_id, first, low
                )));
            }
        }
        if let (Some(high), Some(&last)) = (high, page.keys.last()) {
            if last >= high {
                return Err(StorageError::Corruption(format!(
                    "page {} key {} is not below its upper bound {}",
                    page_id, last, high
                )));
            }
        }

        if page.is_leaf {
            if page.keys.is_empty() && page_id != ROOT_PAGE_ID {
                return Err(StorageError::Corruption(format!(
                    "non-root leaf page {} is empty",
                    page_id
                )));
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(StorageError::Corruption(format!(
                        "leaf page {} at depth {}, other leaves at depth {}",
                        page_id, depth, expected
                    )))
                }
                Some(_) => {}
            }

            let size = page.keys.len() as u32;
            if page.subtree_size != size {
                return Err(StorageError::Corruption(format!(
                    "leaf page {} records subtree size {} but holds {} keys",
                    page_id, page.subtree_size, size
                )));
            }

            report.leaf_pages += 1;
            report.keys += page.keys.len() as u64;
            return Ok((size, page.keys.first().copied()));
        }

        report.internal_pages += 1;
        report.separators += page.keys.len() as u64;

        let mut size = page.keys.len() as u32;
        let mut min_key = None;
        for (i, &child) in page.children.iter().enumerate() {
            let child_low = if i == 0 { low } else { Some(page.keys[i - 1]) };
            let child_high = page.keys.get(i).copied().or(high);

            let (child_size, child_min) = self.verify_page(
                child,
                (child_low, child_high),
                depth + 1,
                visited,
                leaf_depth,
                report,
            )?;

            if i > 0 && child_min != Some(page.keys[i - 1]) {
                return Err(StorageError::Corruption(format!(
                    "separator {} of page {} is not the smallest key of child {} ({:?})",
                    page.keys[i - 1],
                    page_id,
                    child,
                    child_min
                )));
            }
            if i == 0 {
                min_key = child_min;
            }
            size = size.saturating_add(child_size);
        }

        if page.subtree_size != size {
            return Err(StorageError::Corruption(format!(
                "internal page {} records subtree size {} but holds {}",
                page_id, page.subtree_size, size
            )));
        }

        Ok((size, min_key))
    }

    /// fsync the backing file
    pub fn flush(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn max_keys(&self) -> usize {
        self.layout.max_keys()
    }

    pub fn page_size(&self) -> usize {
        self.layout.page_size()
    }

    pub fn page_count(&self) -> u64 {
        self.store.page_count()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            store: self.store.stats(),
            ..self.stats
        }
    }

    /// Read, decode and validate one page
    fn load(&self, page_id: PageId) -> Result<Page> {
        let bytes = self.store.read(page_id)?;
        let page = self.layout.decode(&bytes).map_err(|err| match err {
            StorageError::Corruption(msg) => {
                StorageError::Corruption(format!("page {}: {}", page_id, msg))
            }
            other => other,
        })?;
        page.validate(page_id, self.max_keys())?;
        Ok(page)
    }

    fn store_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let bytes = self.layout.encode(page)?;
        self.store.write(page_id, &bytes)
    }

    /// A valid tree is never deeper than it has pages; anything deeper is a cycle
    fn check_depth(&self, page_id: PageId, depth: usize) -> Result<()> {
        if depth as u64 >= self.store.page_count() {
            return Err(StorageError::Corruption(format!(
                "page {} reached at depth {} in a file of {} pages",
                page_id,
                depth,
                self.store.page_count()
            )));
        }
        Ok(())
    }

    /// Keys of all leaves, left to right
    #[cfg(test)]
    fn leaf_keys(&self) -> Result<Vec<i32>> {
        fn walk(tree: &PagedBTree, page_id: PageId, out: &mut Vec<i32>) -> Result<()> {
            let page = tree.load(page_id)?;
            if page.is_leaf {
                out.extend_from_slice(&page.keys);
                return Ok(());
            }
            for &child in &page.children {
                walk(tree, child, out)?;
            }
            Ok(())
        }

        let mut out = Vec::new();
        walk(self, ROOT_PAGE_ID, &mut out)?;
        Ok(out)
    }
}

impl KeyIndex for PagedBTree {
    fn insert(&mut self, key: i32) -> Result<bool> {
        PagedBTree::insert(self, key)
    }

    fn find(&self, key: i32) -> Result<Option<KeyLocation>> {
        PagedBTree::find(self, key)
    }

    fn contains(&self, key: i32) -> Result<bool> {
        self.search(key)
    }
}

impl Drop for PagedBTree {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
