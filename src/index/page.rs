//! Page Codec
//!
//! Fixed-size on-disk layout of one tree page for a fan-out of `M` keys:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ keys          [i32 BE; M]     │  unused slots = -1
//! │ children      [i64 BE; M + 1] │  unused slots = -1
//! │ key_count     i32 BE          │
//! │ is_leaf       u8              │  1 = leaf, 0 = internal
//! │ subtree_size  u32 BE          │
//! └───────────────────────────────┘
//! page_size = 4M + 8(M + 1) + 4 + 1 + 4
//! ```
//!
//! No I/O happens here; pages are always encoded and decoded whole.

use crate::storage::PageId;
use crate::{Result, StorageError};
use tracing::warn;

/// Filler for unused key and child slots
pub const SENTINEL: i64 = -1;

const KEY_SIZE: usize = 4;
const CHILD_SIZE: usize = 8;
const COUNT_SIZE: usize = 4;
const FLAG_SIZE: usize = 1;
const SUBTREE_SIZE_SIZE: usize = 4;

/// In-memory form of a page.
///
/// `keys` holds only the used slots. A leaf has no children; an internal page has
/// exactly `keys.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub keys: Vec<i32>,
    pub children: Vec<PageId>,
    pub is_leaf: bool,
    /// Keys stored in this page and all of its descendants
    pub subtree_size: u32,
}

impl Page {
    pub fn new_leaf() -> Self {
        Self {
            keys: Vec::new(),
            children: Vec::new(),
            is_leaf: true,
            subtree_size: 0,
        }
    }

    pub fn new_internal(keys: Vec<i32>, children: Vec<PageId>, subtree_size: u32) -> Self {
        Self {
            keys,
            children,
            is_leaf: false,
            subtree_size,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Index of the child that may hold `key`: the first slot whose key is greater
    pub fn child_index(&self, key: i32) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Check page invariants after loading from disk
    pub fn validate(&self, page_id: PageId, max_keys: usize) -> Result<()> {
        if self.keys.len() > max_keys {
            return Err(StorageError::Corruption(format!(
                "page {} holds {} keys, max is {}",
                page_id,
                self.keys.len(),
                max_keys
            )));
        }

        if self.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(StorageError::Corruption(format!(
                "page {} keys are not strictly ascending: {:?}",
                page_id, self.keys
            )));
        }

        if self.is_leaf {
            if !self.children.is_empty() {
                return Err(StorageError::Corruption(format!(
                    "leaf page {} has {} children",
                    page_id,
                    self.children.len()
                )));
            }
        } else {
            if self.keys.is_empty() {
                return Err(StorageError::Corruption(format!(
                    "internal page {} has no keys",
                    page_id
                )));
            }
            if self.children.len() != self.keys.len() + 1 {
                return Err(StorageError::Corruption(format!(
                    "internal page {} has {} keys but {} children",
                    page_id,
                    self.keys.len(),
                    self.children.len()
                )));
            }
        }

        Ok(())
    }
}

/// Byte layout for one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    max_keys: usize,
}

impl PageLayout {
    pub fn new(max_keys: usize) -> Self {
        Self { max_keys }
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn page_size(&self) -> usize {
        self.max_keys * KEY_SIZE
            + (self.max_keys + 1) * CHILD_SIZE
            + COUNT_SIZE
            + FLAG_SIZE
            + SUBTREE_SIZE_SIZE
    }

    pub fn encode(&self, page: &Page) -> Result<Vec<u8>> {
        if page.keys.len() > self.max_keys || page.children.len() > self.max_keys + 1 {
            return Err(StorageError::InvalidArgument(format!(
                "page with {} keys and {} children does not fit fan-out {}",
                page.keys.len(),
                page.children.len(),
                self.max_keys
            )));
        }

        let mut buf = vec![0u8; self.page_size()];
        let mut offset = 0;

        for slot in 0..self.max_keys {
            let key = page.keys.get(slot).copied().unwrap_or(SENTINEL as i32);
            buf[offset..offset + KEY_SIZE].copy_from_slice(&key.to_be_bytes());
            offset += KEY_SIZE;
        }

        for slot in 0..=self.max_keys {
            let child = match page.children.get(slot) {
                Some(&id) => i64::try_from(id).map_err(|_| {
                    StorageError::InvalidArgument(format!("page id {} does not fit on disk", id))
                })?,
                None => SENTINEL,
            };
            buf[offset..offset + CHILD_SIZE].copy_from_slice(&child.to_be_bytes());
            offset += CHILD_SIZE;
        }

        buf[offset..offset + COUNT_SIZE].copy_from_slice(&(page.keys.len() as i32).to_be_bytes());
        offset += COUNT_SIZE;

        buf[offset] = u8::from(page.is_leaf);
        offset += FLAG_SIZE;

        buf[offset..offset + SUBTREE_SIZE_SIZE].copy_from_slice(&page.subtree_size.to_be_bytes());

        Ok(buf)
    }

    /// Decode a page.
    ///
    /// An out-of-range key count is clamped to zero: a page that was allocated but not
    /// yet filled must still decode. A leaf flag that disagrees with the child slots is
    /// corruption, as is an internal page with a child pointer past `key_count + 1`.
    pub fn decode(&self, buf: &[u8]) -> Result<Page> {
        if buf.len() != self.page_size() {
            return Err(StorageError::Corruption(format!(
                "page buffer is {} bytes, expected {}",
                buf.len(),
                self.page_size()
            )));
        }

        let children_start = self.max_keys * KEY_SIZE;
        let count_start = children_start + (self.max_keys + 1) * CHILD_SIZE;
        let flag_start = count_start + COUNT_SIZE;
        let size_start = flag_start + FLAG_SIZE;

        let raw_count = i32::from_be_bytes(read_array(buf, count_start));
        let key_count = match usize::try_from(raw_count) {
            Ok(n) if n <= self.max_keys => n,
            _ => {
                warn!(raw_count, max_keys = self.max_keys, "page.decode.key_count_clamped");
                0
            }
        };

        let is_leaf = buf[flag_start] != 0;
        let subtree_size = u32::from_be_bytes(read_array(buf, size_start));

        let keys = (0..key_count)
            .map(|slot| i32::from_be_bytes(read_array(buf, slot * KEY_SIZE)))
            .collect();

        let child_slot =
            |slot: usize| i64::from_be_bytes(read_array(buf, children_start + slot * CHILD_SIZE));

        let children = if is_leaf {
            if let Some(slot) = (0..=self.max_keys).find(|&slot| child_slot(slot) != SENTINEL) {
                return Err(StorageError::Corruption(format!(
                    "leaf page has child pointer {} in slot {}",
                    child_slot(slot),
                    slot
                )));
            }
            Vec::new()
        } else {
            let mut children = Vec::with_capacity(key_count + 1);
            for slot in 0..=key_count {
                let raw = child_slot(slot);
                let id = PageId::try_from(raw).map_err(|_| {
                    StorageError::Corruption(format!(
                        "internal page has {} keys but child slot {} is {}",
                        key_count, slot, raw
                    ))
                })?;
                children.push(id);
            }
            // An unfilled page (no keys) is left for `Page::validate` to reject
            if key_count > 0 {
                if let Some(slot) =
                    (key_count + 1..=self.max_keys).find(|&slot| child_slot(slot) != SENTINEL)
                {
                    return Err(StorageError::Corruption(format!(
                        "internal page has {} keys but child pointer {} in unused slot {}",
                        key_count,
                        child_slot(slot),
                        slot
                    )));
                }
            }
            children
        };

        Ok(Page {
            keys,
            children,
            is_leaf,
            subtree_size,
        })
    }
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
