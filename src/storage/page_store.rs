//! Page Store
//!
//! Owns the backing file of one index and addresses it as a flat array of fixed-size
//! pages: page `i` lives at byte offset `i * page_size`. The store knows nothing about
//! what a page contains.
//!
//! ## Allocation
//! New pages are appended. The next identifier is derived from the file length, the file
//! is extended by one zero-filled page immediately, and identifiers are never reused
//! (there is no free list).
//!
//! ## Caching
//! An optional LRU cache keyed by page id holds raw page bytes. It is write-through:
//! [`PageStore::write`] replaces the cached copy, so a read never observes stale bytes.

use crate::config::{AccessMode, TreeConfig};
use crate::storage::region::{read_region, write_region};
use crate::{Result, StorageError};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, trace};

/// Stable logical page identifier (page index, not a byte offset)
pub type PageId = u64;

/// The fixed slot that always holds the current root page
pub const ROOT_PAGE_ID: PageId = 0;

/// Store I/O counters
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub page_reads: u64,
    pub page_writes: u64,
    pub allocations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct PageCache {
    /// None when caching is disabled
    pages: Option<LruCache<PageId, Vec<u8>>>,
    stats: StoreStats,
}

/// Fixed-size page file
pub struct PageStore {
    file: File,
    path: PathBuf,
    page_size: usize,
    page_count: u64,
    access_mode: AccessMode,
    sync_on_write: bool,
    cache: Mutex<PageCache>,
}

impl PageStore {
    /// Open or create the backing file.
    ///
    /// A new (empty) file gets `initial_root` written to [`ROOT_PAGE_ID`]. An existing
    /// file must be a whole number of pages long.
    pub fn open<P: AsRef<Path>>(
        path: P,
        page_size: usize,
        config: &TreeConfig,
        initial_root: &[u8],
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if page_size == 0 || initial_root.len() != page_size {
            return Err(StorageError::InvalidArgument(format!(
                "initial root is {} bytes, page size is {}",
                initial_root.len(),
                page_size
            )));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len % page_size as u64 != 0 {
            return Err(StorageError::Corruption(format!(
                "{}: length {} is not a multiple of page size {}",
                path.display(),
                file_len,
                page_size
            )));
        }

        let pages = NonZeroUsize::new(config.cache_pages).map(LruCache::new);
        let mut store = Self {
            file,
            path,
            page_size,
            page_count: file_len / page_size as u64,
            access_mode: config.access_mode,
            sync_on_write: config.sync_on_write,
            cache: Mutex::new(PageCache {
                pages,
                stats: StoreStats::default(),
            }),
        };

        if store.page_count == 0 {
            store.write(ROOT_PAGE_ID, initial_root)?;
            info!(
                path = %store.path.display(),
                page_size,
                access = store.access_mode.description(),
                "page_store.created"
            );
        } else {
            info!(
                path = %store.path.display(),
                page_size,
                pages = store.page_count,
                access = store.access_mode.description(),
                "page_store.opened"
            );
        }

        Ok(store)
    }

    /// Read one whole page
    pub fn read(&self, page_id: PageId) -> Result<Vec<u8>> {
        if page_id >= self.page_count {
            return Err(StorageError::Corruption(format!(
                "page {} is beyond the end of {} ({} pages)",
                page_id,
                self.path.display(),
                self.page_count
            )));
        }

        let mut cache = self.cache.lock();
        if let Some(bytes) = cache.pages.as_mut().and_then(|pages| pages.get(&page_id)) {
            let bytes = bytes.clone();
            cache.stats.cache_hits += 1;
            return Ok(bytes);
        }
        cache.stats.cache_misses += 1;

        let mut buf = vec![0u8; self.page_size];
        read_region(&self.file, self.access_mode, self.offset(page_id), &mut buf)?;
        cache.stats.page_reads += 1;
        trace!(page_id, "page_store.read");

        if let Some(pages) = cache.pages.as_mut() {
            pages.put(page_id, buf.clone());
        }
        Ok(buf)
    }

    /// Write one whole page, extending the file if necessary
    pub fn write(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "page {} write of {} bytes, page size is {}",
                page_id,
                data.len(),
                self.page_size
            )));
        }

        write_region(
            &self.file,
            self.access_mode,
            self.offset(page_id),
            data,
            self.sync_on_write,
        )?;
        self.page_count = self.page_count.max(page_id + 1);

        let cache = self.cache.get_mut();
        cache.stats.page_writes += 1;
        if let Some(pages) = cache.pages.as_mut() {
            pages.put(page_id, data.to_vec());
        }
        trace!(page_id, "page_store.write");
        Ok(())
    }

    /// Reserve a fresh page at the end of the file
    pub fn allocate(&mut self) -> Result<PageId> {
        let file_len = self.file.metadata()?.len();
        let page_id = file_len / self.page_size as u64;
        self.file.set_len(self.offset(page_id + 1))?;
        self.page_count = page_id + 1;

        self.cache.get_mut().stats.allocations += 1;
        trace!(page_id, "page_store.allocate");
        Ok(page_id)
    }

    /// fsync the backing file
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> StoreStats {
        self.cache.lock().stats
    }

    fn offset(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAGE: usize = 16;

    fn open_store(dir: &TempDir, config: &TreeConfig) -> PageStore {
        PageStore::open(dir.path().join("pages.bin"), PAGE, config, &[0xAA; PAGE]).unwrap()
    }

    #[test]
    fn test_new_file_gets_root_page() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, &TreeConfig::default());

        assert_eq!(store.page_count(), 1);
        assert_eq!(store.read(ROOT_PAGE_ID).unwrap(), vec![0xAA; PAGE]);
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), PAGE as u64);
    }

    #[test]
    fn test_allocate_appends_and_never_reuses() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, &TreeConfig::default());

        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.page_count(), 3);

        // Allocated but not yet filled pages read back as zeros
        assert_eq!(store.read(b).unwrap(), vec![0u8; PAGE]);

        store.write(a, &[1u8; PAGE]).unwrap();
        assert_eq!(store.allocate().unwrap(), 3);
        assert_eq!(store.stats().allocations, 3);
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, &TreeConfig::default());

        assert!(matches!(store.read(1), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_write_wrong_size_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, &TreeConfig::default());

        assert!(matches!(
            store.write(0, &[0u8; PAGE - 1]),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cache_is_write_through() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, &TreeConfig::default());

        store.read(ROOT_PAGE_ID).unwrap();
        store.write(ROOT_PAGE_ID, &[0x55; PAGE]).unwrap();
        assert_eq!(store.read(ROOT_PAGE_ID).unwrap(), vec![0x55; PAGE]);

        let stats = store.stats();
        assert!(stats.cache_hits >= 1);
        assert_eq!(stats.page_writes, 2);
    }

    #[test]
    fn test_uncached_reads_hit_the_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, &TreeConfig::uncached(3));

        store.read(ROOT_PAGE_ID).unwrap();
        store.read(ROOT_PAGE_ID).unwrap();

        let stats = store.stats();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.page_reads, 2);
    }

    #[test]
    fn test_reopen_keeps_pages() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir, &TreeConfig::default());
            let id = store.allocate().unwrap();
            store.write(id, &[9u8; PAGE]).unwrap();
            store.sync().unwrap();
        }

        let store = open_store(&dir, &TreeConfig::default());
        assert_eq!(store.page_count(), 2);
        // Existing root is not overwritten by the initializer
        assert_eq!(store.read(ROOT_PAGE_ID).unwrap(), vec![0xAA; PAGE]);
        assert_eq!(store.read(1).unwrap(), vec![9u8; PAGE]);
    }

    #[test]
    fn test_partial_page_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.bin");
        std::fs::write(&path, [0u8; PAGE + 3]).unwrap();

        let result = PageStore::open(&path, PAGE, &TreeConfig::default(), &[0u8; PAGE]);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_unusable_path_is_io_error() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened as the backing file
        let result = PageStore::open(dir.path(), PAGE, &TreeConfig::default(), &[0u8; PAGE]);
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_mapped_mode() {
        let dir = TempDir::new().unwrap();
        let config = TreeConfig {
            access_mode: AccessMode::Mapped,
            cache_pages: 0,
            ..TreeConfig::default()
        };
        let mut store = open_store(&dir, &config);

        let id = store.allocate().unwrap();
        store.write(id, &[3u8; PAGE]).unwrap();
        assert_eq!(store.read(id).unwrap(), vec![3u8; PAGE]);
        assert_eq!(store.read(ROOT_PAGE_ID).unwrap(), vec![0xAA; PAGE]);
    }
}
