//! Page files: id-keyed page stores with an LRU cache and I/O accounting.
//!
//! Both flavours share [`CachedPageFile`], which puts a [`PageCache`] in
//! front of a [`PageStorage`]. Reads are served from the cache when possible;
//! a miss loads exactly one page from storage. Writes land in the cache as
//! dirty pages and reach storage on eviction or flush.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::cache::PageCache;
use super::storage::{FileStorage, MemoryStorage, PageStorage};
use super::types::{
    FileHeader, Node, PageFileStats, PageId, SpatialError, SpatialResult, TreeHeader,
};

/// Page store contract used by the tree
pub trait PageFile: Send + Sync {
    fn read_page(&self, page_id: PageId) -> SpatialResult<Node>;

    /// Store a page under its own id.
    fn write_page(&self, node: &Node) -> SpatialResult<()>;

    fn delete_page(&self, page_id: PageId) -> SpatialResult<()>;

    /// Hand out an unused page id, reusing deleted ones first.
    fn allocate_id(&self) -> PageId;

    /// Physical page accesses since creation or the last reset.
    fn io_access(&self) -> u64;

    fn reset_io_access(&self);

    fn stats(&self) -> PageFileStats;

    /// Write dirty pages and the header to storage.
    fn flush(&self, tree: &TreeHeader) -> SpatialResult<()>;

    /// Flush and drop all cached pages.
    fn close(&self, tree: &TreeHeader) -> SpatialResult<()>;
}

/// Internal statistics tracking
#[derive(Default)]
struct IoStatistics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    logical_reads: AtomicU64,
    logical_writes: AtomicU64,
    physical_reads: AtomicU64,
    physical_writes: AtomicU64,
}

impl IoStatistics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.logical_reads,
            &self.logical_writes,
            &self.physical_reads,
            &self.physical_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Page id allocation with a free list of deleted ids
#[derive(Debug, Default)]
struct Allocator {
    next_page_id: PageId,
    free_pages: Vec<PageId>,
}

/// A page file over any [`PageStorage`]
pub struct CachedPageFile<S: PageStorage> {
    storage: Mutex<S>,
    cache: Mutex<PageCache>,
    allocator: Mutex<Allocator>,
    stats: IoStatistics,
}

/// Page file whose pages live in memory
pub type MemoryPageFile = CachedPageFile<MemoryStorage>;

/// Page file whose pages live in a record log on disk
pub type PersistentPageFile = CachedPageFile<FileStorage>;

impl<S: PageStorage> CachedPageFile<S> {
    pub fn with_storage(storage: S, cache_pages: usize) -> Self {
        Self::restore(storage, cache_pages, 0, Vec::new())
    }

    fn restore(storage: S, cache_pages: usize, next_page_id: PageId, free_pages: Vec<PageId>) -> Self {
        Self {
            storage: Mutex::new(storage),
            cache: Mutex::new(PageCache::new(cache_pages)),
            allocator: Mutex::new(Allocator {
                next_page_id,
                free_pages,
            }),
            stats: IoStatistics::default(),
        }
    }

    /// Add a node to cache; a dirty page pushed out is written to storage.
    fn cache_node(&self, cache: &mut PageCache, node: Node, dirty: bool) -> SpatialResult<()> {
        if let Some((evict_id, evicted)) = cache.insert(node.id, node, dirty) {
            if evicted.dirty {
                log::trace!("writing evicted page {}", evict_id);
                self.storage.lock().store(&evicted.node)?;
                IoStatistics::bump(&self.stats.physical_writes);
            }
        }
        Ok(())
    }

    fn file_header(&self, tree: &TreeHeader) -> FileHeader {
        let allocator = self.allocator.lock();
        FileHeader::new(
            tree.clone(),
            allocator.next_page_id,
            allocator.free_pages.clone(),
        )
    }
}

impl MemoryPageFile {
    pub fn new(cache_pages: usize) -> Self {
        Self::with_storage(MemoryStorage::new(), cache_pages)
    }
}

impl PersistentPageFile {
    /// Create a new, empty page file at the given path
    pub fn create(path: &Path, cache_pages: usize) -> SpatialResult<Self> {
        Ok(Self::with_storage(FileStorage::create(path)?, cache_pages))
    }

    /// Open an existing page file, returning the tree header stored in it.
    ///
    /// Only the record index is built; no page is loaded.
    pub fn open(path: &Path, cache_pages: usize) -> SpatialResult<(Self, TreeHeader)> {
        let (storage, header) = FileStorage::open(path)?;
        let file = Self::restore(storage, cache_pages, header.next_page_id, header.free_pages);
        Ok((file, header.tree))
    }
}

impl<S: PageStorage> PageFile for CachedPageFile<S> {
    fn read_page(&self, page_id: PageId) -> SpatialResult<Node> {
        IoStatistics::bump(&self.stats.logical_reads);
        let mut cache = self.cache.lock();
        if let Some(node) = cache.get(page_id) {
            IoStatistics::bump(&self.stats.cache_hits);
            return Ok(node.clone());
        }

        IoStatistics::bump(&self.stats.cache_misses);
        IoStatistics::bump(&self.stats.physical_reads);
        let node = self
            .storage
            .lock()
            .load(page_id)?
            .ok_or(SpatialError::PageNotFound(page_id))?;
        self.cache_node(&mut cache, node.clone(), false)?;
        Ok(node)
    }

    fn write_page(&self, node: &Node) -> SpatialResult<()> {
        IoStatistics::bump(&self.stats.logical_writes);
        let mut cache = self.cache.lock();
        self.cache_node(&mut cache, node.clone(), true)
    }

    fn delete_page(&self, page_id: PageId) -> SpatialResult<()> {
        self.cache.lock().remove(page_id);
        self.storage.lock().remove(page_id)?;
        self.allocator.lock().free_pages.push(page_id);
        Ok(())
    }

    fn allocate_id(&self) -> PageId {
        let mut allocator = self.allocator.lock();
        if let Some(page_id) = allocator.free_pages.pop() {
            return page_id;
        }
        let page_id = allocator.next_page_id;
        allocator.next_page_id += 1;
        page_id
    }

    fn io_access(&self) -> u64 {
        self.stats().io_access()
    }

    fn reset_io_access(&self) {
        self.stats.reset();
    }

    fn stats(&self) -> PageFileStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PageFileStats {
            cached_pages: self.cache.lock().len() as u64,
            cache_hits: load(&self.stats.cache_hits),
            cache_misses: load(&self.stats.cache_misses),
            logical_reads: load(&self.stats.logical_reads),
            logical_writes: load(&self.stats.logical_writes),
            physical_reads: load(&self.stats.physical_reads),
            physical_writes: load(&self.stats.physical_writes),
        }
    }

    fn flush(&self, tree: &TreeHeader) -> SpatialResult<()> {
        let header = self.file_header(tree);
        let mut cache = self.cache.lock();
        let mut storage = self.storage.lock();
        let dirty = cache.dirty_pages();
        for page_id in &dirty {
            if let Some(node) = cache.peek(*page_id) {
                storage.store(node)?;
                IoStatistics::bump(&self.stats.physical_writes);
            }
            cache.mark_clean(*page_id);
        }
        storage.sync(&header)?;
        log::debug!("flushed {} dirty pages", dirty.len());
        Ok(())
    }

    fn close(&self, tree: &TreeHeader) -> SpatialResult<()> {
        self.flush(tree)?;
        self.cache.lock().clear();
        Ok(())
    }
}
