//! LRU cache for tree pages.
//!
//! Pages enter the cache when read from or written to the page file. The
//! cache never touches storage itself: evicted pages are handed back to the
//! caller, which writes dirty ones out.

use lru::LruCache;

use super::types::{Node, PageId};

/// A cached page with its data and dirty flag
pub struct CachedPage {
    pub node: Node,
    pub dirty: bool,
}

/// LRU cache for tree pages
pub struct PageCache {
    pages: LruCache<PageId, CachedPage>,
    /// Maximum number of pages to cache; 0 disables caching
    max_pages: usize,
}

impl PageCache {
    /// Create a new page cache with specified maximum size
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            max_pages,
        }
    }

    /// Get a page from cache, updating LRU order.
    /// Returns None if page is not in cache (must be loaded from storage).
    pub fn get(&mut self, page_id: PageId) -> Option<&Node> {
        self.pages.get(&page_id).map(|cached| &cached.node)
    }

    /// Insert or replace a page. A replaced page stays dirty if it was.
    ///
    /// Returns the page pushed out to make room, if any. With caching
    /// disabled the inserted page itself comes straight back.
    pub fn insert(&mut self, page_id: PageId, node: Node, dirty: bool) -> Option<(PageId, CachedPage)> {
        if self.max_pages == 0 {
            return Some((page_id, CachedPage { node, dirty }));
        }
        if let Some(cached) = self.pages.get_mut(&page_id) {
            cached.dirty |= dirty;
            cached.node = node;
            return None;
        }
        let evicted = if self.pages.len() >= self.max_pages {
            self.pages.pop_lru()
        } else {
            None
        };
        self.pages.put(page_id, CachedPage { node, dirty });
        evicted
    }

    /// Get all dirty pages for flushing, in ascending page order
    pub fn dirty_pages(&self) -> Vec<PageId> {
        let mut dirty: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    /// Look at a page without touching the LRU order
    pub fn peek(&self, page_id: PageId) -> Option<&Node> {
        self.pages.peek(&page_id).map(|cached| &cached.node)
    }

    /// Mark a page as clean
    pub fn mark_clean(&mut self, page_id: PageId) {
        if let Some(cached) = self.pages.peek_mut(&page_id) {
            cached.dirty = false;
        }
    }

    /// Remove a page from cache
    pub fn remove(&mut self, page_id: PageId) -> Option<CachedPage> {
        self.pages.pop(&page_id)
    }

    /// Drop every cached page
    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Get number of cached pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Check if page is in cache
    #[cfg(test)]
    pub(crate) fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains(&page_id)
    }
}
