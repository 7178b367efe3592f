//! LRU cache of committed pool pages.
//!
//! Only pages already durable in the pool file enter the cache, so an
//! evicted page is simply dropped. Pages are loaded lazily on first read.

use std::collections::{HashMap, VecDeque};

use super::storage::{PageId, PageKind};

pub(crate) struct PageCache {
    pages: HashMap<PageId, PageKind>,
    /// LRU order (front = oldest, back = newest)
    lru_order: VecDeque<PageId>,
    max_pages: usize,
    hits: u64,
    misses: u64,
}

impl PageCache {
    pub fn new(max_pages: usize) -> PageCache {
        PageCache {
            pages: HashMap::new(),
            lru_order: VecDeque::new(),
            max_pages,
            hits: 0,
            misses: 0,
        }
    }

    /// Get a copy of a page, updating LRU order.
    /// Returns None if the page must be loaded from disk.
    pub fn get(&mut self, page_id: PageId) -> Option<PageKind> {
        match self.pages.get(&page_id) {
            Some(page) => {
                let page = page.clone();
                self.touch(page_id);
                self.hits += 1;
                Some(page)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a committed page, evicting the oldest ones when full.
    pub fn insert(&mut self, page_id: PageId, page: PageKind) {
        if self.max_pages == 0 {
            return;
        }
        if self.pages.insert(page_id, page).is_some() {
            self.touch(page_id);
            return;
        }
        self.lru_order.push_back(page_id);
        while self.pages.len() > self.max_pages {
            match self.lru_order.pop_front() {
                Some(oldest) => {
                    self.pages.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn remove(&mut self, page_id: PageId) -> Option<PageKind> {
        self.lru_order.retain(|&id| id != page_id);
        self.pages.remove(&page_id)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.lru_order.clear();
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    /// (hits, misses) since creation
    pub fn hit_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn touch(&mut self, page_id: PageId) {
        self.lru_order.retain(|&id| id != page_id);
        self.lru_order.push_back(page_id);
    }
}
