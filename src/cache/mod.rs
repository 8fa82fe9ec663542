//! Page cache values and their shared handles.
//!
//! A [`PageCache`] is never mutated once published: every change builds a
//! new value and swaps it into the [`CacheHandle`], so readers holding an
//! older `Arc` keep seeing a consistent list.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Cursor, Document, Page};

/// Ordered pages of one list materialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PageCache {
    pages: Vec<Page>,
    /// Cursor of the last full load; changes at or below it are already reflected
    baseline: Option<Cursor>,
    /// Newest change merged into these pages
    applied: Option<Cursor>,
}

impl PageCache {
    /// Start a cache from a freshly fetched first page.
    pub fn from_first_page(page: Page) -> Self {
        Self::from_pages(vec![page])
    }

    pub fn from_pages(pages: Vec<Page>) -> Self {
        let baseline = pages.first().and_then(|p| p.changes_cursor);
        Self {
            pages,
            baseline,
            applied: None,
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn baseline(&self) -> Option<Cursor> {
        self.baseline
    }

    pub fn applied(&self) -> Option<Cursor> {
        self.applied
    }

    /// Highest feed position the cache reflects, from a load or a merge.
    pub fn known_cursor(&self) -> Option<Cursor> {
        self.pages
            .iter()
            .filter_map(|p| p.changes_cursor)
            .chain(self.applied)
            .max()
    }

    /// `(page index, row index)` of the row with `id`.
    pub fn find(&self, id: &str) -> Option<(usize, usize)> {
        self.pages
            .iter()
            .enumerate()
            .find_map(|(pi, page)| page.position_of(id).map(|ri| (pi, ri)))
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.find(id).map(|(pi, ri)| &self.pages[pi].items[ri])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Document> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn row_count(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page number to fetch next, if the server reported more.
    pub fn next_page_number(&self) -> Option<u32> {
        self.pages
            .last()
            .filter(|p| p.has_next)
            .map(|p| p.page + 1)
    }

    pub(crate) fn with_row_replaced(&self, page_idx: usize, row_idx: usize, row: Document) -> Self {
        self.rebuild_page(page_idx, |items| items[row_idx] = row)
    }

    pub(crate) fn with_row_removed(&self, page_idx: usize, row_idx: usize) -> Self {
        self.rebuild_page(page_idx, |items| {
            items.remove(row_idx);
        })
    }

    /// Copy every page, rewriting only the items of `page_idx`.
    fn rebuild_page(&self, page_idx: usize, edit: impl FnOnce(&mut Vec<Document>)) -> Self {
        let mut pages = self.pages.clone();
        edit(&mut pages[page_idx].items);
        Self {
            pages,
            baseline: self.baseline,
            applied: self.applied,
        }
    }

    /// Same pages, stamped with the cursor of the newest merged change.
    pub(crate) fn with_applied(mut self, cursor: Cursor) -> Self {
        self.applied = self.applied.max(Some(cursor));
        self
    }

    /// Replace page 1, dropping its rows from later pages.
    ///
    /// Returns `None` when the page was read at an older feed position than
    /// the cache already reflects; splicing it would undo merged changes.
    pub fn with_first_page(&self, page: Page) -> Option<Self> {
        if let (Some(read_at), Some(known)) = (page.changes_cursor, self.known_cursor()) {
            if read_at < known {
                return None;
            }
        }
        let fresh: HashSet<&str> = page.items.iter().map(|r| r.id.as_str()).collect();
        let mut pages = Vec::with_capacity(self.pages.len().max(1));
        for old in self.pages.iter().skip(1) {
            let mut old = old.clone();
            old.items.retain(|row| !fresh.contains(row.id.as_str()));
            pages.push(old);
        }
        pages.insert(0, page);
        Some(Self {
            pages,
            baseline: self.baseline,
            applied: self.applied,
        })
    }

    /// Append the next page, skipping rows already loaded earlier.
    pub fn with_appended_page(&self, mut page: Page) -> Self {
        let loaded: HashSet<&str> = self.rows().map(|r| r.id.as_str()).collect();
        page.items.retain(|row| !loaded.contains(row.id.as_str()));
        let mut pages = self.pages.clone();
        pages.push(page);
        Self {
            pages,
            baseline: self.baseline,
            applied: self.applied,
        }
    }
}

/// Single-writer cell publishing [`PageCache`] snapshots.
#[derive(Clone)]
pub struct CacheHandle {
    tx: Arc<watch::Sender<Arc<PageCache>>>,
    writes: Arc<AtomicU64>,
}

impl CacheHandle {
    pub fn new(cache: PageCache) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(cache));
        Self {
            tx: Arc::new(tx),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> Arc<PageCache> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PageCache>> {
        self.tx.subscribe()
    }

    /// Atomically derive the next cache from the current one.
    ///
    /// `f` returns `None` to leave the cache untouched (no write is counted).
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Arc<PageCache>) -> Option<Arc<PageCache>>,
    {
        let written = self.tx.send_if_modified(|current| match f(current) {
            Some(next) => {
                *current = next;
                true
            }
            None => false,
        });
        if written {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    pub fn replace(&self, cache: PageCache) {
        self.tx.send_replace(Arc::new(cache));
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of cache writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Per-document read-through cache backing detail panels.
#[derive(Debug, Default)]
pub struct DetailCache {
    entries: RwLock<HashMap<String, Document>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.entries.read().get(id).cloned()
    }

    pub fn upsert(&self, row: Document) {
        self.entries.write().insert(row.id.clone(), row);
    }

    pub fn evict(&self, id: &str) {
        self.entries.write().remove(id);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
