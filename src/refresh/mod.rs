//! Debounced, single-flight refetch of page 1.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheHandle;
use crate::models::ListKey;
use crate::source::DocumentSource;

/// Default debounce before a requested refresh starts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct RefreshState {
    /// Debounce timer running
    pending: bool,
    /// Fetch running
    in_flight: bool,
    /// Another refresh was requested while a fetch was running
    queued: bool,
}

struct Inner {
    source: Arc<dyn DocumentSource>,
    key: ListKey,
    cache: CacheHandle,
    debounce: Duration,
    cancel: CancellationToken,
    state: Mutex<RefreshState>,
    completed: AtomicU64,
}

/// Coalesces "please refetch page 1" requests.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        key: ListKey,
        cache: CacheHandle,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                key,
                cache,
                debounce,
                cancel,
                state: Mutex::new(RefreshState::default()),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Request a refresh.
    ///
    /// No-op while the debounce timer runs; while a fetch is running the
    /// request is folded into exactly one follow-up fetch.
    pub fn schedule(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            if state.pending {
                return;
            }
            if state.in_flight {
                state.queued = true;
                return;
            }
            state.pending = true;
        }

        let this = self.clone();
        tokio::spawn(async move { this.run().await });
    }

    /// Successful page-1 splices so far.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.pending && !state.in_flight && !state.queued
    }

    async fn run(self) {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.inner.debounce) => {}
        }

        {
            let mut state = self.inner.state.lock();
            state.pending = false;
            state.in_flight = true;
        }

        let mut landed;
        loop {
            landed = self.refresh_once().await;

            let mut state = self.inner.state.lock();
            if state.queued && !self.inner.cancel.is_cancelled() {
                state.queued = false;
                continue;
            }
            state.in_flight = false;
            state.queued = false;
            break;
        }

        if landed == Landed::Stale {
            self.schedule();
        }
    }

    async fn refresh_once(&self) -> Landed {
        let inner = &self.inner;
        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Landed::Dropped,
            result = inner.source.fetch_page(&inner.key, 1) => result,
        };

        match result {
            Ok(page) => {
                // a late response for a torn-down list must not land
                if inner.cancel.is_cancelled() {
                    tracing::debug!("discarding refresh for cancelled list");
                    return Landed::Dropped;
                }
                let rows = page.items.len();
                let read_at = page.changes_cursor;
                let spliced = inner
                    .cache
                    .update(|current| current.with_first_page(page).map(Arc::new));
                if !spliced {
                    tracing::debug!(?read_at, "first page is behind merged changes, refetching");
                    return Landed::Stale;
                }
                inner.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rows, "refreshed first page");
                Landed::Spliced
            }
            Err(err) => {
                tracing::warn!("Page refresh failed: {}", err);
                Landed::Dropped
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Landed {
    Spliced,
    /// Read before changes the cache already holds
    Stale,
    Dropped,
}
