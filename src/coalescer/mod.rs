//! Buffers change bursts and applies them as one cache write.
//!
//! The first event after an idle period opens a short window; when it
//! closes, everything queued is merged in arrival order against a single
//! cache read and published once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheHandle, DetailCache, PageCache};
use crate::merge::merge_change;
use crate::models::{ChangeEvent, ChangeKind, ListQuery};
use crate::refresh::RefreshScheduler;

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(200);

/// Result of applying a drained batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub cache: Arc<PageCache>,
    pub applied: usize,
    /// Events at or below the cache baseline
    pub skipped: usize,
    pub refresh_needed: bool,
}

/// Merge `batch` in order, each event seeing the previous one's result.
pub fn apply_batch(cache: &Arc<PageCache>, batch: &[ChangeEvent], query: &ListQuery) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        cache: Arc::clone(cache),
        applied: 0,
        skipped: 0,
        refresh_needed: false,
    };

    let mut newest = None;
    for change in batch {
        if !above_baseline(cache, change) {
            outcome.skipped += 1;
            continue;
        }
        let merged = merge_change(&outcome.cache, change, query);
        if merged.applied {
            outcome.applied += 1;
        }
        newest = newest.max(Some(change.cursor));
        outcome.refresh_needed |= merged.refresh_needed;
        outcome.cache = merged.cache;
    }

    if let Some(cursor) = newest.filter(|_| outcome.applied > 0) {
        outcome.cache = Arc::new(Arc::unwrap_or_clone(outcome.cache).with_applied(cursor));
    }
    outcome
}

/// Whether `change` is newer than the full load behind `cache`.
fn above_baseline(cache: &PageCache, change: &ChangeEvent) -> bool {
    cache.baseline().map_or(true, |floor| change.cursor > floor)
}

/// Sending side handed to the stream consumer.
#[derive(Clone)]
pub struct CoalescerHandle {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl CoalescerHandle {
    /// Queue a change; returns `false` once the coalescer has stopped.
    pub fn enqueue(&self, change: ChangeEvent) -> bool {
        self.tx.send(change).is_ok()
    }
}

pub struct ChangeCoalescer {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    cache: CacheHandle,
    details: Arc<DetailCache>,
    scheduler: RefreshScheduler,
    query: ListQuery,
    window: Duration,
    cancel: CancellationToken,
}

impl ChangeCoalescer {
    pub fn new(
        cache: CacheHandle,
        details: Arc<DetailCache>,
        scheduler: RefreshScheduler,
        query: ListQuery,
        window: Duration,
        cancel: CancellationToken,
    ) -> (Self, CoalescerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coalescer = Self {
            rx,
            cache,
            details,
            scheduler,
            query,
            window,
            cancel,
        };
        (coalescer, CoalescerHandle { tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            let first = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(change) => change,
                    None => break,
                },
            };

            let mut batch = vec![first];
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.window) => {}
            }
            while let Ok(change) = self.rx.try_recv() {
                batch.push(change);
            }

            self.flush(&batch);
        }
        tracing::debug!("change coalescer stopped");
    }

    fn flush(&self, batch: &[ChangeEvent]) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut outcome = None;
        let mut fresh = Vec::with_capacity(batch.len());
        let written = self.cache.update(|current| {
            fresh.extend(batch.iter().filter(|change| above_baseline(current, change)));
            let result = apply_batch(current, batch, &self.query);
            let next = (result.applied > 0).then(|| Arc::clone(&result.cache));
            outcome = Some(result);
            next
        });

        // events the last full load already covers may carry older rows
        for change in fresh {
            match (change.kind, change.row.as_ref()) {
                (ChangeKind::Upsert, Some(row)) => self.details.upsert(row.clone()),
                (ChangeKind::Deleted, _) => {
                    if let Some(id) = change.target_id() {
                        self.details.evict(id);
                    }
                }
                _ => {}
            }
        }

        let Some(outcome) = outcome else { return };
        tracing::debug!(
            batch = batch.len(),
            applied = outcome.applied,
            skipped = outcome.skipped,
            refresh = outcome.refresh_needed,
            written,
            "flushed change batch"
        );
        if outcome.refresh_needed {
            self.scheduler.schedule();
        }
    }
}
