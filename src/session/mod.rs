//! List sessions: one reconciled list per key.
//!
//! A [`ListSession`] owns the page cache of one [`ListKey`] together with
//! the coalescer, refresh scheduler and stream consumer that keep it
//! current. All of them share one cancellation token, so tearing the
//! session down stops every pending timer, fetch and stream at once.
//! [`ListController`] swaps sessions when the key changes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheHandle, DetailCache, PageCache};
use crate::coalescer::ChangeCoalescer;
use crate::config::SyncTuning;
use crate::errors::SyncError;
use crate::models::{Cursor, Document, ListKey, ListQuery};
use crate::overlay::{InFlightOverlay, ListEntry, Notifier, UploadTracker};
use crate::refresh::RefreshScheduler;
use crate::source::DocumentSource;
use crate::store::{save_list_settings, KeyValueStore, ListSettings};
use crate::stream::{LiveStreamConsumer, StreamState};

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub workspace_id: String,
    pub query: ListQuery,
    pub page_size: u32,
    pub known_cursor: Option<Cursor>,
    pub page_count: usize,
    pub row_count: usize,
    pub has_next: bool,
    pub stream: StreamState,
    pub cache_writes: u64,
    pub refreshes: u64,
}

pub struct ListSession {
    key: ListKey,
    source: Arc<dyn DocumentSource>,
    cache: CacheHandle,
    details: Arc<DetailCache>,
    scheduler: RefreshScheduler,
    stream_state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    paging: tokio::sync::Mutex<()>,
}

impl ListSession {
    /// Load page 1 and start live reconciliation.
    pub async fn start(
        source: Arc<dyn DocumentSource>,
        key: ListKey,
        tuning: &SyncTuning,
        details: Arc<DetailCache>,
    ) -> Result<Self, SyncError> {
        let first = source.fetch_page(&key, 1).await?;
        tracing::info!(
            workspace = %key.workspace_id,
            sort = %key.query.sort,
            rows = first.items.len(),
            cursor = ?first.changes_cursor,
            "starting list session"
        );

        let cache = CacheHandle::new(PageCache::from_first_page(first));
        let cancel = CancellationToken::new();

        let scheduler = RefreshScheduler::new(
            source.clone(),
            key.clone(),
            cache.clone(),
            tuning.refresh_debounce,
            cancel.child_token(),
        );

        let (coalescer, changes) = ChangeCoalescer::new(
            cache.clone(),
            details.clone(),
            scheduler.clone(),
            key.query.clone(),
            tuning.coalesce_window,
            cancel.child_token(),
        );
        coalescer.spawn();

        let (state_tx, stream_state) = watch::channel(StreamState::Disconnected);
        let consumer = LiveStreamConsumer::new(
            source.clone(),
            key.clone(),
            cache.clone(),
            changes,
            tuning.backoff.clone(),
            cancel.child_token(),
            state_tx,
        )
        .with_details(details.clone());
        tokio::spawn(consumer.run());

        Ok(Self {
            key,
            source,
            cache,
            details,
            scheduler,
            stream_state,
            cancel,
            paging: tokio::sync::Mutex::new(()),
        })
    }

    pub fn key(&self) -> &ListKey {
        &self.key
    }

    pub fn snapshot(&self) -> Arc<PageCache> {
        self.cache.snapshot()
    }

    /// Receives every published cache value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PageCache>> {
        self.cache.subscribe()
    }

    pub fn stream_state(&self) -> StreamState {
        *self.stream_state.borrow()
    }

    pub fn request_refresh(&self) {
        self.scheduler.schedule();
    }

    /// Load and append the next page. Returns `false` when there is none.
    pub async fn fetch_next_page(&self) -> Result<bool, SyncError> {
        let _paging = self.paging.lock().await;
        if self.is_shut_down() {
            return Err(SyncError::Cancelled);
        }
        let Some(number) = self.cache.snapshot().next_page_number() else {
            return Ok(false);
        };

        let page = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            page = self.source.fetch_page(&self.key, number) => page?,
        };
        if self.is_shut_down() {
            return Err(SyncError::Cancelled);
        }

        // a resync may have reset the cache while the page was loading
        let appended = self.cache.update(|current| {
            (current.next_page_number() == Some(number))
                .then(|| Arc::new(current.with_appended_page(page)))
        });
        tracing::debug!(page = number, appended, "fetched next page");
        Ok(appended)
    }

    /// Detail read: detail cache, then loaded pages, then the server.
    pub async fn document(&self, id: &str) -> Result<Option<Document>, SyncError> {
        if let Some(doc) = self.details.get(id) {
            return Ok(Some(doc));
        }
        if let Some(doc) = self.cache.snapshot().get(id) {
            return Ok(Some(doc.clone()));
        }

        let fetched = self.source.fetch_document(&self.key.workspace_id, id).await?;
        if let Some(doc) = &fetched {
            if !self.is_shut_down() {
                self.details.upsert(doc.clone());
            }
        }
        Ok(fetched)
    }

    /// In-flight entries followed by the cached rows.
    pub fn visible(
        &self,
        overlay: &mut InFlightOverlay,
        uploads: &dyn UploadTracker,
        notifier: &dyn Notifier,
    ) -> Vec<ListEntry> {
        overlay.sync(&uploads.items(), notifier);
        overlay.compose(&self.cache.snapshot())
    }

    pub fn status(&self) -> SessionStatus {
        let snapshot = self.cache.snapshot();
        SessionStatus {
            workspace_id: self.key.workspace_id.clone(),
            query: self.key.query.clone(),
            page_size: self.key.page_size,
            known_cursor: snapshot.known_cursor(),
            page_count: snapshot.page_count(),
            row_count: snapshot.row_count(),
            has_next: snapshot.next_page_number().is_some(),
            stream: self.stream_state(),
            cache_writes: self.cache.write_count(),
            refreshes: self.scheduler.completed(),
        }
    }

    /// Stop the stream, timers and fetches of this session. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(workspace = %self.key.workspace_id, "stopping list session");
            self.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ListSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Holds the active session and replaces it when the key changes.
pub struct ListController {
    source: Arc<dyn DocumentSource>,
    tuning: SyncTuning,
    details: Arc<DetailCache>,
    store: Option<Arc<dyn KeyValueStore>>,
    current: tokio::sync::Mutex<Option<Arc<ListSession>>>,
}

impl ListController {
    pub fn new(source: Arc<dyn DocumentSource>, tuning: SyncTuning) -> Self {
        Self {
            source,
            tuning,
            details: Arc::new(DetailCache::new()),
            store: None,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Persist list settings whenever a new key is activated.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn details(&self) -> &Arc<DetailCache> {
        &self.details
    }

    /// Activate `key`, tearing down the previous session first.
    pub async fn set_key(&self, key: ListKey) -> Result<Arc<ListSession>, SyncError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            if session.key() == &key && !session.is_shut_down() {
                return Ok(session.clone());
            }
        }

        if let Some(old) = current.take() {
            old.shutdown();
            if old.key().workspace_id != key.workspace_id {
                self.details.clear();
            }
        }

        let session = Arc::new(
            ListSession::start(self.source.clone(), key.clone(), &self.tuning, self.details.clone())
                .await?,
        );
        *current = Some(session.clone());
        drop(current);

        if let Some(store) = &self.store {
            let settings = ListSettings {
                page_size: key.page_size,
                query: key.query.clone(),
            };
            if let Err(err) = save_list_settings(store.as_ref(), &key.workspace_id, &settings).await {
                tracing::warn!("Failed to persist list settings: {}", err);
            }
        }
        Ok(session)
    }

    pub async fn session(&self) -> Option<Arc<ListSession>> {
        self.current.lock().await.clone()
    }

    /// Active session or [`SyncError::NotReady`].
    pub async fn require_session(&self) -> Result<Arc<ListSession>, SyncError> {
        self.session()
            .await
            .ok_or_else(|| SyncError::NotReady("no list is active".into()))
    }

    pub async fn shutdown(&self) {
        if let Some(session) = self.current.lock().await.take() {
            session.shutdown();
        }
    }
}
