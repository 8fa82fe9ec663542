//! Reads the change feed, tracks the cursor, and feeds the coalescer.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{BackoffPolicy, StreamMachine, StreamState};
use crate::cache::{CacheHandle, DetailCache, PageCache};
use crate::coalescer::CoalescerHandle;
use crate::errors::SyncError;
use crate::models::{ChangeFrame, Cursor, ListKey};
use crate::source::{ChangeStream, DocumentSource};

/// How a stream session ended without an error.
enum StreamEnd {
    Cancelled,
    Closed,
}

pub struct LiveStreamConsumer {
    source: Arc<dyn DocumentSource>,
    key: ListKey,
    cache: CacheHandle,
    details: Option<Arc<DetailCache>>,
    coalescer: CoalescerHandle,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    machine: StreamMachine,
    state_tx: watch::Sender<StreamState>,
    last_cursor: Option<Cursor>,
    /// Resyncs since the last received event
    resync_streak: u32,
}

impl LiveStreamConsumer {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        key: ListKey,
        cache: CacheHandle,
        coalescer: CoalescerHandle,
        policy: BackoffPolicy,
        cancel: CancellationToken,
        state_tx: watch::Sender<StreamState>,
    ) -> Self {
        Self {
            source,
            key,
            cache,
            details: None,
            coalescer,
            policy,
            cancel,
            machine: StreamMachine::new(),
            state_tx,
            last_cursor: None,
            resync_streak: 0,
        }
    }

    /// Detail cache to invalidate when the list is reloaded.
    pub fn with_details(mut self, details: Arc<DetailCache>) -> Self {
        self.details = Some(details);
        self
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state());
    }

    fn abort(&mut self) {
        self.machine.abort();
        self.publish();
        tracing::debug!(workspace = %self.key.workspace_id, "change stream aborted");
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() || !self.machine.connect() {
                break;
            }
            self.publish();

            let from = self.last_cursor.max(self.cache.snapshot().known_cursor());
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                opened = self.source.open_changes(&self.key, from) => opened,
            };

            let result = match opened {
                Ok(stream) => {
                    self.machine.opened();
                    self.publish();
                    tracing::debug!(after = ?from, "change stream open");
                    self.pump(stream).await
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(StreamEnd::Cancelled) => break,
                Ok(StreamEnd::Closed) => {
                    tracing::debug!("change stream closed by server");
                }
                Err(err) if err.is_cursor_gone() => {
                    if self.resync_streak == 0 {
                        match self.resync().await {
                            Ok(()) => {
                                self.resync_streak += 1;
                                self.machine.disconnected();
                                continue;
                            }
                            Err(SyncError::Cancelled) => break,
                            Err(err) => tracing::warn!("List resync failed: {}", err),
                        }
                    } else {
                        // the fresh cursor was refused too; back off before resyncing again
                        tracing::warn!("Change cursor refused right after resync");
                        self.resync_streak = 0;
                    }
                }
                Err(err) if err.is_retryable() => {
                    tracing::debug!("change stream interrupted: {}", err);
                }
                Err(err) => {
                    tracing::warn!("Change stream failed: {}", err);
                }
            }

            let Some(delay) = self.machine.failed(&self.policy, rand::random::<f64>()) else {
                break;
            };
            self.publish();
            tracing::debug!(attempt = self.machine.attempt(), ?delay, "reconnecting after backoff");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.abort();
    }

    async fn pump(&mut self, mut stream: ChangeStream) -> Result<StreamEnd, SyncError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(StreamEnd::Closed),
                Some(Err(err)) => return Err(err),
                Some(Ok(frame)) => self.accept(frame),
            }
        }
    }

    fn accept(&mut self, frame: ChangeFrame) {
        let Some(cursor) = frame.cursor() else {
            tracing::debug!("dropping change without cursor");
            return;
        };
        if self.last_cursor.is_some_and(|last| cursor <= last) {
            tracing::debug!(%cursor, "skipping redelivered change");
            return;
        }

        self.last_cursor = Some(cursor);
        self.machine.event_received();
        self.resync_streak = 0;

        match frame {
            ChangeFrame::Event(change) => {
                if !self.coalescer.enqueue(change) {
                    tracing::debug!("coalescer gone; change dropped");
                }
            }
            ChangeFrame::Ignored { reason, .. } => {
                tracing::debug!(%cursor, reason = %reason, "ignoring unusable change");
            }
        }
    }

    /// Replace the whole cache with a fresh page 1 and trust its cursor.
    async fn resync(&mut self) -> Result<(), SyncError> {
        tracing::info!(workspace = %self.key.workspace_id, "change cursor expired, reloading list");
        let page = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            page = self.source.fetch_page(&self.key, 1) => page?,
        };
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.last_cursor = page.changes_cursor;
        self.cache.replace(PageCache::from_first_page(page));
        // entries may predate changes lost with the expired history
        if let Some(details) = &self.details {
            details.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::test_support::{ids, page};
    use crate::coalescer::ChangeCoalescer;
    use crate::cache::DetailCache;
    use crate::models::fixtures::doc;
    use crate::models::{ChangeEvent, ListQuery};
    use crate::refresh::RefreshScheduler;
    use crate::source::fake::{ScriptedSource, StreamScript};

    struct Rig {
        source: Arc<ScriptedSource>,
        cache: CacheHandle,
        state: watch::Receiver<StreamState>,
        cancel: CancellationToken,
    }

    fn start(source: ScriptedSource, initial: PageCache) -> Rig {
        let source = Arc::new(source);
        let key = ListKey::new("ws", ListQuery::default(), 25);
        let cache = CacheHandle::new(initial);
        let cancel = CancellationToken::new();
        let scheduler = RefreshScheduler::new(
            source.clone(),
            key.clone(),
            cache.clone(),
            Duration::from_millis(500),
            cancel.clone(),
        );
        let (coalescer, handle) = ChangeCoalescer::new(
            cache.clone(),
            Arc::new(DetailCache::new()),
            scheduler,
            key.query.clone(),
            Duration::from_millis(200),
            cancel.clone(),
        );
        coalescer.spawn();

        let (state_tx, state) = watch::channel(StreamState::Disconnected);
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            max_exponent: 5,
            jitter_ratio: 0.15,
        };
        let consumer = LiveStreamConsumer::new(
            source.clone(),
            key,
            cache.clone(),
            handle,
            policy,
            cancel.clone(),
            state_tx,
        );
        tokio::spawn(consumer.run());
        Rig {
            source,
            cache,
            state,
            cancel,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    fn renamed(id: &str, cursor: u64) -> ChangeEvent {
        let mut row = doc(id);
        row.name = format!("{}-renamed", id);
        ChangeEvent::upsert(Cursor::new(cursor), row)
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_cache_cursor_and_applies_events() {
        let source = ScriptedSource::new(page(1, &["a"], 10));
        source.script(StreamScript::events(vec![renamed("a", 11)]));
        let rig = start(source, PageCache::from_first_page(page(1, &["a"], 10)));

        settle().await;

        assert_eq!(rig.source.opened_from(), vec![Some(Cursor::new(10))]);
        assert_eq!(rig.cache.snapshot().get("a").unwrap().name, "a-renamed");
        assert_eq!(*rig.state.borrow(), StreamState::Streaming);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_after_last_cursor() {
        let source = ScriptedSource::new(page(1, &["a", "b"], 10));
        source.script(StreamScript::events_then_error(
            vec![renamed("a", 11), renamed("b", 12)],
            SyncError::Transport("connection reset".into()),
        ));
        source.script(StreamScript::events(vec![renamed("b", 12)]));
        let rig = start(source, PageCache::from_first_page(page(1, &["a", "b"], 10)));

        settle().await;

        assert_eq!(
            rig.source.opened_from(),
            vec![Some(Cursor::new(10)), Some(Cursor::new(12))]
        );
        let snapshot = rig.cache.snapshot();
        assert_eq!(snapshot.get("a").unwrap().name, "a-renamed");
        assert_eq!(snapshot.get("b").unwrap().name, "b-renamed");
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_gone_triggers_one_resync() {
        let source = ScriptedSource::new(page(1, &["a"], 10));
        source.script(StreamScript::Refuse(SyncError::CursorGone {
            cursor: Some(Cursor::new(10)),
        }));
        source.push_first_page(page(1, &["x", "y"], 50));
        let rig = start(source, PageCache::from_first_page(page(1, &["a"], 10)));

        settle().await;

        assert_eq!(rig.source.page_fetches(), vec![1]);
        assert_eq!(
            rig.source.opened_from(),
            vec![Some(Cursor::new(10)), Some(Cursor::new(50))]
        );
        assert_eq!(ids(&rig.cache.snapshot()), vec![vec!["x", "y"]]);
        assert_eq!(*rig.state.borrow(), StreamState::Streaming);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_gone_after_resync_backs_off() {
        let source = ScriptedSource::new(page(1, &["a"], 10));
        for _ in 0..2 {
            source.script(StreamScript::Refuse(SyncError::CursorGone { cursor: None }));
        }
        source.push_first_page(page(1, &["a"], 50));
        let rig = start(source, PageCache::from_first_page(page(1, &["a"], 10)));

        settle().await;

        let opened = rig.source.opened_at();
        assert_eq!(opened.len(), 3);
        assert!(opened[2] - opened[1] >= Duration::from_millis(100));
        assert_eq!(rig.source.page_fetches(), vec![1]);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_between_failed_connects() {
        let source = ScriptedSource::new(page(1, &["a"], 10));
        for _ in 0..3 {
            source.script(StreamScript::Refuse(SyncError::Transport("refused".into())));
        }
        let rig = start(source, PageCache::from_first_page(page(1, &["a"], 10)));

        settle().await;

        let opened = rig.source.opened_at();
        assert_eq!(opened.len(), 4);
        let gaps: Vec<Duration> = opened.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(100) && gaps[0] <= Duration::from_millis(116));
        assert!(gaps[1] >= Duration::from_millis(200) && gaps[1] <= Duration::from_millis(231));
        assert!(gaps[2] >= Duration::from_millis(400) && gaps[2] <= Duration::from_millis(461));
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_stream() {
        let source = ScriptedSource::new(page(1, &["a"], 10));
        let rig = start(source, PageCache::from_first_page(page(1, &["a"], 10)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        rig.cancel.cancel();
        rig.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*rig.state.borrow(), StreamState::Aborted);
        assert_eq!(rig.source.opened_from().len(), 1);
    }
}
