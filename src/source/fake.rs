//! Scripted in-memory document source for unit tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ChangeStream, DocumentSource};
use crate::errors::SyncError;
use crate::models::{ChangeEvent, ChangeFrame, Cursor, Document, ListKey, Page};

/// What the next `open_changes` call does.
pub enum StreamScript {
    Refuse(SyncError),
    Frames {
        frames: Vec<Result<ChangeFrame, SyncError>>,
        /// Keep the stream open after the frames instead of ending it
        hang: bool,
    },
}

impl StreamScript {
    pub fn events(events: Vec<ChangeEvent>) -> Self {
        StreamScript::Frames {
            frames: events.into_iter().map(|e| Ok(ChangeFrame::Event(e))).collect(),
            hang: true,
        }
    }

    pub fn events_then_error(events: Vec<ChangeEvent>, err: SyncError) -> Self {
        let mut frames: Vec<_> = events.into_iter().map(|e| Ok(ChangeFrame::Event(e))).collect();
        frames.push(Err(err));
        StreamScript::Frames { frames, hang: false }
    }
}

#[derive(Default)]
struct Calls {
    page_fetches: Vec<u32>,
    opened_from: Vec<Option<Cursor>>,
    opened_at: Vec<Instant>,
    document_fetches: Vec<String>,
}

pub struct ScriptedSource {
    first_page: Page,
    queued_first_pages: Mutex<VecDeque<Result<Page, SyncError>>>,
    later_pages: Mutex<HashMap<u32, Page>>,
    streams: Mutex<VecDeque<StreamScript>>,
    documents: Mutex<HashMap<String, Document>>,
    fetch_delay: Duration,
    calls: Mutex<Calls>,
}

impl ScriptedSource {
    pub fn new(first_page: Page) -> Self {
        Self {
            first_page,
            queued_first_pages: Mutex::new(VecDeque::new()),
            later_pages: Mutex::new(HashMap::new()),
            streams: Mutex::new(VecDeque::new()),
            documents: Mutex::new(HashMap::new()),
            fetch_delay: Duration::ZERO,
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn add_page(&self, page: Page) {
        self.later_pages.lock().insert(page.page, page);
    }

    /// Serve `page` for the next page-1 fetch only.
    pub fn push_first_page(&self, page: Page) {
        self.queued_first_pages.lock().push_back(Ok(page));
    }

    pub fn fail_next_page(&self, err: SyncError) {
        self.queued_first_pages.lock().push_back(Err(err));
    }

    pub fn script(&self, script: StreamScript) {
        self.streams.lock().push_back(script);
    }

    pub fn insert_document(&self, doc: Document) {
        self.documents.lock().insert(doc.id.clone(), doc);
    }

    pub fn page_fetches(&self) -> Vec<u32> {
        self.calls.lock().page_fetches.clone()
    }

    pub fn opened_from(&self) -> Vec<Option<Cursor>> {
        self.calls.lock().opened_from.clone()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.calls.lock().opened_at.clone()
    }

    pub fn document_fetches(&self) -> Vec<String> {
        self.calls.lock().document_fetches.clone()
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn fetch_page(&self, _key: &ListKey, page: u32) -> Result<Page, SyncError> {
        self.calls.lock().page_fetches.push(page);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if page == 1 {
            let queued = self.queued_first_pages.lock().pop_front();
            return queued.unwrap_or_else(|| Ok(self.first_page.clone()));
        }
        self.later_pages
            .lock()
            .get(&page)
            .cloned()
            .ok_or_else(|| SyncError::Upstream {
                status: 404,
                message: format!("page {} not scripted", page),
            })
    }

    async fn open_changes(
        &self,
        _key: &ListKey,
        after: Option<Cursor>,
    ) -> Result<ChangeStream, SyncError> {
        {
            let mut calls = self.calls.lock();
            calls.opened_from.push(after);
            calls.opened_at.push(Instant::now());
        }
        let script = self.streams.lock().pop_front();
        match script {
            None => Ok(stream::pending().boxed()),
            Some(StreamScript::Refuse(err)) => Err(err),
            Some(StreamScript::Frames { frames, hang: true }) => {
                Ok(stream::iter(frames).chain(stream::pending()).boxed())
            }
            Some(StreamScript::Frames { frames, hang: false }) => Ok(stream::iter(frames).boxed()),
        }
    }

    async fn fetch_document(
        &self,
        _workspace_id: &str,
        id: &str,
    ) -> Result<Option<Document>, SyncError> {
        self.calls.lock().document_fetches.push(id.to_string());
        Ok(self.documents.lock().get(id).cloned())
    }
}
