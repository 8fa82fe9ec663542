//! Document service collaborators.
//!
//! The engine only sees these traits; `http` provides the production
//! implementation and tests use scripted fakes.

#[cfg(test)]
pub(crate) mod fake;
mod http;

pub use http::{HttpDocumentSource, API_KEY_HEADER};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::SyncError;
use crate::models::{ChangeFrame, Cursor, Document, ListKey, Page};

/// Live change feed. Dropping it aborts the underlying transport.
pub type ChangeStream = BoxStream<'static, Result<ChangeFrame, SyncError>>;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch one page (1-based) of the list identified by `key`.
    async fn fetch_page(&self, key: &ListKey, page: u32) -> Result<Page, SyncError>;

    /// Open the change feed after `after`.
    ///
    /// Fails with [`SyncError::CursorGone`] when `after` is older than the
    /// server's retained history.
    async fn open_changes(
        &self,
        key: &ListKey,
        after: Option<Cursor>,
    ) -> Result<ChangeStream, SyncError>;

    /// Fetch a single document, `None` if it does not exist.
    async fn fetch_document(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<Document>, SyncError>;
}
