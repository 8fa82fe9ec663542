//! HTTP implementation of the document service collaborator.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use super::{ChangeStream, DocumentSource};
use crate::errors::SyncError;
use crate::models::{ChangeFrame, Cursor, Document, ListKey, Page};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Longest change line accepted from the feed.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Talks to the document service REST endpoints.
#[derive(Clone)]
pub struct HttpDocumentSource {
    client: Client,
    base_url: String,
}

impl HttpDocumentSource {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, SyncError> {
        let mut builder = Client::builder();
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = key
                .parse()
                .map_err(|_| SyncError::Config("API key is not a valid header value".to_string()))?;
            headers.insert(API_KEY_HEADER, value);
            builder = builder.default_headers(headers);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn documents_url(&self, workspace_id: &str) -> String {
        format!("{}/api/workspaces/{}/documents", self.base_url, workspace_id)
    }
}

/// Turn a non-success response into an error.
async fn check(resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(SyncError::Upstream {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch_page(&self, key: &ListKey, page: u32) -> Result<Page, SyncError> {
        let mut params = key.query.criteria.to_query_pairs();
        params.push(("page".to_string(), page.to_string()));
        params.push(("page_size".to_string(), key.page_size.to_string()));
        params.push(("sort".to_string(), key.query.sort.to_string()));

        let resp = self
            .client
            .get(self.documents_url(&key.workspace_id))
            .query(&params)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn open_changes(
        &self,
        key: &ListKey,
        after: Option<Cursor>,
    ) -> Result<ChangeStream, SyncError> {
        let mut request = self
            .client
            .get(format!("{}/changes", self.documents_url(&key.workspace_id)));
        if let Some(cursor) = after {
            request = request.query(&[("after", cursor.as_u64())]);
        }

        let resp = request.send().await?;
        if resp.status() == StatusCode::GONE {
            return Err(SyncError::CursorGone { cursor: after });
        }
        let resp = check(resp).await?;

        let body = resp
            .bytes_stream()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );

        let frames = lines
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
            .map(|line| ChangeFrame::decode(&line?));
        Ok(frames.boxed())
    }

    async fn fetch_document(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<Document>, SyncError> {
        let resp = self
            .client
            .get(format!("{}/{}", self.documents_url(workspace_id), id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(resp).await?.json().await?))
    }
}
