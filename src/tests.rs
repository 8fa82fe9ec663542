//! Integration tests: a fake document service over real HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::config::SyncTuning;
use crate::errors::SyncError;
use crate::models::fixtures::{doc, ts};
use crate::models::{ChangeEvent, Cursor, Document, DocumentStatus, ListKey, ListQuery, Page};
use crate::overlay::LogNotifier;
use crate::session::{ListController, ListSession};
use crate::source::{DocumentSource, HttpDocumentSource};
use crate::store::MemoryStore;
use crate::stream::{BackoffPolicy, StreamState};
use crate::{create_router, AppState};

const WORKSPACE: &str = "ws-1";

#[derive(Default)]
struct Feed {
    cursor: u64,
    /// Oldest cursor a client may resume after
    floor: u64,
    log: Vec<(u64, String)>,
}

struct ServiceState {
    docs: Mutex<Vec<Document>>,
    feed: Mutex<Feed>,
    live: Mutex<broadcast::Sender<String>>,
    page_queries: Mutex<Vec<Vec<(String, String)>>>,
}

/// In-process document service with an NDJSON change feed.
struct FakeService {
    state: Arc<ServiceState>,
    base_url: String,
}

impl FakeService {
    async fn start(ids: &[&str]) -> Self {
        let state = Arc::new(ServiceState {
            docs: Mutex::new(ids.iter().map(|id| doc(id)).collect()),
            feed: Mutex::new(Feed {
                cursor: 3,
                ..Feed::default()
            }),
            live: Mutex::new(broadcast::channel(256).0),
            page_queries: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/workspaces/{ws}/documents", get(list_documents))
            .route("/api/workspaces/{ws}/documents/changes", get(changes))
            .route("/api/workspaces/{ws}/documents/{id}", get(get_document))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeService {
            state,
            base_url: format!("http://{}", addr),
        }
    }

    fn source(&self) -> Arc<HttpDocumentSource> {
        Arc::new(HttpDocumentSource::new(&self.base_url, Some("test-key")).expect("client"))
    }

    fn publish(&self, line: String) -> u64 {
        let mut feed = self.state.feed.lock();
        let cursor = feed.cursor;
        feed.log.push((cursor, line.clone()));
        let _ = self.state.live.lock().send(line);
        cursor
    }

    fn next_cursor(&self) -> Cursor {
        let mut feed = self.state.feed.lock();
        feed.cursor += 1;
        Cursor::new(feed.cursor)
    }

    /// Store `row` (new rows go first) and announce it.
    fn upsert(&self, row: Document) -> u64 {
        {
            let mut docs = self.state.docs.lock();
            match docs.iter_mut().find(|d| d.id == row.id) {
                Some(existing) => *existing = row.clone(),
                None => docs.insert(0, row.clone()),
            }
        }
        let event = ChangeEvent::upsert(self.next_cursor(), row);
        self.publish(serde_json::to_string(&event).unwrap())
    }

    fn delete(&self, id: &str) -> u64 {
        self.state.docs.lock().retain(|d| d.id != id);
        let event = ChangeEvent::deleted(self.next_cursor(), id, ts(50));
        self.publish(serde_json::to_string(&event).unwrap())
    }

    /// Announce an arbitrary JSON line under the next cursor.
    fn publish_raw(&self, mut value: Value) -> u64 {
        value["cursor"] = json!(self.next_cursor().as_u64());
        self.publish(value.to_string())
    }

    /// Change documents without telling the feed.
    fn mutate_silently(&self, row: Document) {
        self.state.docs.lock().insert(0, row);
    }

    /// Drop history below the current cursor and close open streams.
    fn expire_history(&self) {
        {
            let mut feed = self.state.feed.lock();
            feed.cursor += 10;
            feed.floor = feed.cursor;
            feed.log.clear();
        }
        *self.state.live.lock() = broadcast::channel(256).0;
    }

    fn open_streams(&self) -> usize {
        self.state.live.lock().receiver_count()
    }

    fn page_queries(&self) -> Vec<Vec<(String, String)>> {
        self.state.page_queries.lock().clone()
    }
}

async fn list_documents(
    State(state): State<Arc<ServiceState>>,
    Path(_ws): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Page> {
    state.page_queries.lock().push(params.clone());
    let param = |name: &str| params.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    let page: u32 = param("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let page_size: u32 = param("page_size").and_then(|v| v.parse().ok()).unwrap_or(25);
    let statuses: Vec<DocumentStatus> = params
        .iter()
        .filter(|(k, _)| k == "status")
        .filter_map(|(_, v)| DocumentStatus::parse(v))
        .collect();

    let rows: Vec<Document> = state
        .docs
        .lock()
        .iter()
        .filter(|d| statuses.is_empty() || statuses.contains(&d.status))
        .cloned()
        .collect();
    let start = ((page - 1) * page_size) as usize;
    let items: Vec<Document> = rows.iter().skip(start).take(page_size as usize).cloned().collect();

    Json(Page {
        page,
        page_size,
        has_next: rows.len() > start + items.len(),
        has_previous: page > 1,
        changes_cursor: Some(Cursor::new(state.feed.lock().cursor)),
        items,
    })
}

async fn changes(
    State(state): State<Arc<ServiceState>>,
    Path(_ws): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let after: Option<u64> = params.get("after").and_then(|v| v.parse().ok());
    let rx = state.live.lock().subscribe();
    let backlog: Vec<String> = {
        let feed = state.feed.lock();
        if after.is_some_and(|a| a < feed.floor) {
            return (StatusCode::GONE, "cursor expired").into_response();
        }
        feed.log
            .iter()
            .filter(|(c, _)| after.map_or(true, |a| *c > a))
            .map(|(_, line)| format!("{}\n", line))
            .collect()
    };

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => return Some((format!("{}\n", line), rx)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });
    let body = stream::iter(backlog).chain(live).map(Ok::<_, std::io::Error>);
    Body::from_stream(body).into_response()
}

async fn get_document(
    State(state): State<Arc<ServiceState>>,
    Path((_ws, id)): Path<(String, String)>,
) -> Response {
    match state.docs.lock().iter().find(|d| d.id == id) {
        Some(found) => Json(found.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn fast_tuning() -> SyncTuning {
    SyncTuning {
        coalesce_window: Duration::from_millis(20),
        refresh_debounce: Duration::from_millis(50),
        backoff: BackoffPolicy {
            base: Duration::from_millis(50),
            max: Duration::from_millis(200),
            max_exponent: 5,
            jitter_ratio: 0.15,
        },
    }
}

fn key() -> ListKey {
    ListKey::new(WORKSPACE, ListQuery::default(), 25)
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn start_session(service: &FakeService) -> ListSession {
    let session = ListSession::start(service.source(), key(), &fast_tuning(), Default::default())
        .await
        .expect("session start");
    eventually("stream to open", || service.open_streams() >= 1).await;
    session
}

fn row_ids(session: &ListSession) -> Vec<String> {
    session.snapshot().rows().map(|r| r.id.clone()).collect()
}

#[tokio::test]
async fn test_session_follows_live_changes() {
    let service = FakeService::start(&["a", "b", "c"]).await;
    let session = start_session(&service).await;
    assert_eq!(row_ids(&session), vec!["a", "b", "c"]);
    assert_eq!(session.snapshot().known_cursor(), Some(Cursor::new(3)));

    let mut renamed = doc("b");
    renamed.name = "Budget 2025.pdf".to_string();
    service.upsert(renamed);
    eventually("rename to land", || {
        session.snapshot().get("b").map(|d| d.name.as_str()) == Some("Budget 2025.pdf")
    })
    .await;
    assert_eq!(row_ids(&session), vec!["a", "b", "c"]);

    service.delete("a");
    eventually("delete to land", || !session.snapshot().contains("a")).await;

    let mut fresh = doc("fresh");
    fresh.activity_at = ts(100);
    service.upsert(fresh);
    eventually("refresh to pull new row", || session.snapshot().contains("fresh")).await;
    assert_eq!(row_ids(&session), vec!["fresh", "b", "c"]);
    assert_eq!(session.status().refreshes, 1);

    session.shutdown();
}

#[tokio::test]
async fn test_unusable_lines_do_not_stop_the_stream() {
    let service = FakeService::start(&["a"]).await;
    let session = start_session(&service).await;

    service.publish_raw(json!({"type": "renamed", "occurred_at": ts(1)}));
    service.publish_raw(json!({"type": "deleted", "occurred_at": ts(1)}));
    let mut renamed = doc("a");
    renamed.name = "after-noise.pdf".to_string();
    service.upsert(renamed);

    eventually("valid change after noise", || {
        session.snapshot().get("a").map(|d| d.name.as_str()) == Some("after-noise.pdf")
    })
    .await;
    assert_eq!(session.stream_state(), StreamState::Streaming);
    session.shutdown();
}

#[tokio::test]
async fn test_expired_cursor_triggers_resync() {
    let service = FakeService::start(&["a", "b"]).await;
    let session = start_session(&service).await;

    service.mutate_silently(doc("missed"));
    service.expire_history();

    eventually("resync to load missed row", || session.snapshot().contains("missed")).await;
    assert_eq!(row_ids(&session), vec!["missed", "a", "b"]);
    assert_eq!(session.snapshot().known_cursor(), Some(Cursor::new(13)));

    eventually("stream to reopen", || service.open_streams() >= 1).await;
    let mut renamed = doc("missed");
    renamed.name = "found.pdf".to_string();
    service.upsert(renamed);
    eventually("live change after resync", || {
        session.snapshot().get("missed").map(|d| d.name.as_str()) == Some("found.pdf")
    })
    .await;
    session.shutdown();
}

#[tokio::test]
async fn test_http_source_contract() {
    let service = FakeService::start(&["a", "b"]).await;
    let source = service.source();
    let mut ready_only = key();
    ready_only.query.criteria.statuses.insert(DocumentStatus::Ready);

    let page = source.fetch_page(&ready_only, 1).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.changes_cursor, Some(Cursor::new(3)));
    let query = service.page_queries().pop().unwrap();
    assert!(query.contains(&("status".to_string(), "ready".to_string())));
    assert!(query.contains(&("sort".to_string(), "-activity_at".to_string())));

    assert_eq!(source.fetch_document(WORKSPACE, "a").await.unwrap().unwrap().id, "a");
    assert!(source.fetch_document(WORKSPACE, "nope").await.unwrap().is_none());

    service.expire_history();
    let err = source.open_changes(&key(), Some(Cursor::new(3))).await.err().unwrap();
    assert!(err.is_cursor_gone());
    assert!(source.open_changes(&key(), Some(Cursor::new(13))).await.is_ok());
}

/// Inspection API in front of a controller bound to the fake service.
struct ApiFixture {
    service: FakeService,
    client: Client,
    base_url: String,
}

impl ApiFixture {
    async fn new(activate: bool) -> Self {
        let service = FakeService::start(&["a", "b"]).await;
        let controller = Arc::new(ListController::new(service.source(), fast_tuning()));
        if activate {
            controller.set_key(key()).await.expect("initial key");
        }
        let state = AppState::new(
            WORKSPACE,
            controller,
            Arc::new(MemoryStore::new()),
            Arc::new(LogNotifier),
        );
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        ApiFixture {
            service,
            client: Client::new(),
            base_url: format!("http://{}", addr),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = ApiFixture::new(false).await;

    let resp = fixture.client.get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_api_not_ready_without_session() {
    let fixture = ApiFixture::new(false).await;

    let (status, body) = fixture.get("/api/list").await;
    assert_eq!(status, 503);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_READY");
}

#[tokio::test]
async fn test_api_list_and_documents() {
    let fixture = ApiFixture::new(true).await;

    let (status, body) = fixture.get("/api/list").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["cursor"], 3);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["kind"], "document");
    assert_eq!(data[0]["id"], "a");

    fixture.service.mutate_silently(doc("remote"));
    let (status, body) = fixture.get("/api/documents/remote").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["id"], "remote");

    let (status, body) = fixture.get("/api/documents/ghost").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["cursor"], 3);
}

#[tokio::test]
async fn test_api_status_and_query_switch() {
    let fixture = ApiFixture::new(true).await;
    eventually("stream to open", || fixture.service.open_streams() >= 1).await;

    let (status, body) = fixture.get("/api/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["workspaceId"], WORKSPACE);
    assert_eq!(body["data"]["rowCount"], 2);
    assert_eq!(body["data"]["stream"]["state"], "streaming");

    let (status, body) = fixture
        .send(
            reqwest::Method::PUT,
            "/api/list/query",
            json!({"query": {"criteria": {"statuses": ["failed"]}}, "pageSize": 10}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["pageSize"], 10);
    assert_eq!(body["data"]["rowCount"], 0);

    let (status, body) = fixture
        .send(reqwest::Method::PUT, "/api/list/query", json!({"pageSize": 0}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_api_uploads_overlay_the_list() {
    let fixture = ApiFixture::new(true).await;
    let local_id = uuid::Uuid::new_v4();

    let (status, _) = fixture
        .send(
            reqwest::Method::POST,
            "/api/uploads",
            json!({"local_id": local_id, "file_name": "scan.pdf", "state": "uploading", "progress": 0.4}),
        )
        .await;
    assert_eq!(status, 200);

    let (_, body) = fixture.get("/api/list").await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["kind"], "in_flight");
    assert_eq!(data[0]["status"], "processing");

    let (_, body) = fixture
        .send(
            reqwest::Method::POST,
            "/api/list/selection",
            json!({"ids": [local_id.to_string()]}),
        )
        .await;
    assert_eq!(body["data"][0], local_id.to_string());

    // server confirms; the row is already cached so the entry drops out
    fixture
        .send(
            reqwest::Method::POST,
            "/api/uploads",
            json!({
                "local_id": local_id,
                "file_name": "scan.pdf",
                "state": "complete",
                "progress": 1.0,
                "response": {"document_id": "b"}
            }),
        )
        .await;
    let (_, body) = fixture.get("/api/list").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = fixture
        .send(
            reqwest::Method::POST,
            "/api/list/selection",
            json!({"ids": [local_id.to_string()]}),
        )
        .await;
    assert_eq!(body["data"][0], "b");
}

#[tokio::test]
async fn test_api_saved_views() {
    let fixture = ApiFixture::new(true).await;

    let (status, _) = fixture
        .send(
            reqwest::Method::POST,
            "/api/views",
            json!({"name": "Failed", "query": {"criteria": {"statuses": ["failed"]}}}),
        )
        .await;
    assert_eq!(status, 200);

    let (_, body) = fixture.get("/api/views").await;
    assert_eq!(body["data"][0]["name"], "Failed");

    let (status, body) = fixture
        .send(reqwest::Method::POST, "/api/views/Failed/apply", json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["rowCount"], 0);

    let (status, body) = fixture
        .send(reqwest::Method::POST, "/api/views/Missing/apply", json!({}))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_failed_start_reports_transport_error() {
    let source = Arc::new(HttpDocumentSource::new("http://127.0.0.1:9", None).unwrap());
    let err = ListSession::start(source, key(), &fast_tuning(), Default::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::Transport(_)));
}
