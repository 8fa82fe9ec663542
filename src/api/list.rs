//! List API endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::errors::SyncError;
use crate::models::{ListKey, ListQuery};
use crate::overlay::ListEntry;
use crate::session::SessionStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPageResult {
    pub appended: bool,
    pub page_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQueryRequest {
    #[serde(default)]
    pub query: ListQuery,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub ids: Vec<String>,
}

/// GET /api/list - Visible rows: in-flight entries, then cached rows.
pub async fn get_list(State(state): State<AppState>) -> ApiResult<Vec<ListEntry>> {
    let session = match state.controller.require_session().await {
        Ok(session) => session,
        Err(e) => return error(e, None),
    };

    let entries = {
        let mut overlay = state.overlay.lock();
        session.visible(&mut overlay, state.uploads.as_ref(), state.notifier.as_ref())
    };
    success(entries, session.snapshot().known_cursor())
}

/// POST /api/list/next - Load the next page.
pub async fn fetch_next_page(State(state): State<AppState>) -> ApiResult<NextPageResult> {
    let session = match state.controller.require_session().await {
        Ok(session) => session,
        Err(e) => return error(e, None),
    };

    match session.fetch_next_page().await {
        Ok(appended) => {
            let snapshot = session.snapshot();
            success(
                NextPageResult {
                    appended,
                    page_count: snapshot.page_count(),
                },
                snapshot.known_cursor(),
            )
        }
        Err(e) => error(e, session.snapshot().known_cursor()),
    }
}

/// POST /api/list/refresh - Ask for a debounced page-1 refresh.
pub async fn request_refresh(State(state): State<AppState>) -> ApiResult<()> {
    match state.controller.require_session().await {
        Ok(session) => {
            session.request_refresh();
            success((), session.snapshot().known_cursor())
        }
        Err(e) => error(e, None),
    }
}

/// PUT /api/list/query - Switch filters, sort or page size.
pub async fn set_query(
    State(state): State<AppState>,
    Json(request): Json<SetQueryRequest>,
) -> ApiResult<SessionStatus> {
    let current = state.controller.session().await;
    let page_size = request
        .page_size
        .or_else(|| current.as_ref().map(|s| s.key().page_size))
        .unwrap_or(DEFAULT_PAGE_SIZE);

    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return error(
            SyncError::Validation(format!("pageSize must be between 1 and {}", MAX_PAGE_SIZE)),
            state.cursor().await,
        );
    }

    let key = ListKey::new(state.workspace_id.clone(), request.query, page_size);
    match state.controller.set_key(key).await {
        Ok(session) => {
            let status = session.status();
            success(status, session.snapshot().known_cursor())
        }
        Err(e) => error(e, None),
    }
}

/// POST /api/list/selection - Map selected ids to server ids.
pub async fn resolve_selection(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<Vec<String>> {
    let resolved = state.overlay.lock().resolve_selection(&request.ids);
    success(resolved, state.cursor().await)
}

/// GET /api/status - Cursor, paging and stream state.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<SessionStatus> {
    match state.controller.require_session().await {
        Ok(session) => {
            let status = session.status();
            success(status, session.snapshot().known_cursor())
        }
        Err(e) => error(e, None),
    }
}
