//! Saved view endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::errors::SyncError;
use crate::models::{ListKey, ListQuery};
use crate::session::SessionStatus;
use crate::store::{self, SavedView};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateViewRequest {
    pub name: String,
    #[serde(default)]
    pub query: ListQuery,
}

/// GET /api/views - Saved views of the workspace.
pub async fn list_views(State(state): State<AppState>) -> ApiResult<Vec<SavedView>> {
    let cursor = state.cursor().await;
    match store::saved_views(state.store.as_ref(), &state.workspace_id).await {
        Ok(views) => success(views, cursor),
        Err(e) => error(e, cursor),
    }
}

/// POST /api/views - Save a view.
pub async fn create_view(
    State(state): State<AppState>,
    Json(request): Json<CreateViewRequest>,
) -> ApiResult<SavedView> {
    let cursor = state.cursor().await;
    let view = SavedView::new(request.name.trim(), request.query);

    match store::save_view(state.store.as_ref(), &state.workspace_id, &view).await {
        Ok(()) => success(view, cursor),
        Err(e) => error(e, cursor),
    }
}

/// DELETE /api/views/:name - Delete a view.
pub async fn delete_view(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<()> {
    let cursor = state.cursor().await;
    match store::delete_view(state.store.as_ref(), &state.workspace_id, &name).await {
        Ok(true) => success((), cursor),
        Ok(false) => error(
            SyncError::NotFound(format!("View {} not found", name)),
            cursor,
        ),
        Err(e) => error(e, cursor),
    }
}

/// POST /api/views/:name/apply - Switch the list to a saved view.
pub async fn apply_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<SessionStatus> {
    let cursor = state.cursor().await;
    let views = match store::saved_views(state.store.as_ref(), &state.workspace_id).await {
        Ok(views) => views,
        Err(e) => return error(e, cursor),
    };
    let Some(view) = views.into_iter().find(|v| v.name == name.trim()) else {
        return error(SyncError::NotFound(format!("View {} not found", name)), cursor);
    };

    let page_size = match state.controller.session().await {
        Some(session) => session.key().page_size,
        None => DEFAULT_PAGE_SIZE,
    };
    let key = ListKey::new(state.workspace_id.clone(), view.query, page_size);
    match state.controller.set_key(key).await {
        Ok(session) => {
            let status = session.status();
            success(status, session.snapshot().known_cursor())
        }
        Err(e) => error(e, None),
    }
}
