//! Document API endpoints.

use axum::extract::{Path, State};

use super::{error, success, ApiResult};
use crate::errors::SyncError;
use crate::models::Document;
use crate::AppState;

/// GET /api/documents/:id - Detail read through the caches.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let session = match state.controller.require_session().await {
        Ok(session) => session,
        Err(e) => return error(e, None),
    };
    let cursor = session.snapshot().known_cursor();

    match session.document(&id).await {
        Ok(Some(doc)) => success(doc, cursor),
        Ok(None) => error(
            SyncError::NotFound(format!("Document {} not found", id)),
            cursor,
        ),
        Err(e) => error(e, cursor),
    }
}
