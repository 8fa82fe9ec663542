//! Upload progress endpoints fed by the uploader.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use super::{error, success, ApiResult};
use crate::errors::SyncError;
use crate::models::UploadItem;
use crate::overlay::UploadTracker;
use crate::AppState;

/// GET /api/uploads - Items as last reported.
pub async fn list_uploads(State(state): State<AppState>) -> ApiResult<Vec<UploadItem>> {
    success(state.uploads.items(), state.cursor().await)
}

/// POST /api/uploads - Report the state of one upload.
pub async fn report_upload(
    State(state): State<AppState>,
    Json(item): Json<UploadItem>,
) -> ApiResult<UploadItem> {
    if item.file_name.trim().is_empty() {
        return error(
            SyncError::Validation("file_name is required".to_string()),
            state.cursor().await,
        );
    }

    state.uploads.report(item.clone());
    success(item, state.cursor().await)
}

/// DELETE /api/uploads/:local_id - Forget an upload.
pub async fn remove_upload(
    State(state): State<AppState>,
    Path(local_id): Path<Uuid>,
) -> ApiResult<()> {
    let cursor = state.cursor().await;
    if state.uploads.remove(local_id) {
        success((), cursor)
    } else {
        error(
            SyncError::NotFound(format!("Upload {} not found", local_id)),
            cursor,
        )
    }
}
