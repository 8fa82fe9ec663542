//! Inspection API module.
//!
//! Exposes the reconciled list state over HTTP. Every response carries the
//! cache's known change cursor so callers can tell how fresh it is.

mod documents;
mod list;
mod uploads;
mod views;

pub use documents::*;
pub use list::*;
pub use uploads::*;
pub use views::*;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::{SyncError, SyncErrorWithCursor};
use crate::models::Cursor;
use crate::overlay::{InFlightOverlay, Notifier, SharedUploads};
use crate::session::ListController;
use crate::store::KeyValueStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub workspace_id: String,
    pub controller: Arc<ListController>,
    pub store: Arc<dyn KeyValueStore>,
    pub uploads: Arc<SharedUploads>,
    pub overlay: Arc<Mutex<InFlightOverlay>>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        workspace_id: impl Into<String>,
        controller: Arc<ListController>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            controller,
            store,
            uploads: Arc::new(SharedUploads::new()),
            overlay: Arc::new(Mutex::new(InFlightOverlay::new())),
            notifier,
        }
    }

    /// Known cursor of the active cache, if any.
    pub async fn cursor(&self) -> Option<Cursor> {
        let session = self.controller.session().await?;
        session.snapshot().known_cursor()
    }
}

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub cursor: Option<Cursor>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, cursor: Option<Cursor>) -> Self {
        Self {
            success: true,
            data,
            cursor,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, SyncErrorWithCursor>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, cursor: Option<Cursor>) -> ApiResult<T> {
    Ok(ApiResponse::new(data, cursor))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: SyncError, cursor: Option<Cursor>) -> ApiResult<T> {
    Err(SyncErrorWithCursor { error: err, cursor })
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // List
        .route("/list", get(list::get_list))
        .route("/list/next", post(list::fetch_next_page))
        .route("/list/refresh", post(list::request_refresh))
        .route("/list/query", put(list::set_query))
        .route("/list/selection", post(list::resolve_selection))
        .route("/status", get(list::get_status))
        // Documents
        .route("/documents/{id}", get(documents::get_document))
        // Uploads
        .route("/uploads", get(uploads::list_uploads))
        .route("/uploads", post(uploads::report_upload))
        .route("/uploads/{local_id}", delete(uploads::remove_upload))
        // Saved views
        .route("/views", get(views::list_views))
        .route("/views", post(views::create_view))
        .route("/views/{name}", delete(views::delete_view))
        .route("/views/{name}/apply", post(views::apply_view));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
