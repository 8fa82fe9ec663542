//! Client-local placeholders for uploads and other uncommitted mutations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State reported by the uploader for one item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Uploading,
    Complete,
    Error,
}

/// Server confirmation attached to a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub document_id: String,
}

/// An item as reported by the uploader collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadItem {
    pub local_id: Uuid,
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    pub state: UploadState,
    /// 0.0 ..= 1.0
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub response: Option<UploadResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UploadItem {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            file_name: file_name.into(),
            file_type: None,
            state: UploadState::Pending,
            progress: 0.0,
            response: None,
            error: None,
        }
    }
}

/// Display status of an in-flight entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InFlightStatus {
    Queued,
    Processing,
    Failed,
}

impl From<UploadState> for InFlightStatus {
    fn from(state: UploadState) -> Self {
        match state {
            UploadState::Pending => InFlightStatus::Queued,
            UploadState::Uploading | UploadState::Complete => InFlightStatus::Processing,
            UploadState::Error => InFlightStatus::Failed,
        }
    }
}

/// A pseudo-row shown above server rows until the real row arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InFlightEntry {
    pub local_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub status: InFlightStatus,
    pub progress: f32,
    /// Set once the server confirms the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&UploadItem> for InFlightEntry {
    fn from(item: &UploadItem) -> Self {
        Self {
            local_id: item.local_id,
            name: item.file_name.clone(),
            file_type: item.file_type.clone(),
            status: item.state.into(),
            progress: item.progress.clamp(0.0, 1.0),
            server_id: item.response.as_ref().map(|r| r.document_id.clone()),
            error: item.error.clone(),
        }
    }
}
