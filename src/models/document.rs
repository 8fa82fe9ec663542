//! Document row model as materialized in list pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document as shown in the list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Position of the status when the list is sorted by display status.
    ///
    /// Failures sort first so they surface at the top of an ascending list.
    pub fn display_rank(&self) -> u8 {
        match self {
            DocumentStatus::Failed => 0,
            DocumentStatus::Pending => 1,
            DocumentStatus::Processing => 2,
            DocumentStatus::Ready => 3,
        }
    }
}

/// A document record as known to the list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Short file type key, e.g. `pdf`
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type_label: Option<String>,
    /// Display label of the uploader/owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_label: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last activity (update) timestamp
    pub activity_at: DateTime<Utc>,
}

impl Document {
    /// Label used for file-type filters and search, falling back to the key.
    pub fn file_type_display(&self) -> &str {
        self.file_type_label.as_deref().unwrap_or(&self.file_type)
    }
}
