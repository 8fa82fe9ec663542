//! Change feed entries and their cursors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Document;
use crate::errors::SyncError;

/// Position in the change feed. Strictly increasing per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of change carried by a feed entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upsert,
    Deleted,
}

/// A single change feed entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub cursor: Cursor,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    /// Advisory only; cursors are the ordering authority
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn upsert(cursor: Cursor, row: Document) -> Self {
        Self {
            cursor,
            kind: ChangeKind::Upsert,
            occurred_at: row.activity_at,
            row_id: None,
            row: Some(row),
        }
    }

    pub fn deleted(cursor: Cursor, row_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            cursor,
            kind: ChangeKind::Deleted,
            row: None,
            row_id: Some(row_id.into()),
            occurred_at,
        }
    }

    /// The id this change targets: `row_id`, else the row's own id.
    pub fn target_id(&self) -> Option<&str> {
        self.row_id
            .as_deref()
            .or_else(|| self.row.as_ref().map(|row| row.id.as_str()))
            .filter(|id| !id.is_empty())
    }
}

/// One decoded line of the change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeFrame {
    Event(ChangeEvent),
    /// Well-formed JSON that is not a usable change; skipped.
    Ignored { cursor: Option<Cursor>, reason: String },
}

impl ChangeFrame {
    /// Decode one NDJSON line.
    ///
    /// Broken JSON is an error (the stream itself is damaged); a valid JSON
    /// object with an unknown `type` or no resolvable id is `Ignored`.
    pub fn decode(line: &str) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_str(line)?;
        let cursor = value
            .get("cursor")
            .and_then(Value::as_u64)
            .map(Cursor::new);

        let event = match serde_json::from_value::<ChangeEvent>(value) {
            Ok(event) => event,
            Err(err) => {
                return Ok(ChangeFrame::Ignored {
                    cursor,
                    reason: err.to_string(),
                })
            }
        };

        if event.target_id().is_none() {
            return Ok(ChangeFrame::Ignored {
                cursor,
                reason: "change has no row id".to_string(),
            });
        }
        if event.kind == ChangeKind::Upsert && event.row.is_none() {
            return Ok(ChangeFrame::Ignored {
                cursor,
                reason: "upsert without row payload".to_string(),
            });
        }

        Ok(ChangeFrame::Event(event))
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match self {
            ChangeFrame::Event(event) => Some(event.cursor),
            ChangeFrame::Ignored { cursor, .. } => *cursor,
        }
    }
}
