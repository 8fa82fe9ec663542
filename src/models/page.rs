//! Paginated list response model.

use serde::{Deserialize, Serialize};

use super::{Cursor, Document};

/// One fetched page of the list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub has_previous: bool,
    /// Feed position as of when this page was fetched
    #[serde(default)]
    pub changes_cursor: Option<Cursor>,
    #[serde(default)]
    pub items: Vec<Document>,
}

impl Page {
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|row| row.id == id)
    }
}
