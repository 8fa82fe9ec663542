//! Filter, search and sort criteria for one list view.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::DocumentStatus;

/// Assignee filter value selecting documents with no assignee.
pub const UNASSIGNED: &str = "__unassigned__";

/// Search terms shorter than this (after trimming) are ignored.
pub const MIN_SEARCH_LEN: usize = 2;

/// How the selected tags are combined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagMatchMode {
    #[default]
    Any,
    All,
}

/// Filter criteria. Empty sets mean "no constraint".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct FilterCriteria {
    #[serde(default)]
    pub statuses: BTreeSet<DocumentStatus>,
    #[serde(default)]
    pub file_types: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub tag_mode: TagMatchMode,
    /// Assignee ids, optionally including [`UNASSIGNED`]
    #[serde(default)]
    pub assignees: BTreeSet<String>,
    #[serde(default)]
    pub search: String,
}

impl FilterCriteria {
    /// The search term in effect, if it is long enough to apply.
    pub fn effective_search(&self) -> Option<&str> {
        let term = self.search.trim();
        (term.chars().count() >= MIN_SEARCH_LEN).then_some(term)
    }

    /// Query parameters for the paginated list endpoint.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for status in &self.statuses {
            pairs.push(("status".to_string(), status.as_str().to_string()));
        }
        for file_type in &self.file_types {
            pairs.push(("file_type".to_string(), file_type.clone()));
        }
        for tag in &self.tags {
            pairs.push(("tag".to_string(), tag.clone()));
        }
        if !self.tags.is_empty() {
            let mode = match self.tag_mode {
                TagMatchMode::Any => "any",
                TagMatchMode::All => "all",
            };
            pairs.push(("tag_mode".to_string(), mode.to_string()));
        }
        for assignee in &self.assignees {
            pairs.push(("assignee".to_string(), assignee.clone()));
        }
        if let Some(term) = self.effective_search() {
            pairs.push(("search".to_string(), term.to_string()));
        }
        pairs
    }
}

/// Sortable list fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SortField {
    /// Activity/update timestamp
    ActivityAt,
    CreatedAt,
    /// Display status
    Status,
    /// Any other server-side field; never reorder-sensitive locally
    Other(String),
}

impl SortField {
    pub fn as_str(&self) -> &str {
        match self {
            SortField::ActivityAt => "activity_at",
            SortField::CreatedAt => "created_at",
            SortField::Status => "status",
            SortField::Other(name) => name,
        }
    }

    fn parse(name: &str) -> Self {
        match name {
            "activity_at" | "updated_at" => SortField::ActivityAt,
            "created_at" => SortField::CreatedAt,
            "status" => SortField::Status,
            other => SortField::Other(other.to_string()),
        }
    }
}

/// A single sort field with direction; written `-field` for descending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (descending, name) = match spec.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            field: SortField::parse(name),
            descending,
        })
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::ActivityAt,
            descending: true,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field.as_str())
        } else {
            write!(f, "{}", self.field.as_str())
        }
    }
}

impl TryFrom<String> for SortSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SortSpec::parse(&value).ok_or_else(|| format!("invalid sort spec '{}'", value))
    }
}

impl From<SortSpec> for String {
    fn from(spec: SortSpec) -> Self {
        spec.to_string()
    }
}

/// Criteria that shape one list materialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub sort: SortSpec,
}

/// Identity of a cache: changing any part invalidates all sync state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub workspace_id: String,
    pub query: ListQuery,
    pub page_size: u32,
}

impl ListKey {
    pub fn new(workspace_id: impl Into<String>, query: ListQuery, page_size: u32) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            query,
            page_size,
        }
    }
}
