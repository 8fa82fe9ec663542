//! Local re-evaluation of filter membership and sort position for one row.
//!
//! Mirrors the server query closely enough to decide whether a changed row
//! belongs in the current view. Never used to re-sort a page.

use chrono::{DateTime, Utc};

use crate::models::{Document, FilterCriteria, SortField, SortSpec, TagMatchMode, UNASSIGNED};

/// The part of a row the active sort depends on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReorderKey {
    /// Sort field is not tracked locally
    Unrelated,
    Timestamp(DateTime<Utc>),
    StatusRank(u8),
}

/// Whether `row` belongs in a view filtered by `criteria`.
pub fn matches(row: &Document, criteria: &FilterCriteria) -> bool {
    if !criteria.statuses.is_empty() && !criteria.statuses.contains(&row.status) {
        return false;
    }

    if !criteria.file_types.is_empty()
        && !criteria
            .file_types
            .iter()
            .any(|ft| ft.eq_ignore_ascii_case(&row.file_type))
    {
        return false;
    }

    if !criteria.tags.is_empty() {
        let has = |tag: &String| row.tags.iter().any(|t| t == tag);
        let ok = match criteria.tag_mode {
            TagMatchMode::Any => criteria.tags.iter().any(has),
            TagMatchMode::All => criteria.tags.iter().all(has),
        };
        if !ok {
            return false;
        }
    }

    if !criteria.assignees.is_empty() {
        let ok = match row.assignee_id.as_deref() {
            Some(id) => criteria.assignees.contains(id),
            None => criteria.assignees.contains(UNASSIGNED),
        };
        if !ok {
            return false;
        }
    }

    match criteria.effective_search() {
        Some(term) => search_haystack(row).contains(&term.to_lowercase()),
        None => true,
    }
}

/// Extract the value the active sort orders by.
pub fn reorder_key(row: &Document, sort: &SortSpec) -> ReorderKey {
    match sort.field {
        SortField::ActivityAt => ReorderKey::Timestamp(row.activity_at),
        SortField::CreatedAt => ReorderKey::Timestamp(row.created_at),
        SortField::Status => ReorderKey::StatusRank(row.status.display_rank()),
        SortField::Other(_) => ReorderKey::Unrelated,
    }
}

/// Lowercased text searched by the free-text filter.
fn search_haystack(row: &Document) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(3 + row.tags.len());
    parts.push(&row.name);
    if let Some(label) = row.uploader_label.as_deref() {
        parts.push(label);
    }
    parts.extend(row.tags.iter().map(String::as_str));
    parts.push(row.file_type_display());
    parts.join(" ").to_lowercase()
}
