//! Applies one change event to a page cache.
//!
//! Rows are replaced or removed in place, never inserted or moved: the
//! server owns pagination offsets, so anything that would require a new
//! position is reported through `refresh_needed` instead.

use std::sync::Arc;

use crate::cache::PageCache;
use crate::models::{ChangeEvent, ChangeKind, ListQuery};
use crate::predicate::{matches, reorder_key};

/// Result of merging a single change.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Same `Arc` as the input when nothing was applied
    pub cache: Arc<PageCache>,
    pub applied: bool,
    pub refresh_needed: bool,
}

impl MergeOutcome {
    fn unchanged(cache: &Arc<PageCache>, refresh_needed: bool) -> Self {
        Self {
            cache: Arc::clone(cache),
            applied: false,
            refresh_needed,
        }
    }

    fn applied(cache: PageCache, refresh_needed: bool) -> Self {
        Self {
            cache: Arc::new(cache),
            applied: true,
            refresh_needed,
        }
    }
}

/// Merge `change` into `cache` under the active `query`.
///
/// An upsert whose row equals the cached row reports `applied == false`
/// and hands back the same `Arc`, so a redelivered event never costs a
/// cache write.
pub fn merge_change(cache: &Arc<PageCache>, change: &ChangeEvent, query: &ListQuery) -> MergeOutcome {
    let Some(target_id) = change.target_id() else {
        return MergeOutcome::unchanged(cache, false);
    };
    let location = cache.find(target_id);

    match (change.kind, location) {
        (ChangeKind::Deleted, Some((pi, ri))) => {
            MergeOutcome::applied(cache.with_row_removed(pi, ri), false)
        }
        (ChangeKind::Deleted, None) => MergeOutcome::unchanged(cache, false),
        (ChangeKind::Upsert, location) => {
            let Some(row) = change.row.as_ref() else {
                return MergeOutcome::unchanged(cache, false);
            };
            let still_matches = matches(row, &query.criteria);

            match location {
                Some((pi, ri)) if !still_matches => {
                    tracing::debug!(id = target_id, "row left the filtered view");
                    MergeOutcome::applied(cache.with_row_removed(pi, ri), true)
                }
                Some((pi, ri)) => {
                    let current = &cache.pages()[pi].items[ri];
                    if current == row {
                        return MergeOutcome::unchanged(cache, false);
                    }
                    let reordered =
                        reorder_key(current, &query.sort) != reorder_key(row, &query.sort);
                    MergeOutcome::applied(cache.with_row_replaced(pi, ri, row.clone()), reordered)
                }
                None => MergeOutcome::unchanged(cache, still_matches),
            }
        }
    }
}
