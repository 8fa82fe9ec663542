//! Typed list settings and saved views on top of [`KeyValueStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::KeyValueStore;
use crate::errors::SyncError;
use crate::models::{ListKey, ListQuery};

const LIST_SETTINGS_KEY: &str = "list_settings";
const VIEW_PREFIX: &str = "view:";

/// Display settings of the document list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListSettings {
    pub page_size: u32,
    #[serde(default)]
    pub query: ListQuery,
}

impl ListSettings {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            query: ListQuery::default(),
        }
    }

    pub fn to_key(&self, workspace_id: &str) -> ListKey {
        ListKey::new(workspace_id, self.query.clone(), self.page_size)
    }
}

/// A named filter/sort combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedView {
    pub name: String,
    pub query: ListQuery,
    pub created_at: DateTime<Utc>,
}

impl SavedView {
    pub fn new(name: impl Into<String>, query: ListQuery) -> Self {
        Self {
            name: name.into(),
            query,
            created_at: Utc::now(),
        }
    }
}

/// Saved settings; unreadable values are logged and treated as absent.
pub async fn load_list_settings(
    store: &dyn KeyValueStore,
    workspace_id: &str,
) -> Result<Option<ListSettings>, SyncError> {
    let Some(raw) = store.get(workspace_id, LIST_SETTINGS_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(Some(settings)),
        Err(err) => {
            tracing::warn!("Ignoring unreadable list settings for {}: {}", workspace_id, err);
            Ok(None)
        }
    }
}

pub async fn save_list_settings(
    store: &dyn KeyValueStore,
    workspace_id: &str,
    settings: &ListSettings,
) -> Result<(), SyncError> {
    let raw = serde_json::to_string(settings)?;
    store.set(workspace_id, LIST_SETTINGS_KEY, &raw).await
}

/// All saved views of a workspace, ordered by name.
pub async fn saved_views(
    store: &dyn KeyValueStore,
    workspace_id: &str,
) -> Result<Vec<SavedView>, SyncError> {
    let mut views = Vec::new();
    for key in store.keys(workspace_id, VIEW_PREFIX).await? {
        let Some(raw) = store.get(workspace_id, &key).await? else {
            continue;
        };
        match serde_json::from_str::<SavedView>(&raw) {
            Ok(view) => views.push(view),
            Err(err) => tracing::warn!("Skipping unreadable saved view {}: {}", key, err),
        }
    }
    views.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(views)
}

/// Store a view, replacing any view with the same name.
pub async fn save_view(
    store: &dyn KeyValueStore,
    workspace_id: &str,
    view: &SavedView,
) -> Result<(), SyncError> {
    let name = view.name.trim();
    if name.is_empty() {
        return Err(SyncError::Validation("saved view name must not be empty".into()));
    }
    let raw = serde_json::to_string(view)?;
    store
        .set(workspace_id, &format!("{}{}", VIEW_PREFIX, name), &raw)
        .await
}

pub async fn delete_view(
    store: &dyn KeyValueStore,
    workspace_id: &str,
    name: &str,
) -> Result<bool, SyncError> {
    store
        .delete(workspace_id, &format!("{}{}", VIEW_PREFIX, name.trim()))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, SortSpec};
    use crate::store::MemoryStore;

    fn ready_by_created() -> ListQuery {
        let mut query = ListQuery::default();
        query.criteria.statuses.insert(DocumentStatus::Ready);
        query.sort = SortSpec::parse("-created_at").unwrap();
        query
    }

    #[tokio::test]
    async fn test_list_settings_round_trip() {
        let store = MemoryStore::new();
        assert!(load_list_settings(&store, "ws").await.unwrap().is_none());

        let settings = ListSettings {
            page_size: 50,
            query: ready_by_created(),
        };
        save_list_settings(&store, "ws", &settings).await.unwrap();

        let loaded = load_list_settings(&store, "ws").await.unwrap().unwrap();
        assert_eq!(loaded, settings);
        let key = loaded.to_key("ws");
        assert_eq!(key.page_size, 50);
        assert_eq!(key.query, ready_by_created());
    }

    #[tokio::test]
    async fn test_unreadable_settings_are_ignored() {
        let store = MemoryStore::new();
        store.set("ws", LIST_SETTINGS_KEY, "{not json").await.unwrap();
        assert!(load_list_settings(&store, "ws").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_views() {
        let store = MemoryStore::new();
        save_view(&store, "ws", &SavedView::new("Ready", ready_by_created()))
            .await
            .unwrap();
        save_view(&store, "ws", &SavedView::new("All", ListQuery::default()))
            .await
            .unwrap();
        save_view(&store, "ws", &SavedView::new("Ready", ListQuery::default()))
            .await
            .unwrap();
        store.set("ws", "view:broken", "[]").await.unwrap();

        let views = saved_views(&store, "ws").await.unwrap();
        let names: Vec<&str> = views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["All", "Ready"]);
        assert_eq!(views[1].query, ListQuery::default());

        assert!(delete_view(&store, "ws", "All").await.unwrap());
        assert_eq!(saved_views(&store, "ws").await.unwrap().len(), 1);
        assert!(saved_views(&store, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_view_name_rejected() {
        let store = MemoryStore::new();
        let err = save_view(&store, "ws", &SavedView::new("  ", ListQuery::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
