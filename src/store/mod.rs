//! Local persistence for list settings and saved views.
//!
//! Everything is a string value under a key, scoped per workspace. Typed
//! helpers in [`settings`] store JSON on top of that.

mod settings;
mod sqlite;

pub use settings::*;
pub use sqlite::{init_database, SqliteStore};

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::SyncError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, workspace_id: &str, key: &str) -> Result<Option<String>, SyncError>;

    async fn set(&self, workspace_id: &str, key: &str, value: &str) -> Result<(), SyncError>;

    /// Returns whether a value was removed.
    async fn delete(&self, workspace_id: &str, key: &str) -> Result<bool, SyncError>;

    /// Keys of one workspace starting with `prefix`, in key order.
    async fn keys(&self, workspace_id: &str, prefix: &str) -> Result<Vec<String>, SyncError>;
}

/// In-memory store, used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, workspace_id: &str, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self
            .entries
            .read()
            .get(&(workspace_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, workspace_id: &str, key: &str, value: &str) -> Result<(), SyncError> {
        self.entries
            .write()
            .insert((workspace_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, workspace_id: &str, key: &str) -> Result<bool, SyncError> {
        Ok(self
            .entries
            .write()
            .remove(&(workspace_id.to_string(), key.to_string()))
            .is_some())
    }

    async fn keys(&self, workspace_id: &str, prefix: &str) -> Result<Vec<String>, SyncError> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|(ws, key)| ws == workspace_id && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}
