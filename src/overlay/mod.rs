//! In-flight entry overlay.
//!
//! Uploads and other uncommitted mutations are shown as pseudo-rows above
//! the server rows until the real row shows up in the page cache. The
//! overlay never enters cursor space: it is recomputed from the uploader's
//! reported items whenever the visible list is composed.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::PageCache;
use crate::models::{Document, InFlightEntry, InFlightStatus, UploadItem};

/// Read side of the uploader collaborator.
pub trait UploadTracker: Send + Sync {
    fn items(&self) -> Vec<UploadItem>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message meant for the user, not the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub local_id: Option<Uuid>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: UserNotice);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: UserNotice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!("{}: {}", notice.title, notice.message),
            NoticeLevel::Error => tracing::warn!("{}: {}", notice.title, notice.message),
        }
    }
}

/// In-memory uploader registry fed by whoever performs uploads.
#[derive(Debug, Default)]
pub struct SharedUploads {
    items: RwLock<Vec<UploadItem>>,
}

impl SharedUploads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an item by local id, keeping report order.
    pub fn report(&self, item: UploadItem) {
        let mut items = self.items.write();
        match items.iter_mut().find(|i| i.local_id == item.local_id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn remove(&self, local_id: Uuid) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|i| i.local_id != local_id);
        items.len() != before
    }
}

impl UploadTracker for SharedUploads {
    fn items(&self) -> Vec<UploadItem> {
        self.items.read().clone()
    }
}

/// One row of the composed list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListEntry {
    InFlight(InFlightEntry),
    Document(Document),
}

impl ListEntry {
    /// Identifier selection state should use for this entry.
    pub fn selection_id(&self) -> String {
        match self {
            ListEntry::InFlight(entry) => entry
                .server_id
                .clone()
                .unwrap_or_else(|| entry.local_id.to_string()),
            ListEntry::Document(doc) => doc.id.clone(),
        }
    }
}

/// Mappings kept for uploads the uploader no longer reports.
pub const RETIRED_MAPPINGS: usize = 256;

#[derive(Debug, Default)]
pub struct InFlightOverlay {
    entries: Vec<InFlightEntry>,
    /// local id -> server id, kept after promotion so selections still resolve
    remap: HashMap<Uuid, String>,
    /// Mapped local ids gone from the uploader, oldest first
    retired: VecDeque<Uuid>,
    notified: HashSet<Uuid>,
}

impl InFlightOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild entries from the uploader's current items.
    pub fn sync(&mut self, items: &[UploadItem], notifier: &dyn Notifier) {
        self.entries = items.iter().map(InFlightEntry::from).collect();

        for entry in &self.entries {
            if let Some(server_id) = &entry.server_id {
                if self.remap.insert(entry.local_id, server_id.clone()).is_none() {
                    tracing::debug!(local_id = %entry.local_id, server_id = %server_id, "upload promoted");
                }
            }
            if entry.status == InFlightStatus::Failed && self.notified.insert(entry.local_id) {
                notifier.notify(UserNotice {
                    level: NoticeLevel::Error,
                    title: "Upload failed".to_string(),
                    message: match &entry.error {
                        Some(err) => format!("{}: {}", entry.name, err),
                        None => entry.name.clone(),
                    },
                    local_id: Some(entry.local_id),
                });
            }
        }

        // a retried upload that fails again deserves a new notice
        let failed: HashSet<Uuid> = self
            .entries
            .iter()
            .filter(|e| e.status == InFlightStatus::Failed)
            .map(|e| e.local_id)
            .collect();
        self.notified.retain(|id| failed.contains(id));

        self.retire_mappings();
    }

    fn retire_mappings(&mut self) {
        let live: HashSet<Uuid> = self.entries.iter().map(|e| e.local_id).collect();
        self.retired.retain(|id| !live.contains(id));
        for local_id in self.remap.keys() {
            if !live.contains(local_id) && !self.retired.contains(local_id) {
                self.retired.push_back(*local_id);
            }
        }
        while self.retired.len() > RETIRED_MAPPINGS {
            if let Some(oldest) = self.retired.pop_front() {
                self.remap.remove(&oldest);
            }
        }
    }

    pub fn entries(&self) -> &[InFlightEntry] {
        &self.entries
    }

    pub fn server_id(&self, local_id: Uuid) -> Option<&str> {
        self.remap.get(&local_id).map(String::as_str)
    }

    /// Map a selected id to the server id if it names a promoted entry.
    pub fn resolve_id(&self, id: &str) -> String {
        Uuid::parse_str(id)
            .ok()
            .and_then(|local| self.server_id(local))
            .unwrap_or(id)
            .to_string()
    }

    /// Resolve a selection, dropping duplicates that collapse onto one server id.
    pub fn resolve_selection(&self, ids: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        ids.iter()
            .map(|id| self.resolve_id(id))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Entries whose real row has not reached the cache, then the cache rows.
    pub fn compose(&self, cache: &PageCache) -> Vec<ListEntry> {
        let pending = self
            .entries
            .iter()
            .filter(|entry| match &entry.server_id {
                Some(id) => !cache.contains(id),
                None => true,
            })
            .cloned()
            .map(ListEntry::InFlight);

        pending
            .chain(cache.rows().cloned().map(ListEntry::Document))
            .collect()
    }
}
