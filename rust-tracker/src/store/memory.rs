//! In-process tracking store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{apply_mark, select_window, MarkOutcome, MarkTarget, TrackingStore};
use crate::error::StoreError;
use crate::model::{CampaignWindow, TrackingEntry};

/// Tracking store held in memory behind an async `RwLock`.
///
/// The `sent -> replied` check-and-set happens under the write lock, so
/// overlapping poll cycles cannot double-mark an entry.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Uuid, TrackingEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, tracking_id: Uuid) -> Option<TrackingEntry> {
        self.entries.read().await.get(&tracking_id).cloned()
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn register_send(&self, entry: &TrackingEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.tracking_id) {
            return Err(StoreError::Duplicate(entry.tracking_id));
        }
        entries.insert(entry.tracking_id, entry.clone());
        debug!(tracking_id = %entry.tracking_id, "memory_store_registered");
        Ok(())
    }

    async fn mark_replied(&self, target: &MarkTarget) -> Result<MarkOutcome, StoreError> {
        let mut entries = self.entries.write().await;
        match target {
            MarkTarget::TrackingId(id) => {
                apply_mark(entries.get_mut(id).into_iter(), target, Utc::now())
            }
            MarkTarget::Recipient(_) => apply_mark(entries.values_mut(), target, Utc::now()),
        }
    }

    async fn list_sent(&self, window: CampaignWindow) -> Result<Vec<TrackingEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(select_window(entries.values(), window))
    }
}
