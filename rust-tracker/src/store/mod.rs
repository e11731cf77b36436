//! Tracking persistence.
//!
//! [`TrackingStore`] is the whole surface the engine needs from a backing
//! store: register a send, mark replies, list recent sends. Three backends
//! are provided:
//! - [`MemoryStore`]: process-local, lost on exit
//! - [`SqliteStore`]: a SQLite file, shareable between processes
//! - [`HttpStore`]: a remote tracking API served by `replytrack-web`

pub mod http;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreBackend;
use crate::error::StoreError;
use crate::model::{normalize_address, CampaignWindow, TrackingEntry};

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Which entries a `mark_replied` call applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkTarget {
    TrackingId(Uuid),
    /// Every outstanding send to this normalized address.
    Recipient(String),
}

impl MarkTarget {
    pub fn recipient(address: &str) -> Self {
        MarkTarget::Recipient(normalize_address(address))
    }

    fn matches(&self, entry: &TrackingEntry) -> bool {
        match self {
            MarkTarget::TrackingId(id) => entry.tracking_id == *id,
            MarkTarget::Recipient(address) => normalize_address(&entry.recipient) == *address,
        }
    }
}

impl fmt::Display for MarkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkTarget::TrackingId(id) => write!(f, "tracking_id={}", id),
            MarkTarget::Recipient(address) => write!(f, "recipient={}", address),
        }
    }
}

/// Result of a successful `mark_replied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "count", rename_all = "snake_case")]
pub enum MarkOutcome {
    /// This many entries moved from `sent` to `replied`.
    Marked(usize),
    /// Every targeted entry was already replied.
    Unchanged,
}

impl MarkOutcome {
    pub fn marked(&self) -> usize {
        match self {
            MarkOutcome::Marked(n) => *n,
            MarkOutcome::Unchanged => 0,
        }
    }
}

/// Backend-agnostic tracking persistence.
///
/// `mark_replied` must be idempotent and commutative: concurrent calls for the
/// same entry leave it `replied` with the `replied_at` of whichever call won.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Persist a newly registered send.
    async fn register_send(&self, entry: &TrackingEntry) -> Result<(), StoreError>;

    /// Transition targeted entries to `replied`.
    async fn mark_replied(&self, target: &MarkTarget) -> Result<MarkOutcome, StoreError>;

    /// Entries of either status sent within `window`, oldest first.
    async fn list_sent(&self, window: CampaignWindow) -> Result<Vec<TrackingEntry>, StoreError>;
}

/// Open the store selected by configuration.
pub fn open(backend: &StoreBackend) -> Result<Arc<dyn TrackingStore>, StoreError> {
    let store: Arc<dyn TrackingStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite(path) => Arc::new(SqliteStore::open(path)?),
        StoreBackend::Http(client) => Arc::new(HttpStore::new(client.clone())?),
    };
    Ok(store)
}

/// Apply a mark to an in-memory collection of entries.
pub(crate) fn apply_mark<'a, I>(
    entries: I,
    target: &MarkTarget,
    at: DateTime<Utc>,
) -> Result<MarkOutcome, StoreError>
where
    I: IntoIterator<Item = &'a mut TrackingEntry>,
{
    let mut targeted = 0usize;
    let mut marked = 0usize;

    for entry in entries {
        if !target.matches(entry) {
            continue;
        }
        targeted += 1;
        if entry.mark_replied(at) {
            marked += 1;
        }
    }

    if targeted == 0 {
        return Err(StoreError::NotFound(target.to_string()));
    }

    Ok(if marked == 0 {
        MarkOutcome::Unchanged
    } else {
        MarkOutcome::Marked(marked)
    })
}

/// Filter to `window` and order oldest first.
pub(crate) fn select_window<'a, I>(entries: I, window: CampaignWindow) -> Vec<TrackingEntry>
where
    I: IntoIterator<Item = &'a TrackingEntry>,
{
    let now = Utc::now();
    let mut selected: Vec<TrackingEntry> = entries
        .into_iter()
        .filter(|e| window.contains(e.sent_at, now))
        .cloned()
        .collect();
    selected.sort_by_key(|e| e.sent_at);
    selected
}
