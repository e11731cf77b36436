//! Core data model: tracking entries, inbound messages, campaign windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a tracked send. `Replied` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Replied,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "sent",
            SendStatus::Replied => "replied",
        }
    }
}

/// One outbound send and its reply status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub tracking_id: Uuid,
    /// Normalized recipient address
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_at: Option<DateTime<Utc>>,
}

impl TrackingEntry {
    /// Create a fresh `sent` entry with a new tracking id.
    pub fn new(recipient: &str, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tracking_id: Uuid::new_v4(),
            recipient: normalize_address(recipient),
            subject: subject.into(),
            body: body.into(),
            sent_at: Utc::now(),
            status: SendStatus::Sent,
            replied_at: None,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.status == SendStatus::Sent
    }

    /// Apply the `sent -> replied` transition.
    ///
    /// Returns `false` without touching the entry if it was already replied.
    pub fn mark_replied(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == SendStatus::Replied {
            return false;
        }
        self.status = SendStatus::Replied;
        self.replied_at = Some(at);
        true
    }
}

/// An inbound mailbox message. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from_address: String,
    #[serde(default)]
    pub subject: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub snippet: String,
}

/// Recency bound, in whole days back from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignWindow {
    pub days: u32,
}

impl CampaignWindow {
    pub const fn days(days: u32) -> Self {
        Self { days }
    }

    /// Earliest timestamp inside the window, relative to `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }

    pub fn contains(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        at >= self.since(now)
    }
}

impl Default for CampaignWindow {
    fn default() -> Self {
        Self::days(30)
    }
}

/// Normalize an address for comparison: trimmed and lower-cased.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
