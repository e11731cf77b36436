//! Wire types for the tracking HTTP API.
//!
//! Shared by the axum handlers and by [`crate::store::HttpStore`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::TrackingEntry;
use crate::stats::{DailyStats, FunnelStats};
use crate::store::MarkOutcome;

pub const TRACK_SEND_PATH: &str = "api/campaigns/track-send";
pub const REGISTER_PATH: &str = "api/campaigns/register";
pub const MARK_REPLIED_PATH: &str = "api/campaigns/mark-replied";
pub const STATS_PATH: &str = "api/campaigns/stats";

/// Register a send with a server-allocated tracking id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSendRequest {
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSendResponse {
    pub success: bool,
    pub tracking_id: Uuid,
    pub entry: TrackingEntry,
}

/// Register a send whose tracking id was allocated by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub entry: TrackingEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub tracking_id: Uuid,
}

/// Either field selects the target; `tracking_id` wins when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkRepliedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRepliedResponse {
    pub success: bool,
    pub marked: usize,
    pub outcome: MarkOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_stats_days")]
    pub days: u32,
}

fn default_stats_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: FunnelStats,
    pub daily: BTreeMap<String, DailyStats>,
    pub emails: Vec<TrackingEntry>,
}

/// Inbound reply pushed by a mail provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundWebhookPayload {
    pub from: String,
    #[serde(default)]
    pub subject: String,
    /// RFC 2822 or RFC 3339; receipt time is used when absent
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundWebhookResponse {
    pub success: bool,
    pub matched: usize,
    pub marked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_request_omits_unset_fields() {
        let request = MarkRepliedRequest {
            email: Some("a@b.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"email":"a@b.com"}"#
        );
    }

    #[test]
    fn test_stats_query_default_days() {
        let query: StatsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.days, 7);
    }

    #[test]
    fn test_inbound_payload_minimal() {
        let payload: InboundWebhookPayload =
            serde_json::from_str(r#"{"from": "Alice <alice@co.com>"}"#).unwrap();
        assert_eq!(payload.from, "Alice <alice@co.com>");
        assert!(payload.date.is_none());
        assert!(payload.snippet.is_empty());
    }
}
