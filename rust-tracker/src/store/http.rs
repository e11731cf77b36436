//! Remote tracking store backed by the `replytrack-web` HTTP API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use url::Url;

use super::{MarkOutcome, MarkTarget, TrackingStore};
use crate::config::ClientConfig;
use crate::error::StoreError;
use crate::model::{CampaignWindow, TrackingEntry};
use crate::web::api::{
    ErrorResponse, MarkRepliedRequest, MarkRepliedResponse, RegisterRequest, RegisterResponse,
    StatsResponse, MARK_REPLIED_PATH, REGISTER_PATH, STATS_PATH,
};

pub struct HttpStore {
    client: Client,
    config: ClientConfig,
}

impl HttpStore {
    pub fn new(config: ClientConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.config
            .endpoint
            .join(path)
            .map_err(|e| StoreError::Transport(format!("invalid url for {}: {}", path, e)))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, Vec<u8>), StoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(
                    timeout_seconds = self.config.timeout.as_secs_f64(),
                    error = %e,
                    "http_store_timeout"
                );
            } else {
                warn!(error = %e, "http_store_request_error");
            }
            StoreError::Transport(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok((status, body.to_vec()))
    }

    /// Send a request and decode the JSON body.
    ///
    /// Transport failures and 5xx answers are retryable; other non-success
    /// statuses are rejections carrying the server's error message.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, StoreError> {
        let (status, body) = self.send(request).await?;
        decode(status, &body)
    }
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, StoreError> {
    if status.is_server_error() {
        return Err(StoreError::Transport(format!(
            "server returned {}: {}",
            status,
            error_message(body)
        )));
    }

    if !status.is_success() {
        return Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(error_message(body)),
            _ => StoreError::Rejected(format!("{}: {}", status, error_message(body))),
        });
    }

    serde_json::from_slice(body).map_err(|e| {
        warn!(status = status.as_u16(), error = %e, "http_store_malformed_response");
        StoreError::Malformed(e.to_string())
    })
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned())
}

#[async_trait]
impl TrackingStore for HttpStore {
    async fn register_send(&self, entry: &TrackingEntry) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.url(REGISTER_PATH)?)
            .json(&RegisterRequest {
                entry: entry.clone(),
            });

        let (status, body) = self.send(request).await?;
        if status == StatusCode::CONFLICT {
            return Err(StoreError::Duplicate(entry.tracking_id));
        }

        let response: RegisterResponse = decode(status, &body)?;
        info!(tracking_id = %response.tracking_id, "http_store_registered");
        Ok(())
    }

    async fn mark_replied(&self, target: &MarkTarget) -> Result<MarkOutcome, StoreError> {
        let body = match target {
            MarkTarget::TrackingId(id) => MarkRepliedRequest {
                tracking_id: Some(*id),
                email: None,
            },
            MarkTarget::Recipient(address) => MarkRepliedRequest {
                tracking_id: None,
                email: Some(address.clone()),
            },
        };

        let request = self.client.post(self.url(MARK_REPLIED_PATH)?).json(&body);
        let response: MarkRepliedResponse = self.execute(request).await?;

        info!(target = %target, marked = response.marked, "http_store_marked");
        Ok(response.outcome)
    }

    async fn list_sent(&self, window: CampaignWindow) -> Result<Vec<TrackingEntry>, StoreError> {
        let request = self
            .client
            .get(self.url(STATS_PATH)?)
            .query(&[("days", window.days)]);

        let response: StatsResponse = self.execute(request).await?;
        if !response.success {
            return Err(StoreError::Rejected("stats request unsuccessful".to_string()));
        }

        let mut entries = response.emails;
        entries.sort_by_key(|e| e.sent_at);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::FunnelReport;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> HttpStore {
        let config = ClientConfig::new(&server.uri(), Duration::from_secs(2)).unwrap();
        HttpStore::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_list_sent_reads_stats_emails() {
        let server = MockServer::start().await;
        let entry = TrackingEntry::new("alice@co.com", "Hi", "Body");
        let report = FunnelReport::compute(std::slice::from_ref(&entry));

        Mock::given(method("GET"))
            .and(path("/api/campaigns/stats"))
            .and(query_param("days", "30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "stats": report.stats,
                "daily": report.daily,
                "emails": [entry],
            })))
            .mount(&server)
            .await;

        let listed = store_for(&server)
            .list_sent(CampaignWindow::days(30))
            .await
            .unwrap();
        assert_eq!(listed, vec![entry]);
    }

    #[tokio::test]
    async fn test_mark_replied_by_tracking_id() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/api/campaigns/mark-replied"))
            .and(body_json(serde_json::json!({ "tracking_id": id })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "marked": 1,
                "outcome": { "outcome": "marked", "count": 1 },
            })))
            .mount(&server)
            .await;

        let outcome = store_for(&server)
            .mark_replied(&MarkTarget::TrackingId(id))
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Marked(1));
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/campaigns/mark-replied"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "success": false,
                "error": "Email not found",
            })))
            .mount(&server)
            .await;

        let result = store_for(&server)
            .mark_replied(&MarkTarget::recipient("ghost@co.com"))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(msg)) if msg == "Email not found"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_transport() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/campaigns/register"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let entry = TrackingEntry::new("alice@co.com", "Hi", "Body");
        let err = store_for(&server).register_send(&entry).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflict_maps_to_duplicate() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/campaigns/register"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "success": false,
                "error": "already registered",
            })))
            .mount(&server)
            .await;

        let entry = TrackingEntry::new("alice@co.com", "Hi", "Body");
        let err = store_for(&server).register_send(&entry).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == entry.tracking_id));
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/campaigns/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = store_for(&server).list_sent(CampaignWindow::days(7)).await;
        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport() {
        let config = ClientConfig::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
        let store = HttpStore::new(config).unwrap();
        let result = store.list_sent(CampaignWindow::days(7)).await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }
}
