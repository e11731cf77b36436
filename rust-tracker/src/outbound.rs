//! Tracked sends: register, then transmit.
//!
//! Registration and transmission are two independent steps. A transmit
//! failure leaves the `sent` entry in place.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RegistrationError;
use crate::registrar::Registrar;
use crate::template::{placeholders, render, Record};
use crate::transmit::MailTransmitter;

/// What to do when the tracking store cannot register a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UntrackedPolicy {
    /// Skip transmission entirely.
    #[default]
    Abort,
    /// Transmit anyway, without a tracking entry.
    ProceedUntracked,
}

/// A fully materialized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub to: String,
    pub tracking_id: Option<Uuid>,
    pub transmitted: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

/// Register `message`, then hand it to `transmitter`.
///
/// When registration fails the `policy` decides whether the message is still
/// transmitted. Disabling tracking (`registrar = None`) sends untracked.
pub async fn send_tracked(
    registrar: Option<&Registrar>,
    transmitter: &dyn MailTransmitter,
    message: &OutboundMessage,
    policy: UntrackedPolicy,
) -> SendReport {
    let mut report = SendReport {
        to: message.to.clone(),
        ..Default::default()
    };

    if let Some(registrar) = registrar {
        match registrar
            .register(&message.to, &message.subject, &message.body)
            .await
        {
            Ok(entry) => report.tracking_id = Some(entry.tracking_id),
            Err(RegistrationError::InvalidRecipient) => {
                report.error = Some(RegistrationError::InvalidRecipient.to_string());
                return report;
            }
            Err(e) => {
                warn!(to = %message.to, policy = ?policy, error = %e, "send_untracked");
                if policy == UntrackedPolicy::Abort {
                    report.error = Some(e.to_string());
                    return report;
                }
            }
        }
    }

    match transmitter
        .send(&message.to, &message.subject, &message.body)
        .await
    {
        Ok(receipt) => {
            report.transmitted = true;
            report.provider_message_id = receipt.provider_message_id;
        }
        Err(e) => {
            // No rollback: the tracking entry stays `sent`
            report.error = Some(e.to_string());
        }
    }

    info!(
        to = %report.to,
        tracking_id = ?report.tracking_id,
        transmitted = report.transmitted,
        provider_message_id = ?report.provider_message_id,
        "send_complete"
    );

    report
}

/// Personalize subject and body for one record.
///
/// Returns `None` for records without an `email` field.
pub fn personalize(subject: &str, body: &str, record: &Record) -> Option<OutboundMessage> {
    let to = record.email()?;
    Some(OutboundMessage {
        to: to.to_string(),
        subject: render(subject, record),
        body: render(body, record),
    })
}

/// Send one personalized message per record, in order.
///
/// Records without an email are skipped; one failure does not stop the batch.
pub async fn send_batch(
    registrar: Option<&Registrar>,
    transmitter: &dyn MailTransmitter,
    subject: &str,
    body: &str,
    records: &[Record],
    policy: UntrackedPolicy,
) -> Vec<SendReport> {
    let mut fields = placeholders(subject);
    for name in placeholders(body) {
        if !fields.contains(&name) {
            fields.push(name);
        }
    }
    info!(records = records.len(), placeholders = ?fields, "batch_send_starting");

    let mut reports = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let Some(message) = personalize(subject, body, record) else {
            warn!(record_index = index, "batch_record_without_email");
            continue;
        };
        reports.push(send_tracked(registrar, transmitter, &message, policy).await);
    }

    info!(
        sent = reports.iter().filter(|r| r.transmitted).count(),
        tracked = reports.iter().filter(|r| r.tracking_id.is_some()).count(),
        failed = reports.iter().filter(|r| r.error.is_some()).count(),
        "batch_send_complete"
    );

    reports
}

/// Load records from a JSON array or JSON-lines file.
pub fn parse_records(raw: &str) -> Result<Vec<Record>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<Record>)
        .collect()
}

pub async fn load_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    use anyhow::Context;

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read records from {}", path.display()))?;
    parse_records(&raw).with_context(|| format!("Failed to parse records in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, TransmitError};
    use crate::model::{CampaignWindow, SendStatus, TrackingEntry};
    use crate::store::{MarkOutcome, MarkTarget, MemoryStore, TrackingStore};
    use crate::transmit::TransmitReceipt;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransmitter {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl MailTransmitter for RecordingTransmitter {
        async fn send(
            &self,
            recipient: &str,
            subject: &str,
            body: &str,
        ) -> Result<TransmitReceipt, TransmitError> {
            if self.fail_for.as_deref() == Some(recipient) {
                return Err(TransmitError::Failed {
                    status: 1,
                    stderr: "quota exceeded".to_string(),
                });
            }
            self.sent.lock().unwrap().push(OutboundMessage {
                to: recipient.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(TransmitReceipt {
                provider_message_id: Some(format!("gm-{}", recipient)),
            })
        }
    }

    struct DownStore;

    #[async_trait]
    impl TrackingStore for DownStore {
        async fn register_send(&self, _entry: &TrackingEntry) -> Result<(), StoreError> {
            Err(StoreError::Transport("timeout".to_string()))
        }
        async fn mark_replied(&self, _target: &MarkTarget) -> Result<MarkOutcome, StoreError> {
            Err(StoreError::Transport("timeout".to_string()))
        }
        async fn list_sent(&self, _w: CampaignWindow) -> Result<Vec<TrackingEntry>, StoreError> {
            Err(StoreError::Transport("timeout".to_string()))
        }
    }

    fn message(to: &str) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: "Hi".to_string(),
            body: "Body".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_tracked_registers_then_transmits() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());
        let transmitter = RecordingTransmitter::default();

        let report = send_tracked(
            Some(&registrar),
            &transmitter,
            &message("alice@co.com"),
            UntrackedPolicy::Abort,
        )
        .await;

        assert!(report.transmitted);
        assert_eq!(report.provider_message_id.as_deref(), Some("gm-alice@co.com"));
        let id = report.tracking_id.unwrap();
        assert_eq!(store.get(id).await.unwrap().status, SendStatus::Sent);
    }

    #[tokio::test]
    async fn test_transmit_failure_keeps_entry() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());
        let transmitter = RecordingTransmitter {
            fail_for: Some("alice@co.com".to_string()),
            ..Default::default()
        };

        let report = send_tracked(
            Some(&registrar),
            &transmitter,
            &message("alice@co.com"),
            UntrackedPolicy::Abort,
        )
        .await;

        assert!(!report.transmitted);
        assert!(report.error.unwrap().contains("quota exceeded"));
        assert!(store.get(report.tracking_id.unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn test_registration_failure_abort_skips_transmit() {
        let registrar = Registrar::new(Arc::new(DownStore));
        let transmitter = RecordingTransmitter::default();

        let report = send_tracked(
            Some(&registrar),
            &transmitter,
            &message("alice@co.com"),
            UntrackedPolicy::Abort,
        )
        .await;

        assert!(!report.transmitted);
        assert!(report.tracking_id.is_none());
        assert!(transmitter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_proceed_untracked() {
        let registrar = Registrar::new(Arc::new(DownStore));
        let transmitter = RecordingTransmitter::default();

        let report = send_tracked(
            Some(&registrar),
            &transmitter,
            &message("alice@co.com"),
            UntrackedPolicy::ProceedUntracked,
        )
        .await;

        assert!(report.transmitted);
        assert!(report.tracking_id.is_none());
        assert_eq!(transmitter.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_batch_personalizes_and_skips_missing_email() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());
        let transmitter = RecordingTransmitter::default();
        let records = vec![
            Record::new()
                .with("email", "alice@co.com")
                .with("first_name", "Alice")
                .with("company", "Acme"),
            Record::new().with("first_name", "NoEmail"),
            Record::new()
                .with("email", "bob@co.com")
                .with("first_name", ""),
        ];

        let reports = send_batch(
            Some(&registrar),
            &transmitter,
            "Quick question for {{company}}",
            "Hi {{first_name}},",
            &records,
            UntrackedPolicy::Abort,
        )
        .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(store.len().await, 2);
        let sent = transmitter.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Quick question for Acme");
        assert_eq!(sent[0].body, "Hi Alice,");
        assert_eq!(sent[1].subject, "Quick question for {{company}}");
        assert_eq!(sent[1].body, "Hi ,");
    }

    #[test]
    fn test_parse_records_array_and_lines() {
        let array = r#"[{"email": "a@b.com"}, {"email": "c@d.com", "n": 1}]"#;
        assert_eq!(parse_records(array).unwrap().len(), 2);

        let lines = "{\"email\": \"a@b.com\"}\n\n{\"email\": \"c@d.com\"}\n";
        let records = parse_records(lines).unwrap();
        assert_eq!(records[1].email(), Some("c@d.com"));

        assert!(parse_records("{\"email\": ").is_err());
    }
}
