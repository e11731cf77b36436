//! Send registration.
//!
//! A send is registered before it is transmitted, so a transmit failure
//! downstream still leaves an auditable record of the intended send. The
//! record is not rolled back when transmission fails.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::RegistrationError;
use crate::model::{normalize_address, TrackingEntry};
use crate::store::TrackingStore;

/// Allocates tracking ids and persists new sends.
#[derive(Clone)]
pub struct Registrar {
    store: Arc<dyn TrackingStore>,
}

impl Registrar {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// Register one outbound send with status `sent`.
    pub async fn register(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<TrackingEntry, RegistrationError> {
        if normalize_address(recipient).is_empty() {
            return Err(RegistrationError::InvalidRecipient);
        }

        let entry = TrackingEntry::new(recipient, subject, body);

        if let Err(e) = self.store.register_send(&entry).await {
            error!(
                recipient = %entry.recipient,
                tracking_id = %entry.tracking_id,
                retryable = e.is_retryable(),
                error = %e,
                "send_registration_failed"
            );
            return Err(e.into());
        }

        info!(
            recipient = %entry.recipient,
            tracking_id = %entry.tracking_id,
            subject_length = entry.subject.len(),
            body_length = entry.body.len(),
            "send_registered"
        );

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{CampaignWindow, SendStatus};
    use crate::store::{MarkOutcome, MarkTarget, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FailingStore;

    #[async_trait]
    impl TrackingStore for FailingStore {
        async fn register_send(&self, _entry: &TrackingEntry) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }

        async fn mark_replied(&self, _target: &MarkTarget) -> Result<MarkOutcome, StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }

        async fn list_sent(
            &self,
            _window: CampaignWindow,
        ) -> Result<Vec<TrackingEntry>, StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_persists_sent_entry() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());

        let entry = registrar
            .register(" Alice@Co.com ", "Hello", "Body text")
            .await
            .unwrap();

        assert_eq!(entry.recipient, "alice@co.com");
        assert_eq!(entry.status, SendStatus::Sent);
        assert_eq!(store.get(entry.tracking_id).await, Some(entry));
    }

    #[tokio::test]
    async fn test_tracking_ids_are_distinct() {
        let registrar = Registrar::new(Arc::new(MemoryStore::new()));

        let mut ids = HashSet::new();
        for i in 0..200 {
            let entry = registrar
                .register("same@co.com", &format!("Subject {}", i), "Body")
                .await
                .unwrap();
            ids.insert(entry.tracking_id);
        }

        assert_eq!(ids.len(), 200);
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());

        let result = registrar.register("   ", "Hello", "Body").await;

        assert!(matches!(result, Err(RegistrationError::InvalidRecipient)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces() {
        let registrar = Registrar::new(Arc::new(FailingStore));

        let result = registrar.register("alice@co.com", "Hello", "Body").await;

        match result {
            Err(RegistrationError::Persistence(e)) => assert!(e.is_retryable()),
            other => panic!("Expected persistence error, got {:?}", other),
        }
    }
}
