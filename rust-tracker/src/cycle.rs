//! One poll cycle: snapshot → fetch inbox → correlate → mark replied.
//!
//! The outstanding set is read once at the start and used for the whole
//! cycle. Each matched entry is marked independently, so one failed update
//! does not block the rest. A failed mailbox fetch marks nothing and is
//! reported as [`FetchStatus::Failed`], never as an empty inbox.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PollConfig;
use crate::correlate::correlate;
use crate::mailbox::MailboxPoller;
use crate::model::{InboundMessage, TrackingEntry};
use crate::store::{MarkOutcome, MarkTarget, TrackingStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum FetchStatus {
    /// Nothing outstanding, so the mailbox was not queried.
    Skipped,
    Fetched,
    /// No data this cycle. Says nothing about whether replies exist.
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkTally {
    pub marked: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outstanding: usize,
    pub fetched: usize,
    pub fetch_status: FetchStatus,
    pub matched: usize,
    #[serde(flatten)]
    pub tally: MarkTally,
    /// Set when the snapshot itself could not be read.
    pub store_error: Option<String>,
}

impl CycleReport {
    fn empty(fetch_status: FetchStatus) -> Self {
        Self {
            outstanding: 0,
            fetched: 0,
            fetch_status,
            matched: 0,
            tally: MarkTally::default(),
            store_error: None,
        }
    }

    /// Whether the cycle produced conclusive data.
    pub fn is_complete(&self) -> bool {
        self.store_error.is_none() && !matches!(self.fetch_status, FetchStatus::Failed(_))
    }
}

/// Run a single poll cycle.
pub async fn run_cycle(
    store: &dyn TrackingStore,
    poller: &dyn MailboxPoller,
    config: &PollConfig,
) -> CycleReport {
    info!(
        correlation_days = config.correlation_window.days,
        mailbox_days = config.mailbox_window.days,
        "poll_cycle_starting"
    );

    let snapshot = match store.list_sent(config.correlation_window).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "poll_cycle_snapshot_failed");
            let mut report = CycleReport::empty(FetchStatus::Skipped);
            report.store_error = Some(e.to_string());
            return report;
        }
    };

    let outstanding = snapshot.iter().filter(|e| e.is_outstanding()).count();
    info!(
        listed = snapshot.len(),
        outstanding = outstanding,
        "poll_cycle_snapshot"
    );

    if outstanding == 0 {
        info!("poll_cycle_nothing_outstanding");
        return CycleReport::empty(FetchStatus::Skipped);
    }

    let messages = match poller.fetch_recent_inbound(config.mailbox_window).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "poll_cycle_fetch_failed");
            let mut report = CycleReport::empty(FetchStatus::Failed(e.to_string()));
            report.outstanding = outstanding;
            return report;
        }
    };

    let pairs = correlate(&snapshot, &messages);
    let tally = apply_pairs(store, &pairs).await;

    let report = CycleReport {
        outstanding,
        fetched: messages.len(),
        fetch_status: FetchStatus::Fetched,
        matched: pairs.len(),
        tally,
        store_error: None,
    };

    info!(
        outstanding = report.outstanding,
        fetched = report.fetched,
        matched = report.matched,
        marked = report.tally.marked,
        unchanged = report.tally.unchanged,
        failed = report.tally.failed,
        "poll_cycle_complete"
    );

    report
}

/// Mark every correlated entry as replied, one store call per entry.
pub async fn apply_pairs(
    store: &dyn TrackingStore,
    pairs: &[(TrackingEntry, InboundMessage)],
) -> MarkTally {
    let mut tally = MarkTally::default();

    for (entry, message) in pairs {
        let target = MarkTarget::TrackingId(entry.tracking_id);
        match store.mark_replied(&target).await {
            Ok(MarkOutcome::Marked(_)) => {
                tally.marked += 1;
                info!(
                    tracking_id = %entry.tracking_id,
                    recipient = %entry.recipient,
                    from = %message.from_address,
                    subject = %message.subject,
                    "reply_recorded"
                );
            }
            Ok(MarkOutcome::Unchanged) => tally.unchanged += 1,
            Err(e) => {
                tally.failed += 1;
                error!(
                    tracking_id = %entry.tracking_id,
                    recipient = %entry.recipient,
                    error = %e,
                    "reply_mark_failed"
                );
            }
        }
    }

    tally
}
