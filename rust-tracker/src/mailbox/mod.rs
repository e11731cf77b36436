//! Mailbox pollers: sources of inbound messages for reply correlation.
//!
//! A poller only reads. A failed fetch is reported as a [`PollError`] so the
//! poll cycle can tell "no replies" apart from "no data this cycle".
//!
//! ## Implementations
//!
//! ```text
//! CommandPoller  → external mail CLI search (JSON / JSON-lines output)
//! MaildirPoller  → directory of raw RFC 5322 messages (mailparse)
//! ```

pub mod command;
pub mod maildir;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{MailboxBackend, PollConfig};
use crate::error::PollError;
use crate::model::{CampaignWindow, InboundMessage};

pub use command::CommandPoller;
pub use maildir::MaildirPoller;

/// Longest snippet kept per inbound message.
pub const SNIPPET_MAX_CHARS: usize = 200;

#[async_trait]
pub trait MailboxPoller: Send + Sync {
    /// Fetch inbound messages received within `window`.
    async fn fetch_recent_inbound(
        &self,
        window: CampaignWindow,
    ) -> Result<Vec<InboundMessage>, PollError>;
}

/// Build the poller selected by configuration.
pub fn open(backend: &MailboxBackend, poll: &PollConfig) -> Box<dyn MailboxPoller> {
    match backend {
        MailboxBackend::Command { program } => Box::new(CommandPoller::new(
            program.clone(),
            poll.max_results,
            poll.fetch_timeout,
        )),
        MailboxBackend::Maildir(path) => Box::new(MaildirPoller::new(path.clone(), poll.max_results)),
    }
}

/// Parse a message date in RFC 2822 or RFC 3339 form.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // mailparse tolerates the sloppier dates real mailers produce
    mailparse::dateparse(raw)
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// Collapse whitespace and cap the length of a preview.
pub fn make_snippet(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SNIPPET_MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_rfc2822() {
        let parsed = parse_date("Tue, 5 Mar 2024 10:15:00 +0100").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 5, 9, 15, 0).unwrap());
    }

    #[test]
    fn test_parse_date_rfc3339() {
        let parsed = parse_date("2024-03-05T09:15:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 5, 9, 15, 0).unwrap());
    }

    #[test]
    fn test_parse_date_blank() {
        assert!(parse_date("").is_none());
        assert!(parse_date("   ").is_none());
    }

    #[test]
    fn test_make_snippet() {
        assert_eq!(make_snippet("  Thanks,\n\n  sounds   good "), "Thanks, sounds good");
        assert_eq!(make_snippet(&"x".repeat(500)).len(), SNIPPET_MAX_CHARS);
    }
}
