//! Mailbox source reading raw RFC 5322 messages from a directory.
//!
//! Accepts either a Maildir (messages under `new/` and `cur/`) or a flat
//! directory of `.eml` files. Files that fail to parse are skipped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tokio::fs;
use tracing::{debug, info, warn};

use super::{make_snippet, parse_date, MailboxPoller};
use crate::error::PollError;
use crate::model::{CampaignWindow, InboundMessage};

pub struct MaildirPoller {
    root: PathBuf,
    max_results: usize,
}

impl MaildirPoller {
    pub fn new(root: PathBuf, max_results: usize) -> Self {
        Self { root, max_results }
    }

    /// Directories to scan, each flagged with whether it is a flat `.eml` dir.
    async fn message_dirs(&self) -> Result<Vec<(PathBuf, bool)>, PollError> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            PollError::Transport(format!("cannot read {}: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(PollError::Transport(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut dirs = Vec::new();
        for sub in ["new", "cur"] {
            let candidate = self.root.join(sub);
            if fs::metadata(&candidate).await.map(|m| m.is_dir()).unwrap_or(false) {
                dirs.push((candidate, false));
            }
        }
        if dirs.is_empty() {
            dirs.push((self.root.clone(), true));
        }
        Ok(dirs)
    }
}

#[async_trait]
impl MailboxPoller for MaildirPoller {
    async fn fetch_recent_inbound(
        &self,
        window: CampaignWindow,
    ) -> Result<Vec<InboundMessage>, PollError> {
        let now = Utc::now();
        let mut messages = Vec::new();
        let mut skipped = 0usize;

        for (dir, flat) in self.message_dirs().await? {
            let mut reader = fs::read_dir(&dir)
                .await
                .map_err(|e| PollError::Transport(format!("{}: {}", dir.display(), e)))?;

            while let Some(item) = reader
                .next_entry()
                .await
                .map_err(|e| PollError::Transport(e.to_string()))?
            {
                let path = item.path();
                let is_file = match item.file_type().await {
                    Ok(kind) => kind.is_file(),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "maildir_stat_failed");
                        skipped += 1;
                        continue;
                    }
                };
                if !is_file || !is_message_file(&path, flat) {
                    continue;
                }

                let raw = match fs::read(&path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "maildir_read_failed");
                        skipped += 1;
                        continue;
                    }
                };

                match parse_message(&raw, now) {
                    Some(message) if window.contains(message.received_at, now) => {
                        messages.push(message)
                    }
                    Some(_) => {}
                    None => {
                        debug!(path = %path.display(), "maildir_message_skipped");
                        skipped += 1;
                    }
                }
            }
        }

        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        messages.truncate(self.max_results);

        info!(
            root = %self.root.display(),
            fetched = messages.len(),
            skipped = skipped,
            "maildir_scan_complete"
        );

        Ok(messages)
    }
}

/// Name check for a regular file. Maildir names are opaque, so only flat
/// directories filter on `.eml`.
fn is_message_file(path: &Path, flat: bool) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    if hidden {
        return false;
    }

    !flat
        || path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("eml"))
            .unwrap_or(false)
}

/// Parse one raw message. Returns `None` when there is no usable sender.
pub fn parse_message(raw: &[u8], now: DateTime<Utc>) -> Option<InboundMessage> {
    let mail = match parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            warn!(error = %e, "maildir_parse_failed");
            return None;
        }
    };

    let from = mail.headers.get_first_value("From")?;
    if from.trim().is_empty() {
        return None;
    }

    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let received_at = mail
        .headers
        .get_first_value("Date")
        .and_then(|d| parse_date(&d))
        .unwrap_or(now);
    let snippet = find_text_body(&mail)
        .map(|body| make_snippet(&body))
        .unwrap_or_default();

    Some(InboundMessage {
        from_address: from,
        subject,
        received_at,
        snippet,
    })
}

/// First non-empty `text/plain` part, searching nested multiparts.
fn find_text_body(mail: &ParsedMail) -> Option<String> {
    let content_type = mail.ctype.mimetype.as_str();

    if content_type == "text/plain" {
        return mail.get_body().ok().filter(|b| !b.trim().is_empty());
    }

    if content_type.starts_with("multipart/") {
        return mail.subparts.iter().find_map(find_text_body);
    }

    None
}
