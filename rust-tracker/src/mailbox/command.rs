//! Mailbox search through an external mail CLI.
//!
//! Runs `<program> gmail search "in:inbox newer_than:<days>d" --max <n> --json`
//! and parses its output, which may be a JSON array, an object wrapping a
//! `messages` array, or JSON-lines.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::{make_snippet, parse_date, MailboxPoller};
use crate::error::PollError;
use crate::model::{CampaignWindow, InboundMessage};

/// One message summary as printed by the mail CLI.
#[derive(Debug, Default, Deserialize)]
struct SearchSummary {
    #[serde(default)]
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    snippet: String,
}

pub struct CommandPoller {
    program: String,
    max_results: usize,
    timeout: Duration,
}

impl CommandPoller {
    pub fn new(program: String, max_results: usize, timeout: Duration) -> Self {
        Self {
            program,
            max_results,
            timeout,
        }
    }

    fn search_args(&self, window: CampaignWindow) -> Vec<String> {
        vec![
            "gmail".to_string(),
            "search".to_string(),
            format!("in:inbox newer_than:{}d", window.days),
            "--max".to_string(),
            self.max_results.to_string(),
            "--json".to_string(),
        ]
    }
}

#[async_trait]
impl MailboxPoller for CommandPoller {
    async fn fetch_recent_inbound(
        &self,
        window: CampaignWindow,
    ) -> Result<Vec<InboundMessage>, PollError> {
        let args = self.search_args(window);
        info!(program = %self.program, query = %args[2], "mailbox_search_starting");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(program = %self.program, error = %e, "mailbox_search_spawn_failed");
                PollError::Transport(format!("failed to run {}: {}", self.program, e))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(PollError::Transport(e.to_string())),
            Err(_) => {
                error!(
                    program = %self.program,
                    timeout_seconds = self.timeout.as_secs_f64(),
                    "mailbox_search_timeout"
                );
                return Err(PollError::Transport(format!(
                    "mail search timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                status = output.status.code().unwrap_or(-1),
                stderr = %stderr,
                "mailbox_search_failed"
            );
            return Err(PollError::Transport(format!(
                "mail search exited with {}: {}",
                output.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let messages = parse_search_output(&stdout)?;

        info!(fetched = messages.len(), "mailbox_search_complete");
        Ok(messages)
    }
}

/// Parse mail CLI search output into inbound messages.
///
/// Summaries without a sender are dropped. When the output is not a single
/// JSON document, each line is tried on its own and bad lines are skipped;
/// output with no usable line at all is malformed.
pub fn parse_search_output(stdout: &str) -> Result<Vec<InboundMessage>, PollError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<serde_json::Value> = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(serde_json::Value::Object(mut map)) => match map.remove("messages") {
            Some(serde_json::Value::Array(items)) => items,
            _ => vec![serde_json::Value::Object(map)],
        },
        Ok(other) => {
            return Err(PollError::Malformed(format!(
                "unexpected search output: {}",
                other
            )))
        }
        Err(_) => {
            let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
            let parsed: Vec<serde_json::Value> = lines
                .iter()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();

            if parsed.is_empty() {
                warn!(
                    output_preview = %trimmed.chars().take(200).collect::<String>(),
                    "mailbox_search_output_unparseable"
                );
                return Err(PollError::Malformed(
                    "search output is neither JSON nor JSON-lines".to_string(),
                ));
            }
            if parsed.len() < lines.len() {
                warn!(
                    skipped = lines.len() - parsed.len(),
                    "mailbox_search_lines_skipped"
                );
            }
            parsed
        }
    };

    let now = Utc::now();
    let messages = values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<SearchSummary>(value).ok())
        .filter(|summary| !summary.from.trim().is_empty())
        .map(|summary| InboundMessage {
            received_at: parse_date(&summary.date).unwrap_or(now),
            from_address: summary.from,
            subject: summary.subject,
            snippet: make_snippet(&summary.snippet),
        })
        .collect();

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let out = r#"[
            {"from": "Alice <alice@co.com>", "subject": "Re: Hi", "date": "2024-03-05T09:15:00Z", "snippet": "Sure"},
            {"from": "bob@co.com", "subject": "Lunch?"}
        ]"#;

        let messages = parse_search_output(out).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].from_address, "Alice <alice@co.com>");
        assert_eq!(messages[0].snippet, "Sure");
        assert_eq!(messages[1].subject, "Lunch?");
    }

    #[test]
    fn test_parse_wrapped_messages() {
        let out = r#"{"messages": [{"from": "alice@co.com"}], "nextPageToken": null}"#;
        let messages = parse_search_output(out).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_parse_json_lines_skips_bad_lines() {
        let out = "{\"from\": \"alice@co.com\"}\nnot json\n{\"from\": \"bob@co.com\"}\n";
        let messages = parse_search_output(out).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].from_address, "bob@co.com");
    }

    #[test]
    fn test_parse_drops_summaries_without_sender() {
        let out = r#"[{"subject": "no sender"}, {"from": "  "}, {"from": "a@b.com"}]"#;
        assert_eq!(parse_search_output(out).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_search_output("").unwrap().is_empty());
        assert!(parse_search_output("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_search_output("Error: token expired"),
            Err(PollError::Malformed(_))
        ));
        assert!(matches!(parse_search_output("42"), Err(PollError::Malformed(_))));
    }

    #[test]
    fn test_search_args() {
        let poller = CommandPoller::new("gog".to_string(), 25, Duration::from_secs(5));
        let args = poller.search_args(CampaignWindow::days(7));
        assert_eq!(args[2], "in:inbox newer_than:7d");
        assert_eq!(args[4], "25");
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let poller = CommandPoller::new(
            "replytrack-no-such-mail-cli".to_string(),
            10,
            Duration::from_secs(5),
        );
        let result = poller.fetch_recent_inbound(CampaignWindow::days(7)).await;
        assert!(matches!(result, Err(PollError::Transport(_))));
    }
}
