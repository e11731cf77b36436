//! Outbound transmission through an external mail client.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::TransmitError;

/// What the provider reported for a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait MailTransmitter: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<TransmitReceipt, TransmitError>;
}

/// Runs `<program> gmail send --to .. --subject .. --body-file -`, body on stdin.
pub struct CommandTransmitter {
    program: String,
    timeout: Duration,
}

impl CommandTransmitter {
    pub fn new(program: String, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    async fn run(&self, recipient: &str, subject: &str, body: &str) -> Result<String, TransmitError> {
        let mut child = Command::new(&self.program)
            .args(["gmail", "send", "--to", recipient, "--subject", subject, "--body-file", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransmitError::Spawn)?;

        // Feed stdin while output is drained so a chatty client cannot stall
        // on a full pipe. Dropping stdin closes the pipe.
        let stdin = child.stdin.take();
        let write_body = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(body.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write_body, child.wait_with_output());
        let output = output.map_err(TransmitError::Io)?;

        if !output.status.success() {
            return Err(TransmitError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // Exited cleanly without taking the whole body
        written.map_err(TransmitError::Io)?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MailTransmitter for CommandTransmitter {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<TransmitReceipt, TransmitError> {
        let stdout = tokio::time::timeout(self.timeout, self.run(recipient, subject, body))
            .await
            .map_err(|_| TransmitError::Timeout(self.timeout))
            .and_then(|r| r)
            .map_err(|e| {
                error!(recipient = %recipient, error = %e, "transmit_failed");
                e
            })?;

        let receipt = TransmitReceipt {
            provider_message_id: parse_message_id(&stdout),
        };

        info!(
            recipient = %recipient,
            provider_message_id = ?receipt.provider_message_id,
            "transmit_complete"
        );

        Ok(receipt)
    }
}

/// Find the `message_id<TAB><id>` line in mail client output.
pub fn parse_message_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter(|line| line.contains("message_id"))
        .find_map(|line| {
            let mut parts = line.split('\t');
            parts.next()?;
            parts
                .next()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}
