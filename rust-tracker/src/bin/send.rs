//! Replytrack Sender - registers and transmits tracked sends.
//!
//! Each send is registered with the tracking store before the mail client is
//! invoked. With `--records` the subject and body are treated as templates
//! and one message is sent per record.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replytrack::outbound::{
    load_records, send_batch, send_tracked, OutboundMessage, SendReport, UntrackedPolicy,
};
use replytrack::transmit::CommandTransmitter;
use replytrack::{store, Config, Registrar};

/// Tracked email sender.
#[derive(Parser, Debug)]
#[command(name = "replytrack-send", about = "Send email with reply tracking")]
struct Cli {
    /// Recipient address (single send).
    #[arg(long, required_unless_present = "records", conflicts_with = "records")]
    to: Option<String>,

    /// Subject line; may contain `{{field}}` placeholders with `--records`.
    #[arg(long)]
    subject: String,

    /// Message body.
    #[arg(long, required_unless_present = "body_file", conflicts_with = "body_file")]
    body: Option<String>,

    /// Read the message body from a file.
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// JSON array or JSON-lines file of contact records for a batch send.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Send without registering tracking entries.
    #[arg(long)]
    no_track: bool,

    /// Still send when registration fails.
    #[arg(long, conflicts_with = "no_track")]
    proceed_untracked: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        store = ?config.store,
        mail_cli = %config.mail_cli,
        tracking = !cli.no_track,
        "config_loaded"
    );

    let body = match (&cli.body, &cli.body_file) {
        (Some(body), _) => body.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read body from {}", path.display()))?,
        (None, None) => bail!("either --body or --body-file is required"),
    };

    let registrar = if cli.no_track {
        None
    } else {
        let store = store::open(&config.store).context("Failed to open tracking store")?;
        Some(Registrar::new(store))
    };

    let policy = if cli.proceed_untracked {
        UntrackedPolicy::ProceedUntracked
    } else {
        UntrackedPolicy::Abort
    };

    let transmitter = CommandTransmitter::new(config.mail_cli.clone(), config.transmit_timeout);

    let reports: Vec<SendReport> = match (&cli.records, &cli.to) {
        (Some(path), _) => {
            let records = load_records(path).await?;
            send_batch(
                registrar.as_ref(),
                &transmitter,
                &cli.subject,
                &body,
                &records,
                policy,
            )
            .await
        }
        (None, Some(to)) => {
            let message = OutboundMessage {
                to: to.clone(),
                subject: cli.subject.clone(),
                body,
            };
            vec![send_tracked(registrar.as_ref(), &transmitter, &message, policy).await]
        }
        (None, None) => bail!("either --to or --records is required"),
    };

    for report in &reports {
        println!(
            "{}",
            serde_json::to_string(report).context("Failed to encode send report")?
        );
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{} of {} sends failed", failed, reports.len());
    }

    Ok(())
}
