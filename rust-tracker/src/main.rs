//! Replytrack Poller - correlates inbox replies with tracked sends.
//!
//! Runs a poll cycle on a fixed interval until SIGINT/SIGTERM, or a single
//! cycle with `--once` (for cron-style scheduling).

mod scheduler;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replytrack::{mailbox, run_cycle, store, Config};

/// Reply correlation poller.
#[derive(Parser, Debug)]
#[command(name = "replytrack-poll", about = "Correlate inbox replies with tracked sends")]
struct Cli {
    /// Run a single cycle and exit. Exits non-zero when the cycle had no data.
    #[arg(long)]
    once: bool,

    /// Override POLL_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let cli = Cli::parse();
    tracing::info!(once = cli.once, "poller_starting");

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(secs) = cli.interval_secs {
        config.poll.interval = std::time::Duration::from_secs(secs);
    }

    tracing::info!(
        store = ?config.store,
        mailbox = ?config.mailbox,
        correlation_days = config.poll.correlation_window.days,
        mailbox_days = config.poll.mailbox_window.days,
        max_results = config.poll.max_results,
        interval_seconds = config.poll.interval.as_secs(),
        "config_loaded"
    );

    let store = store::open(&config.store).context("Failed to open tracking store")?;
    let poller = mailbox::open(&config.mailbox, &config.poll);

    if cli.once {
        let report = run_cycle(store.as_ref(), poller.as_ref(), &config.poll).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode report")?
        );
        if !report.is_complete() {
            bail!("poll cycle incomplete: {:?}", report.fetch_status);
        }
        return Ok(());
    }

    scheduler::run(store, poller, config.poll).await;

    tracing::info!("poller_shutdown_complete");
    Ok(())
}
