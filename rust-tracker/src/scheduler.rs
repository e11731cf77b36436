//! Interval loop driving poll cycles until shutdown.

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use replytrack::mailbox::MailboxPoller;
use replytrack::shutdown::shutdown_signal;
use replytrack::{run_cycle, PollConfig, TrackingStore};

/// Run poll cycles every `config.interval`, the first one immediately.
///
/// Cycles never overlap within this process. A cycle in progress when the
/// signal arrives is allowed to finish.
pub async fn run(store: Arc<dyn TrackingStore>, poller: Box<dyn MailboxPoller>, config: PollConfig) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(interval_seconds = config.interval.as_secs(), "poller_ready");

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(cycles = cycles, "poller_stopping");
                break;
            }
            _ = ticker.tick() => {
                cycles += 1;
                let report = run_cycle(store.as_ref(), poller.as_ref(), &config).await;
                if !report.is_complete() {
                    warn!(
                        cycle = cycles,
                        fetch_status = ?report.fetch_status,
                        store_error = ?report.store_error,
                        "poll_cycle_incomplete"
                    );
                }
            }
        }
    }
}
