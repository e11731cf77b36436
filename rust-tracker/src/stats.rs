//! Campaign funnel statistics (sent → replied).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{SendStatus, TrackingEntry};

/// Totals over a set of tracking entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelStats {
    pub total: usize,
    pub replied: usize,
    /// Percentage with one decimal place; 0 when nothing was sent
    pub reply_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub sent: usize,
    pub replied: usize,
}

/// Totals plus a per-day breakdown keyed by `YYYY-MM-DD` of `sent_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub stats: FunnelStats,
    pub daily: BTreeMap<String, DailyStats>,
}

impl FunnelReport {
    pub fn compute(entries: &[TrackingEntry]) -> Self {
        let mut daily: BTreeMap<String, DailyStats> = BTreeMap::new();
        let mut replied = 0;

        for entry in entries {
            let day = daily
                .entry(entry.sent_at.format("%Y-%m-%d").to_string())
                .or_default();
            day.sent += 1;
            if entry.status == SendStatus::Replied {
                day.replied += 1;
                replied += 1;
            }
        }

        let total = entries.len();
        Self {
            stats: FunnelStats {
                total,
                replied,
                reply_rate: percent(replied, total),
            },
            daily,
        }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / whole as f64).round() / 10.0
}
