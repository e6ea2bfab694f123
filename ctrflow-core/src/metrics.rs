//! Job counters.
//!
//! Every task keeps its own [`JobMetrics`] and hands it back when it exits;
//! the job merges them with [`JobMetrics::absorb`]. Counters are not part of
//! checkpoint state, so after a restore they describe the current run only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobMetrics {
    pub impressions_read: u64,
    pub clicks_read: u64,
    pub late_impressions: u64,
    pub late_clicks: u64,
    pub malformed_records: u64,
    pub matches: u64,
    pub duplicate_impressions: u64,
    pub duplicate_clicks: u64,
    /// Impressions evicted without ever matching a click.
    pub expired_impressions: u64,
    /// Clicks evicted without finding their impression.
    pub expired_clicks: u64,
    /// Pairs that arrived for an already-finalized window.
    pub late_pairs: u64,
    pub windows_emitted: u64,
    pub records_written: u64,
    pub sink_retries: u64,
    pub checkpoints_completed: u64,
    pub checkpoints_failed: u64,
}

impl JobMetrics {
    /// Add every counter of `other` to `self`.
    pub fn absorb(&mut self, other: &JobMetrics) {
        self.impressions_read += other.impressions_read;
        self.clicks_read += other.clicks_read;
        self.late_impressions += other.late_impressions;
        self.late_clicks += other.late_clicks;
        self.malformed_records += other.malformed_records;
        self.matches += other.matches;
        self.duplicate_impressions += other.duplicate_impressions;
        self.duplicate_clicks += other.duplicate_clicks;
        self.expired_impressions += other.expired_impressions;
        self.expired_clicks += other.expired_clicks;
        self.late_pairs += other.late_pairs;
        self.windows_emitted += other.windows_emitted;
        self.records_written += other.records_written;
        self.sink_retries += other.sink_retries;
        self.checkpoints_completed += other.checkpoints_completed;
        self.checkpoints_failed += other.checkpoints_failed;
    }

    /// Total late input events.
    pub fn late_events(&self) -> u64 {
        self.late_impressions + self.late_clicks
    }
}

impl std::fmt::Display for JobMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {} impressions / {} clicks, {} late, {} malformed; {} matches; \
             expired {} impressions / {} clicks; {} windows emitted, {} records written; \
             {} checkpoints ({} failed)",
            self.impressions_read,
            self.clicks_read,
            self.late_events(),
            self.malformed_records,
            self.matches,
            self.expired_impressions,
            self.expired_clicks,
            self.windows_emitted,
            self.records_written,
            self.checkpoints_completed,
            self.checkpoints_failed,
        )
    }
}
