//! Event-time interval join of clicks to impressions.
//!
//! A click `c` joins impression `i` when `c.impression_id == i.impression_id`
//! and `c.event_time - i.event_time` lies in `[0, bound]`. Both sides are
//! buffered by impression id until they can no longer match:
//!
//! - an impression is evicted once `watermark > impression_time + bound`
//! - a click is evicted once `watermark > click_time`
//!
//! Eviction runs on event-time timers, so purging is proactive and costs
//! `O(log n)` per expired entry.
//!
//! Because a pair produced now can carry an impression time as old as
//! `watermark - bound`, the join forwards its watermark held back by `bound`.
//! Downstream windows keyed by impression time therefore never see a pair
//! for a timestamp the forwarded watermark already passed.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::JobMetrics;
use crate::time::{TimerService, EVENT_TIME_MAX, EVENT_TIME_MIN};
use crate::types::{ClickEvent, EventTime, ImpressionEvent, InputEvent, JoinedPair};

mod buffer;

pub use buffer::*;

/// Records the join hands to the aggregation stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JoinOutput {
    Pair(JoinedPair),
    /// An admitted impression, forwarded only when every impression counts in
    /// the CTR denominator.
    Impression(ImpressionEvent),
}

impl JoinOutput {
    pub fn campaign_id(&self) -> &str {
        match self {
            JoinOutput::Pair(pair) => &pair.campaign_id,
            JoinOutput::Impression(imp) => &imp.campaign_id,
        }
    }

    /// The timestamp windows are assigned by: always the impression time.
    pub fn impression_time(&self) -> EventTime {
        match self {
            JoinOutput::Pair(pair) => pair.impression_time,
            JoinOutput::Impression(imp) => imp.event_time,
        }
    }
}

/// Interval join operator for one subtask.
pub struct IntervalJoin {
    bound_ms: i64,
    forward_impressions: bool,
    buffer: JoinBuffer,
    metrics: JobMetrics,
}

impl IntervalJoin {
    pub fn new(bound_ms: i64) -> Self {
        Self {
            bound_ms,
            forward_impressions: false,
            buffer: JoinBuffer::new(),
            metrics: JobMetrics::default(),
        }
    }

    /// Also emit every admitted impression as [`JoinOutput::Impression`].
    pub fn with_forwarded_impressions(mut self, forward: bool) -> Self {
        self.forward_impressions = forward;
        self
    }

    pub fn process(&mut self, event: InputEvent, out: &mut Vec<JoinOutput>) {
        match event {
            InputEvent::Impression(imp) => self.process_impression(imp, out),
            InputEvent::Click(click) => self.process_click(click, out),
        }
    }

    pub fn process_impression(&mut self, imp: ImpressionEvent, out: &mut Vec<JoinOutput>) {
        if imp.event_time <= self.buffer.watermark {
            self.metrics.late_impressions += 1;
            return;
        }
        if self.buffer.impressions.contains_key(&imp.impression_id) {
            self.metrics.duplicate_impressions += 1;
            return;
        }

        let matched =
            self.buffer
                .take_matching_clicks(&imp.impression_id, imp.event_time, self.bound_ms);
        let mut pending = PendingImpression {
            campaign_id: imp.campaign_id.clone(),
            event_time: imp.event_time,
            matched_clicks: BTreeSet::new(),
        };
        for click in matched {
            pending.matched_clicks.insert(click.click_id.clone());
            self.metrics.matches += 1;
            out.push(JoinOutput::Pair(JoinedPair {
                impression_id: imp.impression_id.clone(),
                campaign_id: imp.campaign_id.clone(),
                impression_time: imp.event_time,
                click_id: click.click_id,
                click_time: click.event_time,
            }));
        }

        self.buffer.timers.register(
            JoinTimer::Impression(imp.impression_id.clone()),
            imp.event_time
                .saturating_add(self.bound_ms)
                .saturating_add(1),
        );
        self.buffer
            .impressions
            .insert(imp.impression_id.clone(), pending);

        if self.forward_impressions {
            out.push(JoinOutput::Impression(imp));
        }
    }

    pub fn process_click(&mut self, click: ClickEvent, out: &mut Vec<JoinOutput>) {
        if click.event_time <= self.buffer.watermark {
            self.metrics.late_clicks += 1;
            return;
        }
        if self
            .buffer
            .is_click_buffered(&click.impression_id, &click.click_id)
        {
            self.metrics.duplicate_clicks += 1;
            return;
        }

        if let Some(imp) = self.buffer.impressions.get_mut(&click.impression_id) {
            if imp.matched_clicks.contains(&click.click_id) {
                self.metrics.duplicate_clicks += 1;
                return;
            }
            if within_bound(imp.event_time, click.event_time, self.bound_ms) {
                imp.matched_clicks.insert(click.click_id.clone());
                self.metrics.matches += 1;
                out.push(JoinOutput::Pair(JoinedPair {
                    impression_id: click.impression_id,
                    campaign_id: imp.campaign_id.clone(),
                    impression_time: imp.event_time,
                    click_id: click.click_id,
                    click_time: click.event_time,
                }));
                return;
            }
        }

        let ClickEvent {
            click_id,
            impression_id,
            event_time,
        } = click;
        self.buffer.buffer_click(
            &impression_id,
            PendingClick {
                click_id,
                event_time,
            },
        );
    }

    /// Advance event time to `watermark`, evicting expired entries.
    ///
    /// Returns the held-back watermark to forward downstream if it advanced.
    pub fn on_watermark(&mut self, watermark: EventTime) -> Option<EventTime> {
        if watermark <= self.buffer.watermark {
            return None;
        }
        self.buffer.watermark = watermark;

        for (timer, _) in self.buffer.timers.drain_due(watermark) {
            match timer {
                JoinTimer::Impression(impression_id) => {
                    if let Some(imp) = self.buffer.impressions.remove(&impression_id) {
                        if imp.matched_clicks.is_empty() {
                            self.metrics.expired_impressions += 1;
                        }
                    }
                }
                JoinTimer::Click {
                    impression_id,
                    click_id,
                } => {
                    if self.buffer.evict_click(&impression_id, &click_id) {
                        self.metrics.expired_clicks += 1;
                    }
                }
            }
        }

        let held_back = self.held_back(watermark);
        if held_back > self.buffer.output_watermark {
            self.buffer.output_watermark = held_back;
            Some(held_back)
        } else {
            None
        }
    }

    fn held_back(&self, watermark: EventTime) -> EventTime {
        if watermark == EVENT_TIME_MAX {
            EVENT_TIME_MAX
        } else {
            watermark.saturating_sub(self.bound_ms)
        }
    }

    pub fn current_watermark(&self) -> EventTime {
        self.buffer.watermark
    }

    pub fn num_pending_impressions(&self) -> usize {
        self.buffer.impressions.len()
    }

    pub fn num_pending_clicks(&self) -> usize {
        self.buffer.num_pending_clicks()
    }

    pub fn num_timers(&self) -> usize {
        self.buffer.timers.len()
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub fn snapshot_state(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.buffer).context("serialize join buffer failed")
    }

    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer = bincode::deserialize(bytes).context("deserialize join buffer failed")?;
        debug!(
            impressions = self.buffer.impressions.len(),
            clicks = self.buffer.num_pending_clicks(),
            watermark = self.buffer.watermark,
            "restored join buffer"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/join_tests.rs"]
mod tests;
