use super::*;

/// An impression waiting for clicks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingImpression {
    pub campaign_id: String,
    pub event_time: EventTime,
    /// Click ids already paired with this impression.
    pub matched_clicks: BTreeSet<String>,
}

/// A click waiting for its impression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingClick {
    pub click_id: String,
    pub event_time: EventTime,
}

/// Eviction timer of one buffered entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum JoinTimer {
    Impression(String),
    Click {
        impression_id: String,
        click_id: String,
    },
}

/// Snapshot-able state of one join subtask.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinBuffer {
    /// Pending impressions by impression id.
    pub impressions: HashMap<String, PendingImpression>,
    /// Unmatched clicks by the impression id they reference, in arrival order.
    pub clicks: HashMap<String, Vec<PendingClick>>,
    pub timers: TimerService<JoinTimer>,
    /// Last input watermark.
    pub watermark: EventTime,
    /// Last watermark forwarded downstream.
    pub output_watermark: EventTime,
}

impl JoinBuffer {
    pub fn new() -> Self {
        Self {
            watermark: EVENT_TIME_MIN,
            output_watermark: EVENT_TIME_MIN,
            ..Default::default()
        }
    }

    pub fn num_pending_clicks(&self) -> usize {
        self.clicks.values().map(Vec::len).sum()
    }

    pub(super) fn buffer_click(&mut self, impression_id: &str, click: PendingClick) {
        self.timers.register(
            JoinTimer::Click {
                impression_id: impression_id.to_string(),
                click_id: click.click_id.clone(),
            },
            click.event_time.saturating_add(1),
        );
        self.clicks
            .entry(impression_id.to_string())
            .or_default()
            .push(click);
    }

    /// Remove and return the buffered clicks of `impression_id` that fall inside
    /// `[impression_time, impression_time + bound]`, cancelling their timers.
    pub(super) fn take_matching_clicks(
        &mut self,
        impression_id: &str,
        impression_time: EventTime,
        bound_ms: i64,
    ) -> Vec<PendingClick> {
        let Some(waiting) = self.clicks.get_mut(impression_id) else {
            return Vec::new();
        };
        let (matched, rest): (Vec<_>, Vec<_>) = waiting
            .drain(..)
            .partition(|c| within_bound(impression_time, c.event_time, bound_ms));
        if rest.is_empty() {
            self.clicks.remove(impression_id);
        } else {
            *waiting = rest;
        }
        for click in &matched {
            self.timers.delete(
                &JoinTimer::Click {
                    impression_id: impression_id.to_string(),
                    click_id: click.click_id.clone(),
                },
                click.event_time.saturating_add(1),
            );
        }
        matched
    }

    pub(super) fn is_click_buffered(&self, impression_id: &str, click_id: &str) -> bool {
        self.clicks
            .get(impression_id)
            .is_some_and(|waiting| waiting.iter().any(|c| c.click_id == click_id))
    }

    /// Drop the buffered click named by a fired timer. Returns whether it was
    /// still present.
    pub(super) fn evict_click(&mut self, impression_id: &str, click_id: &str) -> bool {
        let Some(waiting) = self.clicks.get_mut(impression_id) else {
            return false;
        };
        let before = waiting.len();
        waiting.retain(|c| c.click_id != click_id);
        let removed = waiting.len() != before;
        if waiting.is_empty() {
            self.clicks.remove(impression_id);
        }
        removed
    }
}

/// `click_time - impression_time` lies in `[0, bound]`.
pub fn within_bound(impression_time: EventTime, click_time: EventTime, bound_ms: i64) -> bool {
    match click_time.checked_sub(impression_time) {
        Some(delta) => (0..=bound_ms).contains(&delta),
        None => false,
    }
}
