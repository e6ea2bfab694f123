use super::*;

/// A half-open event-time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: EventTime,
    pub end: EventTime,
}

impl TimeWindow {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    /// The maximum timestamp that belongs to this window.
    /// A window fires when watermark >= max_timestamp().
    pub fn max_timestamp(&self) -> EventTime {
        self.end - 1
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn key_for(&self, campaign_id: impl Into<String>) -> WindowKey {
        WindowKey::new(campaign_id, self.start, self.end)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeWindow([{}, {}))", self.start, self.end)
    }
}

/// Distinct ids seen for one campaign window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowAccumulator {
    pub impression_ids: HashSet<String>,
    pub click_ids: HashSet<String>,
}

impl WindowAccumulator {
    pub fn impressions(&self) -> i64 {
        self.impression_ids.len() as i64
    }

    pub fn clicks(&self) -> i64 {
        self.click_ids.len() as i64
    }
}
