use serde::{Deserialize, Serialize};

/// Event time in milliseconds since the Unix epoch.
pub type EventTime = i64;

/// Unique identifier for checkpoint barriers.
pub type CheckpointId = u64;

/// Watermark indicates that no elements with timestamp <= this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// Checkpoint barrier for Chandy-Lamport snapshots.
///
/// `timestamp` is the wall-clock time (ms) at which the coordinator triggered
/// the checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barrier {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
}

impl Barrier {
    /// Create a new checkpoint barrier with explicit timestamp.
    pub fn with_timestamp(checkpoint_id: CheckpointId, timestamp: EventTime) -> Self {
        Self {
            checkpoint_id,
            timestamp,
        }
    }
}

/// The unit flowing between tasks: data records, watermarks, barriers, and end markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StreamElement<T> {
    /// User data record. Records carry their own event time.
    Record(T),
    /// Watermark for event time progress tracking.
    Watermark(Watermark),
    /// Checkpoint barrier for consistent snapshots.
    CheckpointBarrier(Barrier),
    /// Orderly end of the stream. Does not imply a flush of open state.
    End,
}

impl<T> StreamElement<T> {
    /// Create a record element.
    pub fn record(value: T) -> Self {
        Self::Record(value)
    }

    /// Create a watermark element.
    pub fn watermark(timestamp: EventTime) -> Self {
        Self::Watermark(Watermark::new(timestamp))
    }

    /// Create a checkpoint barrier element with explicit timestamp.
    pub fn barrier_with_timestamp(checkpoint_id: CheckpointId, timestamp: EventTime) -> Self {
        Self::CheckpointBarrier(Barrier::with_timestamp(checkpoint_id, timestamp))
    }
}

// --- Domain records ---

/// An ad impression. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImpressionEvent {
    pub impression_id: String,
    pub campaign_id: String,
    pub event_time: EventTime,
}

impl ImpressionEvent {
    pub fn new(
        impression_id: impl Into<String>,
        campaign_id: impl Into<String>,
        event_time: EventTime,
    ) -> Self {
        Self {
            impression_id: impression_id.into(),
            campaign_id: campaign_id.into(),
            event_time,
        }
    }
}

/// A click on a previously served impression. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClickEvent {
    pub click_id: String,
    pub impression_id: String,
    pub event_time: EventTime,
}

impl ClickEvent {
    pub fn new(
        click_id: impl Into<String>,
        impression_id: impl Into<String>,
        event_time: EventTime,
    ) -> Self {
        Self {
            click_id: click_id.into(),
            impression_id: impression_id.into(),
            event_time,
        }
    }
}

/// The two input streams.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InputStream {
    Impressions,
    Clicks,
}

impl InputStream {
    /// Index of the stream in per-stream tables.
    pub fn index(self) -> usize {
        match self {
            InputStream::Impressions => 0,
            InputStream::Clicks => 1,
        }
    }
}

impl std::fmt::Display for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputStream::Impressions => f.write_str("impressions"),
            InputStream::Clicks => f.write_str("clicks"),
        }
    }
}

/// An event read from either input stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InputEvent {
    Impression(ImpressionEvent),
    Click(ClickEvent),
}

impl InputEvent {
    pub fn impression(
        impression_id: impl Into<String>,
        campaign_id: impl Into<String>,
        event_time: EventTime,
    ) -> Self {
        Self::Impression(ImpressionEvent::new(impression_id, campaign_id, event_time))
    }

    pub fn click(
        click_id: impl Into<String>,
        impression_id: impl Into<String>,
        event_time: EventTime,
    ) -> Self {
        Self::Click(ClickEvent::new(click_id, impression_id, event_time))
    }

    pub fn event_time(&self) -> EventTime {
        match self {
            InputEvent::Impression(imp) => imp.event_time,
            InputEvent::Click(click) => click.event_time,
        }
    }

    pub fn stream(&self) -> InputStream {
        match self {
            InputEvent::Impression(_) => InputStream::Impressions,
            InputEvent::Click(_) => InputStream::Clicks,
        }
    }

    /// The join key shared by both streams.
    pub fn impression_id(&self) -> &str {
        match self {
            InputEvent::Impression(imp) => &imp.impression_id,
            InputEvent::Click(click) => &click.impression_id,
        }
    }
}

/// A click matched to the impression it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JoinedPair {
    pub impression_id: String,
    pub campaign_id: String,
    pub impression_time: EventTime,
    pub click_id: String,
    pub click_time: EventTime,
}

/// Aggregation key: one campaign in one tumbling window `[window_start, window_end)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub campaign_id: String,
    pub window_start: EventTime,
    pub window_end: EventTime,
}

impl WindowKey {
    pub fn new(campaign_id: impl Into<String>, window_start: EventTime, window_end: EventTime) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            window_start,
            window_end,
        }
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.window_end - 1
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@[{}, {})",
            self.campaign_id, self.window_start, self.window_end
        )
    }
}

/// Finalized CTR of one campaign window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CtrRecord {
    pub campaign_id: String,
    pub window_start: EventTime,
    pub window_end: EventTime,
    pub impressions: i64,
    pub clicks: i64,
    pub ctr: f64,
}

impl CtrRecord {
    /// Build a record from distinct counts. `impressions` must be positive.
    pub fn from_counts(key: &WindowKey, impressions: i64, clicks: i64) -> Self {
        debug_assert!(impressions > 0, "ctr undefined for an empty window");
        Self {
            campaign_id: key.campaign_id.clone(),
            window_start: key.window_start,
            window_end: key.window_end,
            impressions,
            clicks,
            ctr: clicks as f64 / impressions as f64,
        }
    }

    pub fn key(&self) -> WindowKey {
        WindowKey::new(self.campaign_id.clone(), self.window_start, self.window_end)
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
