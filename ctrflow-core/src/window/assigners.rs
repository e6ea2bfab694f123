use super::*;

/// Fixed-size, non-overlapping event-time windows aligned to multiples of
/// `size` from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingEventTimeWindows {
    size_ms: i64,
}

impl TumblingEventTimeWindows {
    /// Create tumbling windows of the given `size`.
    pub fn of(size: Duration) -> Self {
        Self::of_millis(size.as_millis() as i64)
    }

    pub fn of_millis(size_ms: i64) -> Self {
        debug_assert!(size_ms > 0, "window size must be positive");
        Self { size_ms }
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// The window containing `timestamp`. Floor semantics also hold for
    /// timestamps before the epoch.
    ///
    /// Returns `None` when the window would not fit in the `i64` millisecond
    /// range, which only happens within one window size of either end.
    pub fn assign_window(&self, timestamp: EventTime) -> Option<TimeWindow> {
        let start = timestamp.checked_sub(timestamp.rem_euclid(self.size_ms))?;
        let end = start.checked_add(self.size_ms)?;
        Some(TimeWindow::new(start, end))
    }

    pub fn window_key(&self, campaign_id: &str, timestamp: EventTime) -> Option<WindowKey> {
        self.assign_window(timestamp)
            .map(|window| window.key_for(campaign_id))
    }
}
