use super::*;

/// Tracks per-channel watermarks and computes the global minimum.
///
/// An operator with several inputs can only advance its event-time clock to
/// the minimum of all channel watermarks, because a lower-watermark channel
/// might still deliver events with earlier timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatermarkTracker {
    /// Per-channel last-seen watermark timestamp. Starts at EVENT_TIME_MIN.
    channel_watermarks: Vec<EventTime>,
    /// The global min watermark timestamp last emitted downstream.
    current_min: EventTime,
}

impl WatermarkTracker {
    /// Create a tracker for `num_channels` upstream input channels.
    pub fn new(num_channels: usize) -> Self {
        Self {
            channel_watermarks: vec![EVENT_TIME_MIN; num_channels],
            current_min: EVENT_TIME_MIN,
        }
    }

    /// Notify the tracker that `channel_id` received a new watermark.
    ///
    /// Returns `Some(watermark)` if the global min has advanced and the
    /// downstream should receive a new watermark. Returns `None` if unchanged.
    ///
    /// A watermark below the current global minimum is clamped to it, so the
    /// global watermark never regresses.
    pub fn advance(&mut self, channel_id: usize, watermark: Watermark) -> Option<Watermark> {
        let slot = &mut self.channel_watermarks[channel_id];
        *slot = watermark.timestamp.max(*slot).max(self.current_min);
        let new_min = self.compute_min();
        if new_min > self.current_min {
            self.current_min = new_min;
            Some(Watermark::new(new_min))
        } else {
            None
        }
    }

    /// Return the current global minimum watermark timestamp.
    pub fn current_min_timestamp(&self) -> EventTime {
        self.current_min
    }

    /// Number of tracked channels.
    pub fn num_channels(&self) -> usize {
        self.channel_watermarks.len()
    }

    fn compute_min(&self) -> EventTime {
        self.channel_watermarks
            .iter()
            .copied()
            .min()
            .unwrap_or(EVENT_TIME_MIN)
    }
}
