use super::*;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. A watermark at this value flushes everything.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// Watermark generator for a stream whose events arrive out of order by at most
/// `max_delay`.
///
/// The watermark is `max_seen_timestamp - max_delay`, so the system waits
/// `max_delay` before treating any timestamp as complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundedOutOfOrderness {
    max_delay_ms: i64,
    max_seen_timestamp: EventTime,
}

impl BoundedOutOfOrderness {
    /// Create a generator with the given maximum out-of-order delay.
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay_ms: max_delay.as_millis() as i64,
            max_seen_timestamp: EVENT_TIME_MIN,
        }
    }

    /// Notify the generator that an event with the given timestamp was observed.
    pub fn on_event(&mut self, timestamp: EventTime) {
        if timestamp > self.max_seen_timestamp {
            self.max_seen_timestamp = timestamp;
        }
    }

    /// Return the current watermark, or `None` if no event has been seen yet.
    pub fn current_watermark(&self) -> Option<Watermark> {
        if self.max_seen_timestamp == EVENT_TIME_MIN {
            return None;
        }
        Some(Watermark::new(
            self.max_seen_timestamp.saturating_sub(self.max_delay_ms),
        ))
    }
}

/// Outcome of offering an input event to [`InputWatermarks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `event_time <= current watermark`: the event must be dropped.
    Late,
    /// The event is on time. Carries the new combined watermark if it advanced.
    Admitted(Option<Watermark>),
}

/// Event-time progress of the two input streams.
///
/// Each stream has its own bounded-out-of-orderness generator; the combined
/// watermark is the minimum of both, tracked by a [`WatermarkTracker`] so it
/// never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputWatermarks {
    generators: [BoundedOutOfOrderness; 2],
    tracker: WatermarkTracker,
}

impl InputWatermarks {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            generators: [
                BoundedOutOfOrderness::new(allowed_lateness),
                BoundedOutOfOrderness::new(allowed_lateness),
            ],
            tracker: WatermarkTracker::new(2),
        }
    }

    /// Classify `event` against the current combined watermark and, if it is
    /// on time, fold its timestamp into its stream's progress.
    pub fn observe(&mut self, event: &InputEvent) -> Admission {
        let ts = event.event_time();
        if ts <= self.tracker.current_min_timestamp() {
            return Admission::Late;
        }
        let stream = event.stream();
        let generator = &mut self.generators[stream.index()];
        generator.on_event(ts);
        let advanced = generator
            .current_watermark()
            .and_then(|wm| self.tracker.advance(stream.index(), wm));
        Admission::Admitted(advanced)
    }

    /// Combined watermark timestamp (`EVENT_TIME_MIN` until both streams progressed).
    pub fn current_timestamp(&self) -> EventTime {
        self.tracker.current_min_timestamp()
    }
}
