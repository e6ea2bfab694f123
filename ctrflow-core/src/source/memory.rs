use super::*;

/// Source over an in-memory event list, replayed in list order.
///
/// The list order is the arrival order, so tests can interleave the two
/// streams (and deliver events out of order) exactly as they like.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Vec<InputEvent>,
    next: usize,
    position: SourcePosition,
}

impl MemorySource {
    pub fn new(events: Vec<InputEvent>) -> Self {
        Self {
            events,
            next: 0,
            position: SourcePosition::default(),
        }
    }

    /// Merge two per-stream lists by event time (ties go to the impression),
    /// keeping each list's own order.
    pub fn from_streams(impressions: Vec<ImpressionEvent>, clicks: Vec<ClickEvent>) -> Self {
        let mut events = Vec::with_capacity(impressions.len() + clicks.len());
        let mut imps = impressions.into_iter().peekable();
        let mut clks = clicks.into_iter().peekable();
        loop {
            let take_impression = match (imps.peek(), clks.peek()) {
                (Some(imp), Some(click)) => imp.event_time <= click.event_time,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let event = if take_impression {
                imps.next().map(InputEvent::Impression)
            } else {
                clks.next().map(InputEvent::Click)
            };
            events.extend(event);
        }
        Self::new(events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource for MemorySource {
    fn poll(&mut self) -> Result<SourcePoll> {
        let Some(event) = self.events.get(self.next) else {
            return Ok(SourcePoll::Exhausted);
        };
        self.next += 1;
        self.position.advance(event.stream(), 1);
        Ok(SourcePoll::Event(event.clone()))
    }

    fn position(&self) -> SourcePosition {
        self.position
    }

    fn seek(&mut self, position: SourcePosition) -> Result<()> {
        let target = (position.impressions + position.clicks) as usize;
        if target > self.events.len() {
            bail!(
                "position {} is past the end of a {}-event source",
                position,
                self.events.len()
            );
        }
        let mut reached = SourcePosition::default();
        for event in &self.events[..target] {
            reached.advance(event.stream(), 1);
        }
        if reached != position {
            bail!("position {} does not match this source (prefix has {})", position, reached);
        }
        self.next = target;
        self.position = position;
        Ok(())
    }
}
