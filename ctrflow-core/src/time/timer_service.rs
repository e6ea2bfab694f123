use super::*;

/// Manages event-time timers for a single operator subtask.
///
/// Timers are sorted by fire time in a `BTreeMap`, enabling O(log n) range
/// scans. The service is part of operator state and is snapshotted with it.
///
/// # Invariant
/// A `(key, fire_at)` pair is registered at most once; re-registering the
/// same pair is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: Deserialize<'de> + Ord"
))]
pub struct TimerService<K: Ord> {
    timers: BTreeMap<EventTime, BTreeSet<K>>,
}

impl<K: Ord> TimerService<K> {
    /// Create an empty `TimerService`.
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
        }
    }

    /// Register an event-time timer for `key` to fire at `fire_at`.
    pub fn register(&mut self, key: K, fire_at: EventTime) {
        self.timers.entry(fire_at).or_default().insert(key);
    }

    /// Cancel an event-time timer. No-op if the pair was not registered.
    pub fn delete(&mut self, key: &K, fire_at: EventTime) {
        if let Some(keys) = self.timers.get_mut(&fire_at) {
            keys.remove(key);
            if keys.is_empty() {
                self.timers.remove(&fire_at);
            }
        }
    }

    /// Drain and return all timers with `fire_at <= watermark_ts`.
    ///
    /// The returned vector contains `(key, fire_at)` pairs in ascending
    /// `fire_at` order, keys ascending within one fire time.
    pub fn drain_due(&mut self, watermark_ts: EventTime) -> Vec<(K, EventTime)> {
        let fire_times: Vec<EventTime> = self
            .timers
            .range(..=watermark_ts)
            .map(|(ts, _)| *ts)
            .collect();

        let mut fired = Vec::new();
        for fire_at in fire_times {
            if let Some(keys) = self.timers.remove(&fire_at) {
                fired.extend(keys.into_iter().map(|key| (key, fire_at)));
            }
        }
        fired
    }

    /// Return the total count of registered `(key, fire_at)` pairs.
    pub fn len(&self) -> usize {
        self.timers.values().map(|keys| keys.len()).sum()
    }

    /// Return `true` if no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<K: Ord> Default for TimerService<K> {
    fn default() -> Self {
        Self::new()
    }
}
