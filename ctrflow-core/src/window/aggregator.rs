use super::*;

use crate::join::JoinOutput;
use crate::metrics::JobMetrics;
use crate::types::CtrRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AggregatorState {
    windows: HashMap<WindowKey, WindowAccumulator>,
    /// One timer per open window, at the window's max timestamp.
    timers: TimerService<WindowKey>,
    watermark: EventTime,
}

/// Distinct-count CTR aggregation over tumbling windows.
///
/// Join output is assigned to the window of its impression time. A window
/// is finalized once the watermark reaches its max timestamp: its
/// [`CtrRecord`] is emitted and the accumulator dropped. Output arriving for
/// an already-finalized window is late and only counted.
pub struct WindowAggregator {
    assigner: TumblingEventTimeWindows,
    state: AggregatorState,
    metrics: JobMetrics,
}

impl WindowAggregator {
    pub fn new(assigner: TumblingEventTimeWindows) -> Self {
        Self {
            assigner,
            state: AggregatorState {
                windows: HashMap::new(),
                timers: TimerService::new(),
                watermark: EVENT_TIME_MIN,
            },
            metrics: JobMetrics::default(),
        }
    }

    pub fn process(&mut self, record: JoinOutput) {
        let Some(window) = self.assigner.assign_window(record.impression_time()) else {
            // Unreachable through the source driver, which drops such events.
            self.metrics.late_pairs += 1;
            return;
        };
        if window.max_timestamp() <= self.state.watermark {
            self.metrics.late_pairs += 1;
            return;
        }
        let key = window.key_for(record.campaign_id());
        if !self.state.windows.contains_key(&key) {
            self.state
                .timers
                .register(key.clone(), window.max_timestamp());
        }
        let acc = self.state.windows.entry(key).or_default();
        match record {
            JoinOutput::Pair(pair) => {
                acc.impression_ids.insert(pair.impression_id);
                acc.click_ids.insert(pair.click_id);
            }
            JoinOutput::Impression(imp) => {
                acc.impression_ids.insert(imp.impression_id);
            }
        }
    }

    /// Advance event time and finalize every window it closes, in ascending
    /// window-end order (ties by key).
    pub fn on_watermark(&mut self, watermark: EventTime) -> Vec<CtrRecord> {
        if watermark <= self.state.watermark {
            return Vec::new();
        }
        self.state.watermark = watermark;

        let mut records = Vec::new();
        for (key, _) in self.state.timers.drain_due(watermark) {
            let Some(acc) = self.state.windows.remove(&key) else {
                continue;
            };
            if acc.impressions() == 0 {
                continue;
            }
            records.push(CtrRecord::from_counts(&key, acc.impressions(), acc.clicks()));
        }
        self.metrics.windows_emitted += records.len() as u64;
        records
    }

    pub fn current_watermark(&self) -> EventTime {
        self.state.watermark
    }

    pub fn num_open_windows(&self) -> usize {
        self.state.windows.len()
    }

    /// Current distinct counts of an open window.
    pub fn peek(&self, key: &WindowKey) -> Option<&WindowAccumulator> {
        self.state.windows.get(key)
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub fn snapshot_state(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.state).context("serialize window state failed")
    }

    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.state = bincode::deserialize(bytes).context("deserialize window state failed")?;
        Ok(())
    }
}
