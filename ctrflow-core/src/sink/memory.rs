use super::*;

#[derive(Debug, Default)]
struct MemorySinkState {
    records: BTreeMap<WindowKey, CtrRecord>,
    writes: u64,
    flushes: u64,
}

/// Sink keeping records in a shared map keyed by [`WindowKey`].
///
/// Clones share the same map, so a test can keep one handle while the job
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current records in key order.
    pub fn records(&self) -> Vec<CtrRecord> {
        self.with_state(|s| s.records.values().cloned().collect())
    }

    pub fn get(&self, key: &WindowKey) -> Option<CtrRecord> {
        self.with_state(|s| s.records.get(key).cloned())
    }

    /// Number of writes, counting overwrites.
    pub fn write_count(&self) -> u64 {
        self.with_state(|s| s.writes)
    }

    pub fn flush_count(&self) -> u64 {
        self.with_state(|s| s.flushes)
    }

    fn with_state<R>(&self, f: impl FnOnce(&MemorySinkState) -> R) -> R {
        // A poisoned map is still readable; it only means a writer panicked.
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemorySinkState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: &CtrRecord) -> Result<()> {
        let mut state = self.lock()?;
        state.writes += 1;
        state.records.insert(record.key(), record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.lock()?.flushes += 1;
        Ok(())
    }
}
